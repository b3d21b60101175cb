#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Duration;

use luma_chat::chat::{ActiveThreadContext, Microphone, SessionContext};
use luma_chat::chat::recorder::AudioStream;
use luma_chat::common::{
    ChatSummaryEntry, Thread, ThreadId, UserChatSummary, UserId, UserProfile,
};
use luma_chat::error::{AuthError, MicAccessError, UploadError, WriteError};
use luma_chat::network::{AuthProvider, BlobPayload, BlobStore, Session};
use luma_chat::storage::{
    DocKey, DocumentStore, DocumentSubscription, Precondition, Snapshot, SqliteDocumentStore,
    WriteBatch,
};

pub const THREAD: &str = "t1";

/// Blob store that hands out predictable URLs, or rejects everything.
#[derive(Default)]
pub struct FakeBlobs {
    pub calls: AtomicUsize,
    pub reject: AtomicBool,
}

impl FakeBlobs {
    pub fn rejecting() -> Self {
        let blobs = Self::default();
        blobs.reject.store(true, Ordering::SeqCst);
        blobs
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload(&self, payload: &BlobPayload) -> Result<String, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.reject.load(Ordering::SeqCst) {
            return Err(UploadError::Rejected("quota exceeded".to_string()));
        }
        Ok(format!("https://blobs.test/{call}/{}", payload.file_name))
    }
}

/// Auth service backed by a fixed list of accounts.
#[derive(Default)]
pub struct FakeAuth {
    pub accounts: std::sync::Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn create_account(&self, email: &str, password: &str) -> Result<UserId, AuthError> {
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.iter().any(|(known, _)| known == email) {
            return Err(AuthError::EmailInUse);
        }
        accounts.push((email.to_string(), password.to_string()));
        Ok(UserId::new(format!("uid-{}", accounts.len())))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let accounts = self.accounts.lock().unwrap();
        let position = accounts
            .iter()
            .position(|(known, secret)| known == email && secret == password)
            .ok_or(AuthError::InvalidCredentials)?;
        Ok(Session {
            user_id: UserId::new(format!("uid-{}", position + 1)),
            email: email.to_string(),
            id_token: "id-token".to_string(),
            refresh_token: "refresh-token".to_string(),
            expires_at: luma_chat::common::types::now_millis() + Duration::hours(1),
        })
    }
}

/// Microphone that yields fixed bytes and counts streams still open.
pub struct FakeMicrophone {
    pub bytes: Vec<u8>,
    pub open_streams: Arc<AtomicUsize>,
}

impl FakeMicrophone {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct FakeStream {
    bytes: Vec<u8>,
    open_streams: Arc<AtomicUsize>,
}

impl Microphone for FakeMicrophone {
    fn open(&self) -> Result<Box<dyn AudioStream>, MicAccessError> {
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            bytes: self.bytes.clone(),
            open_streams: self.open_streams.clone(),
        }))
    }
}

impl AudioStream for FakeStream {
    fn finish(self: Box<Self>) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Wraps a store and lets a hook write to it right before each commit.
pub struct InterferingStore {
    pub inner: Arc<SqliteDocumentStore>,
    pub interference: std::sync::Mutex<Vec<WriteBatch>>,
    pub commits: AtomicUsize,
    pub reads: AtomicUsize,
}

impl InterferingStore {
    pub fn new(inner: Arc<SqliteDocumentStore>, interference: Vec<WriteBatch>) -> Self {
        Self {
            inner,
            interference: std::sync::Mutex::new(interference),
            commits: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentStore for InterferingStore {
    async fn get(&self, key: &DocKey) -> Result<Snapshot, WriteError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), WriteError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let pending = {
            let mut interference = self.interference.lock().unwrap();
            if interference.is_empty() {
                None
            } else {
                Some(interference.remove(0))
            }
        };
        if let Some(concurrent) = pending {
            self.inner.commit(concurrent).await?;
        }
        self.inner.commit(batch).await
    }

    fn subscribe(&self, key: &DocKey) -> Result<DocumentSubscription, WriteError> {
        self.inner.subscribe(key)
    }
}

pub fn profile(id: &str) -> UserProfile {
    UserProfile {
        id: UserId::new(id),
        username: id.to_string(),
        email: format!("{id}@example.com"),
        avatar_url: None,
        blocked: BTreeSet::new(),
        online: false,
    }
}

pub fn summary_with(thread: &str, receiver: &str) -> UserChatSummary {
    UserChatSummary {
        chats: vec![ChatSummaryEntry {
            chat_id: ThreadId::new(thread),
            receiver_id: UserId::new(receiver),
            last_message: String::new(),
            is_seen: true,
            updated_at: chrono::DateTime::from_timestamp_millis(0).unwrap(),
        }],
    }
}

/// alice and bob, both listing an empty thread `t1`.
pub async fn seeded_store() -> Arc<SqliteDocumentStore> {
    let store = Arc::new(SqliteDocumentStore::in_memory().unwrap());
    let mut batch = WriteBatch::new();
    for (owner, other) in [("alice", "bob"), ("bob", "alice")] {
        batch
            .set(
                DocKey::user(&UserId::new(owner)),
                serde_json::to_value(profile(owner)).unwrap(),
                Precondition::Missing,
            )
            .set(
                DocKey::user_chats(&UserId::new(owner)),
                serde_json::to_value(summary_with(THREAD, other)).unwrap(),
                Precondition::Missing,
            );
    }
    batch.set(
        DocKey::thread(&ThreadId::new(THREAD)),
        serde_json::to_value(Thread::default()).unwrap(),
        Precondition::Missing,
    );
    store.commit(batch).await.unwrap();
    store
}

pub fn alice_to_bob() -> (SessionContext, ActiveThreadContext) {
    (
        SessionContext::new(profile("alice")),
        ActiveThreadContext::new(ThreadId::new(THREAD), profile("bob")),
    )
}

pub async fn thread(store: &dyn DocumentStore) -> Thread {
    store
        .get(&DocKey::thread(&ThreadId::new(THREAD)))
        .await
        .unwrap()
        .decode()
        .unwrap()
        .unwrap()
}

pub async fn summary_entry(store: &dyn DocumentStore, owner: &str) -> ChatSummaryEntry {
    let summary: UserChatSummary = store
        .get(&DocKey::user_chats(&UserId::new(owner)))
        .await
        .unwrap()
        .decode()
        .unwrap()
        .unwrap();
    summary.entry(&ThreadId::new(THREAD)).unwrap().clone()
}
