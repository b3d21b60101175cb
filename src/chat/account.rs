use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::context::SessionContext;
use crate::common::types::{
    ChatSummaryEntry, Thread, ThreadId, UserChatSummary, UserId, UserProfile, now_millis,
};
use crate::error::{AccountError, AuthError, WriteError};
use crate::network::{AuthProvider, BlobPayload, BlobStore, Session};
use crate::storage::document_store::commit_with_retry;
use crate::storage::{DocKey, DocumentStore, Precondition, WriteBatch};

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email pattern"));

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub avatar: Option<BlobPayload>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.username.trim().is_empty() {
            return Err(AuthError::InvalidInput("A username is required.".to_string()));
        }
        validate_credentials(&self.email, &self.password)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword);
        }
        Ok(())
    }
}

fn validate_credentials(email: &str, password: &str) -> Result<(), AuthError> {
    if !EMAIL_PATTERN.is_match(email.trim()) {
        return Err(AuthError::InvalidInput(
            "The email address is badly formatted.".to_string(),
        ));
    }
    if password.is_empty() {
        return Err(AuthError::InvalidInput("A password is required.".to_string()));
    }
    Ok(())
}

/// Registration, sign-in and the profile/thread bookkeeping around them.
pub struct AccountService {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    max_commit_attempts: u32,
}

impl AccountService {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        max_commit_attempts: u32,
    ) -> Self {
        Self {
            auth,
            store,
            blobs,
            max_commit_attempts,
        }
    }

    /// Create the account, then its profile and an empty chat summary.
    pub async fn register(&self, request: RegisterRequest) -> Result<UserProfile, AccountError> {
        request.validate()?;

        let email = request.email.trim();
        let user_id = self.auth.create_account(email, &request.password).await?;

        let avatar_url = match &request.avatar {
            Some(avatar) => Some(self.blobs.upload(avatar).await?),
            None => None,
        };

        let profile = UserProfile {
            id: user_id.clone(),
            username: request.username.trim().to_string(),
            email: email.to_string(),
            avatar_url,
            blocked: BTreeSet::new(),
            online: false,
        };

        let mut batch = WriteBatch::new();
        batch
            .set(
                DocKey::user(&user_id),
                serde_json::to_value(&profile)?,
                Precondition::None,
            )
            .set(
                DocKey::user_chats(&user_id),
                serde_json::to_value(UserChatSummary::default())?,
                Precondition::None,
            );
        self.store.commit(batch).await?;

        log::info!("Registered {} as {}", profile.username, user_id);
        Ok(profile)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AccountError> {
        validate_credentials(email, password)?;
        let session = self.auth.sign_in(email.trim(), password).await?;
        log::info!("Signed in as {}", session.user_id);
        Ok(session)
    }

    /// Start a new thread between the current user and `other`, listing it in
    /// both chat summaries.
    pub async fn open_thread(
        &self,
        session: &SessionContext,
        other: &UserId,
    ) -> Result<ThreadId, AccountError> {
        let me = session.user_id();
        if me == other {
            return Err(AccountError::Write(WriteError::Malformed(
                DocKey::user_chats(me).to_string(),
                "cannot open a thread with yourself".to_string(),
            )));
        }

        let thread_id = ThreadId::generate();
        let created_at = now_millis();
        let thread = serde_json::to_value(Thread {
            created_at: Some(created_at),
            messages: Vec::new(),
        })?;

        let thread_id_ref = &thread_id;
        let thread_ref = &thread;
        let store = self.store.as_ref();
        commit_with_retry(store, self.max_commit_attempts, move || async move {
            let mut batch = WriteBatch::new();
            batch.set(DocKey::thread(thread_id_ref), thread_ref.clone(), Precondition::Missing);

            for (owner, receiver) in [(me, other), (other, me)] {
                let key = DocKey::user_chats(owner);
                let snapshot = store.get(&key).await?;
                let mut summary: UserChatSummary = snapshot
                    .decode()?
                    .ok_or_else(|| WriteError::NotFound(key.to_string()))?;
                summary.chats.push(ChatSummaryEntry {
                    chat_id: thread_id_ref.clone(),
                    receiver_id: receiver.clone(),
                    last_message: String::new(),
                    is_seen: owner == me,
                    updated_at: created_at,
                });
                batch.set(
                    key,
                    serde_json::to_value(&summary)?,
                    Precondition::Version(snapshot.version),
                );
            }

            Ok::<_, WriteError>(batch)
        })
        .await?;

        log::info!("Opened thread {thread_id} between {me} and {other}");
        Ok(thread_id)
    }

    pub async fn block(
        &self,
        session: &SessionContext,
        other: &UserId,
    ) -> Result<UserProfile, AccountError> {
        self.edit_blocked(session.user_id(), |blocked| {
            blocked.insert(other.clone());
        })
        .await
    }

    pub async fn unblock(
        &self,
        session: &SessionContext,
        other: &UserId,
    ) -> Result<UserProfile, AccountError> {
        self.edit_blocked(session.user_id(), |blocked| {
            blocked.remove(other);
        })
        .await
    }

    async fn edit_blocked<F>(&self, user_id: &UserId, edit: F) -> Result<UserProfile, AccountError>
    where
        F: Fn(&mut BTreeSet<UserId>),
    {
        let key = DocKey::user(user_id);
        let key_ref = &key;
        let edit = &edit;
        let store = self.store.as_ref();

        commit_with_retry(store, self.max_commit_attempts, move || async move {
            let snapshot = store.get(key_ref).await?;
            let mut profile: UserProfile = snapshot
                .decode()?
                .ok_or_else(|| WriteError::NotFound(key_ref.to_string()))?;
            edit(&mut profile.blocked);

            let mut batch = WriteBatch::new();
            batch.set(
                key_ref.clone(),
                serde_json::to_value(&profile)?,
                Precondition::Version(snapshot.version),
            );
            Ok::<_, WriteError>(batch)
        })
        .await?;

        Ok(super::context::load_profile(store, user_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            avatar: None,
        }
    }

    #[test]
    fn validates_registration_input() {
        assert!(request("alice", "alice@example.com", "secret1").validate().is_ok());
        assert!(matches!(
            request("  ", "alice@example.com", "secret1").validate(),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            request("alice", "not-an-email", "secret1").validate(),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            request("alice", "alice@example.com", "123").validate(),
            Err(AuthError::WeakPassword)
        ));
    }
}
