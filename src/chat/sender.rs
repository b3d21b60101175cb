//! Sending messages into a thread.
//!
//! The thread append and both participants' chat summary updates are
//! committed as one batch. Each summary write is guarded by the version it
//! was read at, so a concurrent writer forces a fresh read instead of being
//! overwritten.

use std::sync::Arc;

use futures::future::try_join;
use serde_json::Value;

use super::composer::{AudioClip, DraftComposer};
use super::context::{ActiveThreadContext, SessionContext};
use crate::common::types::{Message, ThreadId, UserChatSummary, UserId, now_millis};
use crate::config::AppConfig;
use crate::error::{SendError, WriteError};
use crate::network::{BlobPayload, BlobStore};
use crate::storage::document_store::{Write, WriteOp, commit_with_retry};
use crate::storage::{DocKey, DocumentStore, Precondition, Snapshot, WriteBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    pub max_commit_attempts: u32,
    /// Audio messages historically skip the chat summary update.
    pub audio_updates_summaries: bool,
    pub preserve_draft_on_failure: bool,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            max_commit_attempts: 5,
            audio_updates_summaries: false,
            preserve_draft_on_failure: false,
        }
    }
}

impl From<&AppConfig> for SendPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_commit_attempts: config.max_commit_attempts,
            audio_updates_summaries: config.audio_updates_summaries,
            preserve_draft_on_failure: config.preserve_draft_on_failure,
        }
    }
}

pub struct MessageSender {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    session: SessionContext,
    policy: SendPolicy,
}

impl MessageSender {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        session: SessionContext,
        policy: SendPolicy,
    ) -> Self {
        Self {
            store,
            blobs,
            session,
            policy,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn policy(&self) -> SendPolicy {
        self.policy
    }

    /// Send the composer's draft. Returns `Ok(None)` without touching any
    /// collaborator when there is nothing to send.
    pub async fn send_draft(
        &self,
        active: &ActiveThreadContext,
        composer: &mut DraftComposer,
    ) -> Result<Option<Message>, SendError> {
        if !composer.is_sendable() {
            return Ok(None);
        }

        let result = self.deliver_draft(active, composer).await;
        match &result {
            Ok(message) => {
                log::info!(
                    "Sent message to thread {} ({})",
                    active.thread_id,
                    message.preview()
                );
                composer.clear();
            }
            Err(err) => {
                log::error!("Failed to send message to thread {}: {err}", active.thread_id);
                if !self.policy.preserve_draft_on_failure {
                    composer.clear();
                }
            }
        }

        result.map(Some)
    }

    async fn deliver_draft(
        &self,
        active: &ActiveThreadContext,
        composer: &DraftComposer,
    ) -> Result<Message, SendError> {
        self.ensure_not_blocked(active)?;

        let image_url = match composer.image() {
            Some(image) => Some(self.upload(&image.payload).await?),
            None => None,
        };
        let audio_url = match composer.audio() {
            Some(clip) => Some(self.upload(&clip.payload).await?),
            None => None,
        };

        let message = Message {
            sender_id: self.session.user_id().clone(),
            text: composer.has_text().then(|| composer.text().to_string()),
            image_url,
            audio_url,
            created_at: now_millis(),
        };

        self.commit_with_fan_out(active, &message).await?;
        Ok(message)
    }

    /// Send a finished recording on its own. Empty captures are dropped.
    pub async fn send_audio(
        &self,
        active: &ActiveThreadContext,
        clip: &AudioClip,
    ) -> Result<Option<Message>, SendError> {
        if clip.is_empty() {
            log::debug!("Ignoring empty audio capture");
            return Ok(None);
        }

        let result = self.deliver_audio(active, clip).await;
        if let Err(err) = &result {
            log::error!("Failed to send audio to thread {}: {err}", active.thread_id);
        }
        result.map(Some)
    }

    async fn deliver_audio(
        &self,
        active: &ActiveThreadContext,
        clip: &AudioClip,
    ) -> Result<Message, SendError> {
        self.ensure_not_blocked(active)?;

        let message = Message {
            sender_id: self.session.user_id().clone(),
            text: None,
            image_url: None,
            audio_url: Some(self.upload(&clip.payload).await?),
            created_at: now_millis(),
        };

        if self.policy.audio_updates_summaries {
            self.commit_with_fan_out(active, &message).await?;
        } else {
            let value = serde_json::to_value(&message)?;
            self.store
                .append(&DocKey::thread(&active.thread_id), "messages", vec![value])
                .await?;
        }

        log::info!("Sent audio message to thread {}", active.thread_id);
        Ok(message)
    }

    fn ensure_not_blocked(&self, active: &ActiveThreadContext) -> Result<(), SendError> {
        if active.is_blocked(&self.session) {
            log::warn!(
                "Refusing to send in thread {}: a participant is blocked",
                active.thread_id
            );
            return Err(SendError::Blocked);
        }
        Ok(())
    }

    async fn upload(&self, payload: &BlobPayload) -> Result<String, SendError> {
        self.blobs.upload(payload).await.map_err(|err| {
            log::error!("Upload of {} failed: {err}", payload.file_name);
            SendError::Upload(err)
        })
    }

    async fn commit_with_fan_out(
        &self,
        active: &ActiveThreadContext,
        message: &Message,
    ) -> Result<(), WriteError> {
        let message_value = serde_json::to_value(message)?;
        let message_value = &message_value;
        let thread_id = &active.thread_id;
        let sender = self.session.user_id();
        let receiver = &active.receiver.id;

        commit_with_retry(self.store.as_ref(), self.policy.max_commit_attempts, move || {
            self.fan_out_batch(thread_id, sender, receiver, message_value, message)
        })
        .await
    }

    async fn fan_out_batch(
        &self,
        thread_id: &ThreadId,
        sender: &UserId,
        receiver: &UserId,
        message_value: &Value,
        message: &Message,
    ) -> Result<WriteBatch, WriteError> {
        let mut batch = WriteBatch::new();
        batch.append(DocKey::thread(thread_id), "messages", vec![message_value.clone()]);

        if sender == receiver {
            let snapshot = self.store.get(&DocKey::user_chats(sender)).await?;
            if let Some(write) = summary_write(&snapshot, thread_id, message)? {
                batch.push(write);
            }
            return Ok(batch);
        }

        let (first, second) = try_join(
            self.store.get(&DocKey::user_chats(sender)),
            self.store.get(&DocKey::user_chats(receiver)),
        )
        .await?;

        for snapshot in [first, second] {
            if let Some(write) = summary_write(&snapshot, thread_id, message)? {
                batch.push(write);
            }
        }

        Ok(batch)
    }
}

/// Rewrite one participant's summary entry for `thread_id`, guarded by the
/// version it was read at. `None` when there is nothing to update.
fn summary_write(
    snapshot: &Snapshot,
    thread_id: &ThreadId,
    message: &Message,
) -> Result<Option<Write>, WriteError> {
    let Some(mut summary) = snapshot.decode::<UserChatSummary>()? else {
        log::warn!("No chat summary at {}; skipping", snapshot.key);
        return Ok(None);
    };

    let owner = UserId::new(snapshot.key.id.clone());
    let Some(entry) = summary.entry_mut(thread_id) else {
        log::warn!("Chat summary {} has no entry for thread {thread_id}; skipping", snapshot.key);
        return Ok(None);
    };

    entry.last_message = message.preview();
    entry.is_seen = owner == message.sender_id;
    entry.updated_at = message.created_at;

    Ok(Some(Write {
        key: snapshot.key.clone(),
        op: WriteOp::Set(serde_json::to_value(&summary)?),
        precondition: Precondition::Version(snapshot.version),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::ChatSummaryEntry;
    use chrono::DateTime;
    use serde_json::json;

    fn message(sender: &str) -> Message {
        Message {
            sender_id: UserId::new(sender),
            text: Some("hi".to_string()),
            image_url: None,
            audio_url: None,
            created_at: DateTime::from_timestamp_millis(2_000).unwrap(),
        }
    }

    fn snapshot(owner: &str, data: Option<Value>, version: u64) -> Snapshot {
        Snapshot {
            key: DocKey::user_chats(&UserId::new(owner)),
            data,
            version,
        }
    }

    #[test]
    fn summary_write_marks_only_sender_as_seen() {
        let summary = UserChatSummary {
            chats: vec![ChatSummaryEntry {
                chat_id: ThreadId::new("t1"),
                receiver_id: UserId::new("bob"),
                last_message: String::new(),
                is_seen: true,
                updated_at: DateTime::from_timestamp_millis(1_000).unwrap(),
            }],
        };
        let data = serde_json::to_value(&summary).unwrap();

        let thread_id = ThreadId::new("t1");
        let mine = snapshot("alice", Some(data.clone()), 3);
        let own = summary_write(&mine, &thread_id, &message("alice")).unwrap().unwrap();
        assert_eq!(own.precondition, Precondition::Version(3));
        let WriteOp::Set(value) = own.op else { panic!("expected a full overwrite") };
        assert_eq!(value["chats"][0]["isSeen"], json!(true));
        assert_eq!(value["chats"][0]["lastMessage"], json!("hi"));
        assert_eq!(value["chats"][0]["updatedAt"], json!(2_000));

        let theirs = snapshot("bob", Some(data), 1);
        let other = summary_write(&theirs, &thread_id, &message("alice")).unwrap().unwrap();
        let WriteOp::Set(value) = other.op else { panic!("expected a full overwrite") };
        assert_eq!(value["chats"][0]["isSeen"], json!(false));
    }

    #[test]
    fn summary_write_skips_missing_document_and_entry() {
        let thread_id = ThreadId::new("t1");
        let missing = snapshot("alice", None, 0);
        assert!(summary_write(&missing, &thread_id, &message("alice")).unwrap().is_none());

        let unlisted = snapshot("alice", Some(json!({ "chats": [] })), 1);
        assert!(summary_write(&unlisted, &thread_id, &message("alice")).unwrap().is_none());
    }
}
