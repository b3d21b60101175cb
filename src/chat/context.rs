use crate::common::types::{ThreadId, UserChatSummary, UserId, UserProfile};
use crate::error::WriteError;
use crate::storage::{DocKey, DocumentStore};

/// The signed-in user, handed to every component that acts on their behalf.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: UserProfile,
}

impl SessionContext {
    pub fn new(user: UserProfile) -> Self {
        Self { user }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    pub async fn load(store: &dyn DocumentStore, user_id: &UserId) -> Result<Self, WriteError> {
        Ok(Self::new(load_profile(store, user_id).await?))
    }
}

/// The thread currently open, with the other participant's profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveThreadContext {
    pub thread_id: ThreadId,
    pub receiver: UserProfile,
}

impl ActiveThreadContext {
    pub fn new(thread_id: ThreadId, receiver: UserProfile) -> Self {
        Self { thread_id, receiver }
    }

    /// Resolve the other participant of `thread_id` from the user's chat summary.
    pub async fn resolve(
        store: &dyn DocumentStore,
        session: &SessionContext,
        thread_id: &ThreadId,
    ) -> Result<Self, WriteError> {
        let key = DocKey::user_chats(session.user_id());
        let summary: UserChatSummary = store
            .get(&key)
            .await?
            .decode()?
            .ok_or_else(|| WriteError::NotFound(key.to_string()))?;
        let entry = summary
            .entry(thread_id)
            .ok_or_else(|| WriteError::NotFound(format!("{key} entry {thread_id}")))?;

        let receiver = load_profile(store, &entry.receiver_id).await?;
        Ok(Self::new(thread_id.clone(), receiver))
    }

    pub fn is_current_user_blocked(&self, session: &SessionContext) -> bool {
        self.receiver.has_blocked(session.user_id())
    }

    pub fn is_receiver_blocked(&self, session: &SessionContext) -> bool {
        session.user.has_blocked(&self.receiver.id)
    }

    /// Either side has blocked the other; the composer is disabled.
    pub fn is_blocked(&self, session: &SessionContext) -> bool {
        self.is_current_user_blocked(session) || self.is_receiver_blocked(session)
    }
}

pub async fn load_profile(
    store: &dyn DocumentStore,
    user_id: &UserId,
) -> Result<UserProfile, WriteError> {
    let key = DocKey::user(user_id);
    store
        .get(&key)
        .await?
        .decode()?
        .ok_or_else(|| WriteError::NotFound(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn profile(id: &str, blocked: &[&str]) -> UserProfile {
        UserProfile {
            id: UserId::new(id),
            username: id.to_string(),
            email: format!("{id}@example.com"),
            avatar_url: None,
            blocked: blocked.iter().map(|b| UserId::new(*b)).collect::<BTreeSet<_>>(),
            online: false,
        }
    }

    #[test]
    fn blocking_works_in_both_directions() {
        let active = ActiveThreadContext::new(ThreadId::new("t1"), profile("bob", &["alice"]));
        let session = SessionContext::new(profile("alice", &[]));
        assert!(active.is_current_user_blocked(&session));
        assert!(!active.is_receiver_blocked(&session));
        assert!(active.is_blocked(&session));

        let active = ActiveThreadContext::new(ThreadId::new("t1"), profile("bob", &[]));
        let session = SessionContext::new(profile("alice", &["bob"]));
        assert!(active.is_receiver_blocked(&session));
        assert!(active.is_blocked(&session));

        let session = SessionContext::new(profile("alice", &[]));
        assert!(!active.is_blocked(&session));
    }
}
