use std::sync::Arc;

use serde_json::{Map, Value};

use crate::common::types::UserId;
use crate::storage::{DocKey, DocumentStore};

/// Writes the `online` flag on user profiles. Failures are logged, never returned.
#[derive(Clone)]
pub struct PresenceSetter {
    store: Arc<dyn DocumentStore>,
}

impl PresenceSetter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn set_online(&self, user_id: &UserId, online: bool) {
        let mut fields = Map::new();
        fields.insert("online".to_string(), Value::Bool(online));

        let status = if online { "online" } else { "offline" };
        match self.store.update(&DocKey::user(user_id), fields).await {
            Ok(()) => log::debug!("User {user_id} is now {status}"),
            Err(err) => log::error!("Failed to update user status for {user_id}: {err}"),
        }
    }

    /// Same as [`set_online`](Self::set_online) without waiting for the write.
    pub fn spawn_set_online(&self, user_id: UserId, online: bool) {
        let setter = self.clone();
        tokio::spawn(async move {
            setter.set_online(&user_id, online).await;
        });
    }
}
