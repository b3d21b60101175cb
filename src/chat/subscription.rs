use serde_json::Value;

use crate::common::types::{Thread, ThreadId};
use crate::error::WriteError;
use crate::storage::{DocKey, DocumentStore, DocumentSubscription};

/// Live copy of one thread. Every notification replaces the whole thread;
/// dropping the subscription unsubscribes.
pub struct ThreadSubscription {
    thread_id: ThreadId,
    inner: DocumentSubscription,
    current: Thread,
}

impl ThreadSubscription {
    pub fn open(store: &dyn DocumentStore, thread_id: ThreadId) -> Result<Self, WriteError> {
        let inner = store.subscribe(&DocKey::thread(&thread_id))?;
        let current = decode_thread(&thread_id, inner.current());
        log::info!("Subscribed to thread {thread_id}");

        Ok(Self {
            thread_id,
            inner,
            current,
        })
    }

    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    pub fn current(&self) -> &Thread {
        &self.current
    }

    /// Wait for the next snapshot. `None` once the store stops delivering.
    pub async fn next(&mut self) -> Option<&Thread> {
        let value = self.inner.changed().await?;
        self.current = decode_thread(&self.thread_id, value);
        Some(&self.current)
    }
}

impl Drop for ThreadSubscription {
    fn drop(&mut self) {
        log::debug!("Unsubscribed from thread {}", self.thread_id);
    }
}

fn decode_thread(thread_id: &ThreadId, value: Option<Value>) -> Thread {
    match value {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|err| {
            log::warn!("Thread {thread_id} could not be decoded: {err}");
            Thread::default()
        }),
        None => Thread::default(),
    }
}
