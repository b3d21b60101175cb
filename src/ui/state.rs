use chrono::{DateTime, Utc};

use crate::chat::DraftComposer;
use crate::common::types::{Thread, ThreadId};

const MAX_NOTICES: usize = 100;

/// A transient notification shown to the user (toast).
#[derive(Debug, Clone)]
pub struct Notice {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Local state of the chat screen.
#[derive(Debug, Default)]
pub struct ClientState {
    pub composer: DraftComposer,
    pub thread_id: Option<ThreadId>,
    /// Last snapshot delivered by the thread subscription.
    pub thread: Thread,
    pub notices: Vec<Notice>,
}

impl ClientState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_thread(&mut self, thread_id: ThreadId, thread: Thread) {
        self.thread_id = Some(thread_id);
        self.thread = thread;
    }

    pub fn close_thread(&mut self) {
        self.thread_id = None;
        self.thread = Thread::default();
    }

    pub fn push_notice(&mut self, message: impl Into<String>) {
        self.notices.push(Notice {
            timestamp: Utc::now(),
            message: message.into(),
        });

        if self.notices.len() > MAX_NOTICES {
            self.notices.remove(0);
        }
    }
}
