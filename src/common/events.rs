use crate::common::types::{Message, Thread, ThreadId};

/// Events the chat client loop reports back to the front end.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    ThreadUpdated(ThreadId, Thread),
    MessageSent(Message),
    SendFailed(String),
    RecordingStarted,
    RecordingStopped,
    Notice(String),
}
