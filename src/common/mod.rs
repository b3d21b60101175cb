pub mod commands;
pub mod events;
pub mod types;

pub use commands::ChatCommand;
pub use events::ChatEvent;
pub use types::{
    ChatSummaryEntry, Message, Thread, ThreadId, Timestamp, UserChatSummary, UserId, UserProfile,
};
