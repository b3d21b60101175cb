use crate::chat::composer::ImageAttachment;
use crate::chat::context::ActiveThreadContext;

/// Commands the front end sends to the chat client loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    SetText(String),
    PushEmoji(String),
    AttachImage(ImageAttachment),
    DetachImage,
    /// Send whatever the composer currently holds.
    Send,
    /// Start recording, or stop and send the captured audio.
    ToggleRecording,
    SetPresence(bool),
    /// Change the active thread; `None` closes the current one.
    SwitchThread(Option<ActiveThreadContext>),
}
