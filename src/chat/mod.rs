pub mod account;
pub mod composer;
pub mod context;
pub mod presence;
pub mod recorder;
pub mod sender;
pub mod subscription;

pub use account::{AccountService, RegisterRequest};
pub use composer::{AudioClip, DraftComposer, ImageAttachment};
pub use context::{ActiveThreadContext, SessionContext};
pub use presence::PresenceSetter;
pub use recorder::{AudioRecorder, FileMicrophone, Microphone};
pub use sender::{MessageSender, SendPolicy};
pub use subscription::ThreadSubscription;
