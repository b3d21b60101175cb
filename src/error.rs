use thiserror::Error;

/// A document read or write the database refused or could not perform.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("Document {0} does not exist")]
    NotFound(String),

    #[error("Precondition failed for document {0}")]
    PreconditionFailed(String),

    #[error("Gave up after {0} conflicting commit attempts")]
    Contention(u32),

    #[error("Document {0} has an unexpected shape: {1}")]
    Malformed(String, String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Document store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Payload of {size} bytes exceeds the {limit} byte upload limit")]
    TooLarge { size: usize, limit: usize },

    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Upload transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Blob write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Auth failures carry a message fit to show the user as-is.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("The email address is already in use by another account.")]
    EmailInUse,

    #[error("Invalid email or password.")]
    InvalidCredentials,

    #[error("Password should be at least 6 characters.")]
    WeakPassword,

    #[error("This account has been disabled.")]
    UserDisabled,

    #[error("Too many attempts. Try again later.")]
    TooManyAttempts,

    #[error("Authentication failed: {0}")]
    Rejected(String),

    #[error("Could not reach the authentication service: {0}")]
    Transport(#[from] reqwest::Error),
}

#[derive(Error, Debug)]
pub enum MicAccessError {
    #[error("Microphone access denied: {0}")]
    Denied(String),

    #[error("No capture device available")]
    Unavailable,
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error(transparent)]
    MicAccess(#[from] MicAccessError),
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("You cannot send messages in this chat")]
    Blocked,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl From<serde_json::Error> for SendError {
    fn from(err: serde_json::Error) -> Self {
        SendError::Write(WriteError::Serialization(err))
    }
}

#[derive(Error, Debug)]
pub enum AccountError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

impl From<serde_json::Error> for AccountError {
    fn from(err: serde_json::Error) -> Self {
        AccountError::Write(WriteError::Serialization(err))
    }
}
