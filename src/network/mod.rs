pub mod auth;
pub mod blob;

pub use auth::{AuthProvider, IdentityToolkitClient, Session};
pub use blob::{BlobPayload, BlobStore, FirebaseStorageClient, LocalBlobStore};
