pub mod document_store;
pub mod sqlite_store;

pub use document_store::{
    DocKey, DocumentStore, DocumentSubscription, Precondition, Snapshot, WriteBatch,
};
pub use sqlite_store::{DEFAULT_POLL_INTERVAL, SqliteDocumentStore};

use std::fs;
use std::path::Path;

/// Ensure the directory holding `path` exists
pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
