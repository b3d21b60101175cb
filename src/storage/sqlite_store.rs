use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::document_store::{DocKey, DocumentStore, DocumentSubscription, Snapshot, WriteBatch};
use crate::error::WriteError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type Watchers = HashMap<DocKey, watch::Sender<Option<Value>>>;

/// Local document store keeping versioned JSON documents in SQLite.
///
/// All access goes through one connection. A batch runs inside a single
/// SQLite transaction, and subscribers are notified while the connection is
/// still held so a new subscriber can never miss a commit.
///
/// Other processes may write the same file. While anything is subscribed, a
/// background task polls `PRAGMA data_version` and pushes documents those
/// writers changed to the local subscribers.
pub struct SqliteDocumentStore {
    shared: Arc<Shared>,
    file_backed: bool,
    poll_interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    conn: Mutex<Connection>,
    watchers: Mutex<Watchers>,
}

impl SqliteDocumentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, WriteError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        log::debug!("SQLite journal mode: {mode}");
        Self::from_connection(conn, true)
    }

    pub fn in_memory() -> Result<Self, WriteError> {
        Self::from_connection(Connection::open_in_memory()?, false)
    }

    /// How often to look for commits made by other connections.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    fn from_connection(conn: Connection, file_backed: bool) -> Result<Self, WriteError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            [],
        )?;
        Ok(Self {
            shared: Arc::new(Shared {
                conn: Mutex::new(conn),
                watchers: Mutex::new(HashMap::new()),
            }),
            file_backed,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poller: Mutex::new(None),
        })
    }

    /// Number of stored documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize, WriteError> {
        let conn = self.shared.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn watch_other_connections(&self) {
        if !self.file_backed {
            return;
        }
        let mut poller = match self.poller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if poller.is_some() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = Arc::downgrade(&self.shared);
                *poller = Some(runtime.spawn(poll_other_connections(shared, self.poll_interval)));
            }
            Err(_) => log::warn!(
                "No async runtime: commits from other connections will not reach subscribers"
            ),
        }
    }
}

impl Drop for SqliteDocumentStore {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(handle) = poller.take() {
                handle.abort();
            }
        }
    }
}

impl Shared {
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>, WriteError> {
        self.conn
            .lock()
            .map_err(|_| WriteError::Unavailable("database lock poisoned".to_string()))
    }

    fn lock_watchers(&self) -> MutexGuard<'_, Watchers> {
        // Senders hold no invariants a panicking writer could break.
        match self.watchers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Re-read watched documents when another connection has committed since
    /// `seen`. Returns how many subscribers were notified.
    fn refresh_from_other_connections(&self, seen: &mut Option<i64>) -> Result<usize, WriteError> {
        let conn = self.lock_conn()?;
        let data_version: i64 = conn.pragma_query_value(None, "data_version", |row| row.get(0))?;
        if *seen == Some(data_version) {
            return Ok(0);
        }
        *seen = Some(data_version);

        let mut watchers = self.lock_watchers();
        watchers.retain(|_, sender| sender.receiver_count() > 0);

        let mut notified = 0;
        for (key, sender) in watchers.iter() {
            let data = read(&conn, key)?.data;
            let modified = sender.send_if_modified(|current| {
                if *current == data {
                    false
                } else {
                    *current = data;
                    true
                }
            });
            if modified {
                notified += 1;
            }
        }
        Ok(notified)
    }
}

async fn poll_other_connections(shared: Weak<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut seen = None;

    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match shared.refresh_from_other_connections(&mut seen) {
            Ok(0) => {}
            Ok(count) => log::debug!("{count} watched document(s) changed by another connection"),
            Err(err) => log::warn!("Failed to check for external commits: {err}"),
        }
    }
}

fn read(conn: &Connection, key: &DocKey) -> Result<Snapshot, WriteError> {
    let row = conn
        .query_row(
            "SELECT body, version FROM documents WHERE collection = ?1 AND id = ?2",
            params![key.collection, key.id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;

    match row {
        Some((body, version)) => Ok(Snapshot {
            key: key.clone(),
            data: Some(serde_json::from_str(&body)?),
            version: version as u64,
        }),
        None => Ok(Snapshot {
            key: key.clone(),
            data: None,
            version: 0,
        }),
    }
}

fn store(conn: &Connection, key: &DocKey, value: &Value, version: u64) -> Result<(), WriteError> {
    conn.execute(
        "INSERT INTO documents (collection, id, body, version, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(collection, id) DO UPDATE SET
            body = excluded.body,
            version = excluded.version,
            updated_at = excluded.updated_at",
        params![
            key.collection,
            key.id,
            serde_json::to_string(value)?,
            version as i64,
            Utc::now().timestamp_millis()
        ],
    )?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get(&self, key: &DocKey) -> Result<Snapshot, WriteError> {
        let conn = self.shared.lock_conn()?;
        read(&conn, key)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.shared.lock_conn()?;
        let tx = conn.transaction()?;
        let mut changed = Vec::with_capacity(batch.len());

        for write in batch.into_writes() {
            let snapshot = read(&tx, &write.key)?;
            write
                .precondition
                .check(&write.key, snapshot.exists(), snapshot.version)?;
            let next = write.op.apply(&write.key, snapshot.data.as_ref())?;
            store(&tx, &write.key, &next, snapshot.version + 1)?;
            changed.push((write.key, next));
        }

        tx.commit()?;
        log::debug!("Committed {} document write(s)", changed.len());

        let watchers = self.shared.lock_watchers();
        for (key, value) in changed {
            if let Some(sender) = watchers.get(&key) {
                sender.send_replace(Some(value));
            }
        }

        Ok(())
    }

    fn subscribe(&self, key: &DocKey) -> Result<DocumentSubscription, WriteError> {
        let receiver = {
            let conn = self.shared.lock_conn()?;
            let mut watchers = self.shared.lock_watchers();
            watchers.retain(|_, sender| sender.receiver_count() > 0);

            match watchers.get(key) {
                Some(sender) => sender.subscribe(),
                None => {
                    let current = read(&conn, key)?.data;
                    let (sender, receiver) = watch::channel(current);
                    watchers.insert(key.clone(), sender);
                    receiver
                }
            }
        };

        self.watch_other_connections();
        Ok(DocumentSubscription::new(key.clone(), receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document_store::{Precondition, THREADS, USERS};
    use serde_json::json;

    #[tokio::test]
    async fn missing_document_reads_as_version_zero() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let snapshot = store.get(&DocKey::new(USERS, "nobody")).await.unwrap();
        assert!(!snapshot.exists());
        assert_eq!(snapshot.version, 0);
    }

    #[tokio::test]
    async fn versions_increase_per_write() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let key = DocKey::new(USERS, "alice");

        store.set(&key, json!({ "online": false })).await.unwrap();
        let mut fields = serde_json::Map::new();
        fields.insert("online".to_string(), json!(true));
        store.update(&key, fields).await.unwrap();

        let snapshot = store.get(&key).await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.data, Some(json!({ "online": true })));
    }

    #[tokio::test]
    async fn failed_batch_leaves_nothing_behind() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let thread = DocKey::new(THREADS, "t1");
        let profile = DocKey::new(USERS, "alice");
        store.set(&profile, json!({ "online": false })).await.unwrap();

        let mut batch = WriteBatch::new();
        batch
            .set(thread.clone(), json!({ "messages": [] }), Precondition::Missing)
            .set(profile.clone(), json!({ "online": true }), Precondition::Version(7));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, WriteError::PreconditionFailed(_)));
        assert!(!store.get(&thread).await.unwrap().exists());
        assert_eq!(
            store.get(&profile).await.unwrap().data,
            Some(json!({ "online": false }))
        );
    }

    #[tokio::test]
    async fn subscribers_see_full_documents() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let key = DocKey::new(THREADS, "t1");
        store.set(&key, json!({ "messages": [] })).await.unwrap();

        let mut subscription = store.subscribe(&key).unwrap();
        assert_eq!(subscription.current(), Some(json!({ "messages": [] })));

        store
            .array_union(&key, "messages", vec![json!("hi")])
            .await
            .unwrap();

        let update = subscription.changed().await.unwrap();
        assert_eq!(update, Some(json!({ "messages": ["hi"] })));
    }

    #[tokio::test]
    async fn subscribers_see_commits_from_other_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.db");
        let key = DocKey::new(THREADS, "t1");

        let reader = SqliteDocumentStore::open(&path)
            .unwrap()
            .with_poll_interval(Duration::from_millis(20));
        let writer = SqliteDocumentStore::open(&path).unwrap();
        writer.set(&key, json!({ "messages": [] })).await.unwrap();

        let mut subscription = reader.subscribe(&key).unwrap();
        assert_eq!(subscription.current(), Some(json!({ "messages": [] })));

        writer
            .append(&key, "messages", vec![json!("hi")])
            .await
            .unwrap();

        let update = tokio::time::timeout(Duration::from_secs(2), subscription.changed())
            .await
            .expect("external commit was not observed")
            .unwrap();
        assert_eq!(update, Some(json!({ "messages": ["hi"] })));
    }

    #[tokio::test]
    async fn in_memory_store_needs_no_poller() {
        let store = SqliteDocumentStore::in_memory().unwrap();
        let _subscription = store.subscribe(&DocKey::new(THREADS, "t1")).unwrap();
        assert!(store.poller.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("luma.db");
        let key = DocKey::new(USERS, "alice");

        {
            let store = SqliteDocumentStore::open(&path).unwrap();
            store.set(&key, json!({ "username": "alice" })).await.unwrap();
        }

        let store = SqliteDocumentStore::open(&path).unwrap();
        assert_eq!(store.count(USERS).unwrap(), 1);
        assert_eq!(
            store.get(&key).await.unwrap().data,
            Some(json!({ "username": "alice" }))
        );
    }
}
