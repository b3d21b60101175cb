//! Contract of the hosted document database as seen by the chat client.
//!
//! Documents are JSON objects addressed by `(collection, id)`. Every stored
//! document carries a version that grows by one per write; a missing document
//! reads as version 0. Batches apply atomically: either every write lands or
//! none does.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::common::types::{ThreadId, UserId};
use crate::error::WriteError;

pub const THREADS: &str = "chats";
pub const USER_CHATS: &str = "userchats";
pub const USERS: &str = "users";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocKey {
    pub collection: String,
    pub id: String,
}

impl DocKey {
    pub fn new(collection: &str, id: impl Into<String>) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.into(),
        }
    }

    pub fn thread(thread_id: &ThreadId) -> Self {
        Self::new(THREADS, thread_id.as_str())
    }

    pub fn user_chats(user_id: &UserId) -> Self {
        Self::new(USER_CHATS, user_id.as_str())
    }

    pub fn user(user_id: &UserId) -> Self {
        Self::new(USERS, user_id.as_str())
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub key: DocKey,
    pub data: Option<Value>,
    pub version: u64,
}

impl Snapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<Option<T>, WriteError> {
        match &self.data {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    None,
    Exists,
    Missing,
    /// The document must still be at this version (0 means it must not exist).
    Version(u64),
}

impl Precondition {
    pub fn check(self, key: &DocKey, exists: bool, version: u64) -> Result<(), WriteError> {
        let holds = match self {
            Precondition::None => true,
            Precondition::Exists => exists,
            Precondition::Missing => !exists,
            Precondition::Version(expected) => expected == version,
        };

        if holds {
            Ok(())
        } else {
            Err(WriteError::PreconditionFailed(key.to_string()))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Overwrite the whole document.
    Set(Value),
    /// Replace top-level fields of an existing document.
    Update(Map<String, Value>),
    /// Append the values missing from an array field of an existing document.
    ArrayUnion { field: String, values: Vec<Value> },
    /// Append every value to an array field of an existing document, duplicates included.
    Append { field: String, values: Vec<Value> },
}

impl WriteOp {
    /// Compute the document produced by applying this op to `current`.
    pub fn apply(&self, key: &DocKey, current: Option<&Value>) -> Result<Value, WriteError> {
        match self {
            WriteOp::Set(value) => {
                if !value.is_object() {
                    return Err(WriteError::Malformed(
                        key.to_string(),
                        "documents must be JSON objects".to_string(),
                    ));
                }
                Ok(value.clone())
            }
            WriteOp::Update(fields) => {
                let mut document = existing_object(key, current)?;
                for (name, value) in fields {
                    document.insert(name.clone(), value.clone());
                }
                Ok(Value::Object(document))
            }
            WriteOp::ArrayUnion { field, values } => {
                let mut document = existing_object(key, current)?;
                let items = array_field(key, &mut document, field)?;
                for value in values {
                    if !items.contains(value) {
                        items.push(value.clone());
                    }
                }
                Ok(Value::Object(document))
            }
            WriteOp::Append { field, values } => {
                let mut document = existing_object(key, current)?;
                array_field(key, &mut document, field)?.extend(values.iter().cloned());
                Ok(Value::Object(document))
            }
        }
    }
}

fn array_field<'a>(
    key: &DocKey,
    document: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Vec<Value>, WriteError> {
    let slot = document
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(WriteError::Malformed(
            key.to_string(),
            format!("field `{field}` is not an array"),
        )),
    }
}

fn existing_object(
    key: &DocKey,
    current: Option<&Value>,
) -> Result<Map<String, Value>, WriteError> {
    match current {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(WriteError::Malformed(
            key.to_string(),
            "stored document is not an object".to_string(),
        )),
        None => Err(WriteError::NotFound(key.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub key: DocKey,
    pub op: WriteOp,
    pub precondition: Precondition,
}

#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) -> &mut Self {
        self.writes.push(write);
        self
    }

    pub fn set(&mut self, key: DocKey, value: Value, precondition: Precondition) -> &mut Self {
        self.push(Write {
            key,
            op: WriteOp::Set(value),
            precondition,
        })
    }

    pub fn update(
        &mut self,
        key: DocKey,
        fields: Map<String, Value>,
        precondition: Precondition,
    ) -> &mut Self {
        self.push(Write {
            key,
            op: WriteOp::Update(fields),
            precondition,
        })
    }

    pub fn array_union(&mut self, key: DocKey, field: &str, values: Vec<Value>) -> &mut Self {
        self.push(Write {
            key,
            op: WriteOp::ArrayUnion {
                field: field.to_string(),
                values,
            },
            precondition: Precondition::Exists,
        })
    }

    pub fn append(&mut self, key: DocKey, field: &str, values: Vec<Value>) -> &mut Self {
        self.push(Write {
            key,
            op: WriteOp::Append {
                field: field.to_string(),
                values,
            },
            precondition: Precondition::Exists,
        })
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

/// Live view of one document. Each notification carries the full document.
pub struct DocumentSubscription {
    key: DocKey,
    receiver: watch::Receiver<Option<Value>>,
}

impl DocumentSubscription {
    pub fn new(key: DocKey, receiver: watch::Receiver<Option<Value>>) -> Self {
        Self { key, receiver }
    }

    pub fn key(&self) -> &DocKey {
        &self.key
    }

    pub fn current(&self) -> Option<Value> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next committed version. `None` once the store is gone.
    pub async fn changed(&mut self) -> Option<Option<Value>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &DocKey) -> Result<Snapshot, WriteError>;

    async fn commit(&self, batch: WriteBatch) -> Result<(), WriteError>;

    fn subscribe(&self, key: &DocKey) -> Result<DocumentSubscription, WriteError>;

    async fn set(&self, key: &DocKey, value: Value) -> Result<(), WriteError> {
        let mut batch = WriteBatch::new();
        batch.set(key.clone(), value, Precondition::None);
        self.commit(batch).await
    }

    async fn update(&self, key: &DocKey, fields: Map<String, Value>) -> Result<(), WriteError> {
        let mut batch = WriteBatch::new();
        batch.update(key.clone(), fields, Precondition::Exists);
        self.commit(batch).await
    }

    async fn array_union(
        &self,
        key: &DocKey,
        field: &str,
        values: Vec<Value>,
    ) -> Result<(), WriteError> {
        let mut batch = WriteBatch::new();
        batch.array_union(key.clone(), field, values);
        self.commit(batch).await
    }

    async fn append(
        &self,
        key: &DocKey,
        field: &str,
        values: Vec<Value>,
    ) -> Result<(), WriteError> {
        let mut batch = WriteBatch::new();
        batch.append(key.clone(), field, values);
        self.commit(batch).await
    }
}

/// Build and commit a batch, rebuilding it from fresh reads whenever a
/// version precondition fails.
pub async fn commit_with_retry<F, Fut>(
    store: &dyn DocumentStore,
    max_attempts: u32,
    mut build: F,
) -> Result<(), WriteError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<WriteBatch, WriteError>>,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let batch = build().await?;
        match store.commit(batch).await {
            Ok(()) => return Ok(()),
            Err(WriteError::PreconditionFailed(doc)) => {
                log::warn!("Document {doc} changed during commit (attempt {attempt}/{attempts})");
            }
            Err(err) => return Err(err),
        }
    }

    Err(WriteError::Contention(attempts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key() -> DocKey {
        DocKey::new(THREADS, "t1")
    }

    #[test]
    fn array_union_skips_existing_values() {
        let current = json!({ "messages": [{ "n": 1 }] });
        let op = WriteOp::ArrayUnion {
            field: "messages".to_string(),
            values: vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 2 })],
        };

        let next = op.apply(&key(), Some(&current)).unwrap();
        assert_eq!(next, json!({ "messages": [{ "n": 1 }, { "n": 2 }] }));
    }

    #[test]
    fn array_union_creates_missing_field() {
        let op = WriteOp::ArrayUnion {
            field: "messages".to_string(),
            values: vec![json!("a")],
        };

        let next = op.apply(&key(), Some(&json!({}))).unwrap();
        assert_eq!(next, json!({ "messages": ["a"] }));
    }

    #[test]
    fn append_keeps_equal_values() {
        let current = json!({ "messages": [{ "n": 1 }] });
        let op = WriteOp::Append {
            field: "messages".to_string(),
            values: vec![json!({ "n": 1 }), json!({ "n": 1 })],
        };

        let next = op.apply(&key(), Some(&current)).unwrap();
        assert_eq!(next, json!({ "messages": [{ "n": 1 }, { "n": 1 }, { "n": 1 }] }));

        assert!(matches!(op.apply(&key(), None), Err(WriteError::NotFound(_))));
    }

    #[test]
    fn update_and_union_require_existing_document() {
        let update = WriteOp::Update(Map::new());
        assert!(matches!(
            update.apply(&key(), None),
            Err(WriteError::NotFound(_))
        ));

        let union = WriteOp::ArrayUnion {
            field: "messages".to_string(),
            values: vec![],
        };
        assert!(matches!(union.apply(&key(), None), Err(WriteError::NotFound(_))));
    }

    #[test]
    fn update_replaces_only_named_fields() {
        let mut fields = Map::new();
        fields.insert("online".to_string(), json!(true));

        let next = WriteOp::Update(fields)
            .apply(&key(), Some(&json!({ "online": false, "username": "bob" })))
            .unwrap();
        assert_eq!(next, json!({ "online": true, "username": "bob" }));
    }

    #[test]
    fn union_into_non_array_is_malformed() {
        let op = WriteOp::ArrayUnion {
            field: "messages".to_string(),
            values: vec![json!(1)],
        };
        assert!(matches!(
            op.apply(&key(), Some(&json!({ "messages": "oops" }))),
            Err(WriteError::Malformed(..))
        ));
    }

    #[test]
    fn preconditions() {
        let key = key();
        assert!(Precondition::None.check(&key, false, 0).is_ok());
        assert!(Precondition::Exists.check(&key, false, 0).is_err());
        assert!(Precondition::Missing.check(&key, true, 3).is_err());
        assert!(Precondition::Version(3).check(&key, true, 3).is_ok());
        assert!(Precondition::Version(2).check(&key, true, 3).is_err());
    }
}
