//! Document store collaborator
//!
//! The engine depends on four store operations only: live collection
//! queries, single document reads, document creation, and optimistic
//! transactions. `DocumentStore` is that seam; `MemoryStore` is an in-process
//! implementation with the same semantics.
//!
//! Paths use alternating collection/document segments, e.g. the collection
//! `apps/24-stunden-lauf/runners` holds the document
//! `apps/24-stunden-lauf/runners/{id}`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{ChangeKind, Document, DocumentChange, RawSnapshot};

/// Errors reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transaction contention on {path}")]
    Contention { path: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("document could not be encoded: {0}")]
    Serialization(String),

    #[error("subscription closed by store")]
    Closed,
}

/// Live feed of snapshots for one collection query.
pub type SnapshotFeed = mpsc::UnboundedReceiver<Result<RawSnapshot, StoreError>>;

/// Comparison value for an equality filter
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FilterValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl FilterValue {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FilterValue::Str(expected) => value.as_str() == Some(expected.as_str()),
            FilterValue::Int(expected) => value.as_i64() == Some(*expected),
            FilterValue::Bool(expected) => value.as_bool() == Some(*expected),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Str(s.to_string())
    }
}

impl From<i64> for FilterValue {
    fn from(v: i64) -> Self {
        FilterValue::Int(v)
    }
}

impl From<bool> for FilterValue {
    fn from(v: bool) -> Self {
        FilterValue::Bool(v)
    }
}

/// Equality filter on a top-level field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldFilter {
    pub field: String,
    pub value: FilterValue,
}

/// Options of a collection query.
///
/// Two subscriptions with equal path and query share one store subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionQuery {
    pub filters: Vec<FieldFilter>,
}

impl CollectionQuery {
    /// Query matching every document of the collection
    pub fn all() -> Self {
        Self::default()
    }

    /// Add an equality filter
    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Whether a document's fields satisfy every filter
    pub fn matches(&self, fields: &Value) -> bool {
        self.filters.iter().all(|filter| {
            fields
                .get(&filter.field)
                .map(|value| filter.value.matches(value))
                .unwrap_or(false)
        })
    }
}

/// Split a document path into its collection path and document id.
pub fn split_document_path(path: &str) -> Result<(&str, &str), StoreError> {
    match path.rsplit_once('/') {
        Some((collection, id)) if !collection.is_empty() && !id.is_empty() => Ok((collection, id)),
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}

/// Consistent reads for a transaction.
///
/// Returns the document's write version (never 0) and fields, or `None`
/// when the document does not exist.
pub trait ReadView: Sync {
    fn read(&self, path: &str) -> Result<Option<(u64, Value)>, StoreError>;
}

/// A write buffered by a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionWrite {
    Set { path: String, fields: Value },
    Create { collection: String, id: String, fields: Value },
}

/// One transaction attempt.
///
/// Every read records the version it observed; the store commits the
/// buffered writes only if none of those versions changed in between.
pub struct Transaction<'a> {
    view: &'a dyn ReadView,
    reads: BTreeMap<String, u64>,
    writes: Vec<TransactionWrite>,
}

impl<'a> Transaction<'a> {
    pub fn new(view: &'a dyn ReadView) -> Self {
        Self {
            view,
            reads: BTreeMap::new(),
            writes: Vec::new(),
        }
    }

    /// Read a document's fields, recording the observed version.
    pub fn get(&mut self, path: &str) -> Result<Option<Value>, StoreError> {
        let read = self.view.read(path)?;
        let version = read.as_ref().map(|(version, _)| *version).unwrap_or(0);
        self.reads.insert(path.to_string(), version);
        Ok(read.map(|(_, fields)| fields))
    }

    /// Overwrite (or create) the document at `path`
    pub fn set(&mut self, path: impl Into<String>, fields: Value) {
        self.writes.push(TransactionWrite::Set {
            path: path.into(),
            fields,
        });
    }

    /// Create a document with a fresh id in `collection`; returns the id
    pub fn create(&mut self, collection: impl Into<String>, fields: Value) -> String {
        let id = Uuid::now_v7().to_string();
        self.writes.push(TransactionWrite::Create {
            collection: collection.into(),
            id: id.clone(),
            fields,
        });
        id
    }

    /// Versions observed by reads, keyed by path (0 = absent)
    pub fn reads(&self) -> &BTreeMap<String, u64> {
        &self.reads
    }

    pub fn into_writes(self) -> Vec<TransactionWrite> {
        self.writes
    }
}

/// Transaction body. Runs synchronously against a `Transaction`.
pub type TransactionFn<'f> = dyn FnMut(&mut Transaction<'_>) -> Result<(), StoreError> + Send + 'f;

/// The store operations the engine depends on.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a live query; the first delivery is the current result set.
    async fn subscribe_collection(
        &self,
        path: &str,
        query: &CollectionQuery,
    ) -> Result<SnapshotFeed, StoreError>;

    async fn get_document(&self, path: &str) -> Result<Option<Document>, StoreError>;

    /// Create a document with a store-assigned id; returns the id
    async fn add_document(&self, collection: &str, fields: Value) -> Result<String, StoreError>;

    /// Run one optimistic transaction attempt.
    ///
    /// Returns `StoreError::Contention` when a read document changed before
    /// commit; no write is applied in that case.
    async fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), StoreError>;
}

// ── In-memory store ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredDocument {
    /// Insertion order within the collection
    seq: u64,
    /// Write version, unique across the store
    version: u64,
    fields: Value,
}

struct Subscriber {
    collection: String,
    query: CollectionQuery,
    sender: mpsc::UnboundedSender<Result<RawSnapshot, StoreError>>,
    /// Documents delivered in the previous snapshot, by id
    last: BTreeMap<String, (u64, Value)>,
}

#[derive(Default)]
struct MemoryState {
    collections: BTreeMap<String, BTreeMap<String, StoredDocument>>,
    subscribers: Vec<Subscriber>,
    next_seq: u64,
    next_version: u64,
}

impl MemoryState {
    fn read(&self, path: &str) -> Result<Option<(u64, Value)>, StoreError> {
        let (collection, id) = split_document_path(path)?;
        Ok(self
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| (doc.version, doc.fields.clone())))
    }

    fn version_of(&self, path: &str) -> Result<u64, StoreError> {
        Ok(self.read(path)?.map(|(version, _)| version).unwrap_or(0))
    }

    fn write(&mut self, collection: &str, id: &str, fields: Value) {
        self.next_version += 1;
        let version = self.next_version;
        let docs = self.collections.entry(collection.to_string()).or_default();

        match docs.get_mut(id) {
            Some(existing) => {
                existing.version = version;
                existing.fields = fields;
            }
            None => {
                self.next_seq += 1;
                docs.insert(
                    id.to_string(),
                    StoredDocument {
                        seq: self.next_seq,
                        version,
                        fields,
                    },
                );
            }
        }
    }

    fn remove(&mut self, collection: &str, id: &str) -> bool {
        self.collections
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false)
    }

    /// Matching documents of a collection in insertion order
    fn query(&self, collection: &str, query: &CollectionQuery) -> Vec<(String, StoredDocument)> {
        let mut docs: Vec<(String, StoredDocument)> = self
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| query.matches(&doc.fields))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by_key(|(_, doc)| doc.seq);
        docs
    }

    /// Build the next snapshot for a subscriber and remember what it saw
    fn next_snapshot(&self, subscriber: &mut Subscriber) -> RawSnapshot {
        let current = self.query(&subscriber.collection, &subscriber.query);
        let mut changes = Vec::new();
        let mut seen = BTreeMap::new();

        for (id, doc) in &current {
            match subscriber.last.get(id) {
                None => changes.push(change(ChangeKind::Added, id, &doc.fields)),
                Some((version, _)) if *version != doc.version => {
                    changes.push(change(ChangeKind::Modified, id, &doc.fields))
                }
                Some(_) => {}
            }
            seen.insert(id.clone(), (doc.version, doc.fields.clone()));
        }

        for (id, (_, fields)) in &subscriber.last {
            if !seen.contains_key(id) {
                changes.push(change(ChangeKind::Removed, id, fields));
            }
        }

        subscriber.last = seen;

        RawSnapshot {
            documents: current
                .into_iter()
                .map(|(id, doc)| Document {
                    id,
                    fields: doc.fields,
                })
                .collect(),
            changes,
        }
    }

    /// Push a snapshot to every live subscriber of `collection`.
    ///
    /// Subscribers whose receiver is gone are released.
    fn notify(&mut self, collection: &str) {
        let mut subscribers = std::mem::take(&mut self.subscribers);
        subscribers.retain_mut(|subscriber| {
            if subscriber.collection != collection {
                return !subscriber.sender.is_closed();
            }
            let snapshot = self.next_snapshot(subscriber);
            if snapshot.changes.is_empty() {
                return !subscriber.sender.is_closed();
            }
            subscriber.sender.send(Ok(snapshot)).is_ok()
        });
        self.subscribers = subscribers;
    }
}

fn change(kind: ChangeKind, id: &str, fields: &Value) -> DocumentChange {
    DocumentChange {
        kind,
        document: Document {
            id: id.to_string(),
            fields: fields.clone(),
        },
    }
}

/// In-process document store with live queries and optimistic transactions.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

struct MemoryReadView<'a> {
    state: &'a Mutex<MemoryState>,
}

impl ReadView for MemoryReadView<'_> {
    fn read(&self, path: &str) -> Result<Option<(u64, Value)>, StoreError> {
        lock_state(self.state)?.read(path)
    }
}

fn lock_state(state: &Mutex<MemoryState>) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
    state
        .lock()
        .map_err(|_| StoreError::Unavailable("store state lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        lock_state(&self.state)
    }

    /// Create or overwrite the document at `path`
    pub fn set_document(&self, path: &str, fields: Value) -> Result<(), StoreError> {
        let (collection, id) = split_document_path(path)?;
        let mut state = self.lock()?;
        state.write(collection, id, fields);
        state.notify(collection);
        Ok(())
    }

    /// Delete the document at `path`; returns whether it existed
    pub fn delete_document(&self, path: &str) -> Result<bool, StoreError> {
        let (collection, id) = split_document_path(path)?;
        let mut state = self.lock()?;
        let removed = state.remove(collection, id);
        if removed {
            state.notify(collection);
        }
        Ok(removed)
    }

    /// Fail every open subscription with `cause` and close it.
    ///
    /// Models a transport drop; subscribers are expected to resubscribe.
    pub fn interrupt_subscriptions(&self, cause: StoreError) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let subscribers = std::mem::take(&mut state.subscribers);
        let count = subscribers.len();
        for subscriber in subscribers {
            let _ = subscriber.sender.send(Err(cause.clone()));
        }
        warn!(count, cause = %cause, "Interrupted all subscriptions");
        Ok(count)
    }

    /// Number of subscriptions whose consumer is still attached
    pub fn active_subscriptions(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        state.subscribers.retain(|subscriber| !subscriber.sender.is_closed());
        Ok(state.subscribers.len())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn subscribe_collection(
        &self,
        path: &str,
        query: &CollectionQuery,
    ) -> Result<SnapshotFeed, StoreError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut subscriber = Subscriber {
            collection: path.to_string(),
            query: query.clone(),
            sender,
            last: BTreeMap::new(),
        };

        let mut state = self.lock()?;
        let initial = state.next_snapshot(&mut subscriber);
        subscriber
            .sender
            .send(Ok(initial))
            .map_err(|_| StoreError::Closed)?;
        state.subscribers.push(subscriber);

        debug!(path, filters = query.filters.len(), "Collection subscription opened");
        Ok(receiver)
    }

    async fn get_document(&self, path: &str) -> Result<Option<Document>, StoreError> {
        let (_, id) = split_document_path(path)?;
        let state = self.lock()?;
        Ok(state.read(path)?.map(|(_, fields)| Document {
            id: id.to_string(),
            fields,
        }))
    }

    async fn add_document(&self, collection: &str, fields: Value) -> Result<String, StoreError> {
        let id = Uuid::now_v7().to_string();
        let mut state = self.lock()?;
        state.write(collection, &id, fields);
        state.notify(collection);
        Ok(id)
    }

    async fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), StoreError> {
        let view = MemoryReadView { state: &self.state };
        let mut tx = Transaction::new(&view);
        apply(&mut tx)?;

        let reads = tx.reads().clone();
        let writes = tx.into_writes();

        let mut state = self.lock()?;
        for (path, observed) in &reads {
            if state.version_of(path)? != *observed {
                debug!(path = %path, "Transaction read went stale");
                return Err(StoreError::Contention { path: path.clone() });
            }
        }

        let mut touched = Vec::new();
        for write in writes {
            match write {
                TransactionWrite::Set { path, fields } => {
                    let (collection, id) = split_document_path(&path)?;
                    state.write(collection, id, fields);
                    touched.push(collection.to_string());
                }
                TransactionWrite::Create {
                    collection,
                    id,
                    fields,
                } => {
                    state.write(&collection, &id, fields);
                    touched.push(collection);
                }
            }
        }

        touched.sort();
        touched.dedup();
        for collection in &touched {
            state.notify(collection);
        }

        info!(reads = reads.len(), collections = touched.len(), "Transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const LAPS: &str = "apps/test/laps";

    #[test]
    fn test_split_document_path() {
        assert_eq!(
            split_document_path("apps/test/runners/abc").unwrap(),
            ("apps/test/runners", "abc")
        );
        assert!(split_document_path("runners").is_err());
        assert!(split_document_path("runners/").is_err());
    }

    #[test]
    fn test_query_filters() {
        let query = CollectionQuery::all().where_eq("runnerId", "r1");
        assert!(query.matches(&json!({ "runnerId": "r1" })));
        assert!(!query.matches(&json!({ "runnerId": "r2" })));
        assert!(!query.matches(&json!({})));
        assert!(CollectionQuery::all().matches(&json!({})));
    }

    #[tokio::test]
    async fn test_subscription_delivers_initial_and_diffs() {
        let store = MemoryStore::new();
        store.set_document(&format!("{LAPS}/a"), json!({ "runnerId": "r1" })).unwrap();

        let mut feed = store
            .subscribe_collection(LAPS, &CollectionQuery::all())
            .await
            .unwrap();

        let initial = feed.recv().await.unwrap().unwrap();
        assert_eq!(initial.documents.len(), 1);
        assert_eq!(initial.changes[0].kind, ChangeKind::Added);

        store.set_document(&format!("{LAPS}/b"), json!({ "runnerId": "r2" })).unwrap();
        let second = feed.recv().await.unwrap().unwrap();
        assert_eq!(second.documents.len(), 2);
        assert_eq!(second.documents[0].id, "a");
        assert_eq!(second.changes.len(), 1);
        assert_eq!(second.changes[0].document.id, "b");

        store.delete_document(&format!("{LAPS}/a")).unwrap();
        let third = feed.recv().await.unwrap().unwrap();
        assert_eq!(third.documents.len(), 1);
        assert_eq!(third.changes[0].kind, ChangeKind::Removed);
        assert_eq!(third.changes[0].document.fields, json!({ "runnerId": "r1" }));
    }

    #[tokio::test]
    async fn test_filtered_subscription_ignores_other_documents() {
        let store = MemoryStore::new();
        let mut feed = store
            .subscribe_collection(LAPS, &CollectionQuery::all().where_eq("runnerId", "r1"))
            .await
            .unwrap();
        assert!(feed.recv().await.unwrap().unwrap().documents.is_empty());

        store.set_document(&format!("{LAPS}/x"), json!({ "runnerId": "r2" })).unwrap();
        store.set_document(&format!("{LAPS}/y"), json!({ "runnerId": "r1" })).unwrap();

        let next = feed.recv().await.unwrap().unwrap();
        assert_eq!(next.documents.len(), 1);
        assert_eq!(next.documents[0].id, "y");
    }

    #[tokio::test]
    async fn test_add_document_assigns_fresh_ids() {
        let store = MemoryStore::new();
        let a = store.add_document(LAPS, json!({ "runnerId": "r1" })).await.unwrap();
        let b = store.add_document(LAPS, json!({ "runnerId": "r1" })).await.unwrap();
        assert_ne!(a, b);

        let doc = store.get_document(&format!("{LAPS}/{a}")).await.unwrap().unwrap();
        assert_eq!(doc.id, a);
        assert!(store.get_document(&format!("{LAPS}/missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transaction_commits_writes() {
        let store = MemoryStore::new();
        let counter = "apps/test/counters/runners";

        store
            .run_transaction(&mut |tx: &mut Transaction<'_>| -> Result<(), StoreError> {
                let current = tx.get(counter)?;
                assert!(current.is_none());
                tx.set(counter, json!({ "lastNumber": 1 }));
                tx.create("apps/test/runners", json!({ "name": "A" }));
                Ok(())
            })
            .await
            .unwrap();

        let doc = store.get_document(counter).await.unwrap().unwrap();
        assert_eq!(doc.fields, json!({ "lastNumber": 1 }));
    }

    #[tokio::test]
    async fn test_transaction_detects_stale_read() {
        let store = MemoryStore::new();
        let counter = "apps/test/counters/runners";
        let racer = store.clone();

        let result = store
            .run_transaction(&mut |tx: &mut Transaction<'_>| -> Result<(), StoreError> {
                tx.get(counter)?;
                // Another writer commits between our read and our commit
                racer.set_document(counter, json!({ "lastNumber": 5 }))?;
                tx.set(counter, json!({ "lastNumber": 1 }));
                Ok(())
            })
            .await;

        assert_eq!(
            result,
            Err(StoreError::Contention {
                path: counter.to_string()
            })
        );
        let doc = store.get_document(counter).await.unwrap().unwrap();
        assert_eq!(doc.fields, json!({ "lastNumber": 5 }));
    }

    #[tokio::test]
    async fn test_interrupt_sends_error_and_releases() {
        let store = MemoryStore::new();
        let mut feed = store
            .subscribe_collection(LAPS, &CollectionQuery::all())
            .await
            .unwrap();
        feed.recv().await.unwrap().unwrap();
        assert_eq!(store.active_subscriptions().unwrap(), 1);

        let interrupted = store
            .interrupt_subscriptions(StoreError::Unavailable("network".to_string()))
            .unwrap();
        assert_eq!(interrupted, 1);

        let err = feed.recv().await.unwrap().unwrap_err();
        assert_eq!(err, StoreError::Unavailable("network".to_string()));
        assert!(feed.recv().await.is_none());
        assert_eq!(store.active_subscriptions().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dropped_feed_is_released() {
        let store = MemoryStore::new();
        let feed = store
            .subscribe_collection(LAPS, &CollectionQuery::all())
            .await
            .unwrap();
        drop(feed);
        assert_eq!(store.active_subscriptions().unwrap(), 0);
    }
}
