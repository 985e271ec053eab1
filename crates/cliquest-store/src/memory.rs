//! In-process implementation of the [`Gateway`] contract.
//!
//! Backs tests and local development. Live queries are re-evaluated after
//! every committed write and listeners receive the diff against what they
//! last saw, the same added/modified/removed shape the managed backend emits.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use cliquest_shared::constants::DEFAULT_STORAGE_BUCKET;

use crate::document::{Document, DocumentChange};
use crate::error::{Result, StoreError};
use crate::gateway::{BatchOp, Gateway, ListenEvent, Listener, ListenerId};
use crate::patch::Patch;
use crate::query::Query;

type Collection = BTreeMap<String, Value>;

struct ListenerState {
    query: Query,
    tx: mpsc::UnboundedSender<ListenEvent>,
    /// Last result set delivered, in delivery order.
    last: Vec<Document>,
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub data: Bytes,
    pub content_type: String,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Collection>,
    listeners: HashMap<ListenerId, ListenerState>,
    next_listener: ListenerId,
    blobs: HashMap<String, StoredBlob>,
    denied: HashSet<String>,
    failing_uploads: Vec<String>,
    writes: usize,
}

/// Shared in-memory backend. Clones share the same state.
#[derive(Clone)]
pub struct MemoryGateway {
    inner: Arc<Mutex<Inner>>,
    bucket: String,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::with_bucket(DEFAULT_STORAGE_BUCKET)
    }

    pub fn with_bucket(bucket: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            bucket: bucket.to_string(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("Lock poisoned: {e}")))
    }

    /// Insert a document directly, notifying live queries.
    pub fn seed(&self, collection: &str, id: &str, data: Value) {
        if let Ok(mut inner) = self.lock() {
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), data);
            inner.notify(&[collection.to_string()]);
        }
    }

    /// Make every operation on `collection` fail with `PermissionDenied`.
    pub fn deny_collection(&self, collection: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.denied.insert(collection.to_string());
        }
    }

    /// Make uploads whose path contains `pattern` fail.
    pub fn fail_uploads_matching(&self, pattern: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_uploads.push(pattern.to_string());
        }
    }

    /// Number of committed mutations (writes, batches, uploads).
    pub fn write_count(&self) -> usize {
        self.lock().map(|i| i.writes).unwrap_or_default()
    }

    pub fn listener_count(&self) -> usize {
        self.lock().map(|i| i.listeners.len()).unwrap_or_default()
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        let inner = self.lock().ok()?;
        inner.collections.get(collection)?.get(id).cloned()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .map(|inner| inner.snapshot(collection))
            .unwrap_or_default()
    }

    pub fn blob(&self, path: &str) -> Option<StoredBlob> {
        self.lock().ok()?.blobs.get(path).cloned()
    }
}

impl Inner {
    fn check_allowed(&self, collection: &str) -> Result<()> {
        if self.denied.contains(collection) {
            return Err(StoreError::PermissionDenied(collection.to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn evaluate(&self, query: &Query) -> Vec<Document> {
        query.run(&self.snapshot(&query.collection))
    }

    /// Apply a batch to a staged copy; commit only if every op succeeds.
    fn commit(&mut self, ops: &[BatchOp]) -> Result<()> {
        for op in ops {
            self.check_allowed(op.collection())?;
        }

        let mut staged = self.collections.clone();
        for op in ops {
            match op {
                BatchOp::Set {
                    collection,
                    id,
                    data,
                } => {
                    staged
                        .entry(collection.clone())
                        .or_default()
                        .insert(id.clone(), data.clone());
                }
                BatchOp::Update {
                    collection,
                    id,
                    patch,
                } => {
                    let data = staged
                        .get_mut(collection)
                        .and_then(|c| c.get_mut(id))
                        .ok_or_else(|| StoreError::not_found(collection, id))?;
                    patch.apply(data)?;
                }
                BatchOp::Delete { collection, id } => {
                    if let Some(c) = staged.get_mut(collection) {
                        c.remove(id);
                    }
                }
                BatchOp::Merge {
                    collection,
                    id,
                    patch,
                } => {
                    let data = staged
                        .entry(collection.clone())
                        .or_default()
                        .entry(id.clone())
                        .or_insert_with(|| Value::Object(Default::default()));
                    patch.apply(data)?;
                }
            }
        }
        self.collections = staged;
        self.writes += 1;

        let touched: Vec<String> = ops.iter().map(|op| op.collection().to_string()).collect();
        self.notify(&touched);
        Ok(())
    }

    /// Re-run live queries over the touched collections and send diffs.
    fn notify(&mut self, collections: &[String]) {
        let mut closed = Vec::new();
        let ids: Vec<ListenerId> = self.listeners.keys().copied().collect();

        for id in ids {
            let Some(state) = self.listeners.get(&id) else {
                continue;
            };
            if !collections.contains(&state.query.collection) {
                continue;
            }
            let current = self.evaluate(&state.query);
            let changes = diff(&state.last, &current);
            if changes.is_empty() {
                continue;
            }
            let Some(state) = self.listeners.get_mut(&id) else {
                continue;
            };
            if state.tx.send(ListenEvent::Changes(changes)).is_err() {
                closed.push(id);
            } else {
                state.last = current;
            }
        }

        for id in closed {
            debug!(listener = id, "Dropping listener with closed receiver");
            self.listeners.remove(&id);
        }
    }
}

fn diff(previous: &[Document], current: &[Document]) -> Vec<DocumentChange> {
    let before: HashMap<&str, &Document> = previous.iter().map(|d| (d.id.as_str(), d)).collect();
    let after: HashSet<&str> = current.iter().map(|d| d.id.as_str()).collect();

    let mut changes: Vec<DocumentChange> = previous
        .iter()
        .filter(|d| !after.contains(d.id.as_str()))
        .map(|d| DocumentChange::removed(d.clone()))
        .collect();

    for doc in current {
        match before.get(doc.id.as_str()) {
            None => changes.push(DocumentChange::added(doc.clone())),
            Some(old) if old.data != doc.data => changes.push(DocumentChange::modified(doc.clone())),
            Some(_) => {}
        }
    }
    changes
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn listen(&self, query: Query) -> Result<Listener> {
        query.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock()?;

        let id = inner.next_listener;
        inner.next_listener += 1;

        if let Err(e) = inner.check_allowed(&query.collection) {
            warn!(collection = %query.collection, "Live query rejected");
            let _ = tx.send(ListenEvent::Error(e));
            return Ok(Listener { id, events: rx });
        }

        let initial = inner.evaluate(&query);
        let changes = initial.iter().cloned().map(DocumentChange::added).collect();
        let _ = tx.send(ListenEvent::Changes(changes));

        debug!(listener = id, collection = %query.collection, "Live query registered");
        inner.listeners.insert(
            id,
            ListenerState {
                query,
                tx,
                last: initial,
            },
        );
        Ok(Listener { id, events: rx })
    }

    fn unlisten(&self, id: ListenerId) {
        if let Ok(mut inner) = self.lock() {
            if inner.listeners.remove(&id).is_some() {
                debug!(listener = id, "Live query removed");
            }
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        query.validate()?;
        let inner = self.lock()?;
        inner.check_allowed(&query.collection)?;
        Ok(inner.evaluate(query))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let inner = self.lock()?;
        inner.check_allowed(collection)?;
        Ok(inner
            .collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        let id = self.new_id();
        self.lock()?.commit(&[BatchOp::set(collection, &id, data)])?;
        Ok(id)
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()> {
        self.lock()?.commit(&[BatchOp::set(collection, id, data)])
    }

    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<()> {
        self.lock()?.commit(&[BatchOp::update(collection, id, patch)])
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.lock()?.commit(&[BatchOp::delete(collection, id)])
    }

    async fn commit_batch(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.lock()?.commit(&ops)
    }

    async fn upload_blob(&self, path: &str, blob: Bytes, content_type: &str) -> Result<String> {
        let mut inner = self.lock()?;
        if let Some(pattern) = inner.failing_uploads.iter().find(|p| path.contains(p.as_str())) {
            return Err(StoreError::Upload {
                path: path.to_string(),
                reason: format!("rejected by storage rule '{pattern}'"),
            });
        }
        let size = blob.len();
        inner.blobs.insert(
            path.to_string(),
            StoredBlob {
                data: blob,
                content_type: content_type.to_string(),
            },
        );
        inner.writes += 1;
        debug!(path = %path, size, "Stored blob");
        Ok(format!("memory://{}/{}", self.bucket, path))
    }
}
