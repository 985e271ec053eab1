//! The backend contract.
//!
//! Everything the client knows about the managed backend goes through
//! [`Gateway`]: live queries, one-shot reads, partial updates, atomic batches
//! and blob uploads. The client never assumes more consistency than these
//! operations state.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::document::{Document, DocumentChange};
use crate::error::{Result, StoreError};
use crate::patch::Patch;
use crate::query::Query;

pub type ListenerId = u64;

/// Events delivered by a live query, in backend emission order.
#[derive(Debug)]
pub enum ListenEvent {
    /// The first event carries every matching document as `Added`.
    Changes(Vec<DocumentChange>),
    /// Terminal error; no further events follow.
    Error(StoreError),
}

/// A registered live query.
#[derive(Debug)]
pub struct Listener {
    pub id: ListenerId,
    pub events: mpsc::UnboundedReceiver<ListenEvent>,
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Update {
        collection: String,
        id: String,
        patch: Patch,
    },
    Delete {
        collection: String,
        id: String,
    },
    /// Apply a patch, creating the document first when it is missing.
    /// Fields the patch does not name are left untouched.
    Merge {
        collection: String,
        id: String,
        patch: Patch,
    },
}

impl BatchOp {
    pub fn set(collection: &str, id: &str, data: Value) -> Self {
        Self::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }
    }

    pub fn update(collection: &str, id: &str, patch: Patch) -> Self {
        Self::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        }
    }

    pub fn delete(collection: &str, id: &str) -> Self {
        Self::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn merge(collection: &str, id: &str, patch: Patch) -> Self {
        Self::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            patch,
        }
    }

    pub fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. }
            | Self::Update { collection, .. }
            | Self::Delete { collection, .. }
            | Self::Merge { collection, .. } => collection,
        }
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Register a live query.
    async fn listen(&self, query: Query) -> Result<Listener>;

    /// Drop a live query. Unknown or already removed ids are ignored.
    fn unlisten(&self, id: ListenerId);

    /// One-shot evaluation of a query.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Create a document with a backend-generated id.
    async fn add(&self, collection: &str, data: Value) -> Result<String>;

    /// Create or overwrite a document.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<()>;

    /// Partial update of an existing document.
    async fn update(&self, collection: &str, id: &str, patch: Patch) -> Result<()>;

    async fn delete(&self, collection: &str, id: &str) -> Result<()>;

    /// Patch a document, creating it when missing.
    async fn merge(&self, collection: &str, id: &str, patch: Patch) -> Result<()> {
        self.commit_batch(vec![BatchOp::merge(collection, id, patch)])
            .await
    }

    /// Apply every op or none of them.
    async fn commit_batch(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Store a blob and return its public URL.
    async fn upload_blob(&self, path: &str, blob: Bytes, content_type: &str) -> Result<String>;

    /// Id for a document created inside a batch.
    fn new_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}
