use thiserror::Error;

/// Errors produced by the backend gateway.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The document or blob does not exist.
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Backend security rules rejected the operation.
    #[error("Permission denied on '{0}'")]
    PermissionDenied(String),

    /// The query cannot be evaluated (e.g. an empty `in` list).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A patch operation does not fit the stored value.
    #[error("Invalid patch on field '{field}': {reason}")]
    InvalidPatch { field: String, reason: String },

    /// Document data does not match the expected model.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Object storage rejected an upload.
    #[error("Upload failed for '{path}': {reason}")]
    Upload { path: String, reason: String },

    /// The backend could not be reached or is shutting down.
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        Self::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
