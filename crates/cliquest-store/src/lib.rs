//! # cliquest-store
//!
//! Client-side contract of the managed document backend used by Cliquest.
//!
//! The backend (document database with live queries, object storage) is an
//! external service; this crate describes what the client may ask of it
//! ([`Gateway`]), the shapes it exchanges ([`Document`], [`Query`],
//! [`Patch`], [`BatchOp`]) and the typed domain documents stored in it. An
//! in-process [`MemoryGateway`] implements the same contract for tests and
//! local development.

pub mod document;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod patch;
pub mod query;

mod error;

pub use document::{ChangeKind, Document, DocumentChange};
pub use error::{Result, StoreError};
pub use gateway::{BatchOp, Gateway, ListenEvent, Listener, ListenerId};
pub use memory::MemoryGateway;
pub use models::*;
pub use patch::{FieldOp, Patch};
pub use query::{Direction, Filter, FilterOp, OrderBy, Query, DOCUMENT_ID};
