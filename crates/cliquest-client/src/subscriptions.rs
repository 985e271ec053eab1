//! Live query subscriptions.
//!
//! A subscription registers a live query with the backend and keeps a
//! materialized, ordered copy of its result set. Every change event is
//! applied to that copy and the full ordered set is handed to the change
//! callback. A failure is reported once to the error callback and ends the
//! subscription; the last delivered data stays with the caller.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cliquest_store::{ChangeKind, Document, DocumentChange, Gateway, ListenEvent, ListenerId, Query, StoreError};

/// Ordered result set of one live query, updated from change events.
#[derive(Debug, Clone)]
pub struct LiveCollection {
    query: Query,
    documents: Vec<Document>,
}

impl LiveCollection {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            documents: Vec::new(),
        }
    }

    pub fn apply(&mut self, changes: Vec<DocumentChange>) {
        for change in changes {
            let DocumentChange { kind, document } = change;
            match kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    match self.documents.iter_mut().find(|d| d.id == document.id) {
                        Some(existing) => *existing = document,
                        None => self.documents.push(document),
                    }
                }
                ChangeKind::Removed => self.documents.retain(|d| d.id != document.id),
            }
        }
        self.query.sort(&mut self.documents);
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }
}

/// Handle to an active subscription. Dropping it unsubscribes.
pub struct SubscriptionHandle {
    gateway: Arc<dyn Gateway>,
    listener: Option<ListenerId>,
    pump: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop delivery. Calling it again is a no-op.
    pub fn unsubscribe(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(id) = self.listener.take() {
            self.gateway.unlisten(id);
            debug!(listener = id, "Unsubscribed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.pump.as_ref().is_some_and(|pump| !pump.is_finished())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Subscribe to a live query.
///
/// `on_change` receives the full ordered result set, first with the initial
/// snapshot and then after every change. `on_error` is called at most once,
/// also when the backend refuses to register the query.
pub async fn subscribe<F, E>(
    gateway: Arc<dyn Gateway>,
    query: Query,
    mut on_change: F,
    on_error: E,
) -> SubscriptionHandle
where
    F: FnMut(Vec<Document>) + Send + 'static,
    E: FnOnce(StoreError) + Send + 'static,
{
    let collection = query.collection.clone();
    let listener = match gateway.listen(query.clone()).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(collection = %collection, error = %e, "Live query could not be registered");
            on_error(e);
            return SubscriptionHandle {
                gateway,
                listener: None,
                pump: None,
            };
        }
    };

    let id = listener.id;
    let mut events = listener.events;
    let pump = tokio::spawn(async move {
        let mut live = LiveCollection::new(query);
        let mut on_error = Some(on_error);
        while let Some(event) = events.recv().await {
            match event {
                ListenEvent::Changes(changes) => {
                    live.apply(changes);
                    on_change(live.documents().to_vec());
                }
                ListenEvent::Error(e) => {
                    warn!(collection = %collection, error = %e, "Live query failed");
                    if let Some(report) = on_error.take() {
                        report(e);
                    }
                    break;
                }
            }
        }
        debug!(listener = id, "Live query stream ended");
    });

    SubscriptionHandle {
        gateway,
        listener: Some(id),
        pump: Some(pump),
    }
}
