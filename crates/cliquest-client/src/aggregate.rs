//! View-state aggregation.
//!
//! A screen's view model is derived from several live queries at once. A
//! [`ViewBuilder`] registers every source before the first model is
//! produced, funnels their snapshots into one [`Inputs`] map and re-runs the
//! screen's [`Aggregator`] after each update. The latest model is published
//! on a watch channel held by the [`View`].

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cliquest_shared::avatar::{resolve_avatar_with, resolve_name};
use cliquest_shared::UserId;
use cliquest_store::{parse_timestamp, Document, Query, StoreError, UserProfile, UserSnapshot};

use crate::events::{emit_event, UiEvent};
use crate::session::Session;
use crate::subscriptions::{subscribe, SubscriptionHandle};

/// Latest result set of every source feeding a view.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    sources: HashMap<&'static str, Vec<Document>>,
    failed: HashSet<&'static str>,
}

impl Inputs {
    pub fn update(&mut self, source: &'static str, documents: Vec<Document>) {
        self.sources.insert(source, documents);
    }

    pub fn mark_failed(&mut self, source: &'static str) {
        self.failed.insert(source);
    }

    /// Whether the source has delivered at least one snapshot.
    pub fn is_loaded(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn has_failed(&self, source: &str) -> bool {
        self.failed.contains(source)
    }

    pub fn documents(&self, source: &str) -> &[Document] {
        self.sources.get(source).map(Vec::as_slice).unwrap_or_default()
    }

    /// Decode every document of a source, skipping malformed ones.
    pub fn decode<T: DeserializeOwned>(&self, source: &str) -> Vec<T> {
        self.documents(source)
            .iter()
            .filter_map(|doc| match doc.decode() {
                Ok(model) => Some(model),
                Err(e) => {
                    warn!(source, id = %doc.id, error = %e, "Skipping malformed document");
                    None
                }
            })
            .collect()
    }

    pub fn first<T: DeserializeOwned>(&self, source: &str) -> Option<T> {
        self.decode(source).into_iter().next()
    }

    /// Profiles of a `users` source keyed by id.
    pub fn profiles(&self, source: &str) -> HashMap<UserId, UserProfile> {
        self.decode::<UserProfile>(source)
            .into_iter()
            .map(|p| (p.user_id(), p))
            .collect()
    }
}

/// Pure function from source data to a view model.
pub trait Aggregator: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn aggregate(&self, inputs: &Inputs) -> Self::Output;
}

impl<F, O> Aggregator for F
where
    F: Fn(&Inputs) -> O + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    type Output = O;

    fn aggregate(&self, inputs: &Inputs) -> O {
        self(inputs)
    }
}

enum SourceUpdate {
    Snapshot(&'static str, Vec<Document>),
    Failed(&'static str, StoreError),
}

/// Shared flag telling background work whether the owning view is still open.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_live(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn end(&self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ViewBuilder<A: Aggregator> {
    session: Session,
    name: &'static str,
    aggregator: A,
    sources: Vec<(&'static str, Query)>,
}

impl<A: Aggregator> ViewBuilder<A> {
    pub fn new(session: &Session, name: &'static str, aggregator: A) -> Self {
        Self {
            session: session.clone(),
            name,
            aggregator,
            sources: Vec::new(),
        }
    }

    pub fn source(mut self, name: &'static str, query: Query) -> Self {
        self.sources.push((name, query));
        self
    }

    /// Register every source, then start aggregating.
    pub async fn open(self) -> View<A::Output> {
        let Self {
            session,
            name,
            aggregator,
            sources,
        } = self;

        let (update_tx, mut update_rx) = mpsc::unbounded_channel();
        let (model_tx, model_rx) = watch::channel(aggregator.aggregate(&Inputs::default()));

        let mut subscriptions = Vec::with_capacity(sources.len());
        for (source, query) in sources {
            let snapshots = update_tx.clone();
            let failures = update_tx.clone();
            let handle = subscribe(
                session.gateway_handle(),
                query,
                move |docs| {
                    let _ = snapshots.send(SourceUpdate::Snapshot(source, docs));
                },
                move |e| {
                    let _ = failures.send(SourceUpdate::Failed(source, e));
                },
            )
            .await;
            subscriptions.push(handle);
        }
        drop(update_tx);
        debug!(view = name, sources = subscriptions.len(), "View opened");

        let events = session.events().clone();
        let driver = tokio::spawn(async move {
            let mut inputs = Inputs::default();
            while let Some(update) = update_rx.recv().await {
                match update {
                    SourceUpdate::Snapshot(source, docs) => inputs.update(source, docs),
                    SourceUpdate::Failed(source, e) => {
                        warn!(view = name, source, error = %e, "View source failed");
                        emit_event(
                            &events,
                            UiEvent::SubscriptionFailed {
                                source: format!("{name}/{source}"),
                                error: e.to_string(),
                            },
                        );
                        inputs.mark_failed(source);
                    }
                }
                if model_tx.send(aggregator.aggregate(&inputs)).is_err() {
                    break;
                }
            }
        });

        View {
            name,
            model: model_rx,
            subscriptions,
            driver: Some(driver),
            liveness: Liveness::new(),
        }
    }
}

/// An open view: its current model plus the subscriptions feeding it.
pub struct View<O> {
    name: &'static str,
    model: watch::Receiver<O>,
    subscriptions: Vec<SubscriptionHandle>,
    driver: Option<JoinHandle<()>>,
    liveness: Liveness,
}

impl<O: Clone> View<O> {
    pub fn current(&self) -> O {
        self.model.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<O> {
        self.model.clone()
    }

    /// Wait for the next model, `None` once the view has closed.
    pub async fn changed(&mut self) -> Option<O> {
        self.model.changed().await.ok()?;
        Some(self.model.borrow_and_update().clone())
    }

    /// Wait until a model satisfies `ready`, returning it.
    pub async fn wait_for(&mut self, ready: impl Fn(&O) -> bool) -> Option<O> {
        loop {
            {
                let model = self.model.borrow_and_update();
                if ready(&*model) {
                    return Some((*model).clone());
                }
            }
            self.model.changed().await.ok()?;
        }
    }

    pub fn liveness(&self) -> Liveness {
        self.liveness.clone()
    }

    pub fn is_open(&self) -> bool {
        self.liveness.is_live()
    }
}

impl<O> View<O> {
    /// Unsubscribe every source. Idempotent.
    pub fn close(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.unsubscribe();
        }
        if let Some(driver) = self.driver.take() {
            driver.abort();
            debug!(view = self.name, "View closed");
        }
        self.liveness.end();
    }
}

impl<O> Drop for View<O> {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Shared aggregation helpers
// ---------------------------------------------------------------------------

/// A user as shown on screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonView {
    pub id: UserId,
    pub name: String,
    pub avatar: String,
}

/// Resolve a user for display: live profile first, then the snapshot
/// embedded in the document, then the anonymous placeholder.
pub fn resolve_person(
    id: &UserId,
    profiles: &HashMap<UserId, UserProfile>,
    snapshot: Option<&UserSnapshot>,
    avatar_service: &str,
) -> PersonView {
    let profile = profiles.get(id);
    let name = resolve_name(&[
        profile.and_then(|p| p.display_name.as_deref()),
        profile.and_then(|p| p.name.as_deref()),
        snapshot.map(|s| s.name.as_str()),
    ]);
    let avatar = resolve_avatar_with(
        avatar_service,
        &[
            profile.and_then(|p| p.profile_image.as_deref()),
            profile.and_then(|p| p.photo_url.as_deref()),
            profile.and_then(|p| p.avatar.as_deref()),
            snapshot.and_then(|s| s.avatar.as_deref()),
        ],
        &name,
    );
    PersonView {
        id: id.clone(),
        name,
        avatar,
    }
}

/// Items created on the same calendar day (UTC).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayGroup<T> {
    /// `None` collects items whose timestamp could not be parsed.
    pub date: Option<NaiveDate>,
    pub items: Vec<T>,
}

/// Partition items by creation day, keeping first-seen group order and the
/// original item order inside each group.
pub fn group_by_day<T>(items: Vec<T>, created_at: impl Fn(&T) -> &str) -> Vec<DayGroup<T>> {
    let mut groups: Vec<DayGroup<T>> = Vec::new();
    let mut index: HashMap<Option<NaiveDate>, usize> = HashMap::new();
    for item in items {
        let date = parse_timestamp(created_at(&item)).map(|ts| ts.date_naive());
        let slot = *index.entry(date).or_insert_with(|| {
            groups.push(DayGroup {
                date,
                items: Vec::new(),
            });
            groups.len() - 1
        });
        groups[slot].items.push(item);
    }
    groups
}
