//! Signed-in session shared by every screen and intent.
//!
//! A [`Session`] only exists once authentication has produced a user; all
//! data access is gated on it. It is cheap to clone and is handed to every
//! view and command.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cliquest_shared::avatar::{resolve_avatar_with, resolve_name};
use cliquest_shared::UserId;
use cliquest_store::{Gateway, UserProfile, UserSnapshot};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, EventSink, ToastLevel, UiEvent};

/// Identity reported by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub uid: UserId,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl CurrentUser {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: UserId::new(uid),
            display_name: None,
            photo_url: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

struct SessionInner {
    gateway: Arc<dyn Gateway>,
    user: CurrentUser,
    config: ClientConfig,
    /// Profiles fetched so far, keyed by user id.
    profiles: RwLock<HashMap<UserId, UserProfile>>,
    events: EventSink,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        user: CurrentUser,
        config: ClientConfig,
        events: EventSink,
    ) -> Self {
        info!(user = %user.uid.short(), "Session started");
        Self {
            inner: Arc::new(SessionInner {
                gateway,
                user,
                config,
                profiles: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Wait until the auth state reports a user, then start a session.
    ///
    /// Fails with [`ClientError::NotAuthenticated`] when the auth source goes
    /// away without ever producing a user.
    pub async fn wait_for_auth(
        gateway: Arc<dyn Gateway>,
        mut auth: watch::Receiver<Option<CurrentUser>>,
        config: ClientConfig,
        events: EventSink,
    ) -> Result<Self> {
        loop {
            if let Some(user) = auth.borrow_and_update().clone() {
                return Ok(Self::new(gateway, user, config, events));
            }
            if auth.changed().await.is_err() {
                debug!("Auth source closed before sign-in");
                return Err(ClientError::NotAuthenticated);
            }
        }
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.inner.gateway.as_ref()
    }

    pub fn gateway_handle(&self) -> Arc<dyn Gateway> {
        Arc::clone(&self.inner.gateway)
    }

    pub fn user(&self) -> &CurrentUser {
        &self.inner.user
    }

    pub fn uid(&self) -> &UserId {
        &self.inner.user.uid
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventSink {
        &self.inner.events
    }

    /// Snapshot of the signed-in user for embedding in new documents.
    ///
    /// Prefers the cached profile document over the auth identity.
    pub fn me_snapshot(&self) -> UserSnapshot {
        let user = &self.inner.user;
        let profile = self.cached_profile(&user.uid);
        let profile = profile.as_ref();
        let name = resolve_name(&[
            profile.and_then(|p| p.display_name.as_deref()),
            profile.and_then(|p| p.name.as_deref()),
            user.display_name.as_deref(),
        ]);
        let avatar = resolve_avatar_with(
            &self.inner.config.avatar_service,
            &[
                profile.and_then(|p| p.profile_image.as_deref()),
                profile.and_then(|p| p.photo_url.as_deref()),
                profile.and_then(|p| p.avatar.as_deref()),
                user.photo_url.as_deref(),
            ],
            &name,
        );
        UserSnapshot {
            id: user.uid.clone(),
            name,
            avatar: Some(avatar),
        }
    }

    pub fn cached_profile(&self, id: &UserId) -> Option<UserProfile> {
        self.inner
            .profiles
            .read()
            .ok()
            .and_then(|cache| cache.get(id).cloned())
    }

    pub fn cached_profiles(&self) -> HashMap<UserId, UserProfile> {
        self.inner
            .profiles
            .read()
            .map(|cache| cache.clone())
            .unwrap_or_default()
    }

    pub fn cache_profiles(&self, profiles: impl IntoIterator<Item = UserProfile>) {
        match self.inner.profiles.write() {
            Ok(mut cache) => {
                for profile in profiles {
                    cache.insert(profile.user_id(), profile);
                }
            }
            Err(e) => warn!(error = %e, "Profile cache poisoned"),
        }
    }

    pub fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        emit_event(
            &self.inner.events,
            UiEvent::Toast {
                level,
                message: message.into(),
            },
        );
    }

    /// Log a failed action and surface it as an error toast.
    pub fn report<T>(&self, action: &str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(action, error = %e, "Action failed");
                self.toast(ToastLevel::Error, format!("Failed to {action}: {e}"));
                None
            }
        }
    }

    /// Run a write in the background; failures are reported, never propagated.
    pub fn spawn_write<F>(&self, action: &'static str, write: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let session = self.clone();
        tokio::spawn(async move {
            let result = write.await;
            session.report(action, result);
        })
    }

    /// Drop cached data on sign-out. Open views must be closed by their owners.
    pub fn sign_out(self) {
        if let Ok(mut cache) = self.inner.profiles.write() {
            cache.clear();
        }
        info!(user = %self.inner.user.uid.short(), "Session ended");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::event_channel;
    use bytes::Bytes;
    use cliquest_store::{BatchOp, Document, Listener, ListenerId, MemoryGateway, Patch, Query};
    use serde_json::Value;
    use tokio::sync::mpsc;

    /// Session over a fresh in-memory backend, with its event receiver.
    pub(crate) fn test_session(
        uid: &str,
    ) -> (Session, MemoryGateway, mpsc::UnboundedReceiver<UiEvent>) {
        let gateway = MemoryGateway::new();
        let (session, events) = session_on(&gateway, uid);
        (session, gateway, events)
    }

    /// Another user's session on the same backend.
    pub(crate) fn session_on(
        gateway: &MemoryGateway,
        uid: &str,
    ) -> (Session, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = event_channel();
        let user = CurrentUser::new(uid).with_name(uid.to_uppercase());
        let session = Session::new(Arc::new(gateway.clone()), user, ClientConfig::default(), tx);
        (session, rx)
    }

    /// Backend that hands control back to the runtime before every call,
    /// so two intents joined on one task interleave their reads and writes.
    pub(crate) struct YieldingGateway(pub MemoryGateway);

    #[async_trait::async_trait]
    impl Gateway for YieldingGateway {
        async fn listen(&self, query: Query) -> cliquest_store::Result<Listener> {
            tokio::task::yield_now().await;
            self.0.listen(query).await
        }

        fn unlisten(&self, id: ListenerId) {
            self.0.unlisten(id)
        }

        async fn query(&self, query: &Query) -> cliquest_store::Result<Vec<Document>> {
            tokio::task::yield_now().await;
            self.0.query(query).await
        }

        async fn get(
            &self,
            collection: &str,
            id: &str,
        ) -> cliquest_store::Result<Option<Document>> {
            tokio::task::yield_now().await;
            self.0.get(collection, id).await
        }

        async fn add(&self, collection: &str, data: Value) -> cliquest_store::Result<String> {
            tokio::task::yield_now().await;
            self.0.add(collection, data).await
        }

        async fn set(&self, collection: &str, id: &str, data: Value) -> cliquest_store::Result<()> {
            tokio::task::yield_now().await;
            self.0.set(collection, id, data).await
        }

        async fn update(
            &self,
            collection: &str,
            id: &str,
            patch: Patch,
        ) -> cliquest_store::Result<()> {
            tokio::task::yield_now().await;
            self.0.update(collection, id, patch).await
        }

        async fn delete(&self, collection: &str, id: &str) -> cliquest_store::Result<()> {
            tokio::task::yield_now().await;
            self.0.delete(collection, id).await
        }

        async fn commit_batch(&self, ops: Vec<BatchOp>) -> cliquest_store::Result<()> {
            tokio::task::yield_now().await;
            self.0.commit_batch(ops).await
        }

        async fn upload_blob(
            &self,
            path: &str,
            blob: Bytes,
            content_type: &str,
        ) -> cliquest_store::Result<String> {
            tokio::task::yield_now().await;
            self.0.upload_blob(path, blob, content_type).await
        }
    }

    /// Session whose every backend call yields first.
    pub(crate) fn yielding_session_on(
        gateway: &MemoryGateway,
        uid: &str,
    ) -> (Session, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = event_channel();
        let user = CurrentUser::new(uid).with_name(uid.to_uppercase());
        let backend = YieldingGateway(gateway.clone());
        let session = Session::new(Arc::new(backend), user, ClientConfig::default(), tx);
        (session, rx)
    }

    #[tokio::test]
    async fn test_wait_for_auth_gates_on_user() {
        let (auth_tx, auth_rx) = watch::channel(None);
        let (events, _rx) = event_channel();
        let gateway: Arc<dyn Gateway> = Arc::new(MemoryGateway::new());

        let waiter = tokio::spawn(Session::wait_for_auth(
            gateway,
            auth_rx,
            ClientConfig::default(),
            events,
        ));
        auth_tx.send(Some(CurrentUser::new("alice"))).unwrap();

        let session = waiter.await.unwrap().unwrap();
        assert_eq!(session.uid().as_str(), "alice");
    }

    #[tokio::test]
    async fn test_wait_for_auth_fails_when_source_closes() {
        let (auth_tx, auth_rx) = watch::channel(None);
        let (events, _rx) = event_channel();
        drop(auth_tx);

        let result = Session::wait_for_auth(
            Arc::new(MemoryGateway::new()),
            auth_rx,
            ClientConfig::default(),
            events,
        )
        .await;
        assert!(matches!(result, Err(ClientError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_me_snapshot_prefers_profile() {
        let (session, _gateway, _events) = test_session("alice");
        assert_eq!(session.me_snapshot().name, "ALICE");

        session.cache_profiles([UserProfile {
            id: "alice".into(),
            display_name: Some("Alice Liddell".into()),
            photo_url: Some("https://cdn/alice.png".into()),
            ..Default::default()
        }]);
        let me = session.me_snapshot();
        assert_eq!(me.name, "Alice Liddell");
        assert_eq!(me.avatar.as_deref(), Some("https://cdn/alice.png"));
    }

    #[tokio::test]
    async fn test_report_emits_error_toast() {
        let (session, _gateway, mut events) = test_session("alice");
        let result: Option<()> = session.report("send message", Err(ClientError::NotAuthenticated));
        assert!(result.is_none());

        match events.recv().await {
            Some(UiEvent::Toast { level, message }) => {
                assert_eq!(level, ToastLevel::Error);
                assert!(message.contains("send message"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
