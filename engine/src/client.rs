//! The storefront handle.
//!
//! [`Storefront`] wires one backend to the mirror, the subscription table,
//! the reconciliation policy and the write coordinator, and turns store
//! notifications into [`SyncEvent`]s.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::auth::{self, AuthGateway, LoginMethod};
use crate::clock::{Clock, SystemClock};
use crate::config::{RemoteConfig, SyncConfig};
use crate::coordinator::WriteCoordinator;
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent, TopicSnapshot};
use crate::ledger::{LogEntry, LogKind};
use crate::mirror::LocalMirror;
use crate::reconcile::{Freshness, ReconciliationPolicy, View};
use crate::record::{Item, Record};
use crate::request::PurchaseRequest;
use crate::session::{AdminSession, SessionStatus};
use crate::settings::Settings;
use crate::store::{MemoryBackend, RemoteBackend, StorageBackend};
use crate::subscription::SubscriptionManager;
use crate::views::{self, InventoryTotals, Listing, ProfitTotals};
use crate::{Document, Topic};

pub struct Storefront {
    backend: Arc<dyn StorageBackend>,
    mirror: Arc<LocalMirror>,
    subscriptions: Arc<SubscriptionManager>,
    policy: Arc<ReconciliationPolicy>,
    coordinator: Arc<WriteCoordinator>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    session: Mutex<AdminSession>,
    fallback_code: Option<String>,
}

impl Storefront {
    pub fn new(backend: Arc<dyn StorageBackend>, clock: Arc<dyn Clock>, config: SyncConfig) -> Self {
        let mirror = LocalMirror::shared();
        let events = EventBus::new(config.event_capacity);
        let subscriptions = Arc::new(SubscriptionManager::new(backend.clone()));
        let policy = Arc::new(ReconciliationPolicy::new(
            backend.clone(),
            mirror.clone(),
            subscriptions.clone(),
            events.clone(),
        ));
        let coordinator = Arc::new(WriteCoordinator::new(
            backend.clone(),
            policy.clone(),
            clock.clone(),
            config.clone(),
        ));
        Self {
            backend,
            mirror,
            subscriptions,
            policy,
            coordinator,
            events,
            clock,
            config,
            session: Mutex::new(AdminSession::default()),
            fallback_code: None,
        }
    }

    /// In-process store, for when no hosted store is configured.
    pub fn local() -> Self {
        Self::new(
            MemoryBackend::shared(),
            Arc::new(SystemClock),
            SyncConfig::default(),
        )
    }

    /// Hosted store described by `/api/config`.
    pub fn remote(remote: &RemoteConfig) -> Self {
        let backend = RemoteBackend::new(remote.store.url.clone(), remote.store.token.clone());
        let mut storefront = Self::new(
            Arc::new(backend),
            Arc::new(SystemClock),
            SyncConfig::default(),
        );
        storefront.fallback_code = remote.admin_code.clone();
        storefront
    }

    /// Fetch the connection config and build the matching storefront.
    ///
    /// Only a config server that cannot be reached selects the local store.
    /// An answer that refuses access or cannot be decoded is returned as an
    /// error, since the hosted store may still be live.
    pub async fn connect(gateway: &dyn AuthGateway) -> Result<Self> {
        match gateway.fetch_config().await {
            Ok(remote) => {
                tracing::info!(url = %remote.store.url, "using hosted store");
                Ok(Self::remote(&remote))
            }
            Err(e) if e.is_retryable() => {
                tracing::warn!(error = %e, "store config unreachable, using local store");
                Ok(Self::local())
            }
            Err(e) => {
                tracing::error!(error = %e, "store config refused");
                Err(e)
            }
        }
    }

    /// Admin code accepted when the auth server cannot be reached.
    pub fn with_fallback_code(mut self, code: impl Into<String>) -> Self {
        self.fallback_code = Some(code.into());
        self
    }

    // ---- lifecycle ----

    /// Load the mirror and subscribe to every topic.
    ///
    /// A transient refresh failure is tolerated since the weapons snapshot
    /// will arrive through the subscription; a permission failure is not.
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.policy.refresh().await {
            if e.is_blocking() {
                return Err(e);
            }
        }
        for topic in Topic::ALL {
            self.resubscribe(topic).await?;
        }
        tracing::info!(kind = ?self.backend.kind(), "storefront started");
        Ok(())
    }

    /// (Re)establish the subscription for `topic`, replacing any live one.
    pub async fn resubscribe(&self, topic: Topic) -> Result<()> {
        let on_change = self.change_handler(topic);
        let on_error = self.error_handler(topic);
        self.subscriptions.subscribe(topic, on_change, on_error).await
    }

    // Handlers hold the coordinator and policy weakly: both own the
    // subscription manager, which owns the tasks running these handlers.
    fn change_handler(&self, topic: Topic) -> impl Fn(Vec<Document>) + Send + Sync + 'static {
        let mirror = self.mirror.clone();
        let events = self.events.clone();
        let coordinator: Weak<WriteCoordinator> = Arc::downgrade(&self.coordinator);
        move |documents: Vec<Document>| {
            let snapshot = if topic == Topic::Weapons {
                mirror.replace_all(Item::decode_all(&documents));
                TopicSnapshot::Weapons(mirror.snapshot())
            } else {
                TopicSnapshot::decode(topic, &documents)
            };
            if snapshot == TopicSnapshot::Settings(None) {
                if let Some(coordinator) = coordinator.upgrade() {
                    tokio::spawn(async move {
                        if let Err(e) = coordinator.ensure_settings().await {
                            tracing::warn!(error = %e, "could not create default settings");
                        }
                    });
                }
            }
            tracing::debug!(topic = %topic, len = snapshot.len(), "topic changed");
            events.emit(SyncEvent::TopicChanged(topic, snapshot));
        }
    }

    fn error_handler(&self, topic: Topic) -> impl Fn(Error) + Send + Sync + 'static {
        let mirror = self.mirror.clone();
        let events = self.events.clone();
        let policy: Weak<ReconciliationPolicy> = Arc::downgrade(&self.policy);
        move |error: Error| {
            events.emit(SyncEvent::SubscriptionError {
                topic,
                error: error.clone(),
            });
            if error.is_blocking() {
                tracing::error!(topic = %topic, error = %error, "subscription denied, clearing mirror");
                mirror.clear();
                events.emit(SyncEvent::Blocked(error));
                return;
            }
            if let Some(policy) = policy.upgrade() {
                tokio::spawn(async move {
                    let _ = policy.refresh().await;
                });
            }
        }
    }

    /// Cancel every subscription. The storefront stays readable.
    pub async fn shutdown(&self) {
        self.subscriptions.teardown().await;
    }

    // ---- components ----

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn mirror(&self) -> &Arc<LocalMirror> {
        &self.mirror
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.subscriptions
    }

    pub fn policy(&self) -> &Arc<ReconciliationPolicy> {
        &self.policy
    }

    /// Every mutation goes through here.
    pub fn coordinator(&self) -> &Arc<WriteCoordinator> {
        &self.coordinator
    }

    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // ---- reads ----

    pub async fn read_through(&self, topic: Topic) -> Result<View> {
        self.policy.read_through(topic).await
    }

    async fn items(&self) -> Result<Arc<Vec<Item>>> {
        let view = self.policy.read_through(Topic::Weapons).await?;
        if let Freshness::Stale(e) = &view.freshness {
            tracing::warn!(error = %e, "serving stale weapons snapshot");
        }
        Ok(view.items().cloned().unwrap_or_default())
    }

    pub async fn buyer_listings(&self) -> Result<Vec<Listing>> {
        Ok(views::buyer_listings(&self.items().await?))
    }

    pub async fn admin_listings(&self) -> Result<Vec<Listing>> {
        Ok(views::admin_listings(&self.items().await?))
    }

    pub async fn inventory_totals(&self) -> Result<InventoryTotals> {
        Ok(views::inventory_totals(&self.items().await?))
    }

    pub async fn profit_totals(&self) -> Result<ProfitTotals> {
        Ok(views::profit_totals(&self.policy.profits().await?))
    }

    pub async fn pending_requests(&self) -> Result<Vec<PurchaseRequest>> {
        Ok(views::pending_requests(&self.policy.purchase_requests().await?))
    }

    pub async fn logs(&self) -> Result<Vec<LogEntry>> {
        self.policy.logs().await
    }

    pub async fn settings(&self) -> Result<Settings> {
        self.policy.settings().await
    }

    // ---- admin session ----

    /// Log in and record it in the audit log.
    pub async fn login(&self, gateway: &dyn AuthGateway, code: &str) -> Result<LoginMethod> {
        let (session, method) =
            auth::login(gateway, code, self.fallback_code.as_deref(), self.clock.now()).await?;
        *self.session.lock() = session;
        self.audit(LogKind::Login, "Admin login").await;
        Ok(method)
    }

    pub async fn logout(&self) {
        self.session.lock().clear();
        self.audit(LogKind::Logout, "Admin logout").await;
    }

    async fn audit(&self, kind: LogKind, message: &str) {
        if let Err(e) = self.coordinator.append_log(kind, message, 0.0, None).await {
            tracing::warn!(kind = kind.as_str(), error = %e, "audit log append failed");
        }
    }

    /// Check the session at the current time, clearing it if expired.
    pub fn session_status(&self) -> SessionStatus {
        self.session.lock().check(self.clock.now())
    }

    pub fn session(&self) -> AdminSession {
        self.session.lock().clone()
    }

    /// Resume a session persisted by a previous run.
    pub fn restore_session(&self, session: AdminSession) -> SessionStatus {
        let mut current = self.session.lock();
        *current = session;
        current.check(self.clock.now())
    }
}

impl std::fmt::Debug for Storefront {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storefront")
            .field("kind", &self.backend.kind())
            .field("mirror_len", &self.mirror.len())
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}
