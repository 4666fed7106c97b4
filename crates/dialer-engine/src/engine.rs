//! # Dialer Engine
//!
//! [`DialerEngine`] owns one dialing session end to end: the [`SessionContext`],
//! the [`LinePool`] and its workers, the contact queue, the arbiter and the
//! event bridge. Hosts drive it through a small surface:
//!
//! - queue management: [`enqueue`](DialerEngine::enqueue), [`enqueue_all`](DialerEngine::enqueue_all)
//! - session control: [`start`](DialerEngine::start), [`pause`](DialerEngine::pause),
//!   [`resume`](DialerEngine::resume), [`stop`](DialerEngine::stop),
//!   [`shutdown`](DialerEngine::shutdown)
//! - provider events: [`handle_provider_event`](DialerEngine::handle_provider_event)
//! - observation: [`stats`](DialerEngine::stats), [`line_snapshots`](DialerEngine::line_snapshots),
//!   [`subscribe`](DialerEngine::subscribe)
//!
//! Session control never fails: a request that does not apply to the current
//! status is a logged no-op.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dialer_engine::prelude::*;
//!
//! # async fn example(provider: Arc<dyn TelephonyProvider>) -> dialer_engine::Result<()> {
//! let engine = DialerEngineBuilder::new()
//!     .with_config(DialerConfig::default())
//!     .with_provider(provider)
//!     .build()
//!     .await?;
//!
//! engine.enqueue(Contact::new("c-1", "+1 (555) 123-0001"));
//! engine.start();
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::arbiter::{Arbiter, HttpRejectionNotifier, RejectionNotifier};
use crate::bridge::EventBridge;
use crate::classifier::{ClassifierPolicy, OutcomeClassifier};
use crate::config::DialerConfig;
use crate::database::{CallRecordStore, MemoryCallStore, SqliteCallStore};
use crate::error::{DialerError, Result};
use crate::events::{DialerEvent, ProviderEvent, SessionUpdate};
use crate::line::LineSnapshot;
use crate::pool::{LineDeps, LineMessage, LinePool, Parked};
use crate::provider::{DialOptions, TelephonyProvider};
use crate::scheduler::{ContactQueue, DialScheduler};
use crate::session::{SessionContext, SessionStatus};
use crate::stats::StatsSnapshot;
use crate::types::{Contact, LineId};
use crate::verification::{VerificationEngine, VerificationReport};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// What happened to an inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Delivered to its line
    Accepted,
    /// Same event id already applied
    Duplicate,
    /// No live line owns the call
    Unrouted,
    /// The call's dial has not returned yet; held for the line
    Deferred,
}

/// Orchestrates one outbound dialing session
pub struct DialerEngine {
    session: Arc<SessionContext>,
    pool: Arc<LinePool>,
    queue: Arc<ContactQueue>,
    arbiter: Arc<Arbiter>,
    bridge: EventBridge,
    store: Arc<dyn CallRecordStore>,
    updates: broadcast::Sender<SessionUpdate>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DialerEngine {
    pub fn builder() -> DialerEngineBuilder {
        DialerEngineBuilder::new()
    }

    pub fn enqueue(&self, contact: Contact) {
        self.queue.push(contact);
    }

    pub fn enqueue_all<I: IntoIterator<Item = Contact>>(&self, contacts: I) {
        self.queue.extend(contacts);
    }

    /// Begin dialing, or resume a paused session
    pub fn start(&self) {
        let Some((from, _)) = self.session.transition_status(|s| match s {
            SessionStatus::Idle | SessionStatus::Paused => Some(SessionStatus::Running),
            _ => None,
        }) else {
            debug!(status = ?self.status(), "Start ignored");
            return;
        };

        if from == SessionStatus::Idle {
            self.session.mark_started();
            let scheduler = DialScheduler::new(
                self.session.clone(),
                self.pool.clone(),
                self.queue.clone(),
                self.updates.clone(),
            );
            let config = &self.session.config;
            let watchdog = self.pool.spawn_watchdog(
                self.session.clone(),
                config.watchdog_interval(),
                config.max_line_age(),
                config.max_bridged_age(),
            );
            let mut tasks = self.tasks.lock();
            tasks.push(tokio::spawn(scheduler.run()));
            tasks.push(watchdog);
            info!(
                session_id = %self.session.id,
                lines = self.pool.len(),
                queued = self.queue.len(),
                "Dialing session started"
            );
        } else {
            info!(session_id = %self.session.id, "Dialing session resumed");
        }
        self.announce(SessionStatus::Running);
    }

    /// Stop assigning new contacts; in-flight calls continue
    pub fn pause(&self) {
        if self
            .session
            .transition_status(|s| (s == SessionStatus::Running).then_some(SessionStatus::Paused))
            .is_some()
        {
            info!(session_id = %self.session.id, "Dialing session paused");
            self.announce(SessionStatus::Paused);
        } else {
            debug!(status = ?self.status(), "Pause ignored");
        }
    }

    pub fn resume(&self) {
        if self
            .session
            .transition_status(|s| (s == SessionStatus::Paused).then_some(SessionStatus::Running))
            .is_some()
        {
            info!(session_id = %self.session.id, "Dialing session resumed");
            self.announce(SessionStatus::Running);
        } else {
            debug!(status = ?self.status(), "Resume ignored");
        }
    }

    /// Clear the queue and let in-flight lines resolve
    ///
    /// With `hangupOnStop` in-flight calls are disconnected instead. The session
    /// reaches `Stopped` once every line is idle.
    pub fn stop(&self) {
        let Some((from, to)) = self.session.transition_status(|s| match s {
            SessionStatus::Idle => Some(SessionStatus::Stopped),
            SessionStatus::Running | SessionStatus::Paused => Some(SessionStatus::Stopping),
            _ => None,
        }) else {
            debug!(status = ?self.status(), "Stop ignored");
            return;
        };

        let dropped = self.queue.clear();
        info!(
            session_id = %self.session.id,
            from = ?from,
            dropped_contacts = dropped,
            "Dialing session stopping"
        );
        if to == SessionStatus::Stopping && self.session.config.scheduler.hangup_on_stop {
            self.pool.broadcast(LineMessage::Hangup);
        }
        self.announce(to);
    }

    /// Stop immediately: hang up every call, wait for workers and background
    /// tasks to exit
    pub async fn shutdown(&self) {
        self.stop();
        if self.status() != SessionStatus::Stopped {
            self.pool.broadcast(LineMessage::Hangup);
            self.session.set_status(SessionStatus::Stopped);
            self.announce(SessionStatus::Stopped);
        }
        self.pool.shutdown().await;

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            task.abort();
            let _ = task.await;
        }
        info!(session_id = %self.session.id, "Dialer engine shut down");
    }

    /// Wait until the session reaches `Stopped`; false on timeout
    pub async fn wait_stopped(&self, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while self.status() != SessionStatus::Stopped {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(25)).await;
        }
        true
    }

    /// Translate and apply a raw provider event
    ///
    /// Events for a handle no line has bound yet are parked while any dial is
    /// in flight, since the provider can report progress before `dial` returns.
    pub fn handle_provider_event(&self, event: &ProviderEvent) -> Result<EventDisposition> {
        if let Some(translated) = self.bridge.translate(event)? {
            return self.handle_event(translated);
        }
        match self.pool.registry().park(event) {
            Parked::Held => Ok(EventDisposition::Deferred),
            Parked::Bound => match self.bridge.translate(event)? {
                Some(translated) => self.handle_event(translated),
                None => Ok(EventDisposition::Unrouted),
            },
            Parked::Dropped => Ok(EventDisposition::Unrouted),
        }
    }

    /// Validate, de-duplicate and route an event to its line
    pub fn handle_event(&self, event: DialerEvent) -> Result<EventDisposition> {
        event.validate(self.pool.len())?;
        if !self.session.processed().first_time(event.dedup_key()) {
            return Ok(EventDisposition::Duplicate);
        }

        let line_id = event.line_id();
        let kind = event.kind();
        if self.pool.route(event) {
            debug!(line_id = %line_id, kind = kind, "Event routed");
            Ok(EventDisposition::Accepted)
        } else {
            warn!(line_id = %line_id, kind = kind, "Line worker gone, event dropped");
            Ok(EventDisposition::Unrouted)
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn config(&self) -> &DialerConfig {
        &self.session.config
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.session.stats().snapshot()
    }

    pub fn line_snapshots(&self) -> Vec<LineSnapshot> {
        self.pool.snapshots()
    }

    /// Push notifications for line changes and session status
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn store(&self) -> &Arc<dyn CallRecordStore> {
        &self.store
    }

    /// Line currently bridged to the agent
    pub fn bridged_line(&self) -> Option<LineId> {
        self.arbiter.winner()
    }

    pub fn verifier(&self) -> VerificationEngine {
        VerificationEngine::new(self.store.clone(), self.session.config.verification.clone())
    }

    /// Audit persisted history within `[from, to)`
    pub async fn verify(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<VerificationReport> {
        self.verifier().verify_window(from, to).await
    }

    fn announce(&self, status: SessionStatus) {
        let _ = self.updates.send(SessionUpdate::StatusChanged { status });
    }
}

/// Builder for [`DialerEngine`]
pub struct DialerEngineBuilder {
    config: Option<DialerConfig>,
    provider: Option<Arc<dyn TelephonyProvider>>,
    store: Option<Arc<dyn CallRecordStore>>,
    notifier: Option<Arc<dyn RejectionNotifier>>,
    sqlite: bool,
}

impl DialerEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            provider: None,
            store: None,
            notifier: None,
            sqlite: false,
        }
    }

    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Telephony provider; required
    pub fn with_provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CallRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Persist to SQLite at `database.url` instead of memory
    pub fn with_sqlite_store(mut self) -> Self {
        self.sqlite = true;
        self
    }

    /// Rejection notifier; defaults to HTTP when `notificationUrl` is set
    pub fn with_notifier(mut self, notifier: Arc<dyn RejectionNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub async fn build(self) -> Result<DialerEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let provider = self
            .provider
            .ok_or_else(|| DialerError::config("telephony provider not provided"))?;

        let store: Arc<dyn CallRecordStore> = match self.store {
            Some(store) => store,
            None if self.sqlite => Arc::new(SqliteCallStore::with_config(&config.database).await?),
            None => Arc::new(MemoryCallStore::new()),
        };
        let notifier: Option<Arc<dyn RejectionNotifier>> = match (self.notifier, &config.arbiter.notification_url) {
            (Some(notifier), _) => Some(notifier),
            (None, Some(url)) => Some(Arc::new(HttpRejectionNotifier::new(url.clone())?)),
            (None, None) => None,
        };

        let config = Arc::new(config);
        let session = Arc::new(SessionContext::new(config.clone()));
        let (pool, endpoints) = LinePool::new(config.parallel_lines);
        let pool = Arc::new(pool);
        let queue = Arc::new(ContactQueue::new());
        let arbiter = Arc::new(Arbiter::new(config.race_window()));
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        let deps = Arc::new(LineDeps {
            session: session.clone(),
            provider,
            store: store.clone(),
            arbiter: arbiter.clone(),
            classifier: OutcomeClassifier::new(ClassifierPolicy::from(config.as_ref())),
            registry: pool.registry().clone(),
            queue: queue.clone(),
            notifier,
            updates: updates.clone(),
            dial_options: DialOptions::from_config(&config),
        });
        pool.spawn_workers(endpoints, deps);

        info!(
            session_id = %session.id,
            lines = config.parallel_lines,
            amd = config.amd_enabled,
            aggressive = config.aggressive_dialing,
            "Dialer engine built"
        );

        Ok(DialerEngine {
            bridge: EventBridge::new(pool.registry().clone(), config.parallel_lines),
            session,
            pool,
            queue,
            arbiter,
            store,
            updates,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl Default for DialerEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
