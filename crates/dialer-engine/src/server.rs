//! # Dialer Server
//!
//! Hosts a [`DialerEngine`] behind a small HTTP surface and runs the background
//! loops that a deployed dialer needs.
//!
//! ## Routes
//!
//! | Method | Path | Purpose |
//! |---|---|---|
//! | `POST` | `/webhooks/provider` | Provider call-progress events (JSON) |
//! | `GET` | `/health` | Liveness plus session status |
//! | `GET` | `/stats` | Current [`StatsSnapshot`] |
//! | `GET` | `/lines` | Per-line snapshots |
//! | `GET` | `/verification` | On-demand audit of the configured window |
//!
//! Webhook responses: `202` when the event was delivered to a line or held for
//! a dial still in flight, `200` for duplicates and calls no line owns any
//! more, `400` for malformed events and `500` for anything else.
//!
//! ## Background loops
//!
//! - a monitor loop that logs session stats every 10 seconds
//! - a verification loop, when `server.verificationIntervalSecs` is non-zero
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dialer_engine::prelude::*;
//!
//! # async fn example(provider: Arc<dyn TelephonyProvider>) -> dialer_engine::Result<()> {
//! let mut server = DialerServerBuilder::new()
//!     .with_config(DialerConfig::from_file("dialer.toml")?)
//!     .with_provider(provider)
//!     .with_sqlite_store()
//!     .build()
//!     .await?;
//!
//! server.engine().enqueue(Contact::new("c-1", "+15551230001"));
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::arbiter::RejectionNotifier;
use crate::config::DialerConfig;
use crate::database::CallRecordStore;
use crate::engine::{DialerEngine, DialerEngineBuilder, EventDisposition};
use crate::error::{DialerError, Result};
use crate::events::ProviderEvent;
use crate::provider::TelephonyProvider;
use crate::session::SessionStatus;
use crate::stats::StatsSnapshot;

const MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// HTTP routes over a shared engine
pub fn router(engine: Arc<DialerEngine>) -> Router {
    Router::new()
        .route("/webhooks/provider", post(provider_webhook))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/lines", get(lines))
        .route("/verification", get(verification))
        .with_state(engine)
}

fn error_response(status: StatusCode, err: &DialerError) -> Response {
    let body = json!({ "error": err.to_string(), "category": err.category() });
    (status, Json(body)).into_response()
}

async fn provider_webhook(State(engine): State<Arc<DialerEngine>>, body: Bytes) -> Response {
    let event = match ProviderEvent::from_json(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected provider webhook");
            return error_response(StatusCode::BAD_REQUEST, &e);
        }
    };

    match engine.handle_provider_event(&event) {
        Ok(EventDisposition::Accepted) => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))).into_response()
        }
        Ok(EventDisposition::Duplicate) => {
            (StatusCode::OK, Json(json!({ "status": "duplicate" }))).into_response()
        }
        Ok(EventDisposition::Unrouted) => {
            (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response()
        }
        Ok(EventDisposition::Deferred) => {
            (StatusCode::ACCEPTED, Json(json!({ "status": "deferred" }))).into_response()
        }
        Err(e @ DialerError::InvalidEvent { .. }) => {
            warn!(handle = %event.handle, error = %e, "Rejected provider event");
            error_response(StatusCode::BAD_REQUEST, &e)
        }
        Err(e) => {
            error!(handle = %event.handle, error = %e, "Failed to handle provider event");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

async fn health(State(engine): State<Arc<DialerEngine>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "sessionId": engine.session().id,
        "session": engine.status(),
        "lines": engine.config().parallel_lines,
        "queued": engine.queue_len(),
        "bridgedLine": engine.bridged_line(),
    }))
}

async fn stats(State(engine): State<Arc<DialerEngine>>) -> Json<StatsSnapshot> {
    Json(engine.stats())
}

async fn lines(State(engine): State<Arc<DialerEngine>>) -> Response {
    Json(engine.line_snapshots()).into_response()
}

async fn verification(State(engine): State<Arc<DialerEngine>>) -> Response {
    let window = ChronoDuration::seconds(engine.config().server.verification_window_secs);
    let now = Utc::now();
    match engine.verify(now - window, now).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

/// A dialer engine served over HTTP with its background loops
pub struct DialerServer {
    engine: Arc<DialerEngine>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    http_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
    verification_handle: Option<JoinHandle<()>>,
}

impl DialerServer {
    pub fn new(engine: Arc<DialerEngine>) -> Self {
        Self {
            engine,
            local_addr: None,
            shutdown_tx: None,
            http_handle: None,
            monitor_handle: None,
            verification_handle: None,
        }
    }

    /// Bind the HTTP listener, start the background loops and begin dialing
    pub async fn start(&mut self) -> Result<()> {
        let config = self.engine.config().server.clone();
        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| DialerError::network("bind", format!("{}: {}", config.bind_address, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DialerError::internal(format!("listener address: {}", e)))?;
        self.local_addr = Some(local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        let app = router(self.engine.clone());
        self.http_handle = Some(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "HTTP server failed");
            }
        }));
        info!(address = %local_addr, "Webhook server listening");

        let engine = self.engine.clone();
        self.monitor_handle = Some(tokio::spawn(Self::monitor_loop(engine)));

        if config.verification_interval_secs > 0 {
            let engine = self.engine.clone();
            let every = Duration::from_secs(config.verification_interval_secs);
            self.verification_handle = Some(tokio::spawn(Self::verification_loop(engine, every)));
            info!(interval_secs = config.verification_interval_secs, "Scheduled verification enabled");
        }

        self.engine.start();
        Ok(())
    }

    /// Shut the engine down and stop serving
    pub async fn stop(&mut self) -> Result<()> {
        info!("Stopping dialer server");
        self.engine.shutdown().await;

        for handle in [self.monitor_handle.take(), self.verification_handle.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
            let _ = handle.await;
        }

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.http_handle.take() {
            let _ = handle.await;
        }
        info!("Dialer server stopped");
        Ok(())
    }

    /// Serve until the session stops on its own or ctrl-c is received
    pub async fn run(&mut self) -> Result<()> {
        if self.http_handle.is_none() {
            self.start().await?;
        }
        let mut updates = self.engine.subscribe();
        let engine = self.engine.clone();
        let stopped = async move {
            while engine.status() != SessionStatus::Stopped {
                if let Err(RecvError::Closed) = updates.recv().await {
                    break;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupt received"),
            _ = stopped => info!("Dialing session finished"),
        }
        self.stop().await
    }

    pub fn engine(&self) -> &Arc<DialerEngine> {
        &self.engine
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    async fn monitor_loop(engine: Arc<DialerEngine>) {
        let mut ticker = interval(MONITOR_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let stats = engine.stats();
            let busy = engine
                .line_snapshots()
                .iter()
                .filter(|l| !l.state.is_idle())
                .count();
            info!(
                session = ?engine.status(),
                busy_lines = busy,
                queued = engine.queue_len(),
                dialed = stats.total_dialed,
                connected = stats.connected,
                voicemails = stats.voicemails,
                connect_rate = stats.connect_rate,
                dials_per_minute = stats.dials_per_minute,
                "Session status"
            );
        }
    }

    async fn verification_loop(engine: Arc<DialerEngine>, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let window = ChronoDuration::seconds(engine.config().server.verification_window_secs);
            let now = Utc::now();
            match engine.verify(now - window, now).await {
                Ok(report) => debug!(passed = report.passed, records = report.records, "Scheduled verification ran"),
                Err(e) => warn!(error = %e, "Scheduled verification failed"),
            }
        }
    }
}

/// Builder for [`DialerServer`]
pub struct DialerServerBuilder {
    engine: DialerEngineBuilder,
}

impl DialerServerBuilder {
    pub fn new() -> Self {
        Self {
            engine: DialerEngineBuilder::new(),
        }
    }

    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.engine = self.engine.with_config(config);
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn TelephonyProvider>) -> Self {
        self.engine = self.engine.with_provider(provider);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn CallRecordStore>) -> Self {
        self.engine = self.engine.with_store(store);
        self
    }

    pub fn with_sqlite_store(mut self) -> Self {
        self.engine = self.engine.with_sqlite_store();
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RejectionNotifier>) -> Self {
        self.engine = self.engine.with_notifier(notifier);
        self
    }

    pub async fn build(self) -> Result<DialerServer> {
        let engine = self.engine.build().await?;
        Ok(DialerServer::new(Arc::new(engine)))
    }
}

impl Default for DialerServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
