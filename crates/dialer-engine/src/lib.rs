//! # Dialer Engine
//!
//! Multi-line outbound dialing for a call-center agent. The engine dials several
//! contacts at once, lets exactly one answered call reach the agent, classifies
//! every outcome and audits the recorded call history afterwards.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  assign   ┌──────────────────────────────┐
//! │ DialScheduler│──────────▶│ LinePool (one task per line) │
//! └──────▲───────┘           │  CallLine state machine      │
//!        │ queue             │  OutcomeClassifier           │
//! ┌──────┴───────┐           │  Arbiter (one agent bridge)  │
//! │ ContactQueue │           └──────▲───────────────┬───────┘
//! └──────────────┘                  │ DialerEvent   │ CallRecord
//!                     ┌─────────────┴──┐     ┌──────▼──────────┐
//!  provider webhook ─▶│  EventBridge   │     │ CallRecordStore │
//!                     └────────────────┘     └──────▲──────────┘
//!                                                   │
//!                                      ┌────────────┴───────┐
//!                                      │ VerificationEngine │
//!                                      └────────────────────┘
//! ```
//!
//! - [`scheduler`] pops eligible contacts (de-dup, do-not-call, attempt limits,
//!   number validation) and hands them to idle lines under a dial rate limit.
//! - [`pool`] runs one worker per line. A worker owns its [`line::CallLine`],
//!   consumes its own channel and persists one [`database::CallRecord`] per attempt.
//! - [`arbiter`] decides which of several near-simultaneous answers is bridged;
//!   the losers are dropped and reported through a [`arbiter::RejectionNotifier`].
//! - [`bridge`] turns provider webhooks into validated [`events::DialerEvent`]s.
//! - [`verification`] audits persisted history: integrity, AMD, dispositions,
//!   leaks and the single-connection rule.
//! - [`engine`] wires everything into one session; [`server`] hosts it over HTTP.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dialer_engine::prelude::*;
//!
//! # async fn example(provider: Arc<dyn TelephonyProvider>) -> dialer_engine::Result<()> {
//! let mut config = DialerConfig::default();
//! config.parallel_lines = 3;
//! config.auto_skip_voicemail = true;
//!
//! let engine = DialerEngineBuilder::new()
//!     .with_config(config)
//!     .with_provider(provider)
//!     .build()
//!     .await?;
//!
//! engine.enqueue_all(vec![
//!     Contact::new("c-1", "+1 555 123 0001"),
//!     Contact::new("c-2", "+1 555 123 0002"),
//! ]);
//! engine.start();
//!
//! // Feed provider webhooks into engine.handle_provider_event(..)
//! let stats = engine.stats();
//! println!("dialed {} connected {}", stats.total_dialed, stats.connected);
//! # Ok(())
//! # }
//! ```

// Core modules
pub mod error;
pub mod config;
pub mod types;
pub mod logging;
pub mod retry;

// Session state and events
pub mod events;
pub mod session;
pub mod stats;

// Dialing
pub mod classifier;
pub mod line;
pub mod pool;
pub mod scheduler;
pub mod arbiter;

// External interfaces
pub mod bridge;
pub mod provider;
pub mod database;
pub mod server;

// Auditing
pub mod verification;

pub mod engine;

// Re-exports for convenience
pub use config::DialerConfig;
pub use engine::{DialerEngine, DialerEngineBuilder, EventDisposition};
pub use error::{DialerError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DialerConfig, DialerEngine, DialerEngineBuilder, DialerError, EventDisposition, Result};

    pub use crate::config::{
        ArbiterConfig, DatabaseConfig, LineConfig, SchedulerConfig, ServerConfig, VerificationConfig,
    };
    pub use crate::types::{
        AmdSensitivity, AnsweredBy, CallHandle, CallOutcome, Contact, ContactId, EndReason, LineId,
        LineState, RecordStatus,
    };

    pub use crate::arbiter::{HttpRejectionNotifier, RejectionNotice, RejectionNotifier};
    pub use crate::database::{CallRecord, CallRecordStore, MemoryCallStore, SqliteCallStore};
    pub use crate::events::{DialerEvent, ProviderEvent, ProviderEventKind, SessionUpdate};
    pub use crate::line::LineSnapshot;
    pub use crate::provider::{DialOptions, TelephonyProvider};
    pub use crate::server::{DialerServer, DialerServerBuilder};
    pub use crate::session::SessionStatus;
    pub use crate::stats::StatsSnapshot;
    pub use crate::verification::{VerificationEngine, VerificationReport};

    pub use crate::logging::{setup_logging, LoggingConfig};
}
