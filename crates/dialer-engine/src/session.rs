//! Session context
//!
//! Everything shared across one start-to-stop dialing run lives in a single
//! [`SessionContext`], handed to components by `Arc`: the policy configuration,
//! the phone de-dup set, the processed-event guard, per-contact attempt counts,
//! the run status and the stats aggregator.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::config::DialerConfig;
use crate::stats::StatsAggregator;
use crate::types::ContactId;

/// Run status of a dialing session
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, not yet started
    Idle,
    Running,
    /// No new assignments; in-flight calls continue
    Paused,
    /// Queue cleared, waiting for in-flight lines to finish
    Stopping,
    Stopped,
}

impl SessionStatus {
    pub fn accepts_new_dials(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Lines return to idle after cool-down only while the session is live
    pub fn recycles_lines(&self) -> bool {
        matches!(self, Self::Idle | Self::Running | Self::Paused)
    }
}

/// Set of event keys already applied; inserting is the idempotence check
#[derive(Debug, Default)]
pub struct ProcessedEvents {
    keys: DashSet<String>,
}

impl ProcessedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a key is seen
    pub fn first_time(&self, key: impl Into<String>) -> bool {
        let key = key.into();
        let fresh = self.keys.insert(key.clone());
        if !fresh {
            debug!(key = %key, "Duplicate event ignored");
        }
        fresh
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Shared state of one dialing session
pub struct SessionContext {
    pub id: String,
    pub config: Arc<DialerConfig>,
    pub created_at: DateTime<Utc>,
    status: RwLock<SessionStatus>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    dialed_phones: DashSet<String>,
    attempts: DashMap<ContactId, u32>,
    processed: Arc<ProcessedEvents>,
    stats: Arc<StatsAggregator>,
}

impl SessionContext {
    pub fn new(config: Arc<DialerConfig>) -> Self {
        let processed = Arc::new(ProcessedEvents::new());
        Self {
            id: format!("session-{}", Uuid::new_v4()),
            config,
            created_at: Utc::now(),
            status: RwLock::new(SessionStatus::Idle),
            started_at: RwLock::new(None),
            dialed_phones: DashSet::new(),
            attempts: DashMap::new(),
            stats: Arc::new(StatsAggregator::new(processed.clone())),
            processed,
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    /// Swap the status, returning the previous one
    pub fn set_status(&self, status: SessionStatus) -> SessionStatus {
        let mut guard = self.status.write();
        std::mem::replace(&mut *guard, status)
    }

    /// Apply `f` to the current status atomically; `None` leaves it unchanged
    pub fn transition_status<F>(&self, f: F) -> Option<(SessionStatus, SessionStatus)>
    where
        F: FnOnce(SessionStatus) -> Option<SessionStatus>,
    {
        let mut guard = self.status.write();
        let from = *guard;
        let to = f(from)?;
        *guard = to;
        Some((from, to))
    }

    pub fn mark_started(&self) {
        let mut started = self.started_at.write();
        if started.is_none() {
            *started = Some(Utc::now());
        }
        self.stats.start();
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.read()
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn processed(&self) -> &Arc<ProcessedEvents> {
        &self.processed
    }

    /// Claim a normalized phone number for this session; false if already dialed
    pub fn claim_phone(&self, phone: &str) -> bool {
        self.dialed_phones.insert(phone.to_string())
    }

    pub fn was_dialed(&self, phone: &str) -> bool {
        self.dialed_phones.contains(phone)
    }

    pub fn dialed_count(&self) -> usize {
        self.dialed_phones.len()
    }

    /// Increment and return the attempt count for a contact
    pub fn record_attempt(&self, contact: &ContactId, prior: u32) -> u32 {
        let mut entry = self.attempts.entry(contact.clone()).or_insert(prior);
        *entry += 1;
        *entry
    }

    pub fn attempts(&self, contact: &ContactId) -> Option<u32> {
        self.attempts.get(contact).map(|a| *a)
    }
}
