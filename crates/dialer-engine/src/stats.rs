//! Session statistics
//!
//! Counters are updated exactly once per call attempt. Dial starts are keyed
//! `started:<handle>` and terminal events `terminal:<handle>` in the session's
//! [`ProcessedEvents`] set, so a provider redelivering the same hangup cannot
//! double count.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::session::ProcessedEvents;
use crate::types::{CallHandle, CallOutcome};

/// Why the scheduler dropped a contact without dialing
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    DoNotCall,
    MaxAttempts,
    Duplicate,
    InvalidNumber,
}

/// Terminal facts about one attempt
#[derive(Debug, Clone, Copy)]
pub struct TerminalSample {
    pub outcome: CallOutcome,
    /// Seconds the agent talked to a human; ignored for other outcomes
    pub talk_time_secs: u64,
    /// Dial-to-answer latency, when answered
    pub connect_time: Option<Duration>,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    total_dialed: u64,
    connected: u64,
    voicemails: u64,
    failed: u64,
    busy: u64,
    no_answer: u64,
    canceled: u64,
    talk_time_secs: u64,
    connect_time_total_ms: u64,
    connect_time_samples: u64,
    skipped_do_not_call: u64,
    skipped_max_attempts: u64,
    skipped_duplicate: u64,
    skipped_invalid: u64,
    arbitration_losses: u64,
    drop_latency_total_ms: u64,
    drop_latency_samples: u64,
    drop_latency_max_ms: u64,
    notifications_sent: u64,
    notifications_failed: u64,
    watchdog_recycles: u64,
}

/// Point-in-time view of the session counters and derived metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total_dialed: u64,
    pub connected: u64,
    pub voicemails: u64,
    pub failed: u64,
    pub busy: u64,
    pub no_answer: u64,
    pub canceled: u64,
    pub talk_time_secs: u64,
    pub skipped_do_not_call: u64,
    pub skipped_max_attempts: u64,
    pub skipped_duplicate: u64,
    pub skipped_invalid: u64,
    pub arbitration_losses: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub watchdog_recycles: u64,
    /// connected / totalDialed
    pub connect_rate: f64,
    pub average_connect_time_ms: f64,
    pub dials_per_minute: f64,
    pub average_drop_latency_ms: f64,
    pub max_drop_latency_ms: u64,
    pub elapsed_secs: f64,
}

impl StatsSnapshot {
    pub fn total_skipped(&self) -> u64 {
        self.skipped_do_not_call + self.skipped_max_attempts + self.skipped_duplicate + self.skipped_invalid
    }
}

/// Idempotent running counters for one session
pub struct StatsAggregator {
    counters: Mutex<Counters>,
    started_at: Mutex<Option<Instant>>,
    processed: Arc<ProcessedEvents>,
}

impl StatsAggregator {
    pub fn new(processed: Arc<ProcessedEvents>) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            started_at: Mutex::new(None),
            processed,
        }
    }

    /// Start the elapsed-time clock; later calls keep the first start
    pub fn start(&self) {
        let mut started = self.started_at.lock();
        if started.is_none() {
            *started = Some(Instant::now());
        }
    }

    /// Count a dial start. Returns false for a duplicate.
    pub fn record_dial_started(&self, handle: &CallHandle) -> bool {
        if !self.processed.first_time(format!("started:{}", handle)) {
            return false;
        }
        self.counters.lock().total_dialed += 1;
        true
    }

    /// Count a dial that failed before the provider issued a handle
    pub fn record_dial_rejected(&self) {
        let mut c = self.counters.lock();
        c.total_dialed += 1;
        c.failed += 1;
    }

    /// Count a terminal outcome. Returns false for a duplicate.
    pub fn record_terminal(&self, handle: &CallHandle, sample: TerminalSample) -> bool {
        if !self.processed.first_time(format!("terminal:{}", handle)) {
            return false;
        }

        let mut c = self.counters.lock();
        match sample.outcome {
            CallOutcome::Connected => {
                c.connected += 1;
                c.talk_time_secs += sample.talk_time_secs;
            }
            CallOutcome::Voicemail => c.voicemails += 1,
            CallOutcome::Busy => c.busy += 1,
            CallOutcome::NoAnswer => c.no_answer += 1,
            CallOutcome::Canceled => c.canceled += 1,
            CallOutcome::Failed => c.failed += 1,
        }
        if sample.outcome == CallOutcome::Connected {
            if let Some(connect_time) = sample.connect_time {
                c.connect_time_total_ms += connect_time.as_millis() as u64;
                c.connect_time_samples += 1;
            }
        }
        debug!(handle = %handle, outcome = %sample.outcome, "Terminal outcome recorded");
        true
    }

    pub fn record_skip(&self, reason: SkipReason) {
        let mut c = self.counters.lock();
        match reason {
            SkipReason::DoNotCall => c.skipped_do_not_call += 1,
            SkipReason::MaxAttempts => c.skipped_max_attempts += 1,
            SkipReason::Duplicate => c.skipped_duplicate += 1,
            SkipReason::InvalidNumber => c.skipped_invalid += 1,
        }
    }

    pub fn record_arbitration_loss(&self, drop_latency: Duration) {
        let ms = drop_latency.as_millis() as u64;
        let mut c = self.counters.lock();
        c.arbitration_losses += 1;
        c.drop_latency_total_ms += ms;
        c.drop_latency_samples += 1;
        c.drop_latency_max_ms = c.drop_latency_max_ms.max(ms);
    }

    pub fn record_notification(&self, delivered: bool) {
        let mut c = self.counters.lock();
        if delivered {
            c.notifications_sent += 1;
        } else {
            c.notifications_failed += 1;
        }
    }

    pub fn record_watchdog_recycle(&self) {
        self.counters.lock().watchdog_recycles += 1;
    }

    pub fn elapsed(&self) -> Duration {
        let started = *self.started_at.lock();
        started.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let elapsed = self.elapsed();
        let c = self.counters.lock().clone();

        let ratio = |num: u64, den: u64| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let minutes = elapsed.as_secs_f64() / 60.0;

        StatsSnapshot {
            total_dialed: c.total_dialed,
            connected: c.connected,
            voicemails: c.voicemails,
            failed: c.failed,
            busy: c.busy,
            no_answer: c.no_answer,
            canceled: c.canceled,
            talk_time_secs: c.talk_time_secs,
            skipped_do_not_call: c.skipped_do_not_call,
            skipped_max_attempts: c.skipped_max_attempts,
            skipped_duplicate: c.skipped_duplicate,
            skipped_invalid: c.skipped_invalid,
            arbitration_losses: c.arbitration_losses,
            notifications_sent: c.notifications_sent,
            notifications_failed: c.notifications_failed,
            watchdog_recycles: c.watchdog_recycles,
            connect_rate: ratio(c.connected, c.total_dialed),
            average_connect_time_ms: ratio(c.connect_time_total_ms, c.connect_time_samples),
            dials_per_minute: if minutes > 0.0 { c.total_dialed as f64 / minutes } else { 0.0 },
            average_drop_latency_ms: ratio(c.drop_latency_total_ms, c.drop_latency_samples),
            max_drop_latency_ms: c.drop_latency_max_ms,
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }
}
