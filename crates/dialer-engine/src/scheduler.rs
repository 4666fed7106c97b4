//! # Dial Scheduler
//!
//! Feeds contacts from the [`ContactQueue`] to idle lines. On every tick the
//! scheduler walks the pool, reserves each idle line with a compare-and-swap and
//! hands it a dial assignment, subject to the dial rate limit. It never waits on
//! a call: line progress is read from `watch` snapshots and assignments are
//! non-blocking channel sends.
//!
//! Contacts are filtered before dialing. Each of these drops the entry and bumps
//! its own skip counter once:
//!
//! - phone on the do-not-call list
//! - contact already at the attempt limit
//! - phone already dialed this session (fresh entries only; retries bypass this)
//! - phone that does not normalize to 10-15 digits
//!
//! The same loop drives the end of a stop: once the session is `Stopping` and
//! every line has gone quiet, it marks the session `Stopped` and exits.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::DialerError;
use crate::events::SessionUpdate;
use crate::pool::LinePool;
use crate::session::{SessionContext, SessionStatus};
use crate::stats::SkipReason;
use crate::types::Contact;

/// A queued contact
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub contact: Contact,
    /// Re-queued after a busy or no-answer attempt
    pub retry: bool,
}

/// FIFO of contacts waiting to be dialed
#[derive(Debug, Default)]
pub struct ContactQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl ContactQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, contact: Contact) {
        self.entries.lock().push_back(QueueEntry { contact, retry: false });
    }

    pub fn extend<I: IntoIterator<Item = Contact>>(&self, contacts: I) {
        let mut entries = self.entries.lock();
        entries.extend(contacts.into_iter().map(|contact| QueueEntry { contact, retry: false }));
    }

    pub fn push_retry(&self, contact: Contact) {
        self.entries.lock().push_back(QueueEntry { contact, retry: true });
    }

    /// Put an entry back at the head, for assignments that could not be delivered
    pub fn push_front(&self, entry: QueueEntry) {
        self.entries.lock().push_front(entry);
    }

    pub fn pop(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every waiting entry, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }
}

/// Strip formatting and validate a phone number
///
/// Spaces, dashes, dots and parentheses are removed. The result must be 10-15
/// digits with an optional leading `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let stripped: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    let (prefix, digits) = match stripped.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", stripped.as_str()),
    };
    if !(10..=15).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}{}", prefix, digits))
}

/// Assigns queued contacts to idle lines
pub struct DialScheduler {
    session: Arc<SessionContext>,
    pool: Arc<LinePool>,
    queue: Arc<ContactQueue>,
    updates: broadcast::Sender<SessionUpdate>,
    do_not_call: HashSet<String>,
    min_interval: Duration,
    next_dial_at: Option<Instant>,
    exhausted_reported: bool,
}

impl DialScheduler {
    pub fn new(
        session: Arc<SessionContext>,
        pool: Arc<LinePool>,
        queue: Arc<ContactQueue>,
        updates: broadcast::Sender<SessionUpdate>,
    ) -> Self {
        let config = session.config.clone();
        let do_not_call = config
            .scheduler
            .do_not_call
            .iter()
            .filter_map(|p| normalize_phone(p))
            .collect();
        let rate = config.effective_dial_rate();
        let min_interval = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::ZERO
        };

        Self {
            session,
            pool,
            queue,
            updates,
            do_not_call,
            min_interval,
            next_dial_at: None,
            exhausted_reported: false,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn skip(&self, entry: &QueueEntry, reason: SkipReason) {
        debug!(contact_id = %entry.contact.id, phone = %entry.contact.phone, reason = ?reason, "Contact skipped");
        self.session.stats().record_skip(reason);
    }

    /// Pop entries until one may be dialed; the returned contact carries the
    /// normalized phone number
    pub fn next_eligible(&self) -> Option<QueueEntry> {
        let max_attempts = self.session.config.scheduler.max_attempts;

        while let Some(mut entry) = self.queue.pop() {
            let Some(phone) = normalize_phone(&entry.contact.phone) else {
                let err = DialerError::invalid_contact(entry.contact.id.0.clone(), "malformed phone number");
                warn!(error = %err, phone = %entry.contact.phone, "Contact skipped");
                self.session.stats().record_skip(SkipReason::InvalidNumber);
                continue;
            };

            if self.do_not_call.contains(&phone) {
                self.skip(&entry, SkipReason::DoNotCall);
                continue;
            }

            let attempts = self
                .session
                .attempts(&entry.contact.id)
                .unwrap_or(entry.contact.attempts);
            if attempts >= max_attempts {
                self.skip(&entry, SkipReason::MaxAttempts);
                continue;
            }

            if !entry.retry && !self.session.claim_phone(&phone) {
                self.skip(&entry, SkipReason::Duplicate);
                continue;
            }

            entry.contact.phone = phone;
            return Some(entry);
        }
        None
    }

    fn report_exhausted(&mut self) {
        if self.exhausted_reported {
            return;
        }
        self.exhausted_reported = true;
        info!(session_id = %self.session.id, "Contact queue exhausted");
        let _ = self.updates.send(SessionUpdate::QueueExhausted);
    }

    /// One scheduling pass. Returns the number of lines assigned.
    pub fn tick(&mut self) -> usize {
        if !self.session.status().accepts_new_dials() {
            return 0;
        }
        if !self.queue.is_empty() {
            self.exhausted_reported = false;
        }

        let pool = self.pool.clone();
        let mut assigned = 0;
        for slot in pool.slots() {
            if !slot.snapshot().state.is_idle() {
                continue;
            }
            let now = Instant::now();
            if matches!(self.next_dial_at, Some(next) if now < next) {
                break;
            }
            if !slot.try_reserve() {
                continue;
            }

            let Some(entry) = self.next_eligible() else {
                slot.release();
                self.report_exhausted();
                break;
            };

            let attempt = self
                .session
                .record_attempt(&entry.contact.id, entry.contact.attempts);
            debug!(
                line_id = %slot.id,
                contact_id = %entry.contact.id,
                attempt = attempt,
                retry = entry.retry,
                "Assigning contact"
            );

            if slot.assign(entry.contact.clone()) {
                self.next_dial_at = Some(now + self.min_interval);
                assigned += 1;
            } else {
                warn!(line_id = %slot.id, "Line worker gone, returning contact to queue");
                slot.release();
                self.queue.push_front(entry);
                break;
            }
        }
        assigned
    }

    /// Drive the scheduler until the session stops
    pub async fn run(mut self) {
        let mut ticker = interval(self.session.config.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            session_id = %self.session.id,
            min_interval_ms = self.min_interval.as_millis() as u64,
            "Dial scheduler started"
        );

        loop {
            ticker.tick().await;
            match self.session.status() {
                SessionStatus::Stopped => break,
                SessionStatus::Stopping => {
                    if self.pool.quiescent() {
                        let stopped = self.session.transition_status(|s| {
                            (s == SessionStatus::Stopping).then_some(SessionStatus::Stopped)
                        });
                        if stopped.is_some() {
                            info!(session_id = %self.session.id, "Session stopped");
                            let _ = self.updates.send(SessionUpdate::StatusChanged {
                                status: SessionStatus::Stopped,
                            });
                        }
                        break;
                    }
                }
                _ => {
                    self.tick();
                }
            }
        }
        debug!(session_id = %self.session.id, "Dial scheduler exited");
    }
}
