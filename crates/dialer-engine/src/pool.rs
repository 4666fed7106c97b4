//! # Line Pool
//!
//! The pool owns one [`LineSlot`] per configured line. Every slot is driven by a
//! dedicated worker task that exclusively owns the [`CallLine`] and consumes the
//! slot's `mpsc` channel, so a line's events are applied in order and in
//! isolation from every other line. Observers never touch the line: they read
//! the latest [`LineSnapshot`] from the slot's `watch` channel.
//!
//! ## Worker responsibilities
//!
//! - issue the dial and bind the provider handle in the [`HandleRegistry`]
//! - apply provider events, ignoring those for a stale handle
//! - classify answers and contend for the agent through the [`Arbiter`]
//! - persist the [`CallRecord`] and count stats exactly once per attempt
//! - wait out the cool-down, then return to idle or tear down after a stop
//!
//! A separate watchdog task recycles lines that have carried the same call for
//! longer than the configured maximum age.

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::arbiter::{spawn_rejection_notice, Arbiter, RejectionNotice, RejectionNotifier, Verdict};
use crate::bridge::translate_bound;
use crate::classifier::{AnswerAction, OutcomeClassifier};
use crate::database::{CallRecord, CallRecordStore};
use crate::error::DialerError;
use crate::events::{DialerEvent, ProviderEvent, SessionUpdate};
use crate::line::{CallLine, LineSnapshot};
use crate::provider::{DialOptions, TelephonyProvider};
use crate::scheduler::ContactQueue;
use crate::session::{SessionContext, SessionStatus};
use crate::stats::TerminalSample;
use crate::types::{AnsweredBy, CallHandle, CallOutcome, Contact, ContactId, EndReason, LineId, RecordStatus};

/// Commands delivered to a line worker
#[derive(Debug, Clone)]
pub enum LineMessage {
    /// Dial this contact
    Assign(Contact),
    /// Call progress for the line's current call
    Event(DialerEvent),
    /// Watchdog: force the line back to idle
    ForceRecycle,
    /// Stop policy: hang up whatever the line carries
    Hangup,
    Shutdown,
}

/// What a provider handle belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleBinding {
    pub line_id: LineId,
    pub contact_id: ContactId,
    pub phone: String,
}

/// Upper bound on events held for handles whose dial has not returned
const MAX_PARKED_EVENTS: usize = 256;
/// Parked events older than this are discarded
const PARKED_EVENT_TTL: Duration = Duration::from_secs(30);

/// Result of offering an unroutable event to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parked {
    /// Held until a dial in flight binds the handle
    Held,
    /// The handle got bound in the meantime; translate again
    Bound,
    /// No dial is in flight or the buffer is full
    Dropped,
}

#[derive(Debug, Default)]
struct ParkedEvents {
    dials_in_flight: usize,
    events: HashMap<CallHandle, (Instant, Vec<ProviderEvent>)>,
    count: usize,
}

impl ParkedEvents {
    fn clear(&mut self) {
        if self.count > 0 {
            debug!(events = self.count, "Discarding events for handles no dial claimed");
        }
        self.events.clear();
        self.count = 0;
    }

    fn expire(&mut self, now: Instant) {
        let before = self.count;
        self.events
            .retain(|_, (parked_at, _)| now.duration_since(*parked_at) < PARKED_EVENT_TTL);
        self.count = self.events.values().map(|(_, events)| events.len()).sum();
        if self.count < before {
            debug!(expired = before - self.count, "Parked events expired");
        }
    }
}

/// Provider handle → line lookup for inbound events
///
/// The provider may report progress before `dial` has returned the handle to
/// the line. While any dial is in flight such events are parked here and
/// handed to the line when it binds the handle.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    bindings: DashMap<CallHandle, HandleBinding>,
    parked: Mutex<ParkedEvents>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, handle: CallHandle, binding: HandleBinding) {
        let _parked = self.parked.lock();
        debug!(handle = %handle, line_id = %binding.line_id, "Handle bound");
        self.bindings.insert(handle, binding);
    }

    /// A line is about to call `dial` on the provider
    pub fn dial_started(&self) {
        self.parked.lock().dials_in_flight += 1;
    }

    /// Bind the handle a dial returned and take the events parked for it
    pub fn bind_dialed(&self, handle: CallHandle, binding: HandleBinding) -> Vec<ProviderEvent> {
        let mut parked = self.parked.lock();
        debug!(handle = %handle, line_id = %binding.line_id, "Handle bound");
        self.bindings.insert(handle.clone(), binding);
        let events = parked
            .events
            .remove(&handle)
            .map(|(_, events)| events)
            .unwrap_or_default();
        parked.count -= events.len();
        Self::finish_dial(&mut parked);
        events
    }

    /// A dial failed without producing a handle
    pub fn dial_abandoned(&self) {
        Self::finish_dial(&mut self.parked.lock());
    }

    fn finish_dial(parked: &mut ParkedEvents) {
        parked.dials_in_flight = parked.dials_in_flight.saturating_sub(1);
        if parked.dials_in_flight == 0 {
            parked.clear();
        }
    }

    /// Hold an event whose handle is not bound yet
    pub fn park(&self, event: &ProviderEvent) -> Parked {
        let mut parked = self.parked.lock();
        if self.bindings.contains_key(&event.handle) {
            return Parked::Bound;
        }
        if parked.dials_in_flight == 0 {
            return Parked::Dropped;
        }
        let now = Instant::now();
        parked.expire(now);
        if parked.count >= MAX_PARKED_EVENTS {
            warn!(handle = %event.handle, "Parked event buffer full, dropping event");
            return Parked::Dropped;
        }
        parked
            .events
            .entry(event.handle.clone())
            .or_insert_with(|| (now, Vec::new()))
            .1
            .push(event.clone());
        parked.count += 1;
        debug!(handle = %event.handle, kind = event.kind.label(), "Event parked until dial returns");
        Parked::Held
    }

    pub fn parked_count(&self) -> usize {
        self.parked.lock().count
    }

    pub fn lookup(&self, handle: &CallHandle) -> Option<HandleBinding> {
        self.bindings.get(handle).map(|b| b.value().clone())
    }

    pub fn unbind(&self, handle: &CallHandle) -> Option<HandleBinding> {
        self.bindings.remove(handle).map(|(_, b)| b)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Shared handle on one line
pub struct LineSlot {
    pub id: LineId,
    tx: mpsc::UnboundedSender<LineMessage>,
    snapshot: watch::Receiver<LineSnapshot>,
    reserved: AtomicBool,
}

impl LineSlot {
    pub fn snapshot(&self) -> LineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver that observes every published snapshot
    pub fn watch(&self) -> watch::Receiver<LineSnapshot> {
        self.snapshot.clone()
    }

    /// Reserve the line for an assignment; false if someone else holds it
    pub fn try_reserve(&self) -> bool {
        self.reserved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.reserved.store(false, Ordering::Release);
    }

    pub fn is_reserved(&self) -> bool {
        self.reserved.load(Ordering::Acquire)
    }

    /// Send a message to the worker; false if the worker is gone
    pub fn send(&self, message: LineMessage) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn assign(&self, contact: Contact) -> bool {
        self.send(LineMessage::Assign(contact))
    }
}

/// Worker-side ends of a slot, consumed by [`LinePool::spawn_workers`]
pub struct LineEndpoint {
    slot: Arc<LineSlot>,
    rx: mpsc::UnboundedReceiver<LineMessage>,
    state_tx: watch::Sender<LineSnapshot>,
}

/// Everything a line worker needs besides its own line
pub struct LineDeps {
    pub session: Arc<SessionContext>,
    pub provider: Arc<dyn TelephonyProvider>,
    pub store: Arc<dyn CallRecordStore>,
    pub arbiter: Arc<Arbiter>,
    pub classifier: OutcomeClassifier,
    pub registry: Arc<HandleRegistry>,
    pub queue: Arc<ContactQueue>,
    pub notifier: Option<Arc<dyn RejectionNotifier>>,
    pub updates: broadcast::Sender<SessionUpdate>,
    pub dial_options: DialOptions,
}

/// Fixed set of lines for one session
pub struct LinePool {
    slots: Vec<Arc<LineSlot>>,
    registry: Arc<HandleRegistry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LinePool {
    /// Create `size` idle slots. Lines do nothing until workers are spawned on
    /// the returned endpoints.
    pub fn new(size: usize) -> (Self, Vec<LineEndpoint>) {
        let mut slots = Vec::with_capacity(size);
        let mut endpoints = Vec::with_capacity(size);

        for index in 1..=size {
            let id = LineId(index);
            let (tx, rx) = mpsc::unbounded_channel();
            let (state_tx, snapshot) = watch::channel(LineSnapshot::idle(id));
            let slot = Arc::new(LineSlot {
                id,
                tx,
                snapshot,
                reserved: AtomicBool::new(false),
            });
            slots.push(slot.clone());
            endpoints.push(LineEndpoint { slot, rx, state_tx });
        }

        let pool = Self {
            slots,
            registry: Arc::new(HandleRegistry::new()),
            workers: Mutex::new(Vec::new()),
        };
        (pool, endpoints)
    }

    pub fn slots(&self) -> &[Arc<LineSlot>] {
        &self.slots
    }

    /// Slot by 1-based line id
    pub fn slot(&self, line: usize) -> Option<&Arc<LineSlot>> {
        line.checked_sub(1).and_then(|i| self.slots.get(i))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn snapshots(&self) -> Vec<LineSnapshot> {
        self.slots.iter().map(|s| s.snapshot()).collect()
    }

    /// Number of lines currently bridged to the agent
    pub fn bridged_count(&self) -> usize {
        self.slots.iter().filter(|s| s.snapshot().state.is_bridged()).count()
    }

    /// Every line idle and unreserved
    pub fn quiescent(&self) -> bool {
        self.slots
            .iter()
            .all(|s| !s.is_reserved() && s.snapshot().state.is_idle())
    }

    /// Deliver an event to the line it names
    pub fn route(&self, event: DialerEvent) -> bool {
        match self.slot(event.line_id().0) {
            Some(slot) => slot.send(LineMessage::Event(event)),
            None => false,
        }
    }

    /// Send the same message to every line
    pub fn broadcast(&self, message: LineMessage) {
        for slot in &self.slots {
            slot.send(message.clone());
        }
    }

    pub fn spawn_workers(&self, endpoints: Vec<LineEndpoint>, deps: Arc<LineDeps>) {
        let mut workers = self.workers.lock();
        for endpoint in endpoints {
            let worker = LineWorker {
                line: CallLine::new(endpoint.slot.id),
                slot: endpoint.slot,
                rx: endpoint.rx,
                state_tx: endpoint.state_tx,
                deps: deps.clone(),
                record: None,
                cool_down_until: None,
            };
            workers.push(tokio::spawn(worker.run()));
        }
    }

    /// Recycle lines older than `max_age`, checking every `every`. Bridged
    /// lines get `max_bridged_age` instead.
    pub fn spawn_watchdog(
        self: &Arc<Self>,
        session: Arc<SessionContext>,
        every: Duration,
        max_age: Duration,
        max_bridged_age: Duration,
    ) -> JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if session.status() == SessionStatus::Stopped {
                    break;
                }
                for slot in pool.slots() {
                    let snap = slot.snapshot();
                    if !snap.state.is_active() {
                        continue;
                    }
                    let limit = if snap.state.is_bridged() { max_bridged_age } else { max_age };
                    if let Some(age) = snap.age() {
                        if age >= limit {
                            warn!(
                                line_id = %slot.id,
                                state = %snap.state,
                                age_secs = age.as_secs(),
                                "Line exceeded max age, recycling"
                            );
                            slot.send(LineMessage::ForceRecycle);
                        }
                    }
                }
            }
            debug!("Line watchdog exited");
        })
    }

    /// Stop every worker and wait for them to exit
    pub async fn shutdown(&self) {
        self.broadcast(LineMessage::Shutdown);
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                warn!(error = %e, "Line worker ended abnormally");
            }
        }
    }
}

struct LineWorker {
    line: CallLine,
    slot: Arc<LineSlot>,
    rx: mpsc::UnboundedReceiver<LineMessage>,
    state_tx: watch::Sender<LineSnapshot>,
    deps: Arc<LineDeps>,
    record: Option<CallRecord>,
    cool_down_until: Option<Instant>,
}

impl LineWorker {
    async fn run(mut self) {
        debug!(line_id = %self.line.id, "Line worker started");
        loop {
            let deadline = self.cool_down_until;
            tokio::select! {
                message = self.rx.recv() => match message {
                    Some(LineMessage::Shutdown) | None => break,
                    Some(message) => self.handle(message).await,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if !self.end_cool_down() {
                        break;
                    }
                }
            }
        }
        debug!(line_id = %self.line.id, "Line worker exited");
    }

    async fn handle(&mut self, message: LineMessage) {
        match message {
            LineMessage::Assign(contact) => self.dial(contact).await,
            LineMessage::Event(event) => self.on_event(event).await,
            LineMessage::ForceRecycle => self.force_recycle().await,
            LineMessage::Hangup => self.hangup().await,
            LineMessage::Shutdown => {}
        }
    }

    fn publish(&self) {
        let snapshot = self.line.snapshot();
        self.state_tx.send_replace(snapshot.clone());
        let _ = self.deps.updates.send(SessionUpdate::LineChanged(snapshot));
    }

    async fn persist(&self) {
        let Some(record) = self.record.as_ref() else {
            return;
        };
        if let Err(e) = self.deps.store.update(record).await {
            warn!(line_id = %self.line.id, record_id = %record.id, error = %e, "Failed to update call record");
        }
    }

    async fn disconnect(&self) {
        let Some(handle) = self.line.handle() else {
            return;
        };
        let limit = self.deps.session.config.disconnect_timeout();
        match timeout(limit, self.deps.provider.disconnect(handle)).await {
            Ok(Ok(())) => debug!(line_id = %self.line.id, handle = %handle, "Call disconnected"),
            Ok(Err(e)) => warn!(line_id = %self.line.id, handle = %handle, error = %e, "Disconnect failed"),
            Err(_) => warn!(
                line_id = %self.line.id,
                handle = %handle,
                timeout_ms = limit.as_millis() as u64,
                "Disconnect timed out"
            ),
        }
    }

    async fn dial(&mut self, contact: Contact) {
        let deps = self.deps.clone();
        if !deps.session.status().recycles_lines() {
            debug!(line_id = %self.line.id, contact_id = %contact.id, "Assignment after stop dropped");
            self.slot.release();
            return;
        }

        let record = CallRecord::new(deps.session.id.clone(), contact.id.clone(), contact.phone.clone())
            .with_line(self.line.id);
        if self.line.assign(contact.clone(), Some(record.id.clone())).is_none() {
            warn!(line_id = %self.line.id, state = %self.line.state(), "Assignment for busy line dropped");
            return;
        }
        if let Err(e) = deps.store.insert(&record).await {
            warn!(line_id = %self.line.id, error = %e, "Failed to create call record");
        }
        self.record = Some(record);
        self.publish();

        info!(line_id = %self.line.id, contact_id = %contact.id, phone = %contact.phone, "Dialing");
        deps.registry.dial_started();
        let dialed = deps
            .provider
            .dial(&contact.phone, &deps.session.config.caller_id, &deps.dial_options)
            .await;

        match dialed {
            Ok(handle) => {
                self.line.dial_accepted(handle.clone());
                let binding = HandleBinding {
                    line_id: self.line.id,
                    contact_id: contact.id.clone(),
                    phone: contact.phone.clone(),
                };
                let early = deps.registry.bind_dialed(handle.clone(), binding.clone());
                deps.session.stats().record_dial_started(&handle);
                if let Some(record) = self.record.as_mut() {
                    record.provider_handle = Some(handle);
                    record.touch();
                }
                self.persist().await;
                self.publish();
                self.replay_early_events(early, binding).await;
            }
            Err(e) => {
                deps.registry.dial_abandoned();
                warn!(line_id = %self.line.id, contact_id = %contact.id, error = %e, "Dial rejected");
                self.line.dial_failed();
                deps.session.stats().record_dial_rejected();
                self.complete(CallOutcome::Failed).await;
            }
        }
    }

    /// Apply events the provider sent before `dial` returned, in arrival order
    async fn replay_early_events(&mut self, events: Vec<ProviderEvent>, binding: HandleBinding) {
        for event in events {
            match translate_bound(&event, binding.clone()) {
                Ok(translated) => {
                    if self.deps.session.processed().first_time(translated.dedup_key()) {
                        debug!(line_id = %self.line.id, kind = translated.kind(), "Replaying early event");
                        self.on_event(translated).await;
                    }
                }
                Err(e) => warn!(line_id = %self.line.id, handle = %event.handle, error = %e, "Early event rejected"),
            }
        }
    }

    async fn on_event(&mut self, event: DialerEvent) {
        if !self.line.owns(event.handle()) {
            debug!(
                line_id = %self.line.id,
                handle = %event.handle(),
                kind = event.kind(),
                "Event for stale handle ignored"
            );
            return;
        }

        match event {
            DialerEvent::CallStarted { provider_handle, .. } => {
                self.deps.session.stats().record_dial_started(&provider_handle);
            }
            DialerEvent::CallStatus { status, answered_by, duration, at, .. } => match status {
                RecordStatus::Initiated => {}
                RecordStatus::Ringing => {
                    if self.line.ringing(at).is_some() {
                        if let Some(record) = self.record.as_mut() {
                            record.status = RecordStatus::Ringing;
                            record.touch();
                        }
                        self.persist().await;
                        self.publish();
                    }
                }
                RecordStatus::InProgress => {
                    self.on_answered(answered_by.unwrap_or(AnsweredBy::Unknown), at).await;
                }
                terminal => {
                    self.on_ended(EndReason::from_status(terminal), duration, answered_by).await;
                }
            },
            DialerEvent::CallConnected { answered_by, at, .. } => {
                self.on_answered(answered_by, at).await;
            }
            DialerEvent::CallEnded { status, duration, answered_by, .. } => {
                self.on_ended(status, duration, answered_by).await;
            }
        }
    }

    async fn on_answered(&mut self, reported: AnsweredBy, at: chrono::DateTime<Utc>) {
        let deps = self.deps.clone();
        let effective = deps.classifier.effective_answer(reported);
        let action = deps.classifier.on_answered(reported);

        if self.line.answered(effective, at).is_none() {
            debug!(line_id = %self.line.id, state = %self.line.state(), "Answer out of order ignored");
            return;
        }
        if let Some(record) = self.record.as_mut() {
            record.status = RecordStatus::InProgress;
            record.answered_by = Some(effective);
            record.set_reported_answer(reported);
            record.connected_at = self.line.connected_at();
            record.ring_duration_secs = self.line.ring_duration_secs();
            record.touch();
        }
        self.persist().await;
        self.publish();

        match action {
            AnswerAction::SkipAsVoicemail => {
                info!(line_id = %self.line.id, answered_by = %effective, "Machine answered, skipping");
                self.disconnect().await;
                self.line.skip_voicemail();
                self.complete(CallOutcome::Voicemail).await;
            }
            AnswerAction::ContendAsHuman | AnswerAction::ContendAsMachine => {
                match deps.arbiter.claim(self.line.id, at).await {
                    Verdict::Won => {
                        self.line.bridge_won(Utc::now());
                        self.publish();
                        let _ = deps.updates.send(SessionUpdate::AgentBridged {
                            line_id: self.line.id,
                            handle: self.line.handle().cloned(),
                        });
                    }
                    Verdict::Lost { winner, since } => self.drop_loser(winner, since).await,
                }
            }
        }
    }

    async fn drop_loser(&mut self, winner: LineId, since: Instant) {
        let deps = self.deps.clone();
        self.disconnect().await;
        let latency = since.elapsed();
        self.line.bridge_lost();

        let latency_ms = latency.as_millis() as u64;
        deps.session.stats().record_arbitration_loss(latency);
        if let Some(record) = self.record.as_mut() {
            record.drop_latency_ms = Some(latency_ms);
        }
        let conflict = DialerError::ConcurrencyConflict {
            line_id: self.line.id.0,
            winner: winner.0,
        };
        info!(line_id = %self.line.id, reason = %conflict, drop_latency_ms = latency_ms, "Secondary call dropped");
        let _ = deps.updates.send(SessionUpdate::CallDropped {
            line_id: self.line.id,
            winner,
            drop_latency_ms: latency_ms,
        });

        if let (Some(notifier), Some(handle), Some(contact)) =
            (deps.notifier.clone(), self.line.handle(), self.line.contact())
        {
            spawn_rejection_notice(
                notifier,
                RejectionNotice::agent_busy(handle.clone(), self.line.id, contact.phone.clone()),
                deps.session.config.notification_retry(),
                deps.session.stats().clone(),
            );
        }

        self.complete(CallOutcome::Canceled).await;
    }

    async fn on_ended(&mut self, reason: EndReason, duration: Option<u64>, hint: Option<AnsweredBy>) {
        if !self.line.state().is_active() {
            debug!(line_id = %self.line.id, state = %self.line.state(), "End for finished line ignored");
            return;
        }
        let answered = self
            .line
            .answered_by()
            .or_else(|| hint.map(|a| self.deps.classifier.effective_answer(a)));
        let outcome = self.deps.classifier.classify_end(answered, &reason);
        if self.line.answered_by().is_none() {
            if let Some(record) = self.record.as_mut() {
                record.answered_by = answered;
                if let Some(reported) = hint {
                    record.set_reported_answer(reported);
                }
            }
        }
        self.terminate(outcome, reason, duration).await;
    }

    /// Finish an active call and release the agent if this line held it
    async fn terminate(&mut self, outcome: CallOutcome, reason: EndReason, duration: Option<u64>) {
        let was_bridged = self.line.state().is_bridged();
        if self.line.finish(outcome, reason, duration).is_none() {
            return;
        }
        if was_bridged {
            self.deps.arbiter.release(self.line.id);
        }
        self.complete(outcome).await;
    }

    async fn force_recycle(&mut self) {
        if !self.line.state().is_active() {
            return;
        }
        self.disconnect().await;
        self.deps.session.stats().record_watchdog_recycle();
        self.terminate(CallOutcome::Failed, EndReason::WatchdogTimeout, None).await;
        // Recycled lines skip the cool-down
        self.cool_down_until = Some(Instant::now());
    }

    async fn hangup(&mut self) {
        if !self.line.state().is_active() {
            return;
        }
        info!(line_id = %self.line.id, "Hanging up for stop");
        self.disconnect().await;
        self.terminate(CallOutcome::Canceled, EndReason::SessionStopped, None).await;
    }

    /// Count and persist a terminal outcome once, then start the cool-down
    async fn complete(&mut self, outcome: CallOutcome) {
        let deps = self.deps.clone();
        let connect_time = match (self.line.started_at(), self.line.connected_at()) {
            (Some(start), Some(connected)) => (connected - start).to_std().ok(),
            _ => None,
        };
        let sample = TerminalSample {
            outcome,
            talk_time_secs: if outcome == CallOutcome::Connected {
                self.line.duration_secs()
            } else {
                0
            },
            connect_time,
        };

        // Dials rejected before a handle was issued are counted at rejection
        let fresh = match self.line.handle() {
            Some(handle) => deps.session.stats().record_terminal(handle, sample),
            None => true,
        };

        if fresh {
            if let Some(record) = self.record.as_mut() {
                record.status = outcome.record_status();
                record.disposition = Some(outcome);
                record.end_reason = self.line.end_reason().cloned();
                record.duration_secs = self.line.duration_secs();
                record.ring_duration_secs = self.line.ring_duration_secs();
                record.connected_at = self.line.connected_at();
                if record.answered_by.is_none() {
                    record.answered_by = self.line.answered_by();
                }
                record.touch();
            }
            self.persist().await;

            // A stopping session has already cleared the queue
            if outcome.is_retryable() && deps.session.status().recycles_lines() {
                if let Some(contact) = self.line.contact() {
                    debug!(line_id = %self.line.id, contact_id = %contact.id, outcome = %outcome, "Re-queueing contact");
                    deps.queue.push_retry(contact.clone());
                }
            }
        }

        info!(
            line_id = %self.line.id,
            outcome = %outcome,
            reason = ?self.line.end_reason(),
            duration_secs = self.line.duration_secs(),
            "Call finished"
        );
        self.publish();
        self.cool_down_until = Some(Instant::now() + deps.session.config.cool_down());
    }

    /// Leave the cool-down. Returns false when the line is torn down.
    fn end_cool_down(&mut self) -> bool {
        self.cool_down_until = None;
        if let Some(handle) = self.line.handle() {
            self.deps.registry.unbind(handle);
        }
        self.line.reset();
        self.record = None;
        self.slot.release();
        self.publish();

        if self.deps.session.status().recycles_lines() {
            true
        } else {
            info!(line_id = %self.line.id, "Line torn down");
            false
        }
    }
}
