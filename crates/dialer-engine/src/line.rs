//! # Call Line State Machine
//!
//! A [`CallLine`] is one dialing slot. It is owned by exactly one worker task
//! (see [`crate::pool`]) and mutated only through the transition methods below,
//! each of which returns `Some(Transition)` when applied and `None` when the
//! event does not fit the current state. Rejected transitions are the normal way
//! out-of-order and duplicate provider events get dropped.
//!
//! ```text
//! idle ─assign─▶ dialing ─ringing─▶ ringing ─answer─▶ human-detected ─won─▶ connected
//!                   │                  │              machine-detected        │
//!                   └──── dial failed / ended / lost / skip / watchdog ───────┴─▶ finished(outcome)
//!                                                                                 │
//!                                               idle ◀──────── cool-down ─────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{AnsweredBy, CallHandle, CallOutcome, Contact, ContactId, EndReason, LineId, LineState};

/// An applied state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LineState,
    pub to: LineState,
}

/// Observer view of a line, published on every transition
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSnapshot {
    pub line_id: LineId,
    pub state: LineState,
    pub contact_id: Option<ContactId>,
    pub phone: Option<String>,
    pub handle: Option<CallHandle>,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_secs: u64,
    pub answered_by: Option<AnsweredBy>,
    pub disposition: Option<CallOutcome>,
    pub end_reason: Option<EndReason>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ring_duration_secs: Option<u64>,
    /// Monotonic start, used by the watchdog
    #[serde(skip)]
    pub started_instant: Option<Instant>,
}

impl LineSnapshot {
    pub fn idle(line_id: LineId) -> Self {
        CallLine::new(line_id).snapshot()
    }

    /// Time since the current call was assigned
    pub fn age(&self) -> Option<std::time::Duration> {
        self.started_instant.map(|s| s.elapsed())
    }
}

/// One dialing slot and the call it currently carries
#[derive(Debug, Clone)]
pub struct CallLine {
    pub id: LineId,
    state: LineState,
    contact: Option<Contact>,
    handle: Option<CallHandle>,
    record_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    ringing_at: Option<DateTime<Utc>>,
    connected_at: Option<DateTime<Utc>>,
    bridged_at: Option<DateTime<Utc>>,
    ring_duration_secs: Option<u64>,
    duration_secs: u64,
    answered_by: Option<AnsweredBy>,
    disposition: Option<CallOutcome>,
    end_reason: Option<EndReason>,
}

impl CallLine {
    pub fn new(id: LineId) -> Self {
        Self {
            id,
            state: LineState::Idle,
            contact: None,
            handle: None,
            record_id: None,
            started_at: None,
            started_instant: None,
            ringing_at: None,
            connected_at: None,
            bridged_at: None,
            ring_duration_secs: None,
            duration_secs: 0,
            answered_by: None,
            disposition: None,
            end_reason: None,
        }
    }

    pub fn state(&self) -> LineState {
        self.state
    }

    pub fn contact(&self) -> Option<&Contact> {
        self.contact.as_ref()
    }

    pub fn handle(&self) -> Option<&CallHandle> {
        self.handle.as_ref()
    }

    pub fn record_id(&self) -> Option<&str> {
        self.record_id.as_deref()
    }

    pub fn answered_by(&self) -> Option<AnsweredBy> {
        self.answered_by
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        self.connected_at
    }

    pub fn bridged_at(&self) -> Option<DateTime<Utc>> {
        self.bridged_at
    }

    pub fn ring_duration_secs(&self) -> Option<u64> {
        self.ring_duration_secs
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    pub fn end_reason(&self) -> Option<&EndReason> {
        self.end_reason.as_ref()
    }

    /// Whether an event for `handle` belongs to the call on this line
    pub fn owns(&self, handle: &CallHandle) -> bool {
        self.handle.as_ref() == Some(handle)
    }

    fn apply(&mut self, to: LineState) -> Transition {
        let from = self.state;
        self.state = to;
        debug!(line_id = %self.id, from = %from, to = %to, "Line transition");
        Transition { from, to }
    }

    /// idle → dialing
    pub fn assign(&mut self, contact: Contact, record_id: Option<String>) -> Option<Transition> {
        if !self.state.is_idle() {
            return None;
        }
        self.contact = Some(contact);
        self.record_id = record_id;
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
        Some(self.apply(LineState::Dialing))
    }

    /// Provider accepted the dial; dialing stays dialing with a confirmed handle
    pub fn dial_accepted(&mut self, handle: CallHandle) -> bool {
        if self.state != LineState::Dialing || self.handle.is_some() {
            return false;
        }
        self.handle = Some(handle);
        true
    }

    /// dialing → finished(failed)
    pub fn dial_failed(&mut self) -> Option<Transition> {
        if self.state != LineState::Dialing {
            return None;
        }
        self.end_reason = Some(EndReason::DialRejected);
        self.disposition = Some(CallOutcome::Failed);
        Some(self.apply(LineState::Finished(CallOutcome::Failed)))
    }

    /// dialing → ringing
    pub fn ringing(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        if self.state != LineState::Dialing {
            return None;
        }
        self.ringing_at = Some(at);
        Some(self.apply(LineState::Ringing))
    }

    /// dialing | ringing → human-detected | machine-detected
    ///
    /// `answered_by` is the effective party after policy; `unknown` must have
    /// been resolved by the classifier already.
    pub fn answered(&mut self, answered_by: AnsweredBy, at: DateTime<Utc>) -> Option<Transition> {
        if !matches!(self.state, LineState::Dialing | LineState::Ringing) {
            return None;
        }
        let ring_from = self.ringing_at.or(self.started_at).unwrap_or(at);
        self.ring_duration_secs = Some((at - ring_from).num_seconds().max(0) as u64);
        self.answered_by = Some(answered_by);
        self.connected_at = Some(at);

        let to = match answered_by {
            AnsweredBy::Human | AnsweredBy::Unknown => LineState::HumanDetected,
            AnsweredBy::Machine | AnsweredBy::Fax => LineState::MachineDetected,
        };
        Some(self.apply(to))
    }

    /// *-detected → connected
    pub fn bridge_won(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        if !matches!(self.state, LineState::HumanDetected | LineState::MachineDetected) {
            return None;
        }
        self.bridged_at = Some(at);
        Some(self.apply(LineState::Connected))
    }

    /// *-detected → finished(canceled) with reason agent_busy
    pub fn bridge_lost(&mut self) -> Option<Transition> {
        if !matches!(self.state, LineState::HumanDetected | LineState::MachineDetected) {
            return None;
        }
        self.finish_with(CallOutcome::Canceled, EndReason::AgentBusy, None)
    }

    /// machine-detected → finished(voicemail)
    pub fn skip_voicemail(&mut self) -> Option<Transition> {
        if self.state != LineState::MachineDetected {
            return None;
        }
        self.finish_with(CallOutcome::Voicemail, EndReason::Voicemail, None)
    }

    /// Any active state → finished(outcome)
    ///
    /// Covers provider hangups, watchdog recycling and stop-policy hangups.
    pub fn finish(&mut self, outcome: CallOutcome, reason: EndReason, duration_secs: Option<u64>) -> Option<Transition> {
        if !self.state.is_active() {
            return None;
        }
        self.finish_with(outcome, reason, duration_secs)
    }

    fn finish_with(&mut self, outcome: CallOutcome, reason: EndReason, duration_secs: Option<u64>) -> Option<Transition> {
        let duration = match duration_secs {
            Some(d) => d,
            None => self
                .connected_at
                .map(|c| (Utc::now() - c).num_seconds().max(0) as u64)
                .unwrap_or(0),
        };
        self.duration_secs = duration;
        self.disposition = Some(outcome);
        self.end_reason = Some(reason);
        Some(self.apply(LineState::Finished(outcome)))
    }

    /// finished → idle, clearing the call
    pub fn reset(&mut self) -> Option<Transition> {
        if !self.state.is_finished() {
            return None;
        }
        let id = self.id;
        let from = self.state;
        *self = Self::new(id);
        debug!(line_id = %id, from = %from, "Line back to idle");
        Some(Transition { from, to: LineState::Idle })
    }

    pub fn snapshot(&self) -> LineSnapshot {
        LineSnapshot {
            line_id: self.id,
            state: self.state,
            contact_id: self.contact.as_ref().map(|c| c.id.clone()),
            phone: self.contact.as_ref().map(|c| c.phone.clone()),
            handle: self.handle.clone(),
            started_at: self.started_at,
            duration_secs: self.duration_secs,
            answered_by: self.answered_by,
            disposition: self.disposition,
            end_reason: self.end_reason.clone(),
            connected_at: self.connected_at,
            ring_duration_secs: self.ring_duration_secs,
            started_instant: self.started_instant,
        }
    }
}
