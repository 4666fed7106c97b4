//! Event types crossing the dialer boundary
//!
//! Three families live here:
//!
//! - [`ProviderEvent`]: raw call progress reported by the telephony provider,
//!   keyed by provider handle.
//! - [`DialerEvent`]: the closed union the engine consumes, keyed by line. The
//!   [`EventBridge`](crate::bridge::EventBridge) produces these from provider
//!   events; they are validated before they reach a line.
//! - [`SessionUpdate`]: what the engine pushes to observers (UI, logs).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DialerError, Result};
use crate::line::LineSnapshot;
use crate::session::SessionStatus;
use crate::types::{AnsweredBy, CallHandle, ContactId, EndReason, LineId, RecordStatus};

/// Call progress reported by the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEvent {
    pub handle: CallHandle,
    #[serde(flatten)]
    pub kind: ProviderEventKind,
    #[serde(default = "Utc::now")]
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub event_id: Option<String>,
}

/// What happened to the provider call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ProviderEventKind {
    Init,
    Ringing,
    Answered {
        answered_by: String,
    },
    StatusUpdate {
        status: String,
        /// Call length in seconds, when the provider reports one
        #[serde(default)]
        duration: Option<u64>,
    },
    Ended {
        reason: String,
        #[serde(default)]
        duration: Option<u64>,
    },
}

impl ProviderEventKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Ringing => "ringing",
            Self::Answered { .. } => "answered",
            Self::StatusUpdate { .. } => "status",
            Self::Ended { .. } => "ended",
        }
    }
}

impl ProviderEvent {
    pub fn new(handle: impl Into<String>, kind: ProviderEventKind) -> Self {
        Self {
            handle: CallHandle(handle.into()),
            kind,
            at: Utc::now(),
            event_id: None,
        }
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Provider-supplied event id, or one derived from handle, kind and time
    pub fn effective_event_id(&self) -> String {
        match &self.event_id {
            Some(id) => id.clone(),
            None => format!(
                "{}:{}:{}",
                self.handle,
                self.kind.label(),
                self.at.timestamp_millis()
            ),
        }
    }

    /// Parse and validate a webhook body
    pub fn from_json(body: &[u8]) -> Result<Self> {
        let event: Self = serde_json::from_slice(body)
            .map_err(|e| DialerError::invalid_event(format!("malformed provider event: {}", e)))?;
        if event.handle.0.trim().is_empty() {
            return Err(DialerError::invalid_event("provider event without call handle"));
        }
        Ok(event)
    }
}

/// Internal events consumed by the engine, one line each
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DialerEvent {
    CallStarted {
        event_id: String,
        at: DateTime<Utc>,
        line_id: LineId,
        phone: String,
        contact_id: ContactId,
        provider_handle: CallHandle,
    },
    CallStatus {
        event_id: String,
        at: DateTime<Utc>,
        line_id: LineId,
        provider_handle: CallHandle,
        status: RecordStatus,
        answered_by: Option<AnsweredBy>,
        duration: Option<u64>,
    },
    CallConnected {
        event_id: String,
        at: DateTime<Utc>,
        line_id: LineId,
        provider_handle: CallHandle,
        answered_by: AnsweredBy,
        duration: Option<u64>,
    },
    CallEnded {
        event_id: String,
        at: DateTime<Utc>,
        line_id: LineId,
        provider_handle: CallHandle,
        status: EndReason,
        duration: Option<u64>,
        answered_by: Option<AnsweredBy>,
    },
}

impl DialerEvent {
    pub fn line_id(&self) -> LineId {
        match self {
            Self::CallStarted { line_id, .. }
            | Self::CallStatus { line_id, .. }
            | Self::CallConnected { line_id, .. }
            | Self::CallEnded { line_id, .. } => *line_id,
        }
    }

    pub fn handle(&self) -> &CallHandle {
        match self {
            Self::CallStarted { provider_handle, .. }
            | Self::CallStatus { provider_handle, .. }
            | Self::CallConnected { provider_handle, .. }
            | Self::CallEnded { provider_handle, .. } => provider_handle,
        }
    }

    pub fn event_id(&self) -> &str {
        match self {
            Self::CallStarted { event_id, .. }
            | Self::CallStatus { event_id, .. }
            | Self::CallConnected { event_id, .. }
            | Self::CallEnded { event_id, .. } => event_id,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::CallStarted { at, .. }
            | Self::CallStatus { at, .. }
            | Self::CallConnected { at, .. }
            | Self::CallEnded { at, .. } => *at,
        }
    }

    /// Idempotence key in the session's processed set
    pub fn dedup_key(&self) -> String {
        format!("event:{}", self.event_id())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallStarted { .. } => "call_started",
            Self::CallStatus { .. } => "call_status",
            Self::CallConnected { .. } => "call_connected",
            Self::CallEnded { .. } => "call_ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CallEnded { .. })
    }

    /// Check required fields; malformed events are rejected, not forwarded
    pub fn validate(&self, max_line: usize) -> Result<()> {
        let line = self.line_id().0;
        if line == 0 || line > max_line {
            return Err(DialerError::invalid_event(format!(
                "{} for unknown line {}",
                self.kind(),
                line
            )));
        }
        if self.handle().0.trim().is_empty() {
            return Err(DialerError::invalid_event(format!("{} without provider handle", self.kind())));
        }
        if self.event_id().trim().is_empty() {
            return Err(DialerError::invalid_event(format!("{} without event id", self.kind())));
        }
        if let Self::CallStarted { phone, contact_id, .. } = self {
            if phone.trim().is_empty() || contact_id.0.trim().is_empty() {
                return Err(DialerError::invalid_event("call_started without phone or contact"));
            }
        }
        Ok(())
    }
}

/// Notifications pushed to session observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    LineChanged(LineSnapshot),
    StatusChanged { status: SessionStatus },
    AgentBridged { line_id: LineId, handle: Option<CallHandle> },
    CallDropped { line_id: LineId, winner: LineId, drop_latency_ms: u64 },
    QueueExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_event_json() {
        let event = ProviderEvent::from_json(
            br#"{"handle":"CA123","kind":"answered","answeredBy":"machine_start","eventId":"ev-1"}"#,
        )
        .unwrap();
        assert_eq!(event.handle, CallHandle::from("CA123"));
        assert_eq!(
            event.kind,
            ProviderEventKind::Answered { answered_by: "machine_start".to_string() }
        );
        assert_eq!(event.effective_event_id(), "ev-1");
    }

    #[test]
    fn test_provider_event_rejects_malformed() {
        assert!(ProviderEvent::from_json(br#"{"kind":"ringing"}"#).is_err());
        assert!(ProviderEvent::from_json(br#"{"handle":"","kind":"ringing"}"#).is_err());
        assert!(ProviderEvent::from_json(br#"{"handle":"CA1","kind":"exploded"}"#).is_err());
        assert!(ProviderEvent::from_json(b"not json").is_err());
    }

    #[test]
    fn test_dialer_event_validation() {
        let event = DialerEvent::CallConnected {
            event_id: "e1".into(),
            at: Utc::now(),
            line_id: LineId(4),
            provider_handle: CallHandle::from("CA1"),
            answered_by: AnsweredBy::Human,
            duration: None,
        };
        assert!(event.validate(3).is_err());
        assert!(event.validate(4).is_ok());
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_dialer_event_wire_format() {
        let event = DialerEvent::CallEnded {
            event_id: "e2".into(),
            at: Utc::now(),
            line_id: LineId(1),
            provider_handle: CallHandle::from("CA9"),
            status: EndReason::NoAnswer,
            duration: None,
            answered_by: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "call_ended");
        assert_eq!(json["lineId"], 1);
        assert_eq!(json["providerHandle"], "CA9");
        assert_eq!(json["status"], "no_answer");
    }
}
