//! Provider event translation
//!
//! The provider reports progress per call handle; lines only understand
//! [`DialerEvent`]s addressed to a line id. [`EventBridge`] resolves the handle
//! through the [`HandleRegistry`], maps provider vocabulary onto the closed event
//! union and validates the result before it can reach a line.

use std::sync::Arc;
use tracing::debug;

use crate::error::{DialerError, Result};
use crate::events::{DialerEvent, ProviderEvent, ProviderEventKind};
use crate::pool::{HandleBinding, HandleRegistry};
use crate::types::{AnsweredBy, EndReason, RecordStatus};

pub struct EventBridge {
    registry: Arc<HandleRegistry>,
    max_line: usize,
}

impl EventBridge {
    pub fn new(registry: Arc<HandleRegistry>, max_line: usize) -> Self {
        Self { registry, max_line }
    }

    /// Translate a provider event
    ///
    /// Returns `Ok(None)` for handles that no line owns (late events for calls
    /// already recycled, or calls whose dial has not returned yet) and
    /// `InvalidEvent` for payloads that cannot be mapped.
    pub fn translate(&self, event: &ProviderEvent) -> Result<Option<DialerEvent>> {
        let Some(binding) = self.registry.lookup(&event.handle) else {
            debug!(handle = %event.handle, kind = event.kind.label(), "Event for unbound handle");
            return Ok(None);
        };
        let translated = translate_bound(event, binding)?;
        translated.validate(self.max_line)?;
        Ok(Some(translated))
    }
}

/// Map a provider event onto the line its handle is bound to
pub fn translate_bound(event: &ProviderEvent, binding: HandleBinding) -> Result<DialerEvent> {
    let event_id = event.effective_event_id();
    let at = event.at;
    let line_id = binding.line_id;
    let provider_handle = event.handle.clone();

    let translated = match &event.kind {
        ProviderEventKind::Init => DialerEvent::CallStarted {
            event_id,
            at,
            line_id,
            phone: binding.phone,
            contact_id: binding.contact_id,
            provider_handle,
        },
        ProviderEventKind::Ringing => DialerEvent::CallStatus {
            event_id,
            at,
            line_id,
            provider_handle,
            status: RecordStatus::Ringing,
            answered_by: None,
            duration: None,
        },
        ProviderEventKind::Answered { answered_by } => DialerEvent::CallConnected {
            event_id,
            at,
            line_id,
            provider_handle,
            answered_by: AnsweredBy::parse(answered_by),
            duration: None,
        },
        ProviderEventKind::StatusUpdate { status, duration } => match RecordStatus::parse(status) {
            Some(s) if s.is_terminal() => DialerEvent::CallEnded {
                event_id,
                at,
                line_id,
                provider_handle,
                status: EndReason::from_status(s),
                duration: *duration,
                answered_by: None,
            },
            Some(s) => DialerEvent::CallStatus {
                event_id,
                at,
                line_id,
                provider_handle,
                status: s,
                answered_by: None,
                duration: *duration,
            },
            None => match EndReason::parse(status) {
                EndReason::Other(other) => {
                    return Err(DialerError::invalid_event(format!(
                        "unknown provider status '{}' for {}",
                        other, event.handle
                    )));
                }
                reason => DialerEvent::CallEnded {
                    event_id,
                    at,
                    line_id,
                    provider_handle,
                    status: reason,
                    duration: *duration,
                    answered_by: None,
                },
            },
        },
        ProviderEventKind::Ended { reason, duration } => DialerEvent::CallEnded {
            event_id,
            at,
            line_id,
            provider_handle,
            status: EndReason::parse(reason),
            duration: *duration,
            answered_by: None,
        },
    };
    Ok(translated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallHandle, ContactId, LineId};

    fn bridge() -> EventBridge {
        let registry = Arc::new(HandleRegistry::new());
        registry.bind(
            CallHandle::from("CA1"),
            HandleBinding {
                line_id: LineId(2),
                contact_id: ContactId::from("c-1"),
                phone: "+15550001111".into(),
            },
        );
        EventBridge::new(registry, 3)
    }

    #[test]
    fn test_init_becomes_call_started() {
        let event = bridge()
            .translate(&ProviderEvent::new("CA1", ProviderEventKind::Init))
            .unwrap()
            .unwrap();
        match event {
            DialerEvent::CallStarted { line_id, phone, contact_id, .. } => {
                assert_eq!(line_id, LineId(2));
                assert_eq!(phone, "+15550001111");
                assert_eq!(contact_id, ContactId::from("c-1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_answer_and_end_mapping() {
        let b = bridge();
        let answered = b
            .translate(&ProviderEvent::new(
                "CA1",
                ProviderEventKind::Answered { answered_by: "machine_end_beep".into() },
            ))
            .unwrap()
            .unwrap();
        assert!(matches!(answered, DialerEvent::CallConnected { answered_by: AnsweredBy::Machine, .. }));

        let ended = b
            .translate(&ProviderEvent::new(
                "CA1",
                ProviderEventKind::StatusUpdate { status: "no-answer".into(), duration: None },
            ))
            .unwrap()
            .unwrap();
        assert!(matches!(ended, DialerEvent::CallEnded { status: EndReason::NoAnswer, .. }));

        let ringing = b
            .translate(&ProviderEvent::new(
                "CA1",
                ProviderEventKind::StatusUpdate { status: "ringing".into(), duration: None },
            ))
            .unwrap()
            .unwrap();
        assert!(matches!(ringing, DialerEvent::CallStatus { status: RecordStatus::Ringing, .. }));
    }

    #[test]
    fn test_unknown_handle_is_dropped() {
        let result = bridge()
            .translate(&ProviderEvent::new("CA404", ProviderEventKind::Ringing))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_unmappable_status_is_rejected() {
        let err = bridge()
            .translate(&ProviderEvent::new(
                "CA1",
                ProviderEventKind::StatusUpdate { status: "levitating".into(), duration: None },
            ))
            .unwrap_err();
        assert_eq!(err.category(), "event");
    }

    #[test]
    fn test_event_ids_are_stable() {
        let b = bridge();
        let raw = ProviderEvent::new("CA1", ProviderEventKind::Ringing);
        let first = b.translate(&raw).unwrap().unwrap();
        let second = b.translate(&raw).unwrap().unwrap();
        assert_eq!(first.event_id(), second.event_id());
    }
}
