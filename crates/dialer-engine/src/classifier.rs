//! Outcome classification
//!
//! Maps provider answers and hangup causes onto the canonical [`CallOutcome`]
//! taxonomy and decides what a line does right after an answer.

use crate::config::DialerConfig;
use crate::types::{AmdSensitivity, AnsweredBy, CallOutcome, EndReason};

/// Classification policy, taken from the session configuration
#[derive(Debug, Clone, Copy)]
pub struct ClassifierPolicy {
    pub amd_enabled: bool,
    pub sensitivity: AmdSensitivity,
    pub auto_skip_voicemail: bool,
}

impl From<&DialerConfig> for ClassifierPolicy {
    fn from(config: &DialerConfig) -> Self {
        Self {
            amd_enabled: config.amd_enabled,
            sensitivity: config.amd_sensitivity,
            auto_skip_voicemail: config.auto_skip_voicemail,
        }
    }
}

/// What the line should do with an answered call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerAction {
    /// Human on the line; contend for the agent bridge
    ContendAsHuman,
    /// Machine that the agent may still want; contend for the bridge
    ContendAsMachine,
    /// Machine or fax that is never bridged; hang up as voicemail
    SkipAsVoicemail,
}

#[derive(Debug, Clone, Copy)]
pub struct OutcomeClassifier {
    policy: ClassifierPolicy,
}

impl OutcomeClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    /// Resolve `unknown` (and AMD-disabled answers) into a definite party
    pub fn effective_answer(&self, reported: AnsweredBy) -> AnsweredBy {
        if !self.policy.amd_enabled {
            return AnsweredBy::Human;
        }
        match reported {
            AnsweredBy::Unknown => match self.policy.sensitivity {
                AmdSensitivity::High => AnsweredBy::Machine,
                AmdSensitivity::Low | AmdSensitivity::Standard => AnsweredBy::Human,
            },
            other => other,
        }
    }

    /// Decide how to proceed once the provider reports an answer
    pub fn on_answered(&self, reported: AnsweredBy) -> AnswerAction {
        match self.effective_answer(reported) {
            AnsweredBy::Human | AnsweredBy::Unknown => AnswerAction::ContendAsHuman,
            AnsweredBy::Fax => AnswerAction::SkipAsVoicemail,
            AnsweredBy::Machine if self.policy.auto_skip_voicemail => AnswerAction::SkipAsVoicemail,
            AnsweredBy::Machine => AnswerAction::ContendAsMachine,
        }
    }

    /// Canonical outcome of an ended call
    ///
    /// `answered_by` is the effective answer if the call was ever answered.
    pub fn classify_end(&self, answered_by: Option<AnsweredBy>, reason: &EndReason) -> CallOutcome {
        match reason {
            EndReason::Voicemail => CallOutcome::Voicemail,
            EndReason::AgentBusy | EndReason::SessionStopped | EndReason::Canceled => match answered_by {
                Some(AnsweredBy::Machine) | Some(AnsweredBy::Fax) if *reason != EndReason::AgentBusy => {
                    CallOutcome::Voicemail
                }
                _ => CallOutcome::Canceled,
            },
            EndReason::Completed => match answered_by {
                Some(AnsweredBy::Human) | Some(AnsweredBy::Unknown) => CallOutcome::Connected,
                Some(AnsweredBy::Machine) | Some(AnsweredBy::Fax) => CallOutcome::Voicemail,
                // Completed without any answer report: the provider hung up unanswered
                None => CallOutcome::NoAnswer,
            },
            EndReason::Busy => CallOutcome::Busy,
            EndReason::NoAnswer => CallOutcome::NoAnswer,
            EndReason::Failed
            | EndReason::WatchdogTimeout
            | EndReason::DialRejected
            | EndReason::CleanupStaleCall
            | EndReason::Other(_) => match answered_by {
                Some(AnsweredBy::Machine) | Some(AnsweredBy::Fax) => CallOutcome::Voicemail,
                _ => CallOutcome::Failed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier(amd: bool, sensitivity: AmdSensitivity, skip: bool) -> OutcomeClassifier {
        OutcomeClassifier::new(ClassifierPolicy {
            amd_enabled: amd,
            sensitivity,
            auto_skip_voicemail: skip,
        })
    }

    #[test]
    fn test_machine_is_skipped_with_auto_skip() {
        let c = classifier(true, AmdSensitivity::Standard, true);
        assert_eq!(c.on_answered(AnsweredBy::Machine), AnswerAction::SkipAsVoicemail);
        assert_eq!(c.on_answered(AnsweredBy::Human), AnswerAction::ContendAsHuman);
    }

    #[test]
    fn test_machine_contends_without_auto_skip() {
        let c = classifier(true, AmdSensitivity::Standard, false);
        assert_eq!(c.on_answered(AnsweredBy::Machine), AnswerAction::ContendAsMachine);
        assert_eq!(c.on_answered(AnsweredBy::Fax), AnswerAction::SkipAsVoicemail);
    }

    #[test]
    fn test_unknown_depends_on_sensitivity() {
        assert_eq!(
            classifier(true, AmdSensitivity::Low, true).on_answered(AnsweredBy::Unknown),
            AnswerAction::ContendAsHuman
        );
        assert_eq!(
            classifier(true, AmdSensitivity::High, true).on_answered(AnsweredBy::Unknown),
            AnswerAction::SkipAsVoicemail
        );
    }

    #[test]
    fn test_amd_disabled_treats_everything_as_human() {
        let c = classifier(false, AmdSensitivity::High, true);
        assert_eq!(c.effective_answer(AnsweredBy::Machine), AnsweredBy::Human);
        assert_eq!(c.on_answered(AnsweredBy::Machine), AnswerAction::ContendAsHuman);
    }

    #[test]
    fn test_end_classification() {
        let c = classifier(true, AmdSensitivity::Standard, true);
        assert_eq!(c.classify_end(Some(AnsweredBy::Human), &EndReason::Completed), CallOutcome::Connected);
        assert_eq!(c.classify_end(Some(AnsweredBy::Machine), &EndReason::Completed), CallOutcome::Voicemail);
        assert_eq!(c.classify_end(None, &EndReason::Voicemail), CallOutcome::Voicemail);
        assert_eq!(c.classify_end(None, &EndReason::Busy), CallOutcome::Busy);
        assert_eq!(c.classify_end(None, &EndReason::NoAnswer), CallOutcome::NoAnswer);
        assert_eq!(c.classify_end(Some(AnsweredBy::Human), &EndReason::AgentBusy), CallOutcome::Canceled);
        assert_eq!(c.classify_end(None, &EndReason::Other("congestion-x".into())), CallOutcome::Failed);
        assert_eq!(c.classify_end(None, &EndReason::Completed), CallOutcome::NoAnswer);
    }
}
