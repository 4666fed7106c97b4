//! Status / disposition / answer consistency

use serde::Serialize;

use crate::database::CallRecord;
use crate::types::{AnsweredBy, CallOutcome, RecordStatus};

/// A combination of fields that cannot all be true
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Contradiction {
    /// Status `completed` but disposition `failed`
    CompletedButFailed,
    /// Machine answer bridged as a connected call
    MachineConnected,
    /// Disposition `connected` with no recorded answer
    ConnectedWithoutAnswer,
    /// Disposition `connected` on a record that did not complete
    ConnectedButNotCompleted,
    /// `busy` or `no-answer` status although a human answered
    UnansweredWithHuman,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispositionIssue {
    pub record_id: String,
    pub contradictions: Vec<Contradiction>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispositionReport {
    pub checked: usize,
    pub consistent: usize,
    pub accuracy: f64,
    pub passed: bool,
    pub issues: Vec<DispositionIssue>,
}

pub fn contradictions(record: &CallRecord) -> Vec<Contradiction> {
    let mut found = Vec::new();
    let connected = record.disposition == Some(CallOutcome::Connected);

    if record.status == RecordStatus::Completed && record.disposition == Some(CallOutcome::Failed) {
        found.push(Contradiction::CompletedButFailed);
    }
    if connected && matches!(record.answered_by, Some(AnsweredBy::Machine) | Some(AnsweredBy::Fax)) {
        found.push(Contradiction::MachineConnected);
    }
    if connected && record.answered_by.is_none() {
        found.push(Contradiction::ConnectedWithoutAnswer);
    }
    if connected && record.status != RecordStatus::Completed {
        found.push(Contradiction::ConnectedButNotCompleted);
    }
    if matches!(record.status, RecordStatus::Busy | RecordStatus::NoAnswer)
        && record.answered_by == Some(AnsweredBy::Human)
    {
        found.push(Contradiction::UnansweredWithHuman);
    }
    found
}

/// Check every record that carries a disposition
pub fn check_dispositions(records: &[CallRecord], pass_rate: f64) -> DispositionReport {
    let mut checked = 0;
    let mut issues = Vec::new();

    for record in records.iter().filter(|r| r.disposition.is_some()) {
        checked += 1;
        let found = contradictions(record);
        if !found.is_empty() {
            issues.push(DispositionIssue {
                record_id: record.id.clone(),
                contradictions: found,
            });
        }
    }

    let consistent = checked - issues.len();
    let accuracy = if checked == 0 { 1.0 } else { consistent as f64 / checked as f64 };
    DispositionReport {
        checked,
        consistent,
        accuracy,
        passed: accuracy >= pass_rate,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContactId;

    fn record(status: RecordStatus, disposition: CallOutcome, answered_by: Option<AnsweredBy>) -> CallRecord {
        let mut r = CallRecord::new("s1", ContactId::from("c"), "+15550001111");
        r.status = status;
        r.disposition = Some(disposition);
        r.answered_by = answered_by;
        r
    }

    #[test]
    fn test_each_contradiction() {
        assert_eq!(
            contradictions(&record(RecordStatus::Completed, CallOutcome::Failed, None)),
            vec![Contradiction::CompletedButFailed]
        );
        assert_eq!(
            contradictions(&record(RecordStatus::Completed, CallOutcome::Connected, Some(AnsweredBy::Machine))),
            vec![Contradiction::MachineConnected]
        );
        assert_eq!(
            contradictions(&record(RecordStatus::Completed, CallOutcome::Connected, None)),
            vec![Contradiction::ConnectedWithoutAnswer]
        );
        assert_eq!(
            contradictions(&record(RecordStatus::Canceled, CallOutcome::Connected, Some(AnsweredBy::Human))),
            vec![Contradiction::ConnectedButNotCompleted]
        );
        assert_eq!(
            contradictions(&record(RecordStatus::NoAnswer, CallOutcome::NoAnswer, Some(AnsweredBy::Human))),
            vec![Contradiction::UnansweredWithHuman]
        );
    }

    #[test]
    fn test_consistent_records_pass() {
        let records = vec![
            record(RecordStatus::Completed, CallOutcome::Connected, Some(AnsweredBy::Human)),
            record(RecordStatus::Completed, CallOutcome::Voicemail, Some(AnsweredBy::Machine)),
            record(RecordStatus::Canceled, CallOutcome::Canceled, Some(AnsweredBy::Human)),
            record(RecordStatus::Busy, CallOutcome::Busy, None),
        ];
        let report = check_dispositions(&records, 0.95);
        assert_eq!(report.checked, 4);
        assert_eq!(report.accuracy, 1.0);
        assert!(report.passed);
    }
}
