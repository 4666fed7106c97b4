//! Audit of the one-call-per-agent rule over persisted history
//!
//! Records are split by session and then into bursts: consecutive dials closer
//! than the configured gap belong to the same burst. A burst may contain at most
//! one human call that was connected to the agent. Calls that lost arbitration
//! (`agent_busy`) are secondary calls; each must have been dropped.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::database::CallRecord;
use crate::types::{EndReason, RecordStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionViolation {
    pub session_id: String,
    pub burst_start: DateTime<Utc>,
    pub record_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub min_ms: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleConnectionReport {
    pub bursts: usize,
    pub violations: Vec<ConnectionViolation>,
    pub secondary_calls: usize,
    pub dropped: usize,
    pub drop_success_rate: f64,
    pub drop_latency: Option<LatencySummary>,
    pub passed: bool,
}

fn dialed(record: &CallRecord) -> DateTime<Utc> {
    record.dialed_at.unwrap_or(record.created_at)
}

/// Split records into bursts per session, each burst in dial order
pub fn group_bursts(records: &[CallRecord], gap_secs: i64) -> Vec<Vec<&CallRecord>> {
    let mut by_session: BTreeMap<&str, Vec<&CallRecord>> = BTreeMap::new();
    for record in records {
        by_session.entry(record.session_id.as_str()).or_default().push(record);
    }

    let gap = Duration::seconds(gap_secs);
    let mut bursts = Vec::new();
    for (_, mut session) in by_session {
        session.sort_by_key(|r| dialed(r));
        let mut current: Vec<&CallRecord> = Vec::new();
        for record in session {
            if let Some(last) = current.last() {
                if dialed(record) - dialed(last) > gap {
                    bursts.push(std::mem::take(&mut current));
                }
            }
            current.push(record);
        }
        if !current.is_empty() {
            bursts.push(current);
        }
    }
    bursts
}

fn latency_summary(samples: &[u64]) -> Option<LatencySummary> {
    let min_ms = *samples.iter().min()?;
    let max_ms = *samples.iter().max()?;
    let avg_ms = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
    Some(LatencySummary { min_ms, avg_ms, max_ms })
}

pub fn audit_single_connection(records: &[CallRecord], gap_secs: i64, drop_pass_rate: f64) -> SingleConnectionReport {
    let bursts = group_bursts(records, gap_secs);

    let violations: Vec<ConnectionViolation> = bursts
        .iter()
        .filter_map(|burst| {
            let connected: Vec<String> = burst
                .iter()
                .filter(|r| r.is_connected_human())
                .map(|r| r.id.clone())
                .collect();
            (connected.len() > 1).then(|| ConnectionViolation {
                session_id: burst[0].session_id.clone(),
                burst_start: dialed(burst[0]),
                record_ids: connected,
            })
        })
        .collect();

    let secondary: Vec<&CallRecord> = records
        .iter()
        .filter(|r| r.end_reason == Some(EndReason::AgentBusy))
        .collect();
    let dropped = secondary
        .iter()
        .filter(|r| r.status == RecordStatus::Canceled)
        .count();
    let drop_success_rate = if secondary.is_empty() {
        1.0
    } else {
        dropped as f64 / secondary.len() as f64
    };
    let latencies: Vec<u64> = secondary.iter().filter_map(|r| r.drop_latency_ms).collect();

    SingleConnectionReport {
        bursts: bursts.len(),
        passed: violations.is_empty() && drop_success_rate >= drop_pass_rate,
        violations,
        secondary_calls: secondary.len(),
        dropped,
        drop_success_rate,
        drop_latency: latency_summary(&latencies),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnsweredBy, CallOutcome, ContactId};

    fn call(session: &str, offset_secs: i64, outcome: CallOutcome) -> CallRecord {
        let base = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let mut record = CallRecord::new(session, ContactId::from("c"), "+15550001111")
            .dialed_at(base + Duration::seconds(offset_secs));
        record.status = outcome.record_status();
        record.disposition = Some(outcome);
        record.answered_by = Some(AnsweredBy::Human);
        record
    }

    fn dropped(session: &str, offset_secs: i64, latency_ms: u64) -> CallRecord {
        let mut record = call(session, offset_secs, CallOutcome::Canceled);
        record.end_reason = Some(EndReason::AgentBusy);
        record.drop_latency_ms = Some(latency_ms);
        record
    }

    #[test]
    fn test_bursts_split_on_gap_and_session() {
        let records = vec![
            call("s1", 0, CallOutcome::Connected),
            call("s1", 4, CallOutcome::Busy),
            call("s1", 30, CallOutcome::Connected),
            call("s2", 2, CallOutcome::Connected),
        ];
        assert_eq!(group_bursts(&records, 10).len(), 3);
    }

    #[test]
    fn test_two_connected_in_one_burst_is_a_violation() {
        let records = vec![
            call("s1", 0, CallOutcome::Connected),
            call("s1", 1, CallOutcome::Connected),
        ];
        let report = audit_single_connection(&records, 10, 0.95);
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].record_ids.len(), 2);
        assert!(!report.passed);
    }

    #[test]
    fn test_drop_rate_and_latency() {
        let mut not_dropped = dropped("s1", 2, 0);
        not_dropped.status = RecordStatus::InProgress;
        not_dropped.drop_latency_ms = None;
        let records = vec![
            call("s1", 0, CallOutcome::Connected),
            dropped("s1", 1, 120),
            dropped("s1", 1, 380),
            not_dropped,
        ];

        let report = audit_single_connection(&records, 10, 0.95);
        assert!(report.violations.is_empty());
        assert_eq!(report.secondary_calls, 3);
        assert_eq!(report.dropped, 2);
        assert!(!report.passed);
        let latency = report.drop_latency.unwrap();
        assert_eq!((latency.min_ms, latency.max_ms), (120, 380));
        assert_eq!(latency.avg_ms, 250.0);
    }

    #[test]
    fn test_empty_history_passes() {
        let report = audit_single_connection(&[], 10, 0.95);
        assert_eq!(report.bursts, 0);
        assert_eq!(report.drop_success_rate, 1.0);
        assert!(report.drop_latency.is_none());
        assert!(report.passed);
    }
}
