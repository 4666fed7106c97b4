//! Stuck and ghost call detection, and their cleanup
//!
//! A call is **stuck** when it has sat in `initiated`/`ringing` or `in-progress`
//! far longer than any real call could. It is a **ghost** when the provider
//! already reported talk time but the record never reached a terminal status.
//! Cleanup closes such records as `failed/cleanup_stale_call`; it never deletes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::VerificationConfig;
use crate::database::{CallRecord, CallRecordStore};
use crate::error::{DialerError, Result};
use crate::types::{CallOutcome, EndReason, RecordStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeakKind {
    Stuck,
    Ghost,
}

impl LeakKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stuck => "stuck",
            Self::Ghost => "ghost",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakFinding {
    pub record_id: String,
    pub status: RecordStatus,
    pub kind: LeakKind,
    pub age_secs: i64,
    pub duration_secs: u64,
}

impl LeakFinding {
    pub fn to_error(&self) -> DialerError {
        DialerError::ResourceLeak {
            record_id: self.record_id.clone(),
            message: format!(
                "{} call in status {} for {}s",
                self.kind.as_str(),
                self.status,
                self.age_secs
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeakReport {
    pub scanned: usize,
    pub stuck: usize,
    pub ghost: usize,
    pub findings: Vec<LeakFinding>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub dry_run: bool,
    pub candidates: usize,
    pub cleaned: usize,
    /// Records that reached a terminal status on their own before cleanup ran
    pub already_terminal: usize,
    pub failed: usize,
    pub record_ids: Vec<String>,
}

fn record_age(record: &CallRecord, now: DateTime<Utc>) -> i64 {
    let since = record.dialed_at.unwrap_or(record.created_at);
    (now - since).num_seconds()
}

/// Classify one record; ghost takes precedence over stuck
pub fn classify_leak(record: &CallRecord, now: DateTime<Utc>, config: &VerificationConfig) -> Option<LeakKind> {
    if record.is_terminal() {
        return None;
    }
    if record.duration_secs > 0 {
        return Some(LeakKind::Ghost);
    }
    let age = record_age(record, now);
    let limit = match record.status {
        RecordStatus::Initiated | RecordStatus::Ringing => config.stuck_ringing_secs,
        RecordStatus::InProgress => config.stuck_in_progress_secs,
        _ => return None,
    };
    (age > limit).then_some(LeakKind::Stuck)
}

pub fn detect_leaks(records: &[CallRecord], now: DateTime<Utc>, config: &VerificationConfig) -> LeakReport {
    let mut report = LeakReport {
        scanned: records.len(),
        ..Default::default()
    };

    for record in records {
        let Some(kind) = classify_leak(record, now, config) else {
            continue;
        };
        match kind {
            LeakKind::Stuck => report.stuck += 1,
            LeakKind::Ghost => report.ghost += 1,
        }
        report.findings.push(LeakFinding {
            record_id: record.id.clone(),
            status: record.status,
            kind,
            age_secs: record_age(record, now),
            duration_secs: record.duration_secs,
        });
    }
    report
}

/// Close the flagged records as failed
///
/// Each record is re-read first so a call that finished since detection is
/// left alone. With `dry_run` nothing is written.
pub async fn cleanup_leaks(
    store: &dyn CallRecordStore,
    findings: &[LeakFinding],
    dry_run: bool,
) -> Result<CleanupReport> {
    let mut report = CleanupReport {
        dry_run,
        candidates: findings.len(),
        ..Default::default()
    };

    for finding in findings {
        let Some(mut record) = store.get(&finding.record_id).await? else {
            report.failed += 1;
            continue;
        };
        if record.is_terminal() {
            report.already_terminal += 1;
            continue;
        }

        warn!(error = %finding.to_error(), dry_run = dry_run, "Stale call found");
        if dry_run {
            report.record_ids.push(record.id);
            continue;
        }

        let original = record.status;
        record.status = RecordStatus::Failed;
        record.disposition = Some(CallOutcome::Failed);
        record.end_reason = Some(EndReason::CleanupStaleCall);
        record.metadata.insert("originalStatus".into(), Value::from(original.as_str()));
        record.metadata.insert("cleanedAt".into(), Value::from(Utc::now().to_rfc3339()));
        record.metadata.insert("leakKind".into(), Value::from(finding.kind.as_str()));
        record.touch();

        match store.update(&record).await {
            Ok(()) => {
                report.cleaned += 1;
                report.record_ids.push(record.id);
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "Failed to clean up stale call");
                report.failed += 1;
            }
        }
    }

    info!(
        dry_run = dry_run,
        candidates = report.candidates,
        cleaned = report.cleaned,
        failed = report.failed,
        "Stale call cleanup finished"
    );
    Ok(report)
}
