//! Required-field checks on persisted call records

use serde::Serialize;
use tracing::warn;

use crate::database::CallRecord;
use crate::error::DialerError;
use crate::types::RecordStatus;

/// A record missing fields its status requires
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityIssue {
    pub record_id: String,
    pub status: RecordStatus,
    pub missing: Vec<&'static str>,
}

impl IntegrityIssue {
    pub fn to_error(&self) -> DialerError {
        DialerError::DataIntegrity {
            record_id: self.record_id.clone(),
            message: format!("{} record missing {}", self.status, self.missing.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    /// valid / total, 1.0 for an empty window
    pub rate: f64,
    pub passed: bool,
    pub issues: Vec<IntegrityIssue>,
}

/// Fields a record must carry for its status
pub fn missing_fields(record: &CallRecord) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if record.contact_id.0.trim().is_empty() {
        missing.push("contactId");
    }
    if record.dialed_at.is_none() {
        missing.push("dialedAt");
    }
    if record.status == RecordStatus::Completed {
        if record.connected_at.is_none() {
            missing.push("connectedAt");
        }
        if record.ring_duration_secs.is_none() {
            missing.push("ringDuration");
        }
        if record.answered_by.is_none() {
            missing.push("answeredBy");
        }
    }
    if record.status.is_terminal() && record.disposition.is_none() {
        missing.push("disposition");
    }
    missing
}

pub fn check_integrity(records: &[CallRecord], pass_rate: f64) -> IntegrityReport {
    let issues: Vec<IntegrityIssue> = records
        .iter()
        .filter_map(|record| {
            let missing = missing_fields(record);
            (!missing.is_empty()).then(|| IntegrityIssue {
                record_id: record.id.clone(),
                status: record.status,
                missing,
            })
        })
        .collect();

    for issue in &issues {
        warn!(error = %issue.to_error(), "Integrity check failed");
    }

    let total = records.len();
    let invalid = issues.len();
    let valid = total - invalid;
    let rate = if total == 0 { 1.0 } else { valid as f64 / total as f64 };

    IntegrityReport {
        total,
        valid,
        invalid,
        rate,
        passed: rate >= pass_rate,
        issues,
    }
}
