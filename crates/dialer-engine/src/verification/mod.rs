//! # Verification Engine
//!
//! Post-hoc audit of persisted call history. Verification reads only the
//! [`CallRecordStore`] and may run while a session is dialing. Findings are
//! reported, never enforced; the only write path is [`VerificationEngine::cleanup`],
//! which closes stale calls and supports a dry run.
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use dialer_engine::config::VerificationConfig;
//! use dialer_engine::database::MemoryCallStore;
//! use dialer_engine::verification::VerificationEngine;
//!
//! # async fn example() -> dialer_engine::Result<()> {
//! let engine = VerificationEngine::new(Arc::new(MemoryCallStore::new()), VerificationConfig::default());
//! let report = engine.verify_window(Utc::now() - Duration::hours(24), Utc::now()).await?;
//! assert!(report.passed);
//! # Ok(())
//! # }
//! ```

pub mod amd;
pub mod disposition;
pub mod integrity;
pub mod leaks;
pub mod single_connection;

pub use amd::{analyze_amd, AmdReport};
pub use disposition::{check_dispositions, Contradiction, DispositionIssue, DispositionReport};
pub use integrity::{check_integrity, IntegrityIssue, IntegrityReport};
pub use leaks::{cleanup_leaks, detect_leaks, CleanupReport, LeakFinding, LeakKind, LeakReport};
pub use single_connection::{audit_single_connection, ConnectionViolation, LatencySummary, SingleConnectionReport};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::VerificationConfig;
use crate::database::CallRecordStore;
use crate::error::Result;
use crate::types::AnsweredBy;

/// Combined result of one verification run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub records: usize,
    pub integrity: IntegrityReport,
    pub amd: AmdReport,
    pub disposition: DispositionReport,
    pub leaks: LeakReport,
    pub single_connection: SingleConnectionReport,
    pub passed: bool,
}

pub struct VerificationEngine {
    store: Arc<dyn CallRecordStore>,
    config: VerificationConfig,
}

impl VerificationEngine {
    pub fn new(store: Arc<dyn CallRecordStore>, config: VerificationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Audit records created within `[from, to)`
    pub async fn verify_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<VerificationReport> {
        self.verify_with_ground_truth(from, to, None).await
    }

    /// Audit a window, scoring AMD against known answers (record id → party)
    pub async fn verify_with_ground_truth(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        ground_truth: Option<&HashMap<String, AnsweredBy>>,
    ) -> Result<VerificationReport> {
        let records = self.store.query_range(from, to).await?;
        let leaks = self.detect_leaks().await?;

        let integrity = check_integrity(&records, self.config.integrity_pass_rate);
        let amd = analyze_amd(&records, ground_truth);
        let disposition = check_dispositions(&records, self.config.disposition_pass_rate);
        let single_connection = audit_single_connection(
            &records,
            self.config.session_gap_secs,
            self.config.drop_success_pass_rate,
        );

        let passed = integrity.passed && disposition.passed && single_connection.passed && leaks.is_clean();
        let report = VerificationReport {
            window_start: from,
            window_end: to,
            generated_at: Utc::now(),
            records: records.len(),
            integrity,
            amd,
            disposition,
            leaks,
            single_connection,
            passed,
        };

        if report.passed {
            info!(records = report.records, "Verification passed");
        } else {
            warn!(
                records = report.records,
                integrity_rate = report.integrity.rate,
                disposition_accuracy = report.disposition.accuracy,
                violations = report.single_connection.violations.len(),
                leaks = report.leaks.findings.len(),
                "Verification failed"
            );
        }
        Ok(report)
    }

    /// Scan every non-terminal record for stuck and ghost calls
    pub async fn detect_leaks(&self) -> Result<LeakReport> {
        let open = self.store.list_non_terminal().await?;
        Ok(detect_leaks(&open, Utc::now(), &self.config))
    }

    /// Detect leaks and close them as failed; nothing is written when `dry_run`
    pub async fn cleanup(&self, dry_run: bool) -> Result<CleanupReport> {
        let leaks = self.detect_leaks().await?;
        cleanup_leaks(self.store.as_ref(), &leaks.findings, dry_run).await
    }
}
