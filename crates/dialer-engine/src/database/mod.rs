//! # Call Record Persistence
//!
//! Call history is the record of truth the verification engine audits. One
//! [`CallRecord`] exists per dial attempt: it is created when the dial is issued,
//! updated as the call progresses and finalized once on the terminal transition.
//!
//! Two stores implement [`CallRecordStore`]:
//!
//! - [`SqliteCallStore`]: sqlx-backed SQLite storage for deployments
//! - [`MemoryCallStore`]: in-process storage for tests and embedded use
//!
//! ```rust
//! use dialer_engine::database::{CallRecord, CallRecordStore, MemoryCallStore};
//! use dialer_engine::types::ContactId;
//!
//! # async fn example() -> dialer_engine::Result<()> {
//! let store = MemoryCallStore::new();
//! let record = CallRecord::new("session-1", ContactId::from("c-42"), "+15551230042");
//! store.insert(&record).await?;
//!
//! let stuck = store.list_non_terminal().await?;
//! assert_eq!(stuck.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCallStore;
pub use sqlite::SqliteCallStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{AnsweredBy, CallHandle, CallOutcome, ContactId, EndReason, LineId, RecordStatus};

/// Metadata key holding the answering party exactly as the provider's AMD reported it
pub const REPORTED_ANSWERED_BY: &str = "reportedAnsweredBy";

/// One persisted call attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub session_id: String,
    pub contact_id: ContactId,
    pub line_id: Option<LineId>,
    pub phone: String,
    pub provider_handle: Option<CallHandle>,
    pub status: RecordStatus,
    pub duration_secs: u64,
    pub dialed_at: Option<DateTime<Utc>>,
    pub answered_by: Option<AnsweredBy>,
    pub disposition: Option<CallOutcome>,
    pub connected_at: Option<DateTime<Utc>>,
    pub ring_duration_secs: Option<u64>,
    pub end_reason: Option<EndReason>,
    /// Winner bridged → this call disconnected, for arbitration losers
    pub drop_latency_ms: Option<u64>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    pub fn new(session_id: impl Into<String>, contact_id: ContactId, phone: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            contact_id,
            line_id: None,
            phone: phone.into(),
            provider_handle: None,
            status: RecordStatus::Initiated,
            duration_secs: 0,
            dialed_at: Some(now),
            answered_by: None,
            disposition: None,
            connected_at: None,
            ring_duration_secs: None,
            end_reason: None,
            drop_latency_ms: None,
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_line(mut self, line: LineId) -> Self {
        self.line_id = Some(line);
        self
    }

    pub fn with_handle(mut self, handle: CallHandle) -> Self {
        self.provider_handle = Some(handle);
        self
    }

    /// Backdate the record; used when importing history
    pub fn dialed_at(mut self, at: DateTime<Utc>) -> Self {
        self.dialed_at = Some(at);
        self.created_at = at;
        self.updated_at = at;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Human answered and was bridged
    pub fn is_connected_human(&self) -> bool {
        self.disposition == Some(CallOutcome::Connected)
            && matches!(self.answered_by, Some(AnsweredBy::Human) | None)
    }

    pub fn set_reported_answer(&mut self, reported: AnsweredBy) {
        self.metadata
            .insert(REPORTED_ANSWERED_BY.into(), Value::from(reported.as_str()));
    }

    /// The provider's own detection result. `answered_by` holds the party after
    /// dialer policy; records without the metadata key fall back to it.
    pub fn reported_answered_by(&self) -> Option<AnsweredBy> {
        match self.metadata.get(REPORTED_ANSWERED_BY).and_then(Value::as_str) {
            Some(label) => Some(AnsweredBy::parse(label)),
            None => self.answered_by,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Persistence boundary for call history
#[async_trait]
pub trait CallRecordStore: Send + Sync {
    async fn insert(&self, record: &CallRecord) -> Result<()>;

    /// Replace an existing record; `NotFound` if it does not exist
    async fn update(&self, record: &CallRecord) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<CallRecord>>;

    /// Records created within `[from, to)`, oldest first
    async fn query_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CallRecord>>;

    /// Records of one dialing session, oldest first
    async fn by_session(&self, session_id: &str) -> Result<Vec<CallRecord>>;

    /// Records whose status is not terminal, oldest first
    async fn list_non_terminal(&self) -> Result<Vec<CallRecord>>;
}
