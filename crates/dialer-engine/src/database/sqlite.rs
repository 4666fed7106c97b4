//! # SQLite Call Record Store
//!
//! sqlx-backed persistence. All operations are async and `Send`, so the store can
//! be shared across line workers and the verification engine without blocking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use super::{CallRecord, CallRecordStore};
use crate::config::DatabaseConfig;
use crate::error::{DialerError, Result};
use crate::types::{AnsweredBy, CallHandle, CallOutcome, ContactId, EndReason, LineId, RecordStatus};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS call_records (
    id TEXT PRIMARY KEY NOT NULL,
    session_id TEXT NOT NULL,
    contact_id TEXT NOT NULL,
    line_id INTEGER,
    phone TEXT NOT NULL,
    provider_handle TEXT,
    status TEXT NOT NULL,
    duration_secs INTEGER NOT NULL DEFAULT 0,
    dialed_at TEXT,
    answered_by TEXT,
    disposition TEXT,
    connected_at TEXT,
    ring_duration_secs INTEGER,
    end_reason TEXT,
    drop_latency_ms INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_call_records_created_at ON call_records(created_at);
CREATE INDEX IF NOT EXISTS idx_call_records_status ON call_records(status);
CREATE INDEX IF NOT EXISTS idx_call_records_session ON call_records(session_id);
"#;

const COLUMNS: &str = "id, session_id, contact_id, line_id, phone, provider_handle, status, \
     duration_secs, dialed_at, answered_by, disposition, connected_at, ring_duration_secs, \
     end_reason, drop_latency_ms, metadata, created_at, updated_at";

/// Async call record store using sqlx
#[derive(Clone)]
pub struct SqliteCallStore {
    pool: SqlitePool,
}

impl SqliteCallStore {
    /// Connect and create the schema if needed
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_config(&DatabaseConfig {
            url: database_url.to_string(),
            ..Default::default()
        })
        .await
    }

    pub async fn with_config(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
        // Each in-memory connection is its own database
        let max_connections = if config.url.contains(":memory:") {
            1
        } else {
            config.max_connections.max(1)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!(url = %config.url, "Call record store ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_where(&self, clause: &str, binds: &[String]) -> Result<Vec<CallRecord>> {
        let sql = format!(
            "SELECT {} FROM call_records {} ORDER BY created_at ASC, id ASC",
            COLUMNS, clause
        );
        let mut query = sqlx::query(&sql);
        for value in binds {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_i64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn row_to_record(row: &SqliteRow) -> Result<CallRecord> {
    let status_raw: String = row.try_get("status")?;
    let status = RecordStatus::parse(&status_raw)
        .ok_or_else(|| DialerError::internal(format!("unknown stored status {}", status_raw)))?;

    let metadata_raw: String = row.try_get("metadata")?;
    let metadata = match serde_json::from_str::<Value>(&metadata_raw)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    Ok(CallRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        contact_id: ContactId(row.try_get("contact_id")?),
        line_id: row
            .try_get::<Option<i64>, _>("line_id")?
            .map(|l| LineId(from_i64(l) as usize)),
        phone: row.try_get("phone")?,
        provider_handle: row.try_get::<Option<String>, _>("provider_handle")?.map(CallHandle),
        status,
        duration_secs: from_i64(row.try_get("duration_secs")?),
        dialed_at: row.try_get::<Option<DateTime<Utc>>, _>("dialed_at")?,
        answered_by: row
            .try_get::<Option<String>, _>("answered_by")?
            .map(|a| AnsweredBy::parse(&a)),
        disposition: row
            .try_get::<Option<String>, _>("disposition")?
            .and_then(|d| CallOutcome::parse(&d)),
        connected_at: row.try_get::<Option<DateTime<Utc>>, _>("connected_at")?,
        ring_duration_secs: row.try_get::<Option<i64>, _>("ring_duration_secs")?.map(from_i64),
        end_reason: row
            .try_get::<Option<String>, _>("end_reason")?
            .map(|r| EndReason::from_stored(&r)),
        drop_latency_ms: row.try_get::<Option<i64>, _>("drop_latency_ms")?.map(from_i64),
        metadata,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl CallRecordStore for SqliteCallStore {
    async fn insert(&self, record: &CallRecord) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        sqlx::query(&format!(
            "INSERT INTO call_records ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            COLUMNS
        ))
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(&record.contact_id.0)
        .bind(record.line_id.map(|l| l.0 as i64))
        .bind(&record.phone)
        .bind(record.provider_handle.as_ref().map(|h| h.0.clone()))
        .bind(record.status.as_str())
        .bind(to_i64(record.duration_secs))
        .bind(record.dialed_at)
        .bind(record.answered_by.map(|a| a.as_str()))
        .bind(record.disposition.map(|d| d.as_str()))
        .bind(record.connected_at)
        .bind(record.ring_duration_secs.map(to_i64))
        .bind(record.end_reason.as_ref().map(|r| r.as_str().to_string()))
        .bind(record.drop_latency_ms.map(to_i64))
        .bind(metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(record_id = %record.id, "Call record inserted");
        Ok(())
    }

    async fn update(&self, record: &CallRecord) -> Result<()> {
        let metadata = serde_json::to_string(&record.metadata)?;
        let result = sqlx::query(
            "UPDATE call_records SET
                line_id = ?, provider_handle = ?, status = ?, duration_secs = ?, dialed_at = ?,
                answered_by = ?, disposition = ?, connected_at = ?, ring_duration_secs = ?,
                end_reason = ?, drop_latency_ms = ?, metadata = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(record.line_id.map(|l| l.0 as i64))
        .bind(record.provider_handle.as_ref().map(|h| h.0.clone()))
        .bind(record.status.as_str())
        .bind(to_i64(record.duration_secs))
        .bind(record.dialed_at)
        .bind(record.answered_by.map(|a| a.as_str()))
        .bind(record.disposition.map(|d| d.as_str()))
        .bind(record.connected_at)
        .bind(record.ring_duration_secs.map(to_i64))
        .bind(record.end_reason.as_ref().map(|r| r.as_str().to_string()))
        .bind(record.drop_latency_ms.map(to_i64))
        .bind(metadata)
        .bind(record.updated_at)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DialerError::not_found("call record", record.id.clone()));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CallRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM call_records WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn query_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM call_records WHERE created_at >= ? AND created_at < ? ORDER BY created_at ASC, id ASC",
            COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn by_session(&self, session_id: &str) -> Result<Vec<CallRecord>> {
        self.fetch_where("WHERE session_id = ?", &[session_id.to_string()]).await
    }

    async fn list_non_terminal(&self) -> Result<Vec<CallRecord>> {
        self.fetch_where(
            "WHERE status IN (?, ?, ?)",
            &[
                RecordStatus::Initiated.as_str().to_string(),
                RecordStatus::Ringing.as_str().to_string(),
                RecordStatus::InProgress.as_str().to_string(),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_record_round_trip() {
        let store = SqliteCallStore::new("sqlite::memory:").await.unwrap();

        let mut record = CallRecord::new("s1", ContactId::from("c-1"), "+15550001111")
            .with_line(LineId(2))
            .with_handle(CallHandle::from("CA1"));
        store.insert(&record).await.unwrap();

        record.status = RecordStatus::Completed;
        record.answered_by = Some(AnsweredBy::Human);
        record.disposition = Some(CallOutcome::Connected);
        record.connected_at = Some(Utc::now());
        record.ring_duration_secs = Some(7);
        record.duration_secs = 95;
        record.end_reason = Some(EndReason::WatchdogTimeout);
        record.metadata.insert("originalStatus".into(), Value::from("ringing"));
        store.update(&record).await.unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Completed);
        assert_eq!(loaded.line_id, Some(LineId(2)));
        assert_eq!(loaded.disposition, Some(CallOutcome::Connected));
        assert_eq!(loaded.end_reason, Some(EndReason::WatchdogTimeout));
        assert_eq!(loaded.ring_duration_secs, Some(7));
        assert_eq!(loaded.metadata["originalStatus"], "ringing");
    }

    #[tokio::test]
    async fn test_non_terminal_and_range_queries() {
        let store = SqliteCallStore::new("sqlite::memory:").await.unwrap();
        let base = Utc::now() - Duration::hours(2);

        let ringing = CallRecord::new("s1", ContactId::from("c-1"), "+15550001111").dialed_at(base);
        let mut done = CallRecord::new("s1", ContactId::from("c-2"), "+15550002222")
            .dialed_at(base + Duration::minutes(30));
        done.status = RecordStatus::Busy;
        store.insert(&ringing).await.unwrap();
        store.insert(&done).await.unwrap();

        let open = store.list_non_terminal().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, ringing.id);

        let window = store
            .query_range(base + Duration::minutes(1), Utc::now())
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, done.id);
        assert_eq!(store.by_session("s1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_unknown_record() {
        let store = SqliteCallStore::new("sqlite::memory:").await.unwrap();
        let record = CallRecord::new("s1", ContactId::from("c-1"), "+15550001111");
        assert!(store.update(&record).await.is_err());
    }
}
