//! In-memory call record store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{CallRecord, CallRecordStore};
use crate::error::{DialerError, Result};

#[derive(Debug, Default)]
pub struct MemoryCallStore {
    records: RwLock<HashMap<String, CallRecord>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Every record, oldest first
    pub fn all(&self) -> Vec<CallRecord> {
        sorted(self.records.read().values().cloned().collect())
    }

    fn select<F>(&self, pred: F) -> Vec<CallRecord>
    where
        F: Fn(&CallRecord) -> bool,
    {
        sorted(self.records.read().values().filter(|r| pred(r)).cloned().collect())
    }
}

fn sorted(mut records: Vec<CallRecord>) -> Vec<CallRecord> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    records
}

#[async_trait]
impl CallRecordStore for MemoryCallStore {
    async fn insert(&self, record: &CallRecord) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(DialerError::internal(format!("duplicate call record {}", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &CallRecord) -> Result<()> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(DialerError::not_found("call record", record.id.clone())),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<CallRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn query_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        Ok(self.select(|r| r.created_at >= from && r.created_at < to))
    }

    async fn by_session(&self, session_id: &str) -> Result<Vec<CallRecord>> {
        Ok(self.select(|r| r.session_id == session_id))
    }

    async fn list_non_terminal(&self) -> Result<Vec<CallRecord>> {
        Ok(self.select(|r| !r.is_terminal()))
    }
}
