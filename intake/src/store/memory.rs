use super::{InsertOutcome, NewQualifier, QualifierRecord, QualifierStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

/// Process-local store for development and tests. Contents are lost on restart.
pub struct MemoryStore {
    records: RwLock<Vec<QualifierRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        tracing::warn!(
            "Using the in-memory qualifier store. Records are not persisted; this is unsafe for production use."
        );

        MemoryStore {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn records(&self) -> Vec<QualifierRecord> {
        self.records.read().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QualifierStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<QualifierRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .iter()
            .find(|record| record.email == email)
            .cloned())
    }

    async fn insert(&self, record: NewQualifier) -> Result<InsertOutcome, StoreError> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.email == record.email) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        records.push(QualifierRecord {
            name: record.name,
            email: record.email,
            created_at: Some(Utc::now()),
        });
        Ok(InsertOutcome::Stored)
    }
}
