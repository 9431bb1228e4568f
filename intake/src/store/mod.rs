//! Persistence for qualifier records.
//!
//! The store is only ever appended to and queried. Implementations surface
//! failures to the caller and never retry internally.
use crate::config::StoreConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub mod firestore;
pub mod memory;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

/// A stored submission. `created_at` is assigned by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifierRecord {
    pub name: String,
    pub email: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A validated submission that has not been stored yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewQualifier {
    pub name: String,
    pub email: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored,
    /// A record keyed by the same email was written first.
    AlreadyExists,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request timed out after {0:?}")]
    Timeout(Duration),

    #[error("store returned {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("store authentication failed: {0}")]
    Auth(String),

    #[error("could not decode store response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait QualifierStore: Send + Sync {
    /// Returns the first record whose `email` equals `email`, if any.
    async fn find_by_email(&self, email: &str) -> Result<Option<QualifierRecord>, StoreError>;

    /// Appends `record`, stamping it with the store's creation time.
    async fn insert(&self, record: NewQualifier) -> Result<InsertOutcome, StoreError>;

    /// Used by the readiness probe.
    fn is_ready(&self) -> bool {
        true
    }
}

pub fn get_store(config: &StoreConfig) -> Result<Arc<dyn QualifierStore>, StoreError> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Firestore(firestore) => Ok(Arc::new(FirestoreStore::new(firestore)?)),
    }
}
