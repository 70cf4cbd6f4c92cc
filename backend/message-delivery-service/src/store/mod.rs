//! Relational message store.
//!
//! The delivery worker writes through [`MessageStore::persist_delivered`]; the
//! HTTP read path uses the point queries and guarded status updates.

pub mod postgres;

use crate::models::MessageRecord;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use postgres::PgMessageStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be mapped back into a record.
    #[error("corrupt row for message {message_id}: {reason}")]
    CorruptRow { message_id: Uuid, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Connection-level failures that are expected to clear on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Unavailable(_) => true,
            StoreError::CorruptRow { .. } => false,
        }
    }
}

/// Result of the worker's unit of work for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The row was inserted and moved to `delivered`.
    Delivered,
    /// A row with this `message_id` already existed (redelivery); nothing changed.
    Duplicate,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert the message and mark it delivered as one transaction.
    ///
    /// Insertion is idempotent on `message_id`. The delivered transition only
    /// applies to rows still in `sent`, so it never overrides `read`.
    async fn persist_delivered(&self, record: &MessageRecord) -> StoreResult<PersistOutcome>;

    /// Messages exchanged between two users in either direction, newest first.
    async fn conversation(&self, user1: &str, user2: &str) -> StoreResult<Vec<MessageRecord>>;

    /// Set `read = true, status = 'read'`. Returns whether a row matched.
    async fn mark_read(&self, message_id: Uuid) -> StoreResult<bool>;

    /// Move `sent` to `delivered`. Returns whether a row changed.
    async fn mark_delivered(&self, message_id: Uuid) -> StoreResult<bool>;

    /// Delete a row. Returns whether a row matched.
    async fn delete(&self, message_id: Uuid) -> StoreResult<bool>;
}
