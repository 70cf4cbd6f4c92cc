//! Durable, ordered message log with consumer-group consumption.
//!
//! The log is the only hand-off between the request path and the delivery
//! worker. Entries are never deleted here; consumers acknowledge them per
//! group and anything delivered but not acknowledged is handed out again.

pub mod entry;
pub mod redis_stream;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use entry::{decode_record, encode_record, DecodeError, EntryFields, EntryId, LogEntry};
pub use redis_stream::RedisStreamLog;

pub type LogResult<T> = Result<T, LogError>;

#[derive(Debug, Error)]
pub enum LogError {
    /// The entry could not be appended (log unreachable or rejected the write).
    #[error("append failed: {0}")]
    Append(String),

    #[error("consumer group setup failed: {0}")]
    GroupSetup(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("reclaim failed: {0}")]
    Reclaim(String),

    #[error("acknowledge failed: {0}")]
    Ack(String),

    #[error("dead-letter append failed: {0}")]
    DeadLetter(String),

    /// The log returned an entry id that does not follow `<ms>-<seq>`.
    #[error("malformed entry id: {0}")]
    MalformedId(String),
}

/// Where a freshly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// Every entry already in the log is delivered to the group.
    Beginning,
    /// Only entries appended after the group is created.
    Latest,
    /// Entries strictly after the given id.
    After(EntryId),
}

/// How long `read_next` may wait when nothing is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockMode {
    NoWait,
    For(Duration),
    /// Wait until an entry arrives or the cancellation token fires.
    Forever,
}

#[async_trait]
pub trait MessageLog: Send + Sync {
    /// Append a new entry and return its id. Ids are strictly increasing.
    async fn append(&self, fields: &EntryFields) -> LogResult<EntryId>;

    /// Create a consumer group. Creating a group that already exists succeeds.
    async fn create_group(&self, group: &str, start: GroupStart) -> LogResult<()>;

    /// Claim up to `max_count` entries for `consumer` within `group`.
    ///
    /// Entries this consumer claimed earlier but never acknowledged come back
    /// first, in id order; only when none are pending are new entries handed
    /// out. Returns an empty batch when the wait elapses or `cancel` fires.
    async fn read_next(
        &self,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: BlockMode,
        cancel: &CancellationToken,
    ) -> LogResult<Vec<LogEntry>>;

    /// Move entries pending under other consumers of `group`, idle for at
    /// least `min_idle`, onto `consumer`'s pending list. Returns how many moved.
    ///
    /// Consumer names that no longer read would otherwise hold their claimed
    /// entries forever.
    async fn reclaim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_count: usize,
    ) -> LogResult<usize>;

    /// Mark an entry consumed for `group`.
    ///
    /// Returns `false` when the entry was not pending (already acknowledged);
    /// that case is a no-op, not an error.
    async fn acknowledge(&self, group: &str, id: EntryId) -> LogResult<bool>;

    /// Park an entry that can never be processed on the dead-letter stream.
    async fn dead_letter(&self, entry: &LogEntry, reason: &str) -> LogResult<EntryId>;
}
