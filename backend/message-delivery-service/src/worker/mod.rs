//! Delivery worker: claims log entries for its consumer group, persists them
//! and acknowledges on commit.
//!
//! ```text
//! Starting ─▶ GroupReady ─▶ Polling ⇄ Processing
//!     └───────────┴────────────┴─────────┴──▶ Stopped
//! ```
//!
//! The stop signal is only observed while waiting for entries; a unit of work
//! that has started always runs to commit or rollback.

pub mod consumer;
pub mod lifecycle;

use crate::log::{BlockMode, GroupStart, LogError};
use crate::store::StoreError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use consumer::DeliveryWorker;
pub use lifecycle::WorkerHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    GroupReady,
    Polling,
    Processing,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::GroupReady => "group_ready",
            WorkerState::Polling => "polling",
            WorkerState::Processing => "processing",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions that end the worker task with an error.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The consumer group could not be created; the worker cannot consume.
    #[error("consumer group setup failed: {0}")]
    GroupSetup(#[source] LogError),

    #[error("worker task failed: {0}")]
    Join(String),
}

/// Failure of the per-entry unit of work. Never surfaced to clients; the
/// entry stays unacknowledged and is redelivered.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unit of work exceeded its {0:?} deadline")]
    Timeout(Duration),
}

impl PersistenceError {
    /// Failures expected to clear without intervention (outages, timeouts).
    /// These never count towards the dead-letter bound.
    pub fn is_transient(&self) -> bool {
        match self {
            PersistenceError::Store(e) => e.is_transient(),
            PersistenceError::Timeout(_) => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub group: String,
    pub consumer: String,
    pub group_start: GroupStart,
    /// Entries claimed per poll.
    pub batch_size: usize,
    pub block: BlockMode,
    /// Deadline for one unit of work; `None` waits indefinitely.
    pub persist_timeout: Option<Duration>,
    /// Permanent persistence failures tolerated before an entry is
    /// dead-lettered. `0` disables the bound.
    pub max_attempts: u32,
    /// Entries pending under other consumer names at least this long are
    /// taken over before the first poll.
    pub reclaim_min_idle: Duration,
    /// First delay after a failed poll or unit of work, doubled up to `max_retry_backoff`.
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            group_start: GroupStart::Beginning,
            batch_size: 1,
            block: BlockMode::Forever,
            persist_timeout: Some(Duration::from_secs(10)),
            max_attempts: 5,
            reclaim_min_idle: Duration::ZERO,
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_secs(5),
        }
    }
}
