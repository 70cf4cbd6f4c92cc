//! In-memory log and store used by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use message_delivery_service::log::{
    BlockMode, EntryFields, EntryId, GroupStart, LogEntry, LogError, LogResult, MessageLog,
};
use message_delivery_service::metrics::PipelineMetrics;
use message_delivery_service::models::{MessageRecord, MessageStatus};
use message_delivery_service::store::{MessageStore, PersistOutcome, StoreError, StoreResult};
use message_delivery_service::worker::WorkerConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const GROUP: &str = "message_workers";
pub const CONSUMER: &str = "worker-test";

/// One registration per test binary; the registry is process-wide.
pub fn metrics() -> PipelineMetrics {
    static METRICS: OnceLock<PipelineMetrics> = OnceLock::new();
    METRICS
        .get_or_init(|| PipelineMetrics::new("message-delivery-service-test"))
        .clone()
}

pub fn worker_config() -> WorkerConfig {
    let mut config = WorkerConfig::new(GROUP, CONSUMER);
    config.persist_timeout = Some(Duration::from_secs(2));
    config.retry_backoff = Duration::from_millis(5);
    config.max_retry_backoff = Duration::from_millis(20);
    config
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

struct Claim {
    consumer: String,
    since: Instant,
}

#[derive(Default)]
struct GroupState {
    /// Index into `entries` of the next never-delivered entry.
    cursor: usize,
    /// Delivered but unacknowledged.
    pending: BTreeMap<EntryId, Claim>,
    deliveries: HashMap<EntryId, u32>,
}

#[derive(Default)]
struct LogInner {
    next_ms: u64,
    entries: Vec<LogEntry>,
    groups: HashMap<String, GroupState>,
    dead_letters: Vec<(LogEntry, String)>,
}

/// Stream with consumer-group semantics: pending entries are handed back to
/// their consumer before anything new.
#[derive(Default)]
pub struct MemoryLog {
    inner: Mutex<LogInner>,
    appended: Notify,
    pub fail_appends: AtomicBool,
    pub fail_acks: AtomicBool,
    pub fail_group_setup: AtomicBool,
    pub fail_reads: AtomicBool,
    pub fail_reclaims: AtomicBool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().unwrap().entries.clone()
    }

    pub fn pending(&self, group: &str) -> Vec<EntryId> {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .get(group)
            .map(|g| g.pending.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Consumer currently holding `id` unacknowledged.
    pub fn owner(&self, group: &str, id: EntryId) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .get(group)
            .and_then(|g| g.pending.get(&id))
            .map(|claim| claim.consumer.clone())
    }

    /// How many times the group handed out `id`.
    pub fn deliveries(&self, group: &str, id: EntryId) -> u32 {
        let inner = self.inner.lock().unwrap();
        inner
            .groups
            .get(group)
            .and_then(|g| g.deliveries.get(&id).copied())
            .unwrap_or(0)
    }

    pub fn dead_letters(&self) -> Vec<(LogEntry, String)> {
        self.inner.lock().unwrap().dead_letters.clone()
    }

    fn claim(&self, group: &str, consumer: &str, max_count: usize) -> LogResult<Vec<LogEntry>> {
        let mut inner = self.inner.lock().unwrap();
        let LogInner {
            entries, groups, ..
        } = &mut *inner;
        let state = groups
            .get_mut(group)
            .ok_or_else(|| LogError::Read(format!("NOGROUP {group}")))?;
        let max_count = max_count.max(1);

        let mine: Vec<EntryId> = state
            .pending
            .iter()
            .filter(|(_, claim)| claim.consumer == consumer)
            .map(|(id, _)| *id)
            .take(max_count)
            .collect();
        if !mine.is_empty() {
            return Ok(mine
                .into_iter()
                .filter_map(|id| {
                    if let Some(claim) = state.pending.get_mut(&id) {
                        claim.since = Instant::now();
                    }
                    *state.deliveries.entry(id).or_insert(0) += 1;
                    entries.iter().find(|e| e.id == id).cloned()
                })
                .collect());
        }

        let fresh: Vec<LogEntry> = entries
            .iter()
            .skip(state.cursor)
            .take(max_count)
            .cloned()
            .collect();
        state.cursor += fresh.len();
        for entry in &fresh {
            state.pending.insert(
                entry.id,
                Claim {
                    consumer: consumer.to_string(),
                    since: Instant::now(),
                },
            );
            *state.deliveries.entry(entry.id).or_insert(0) += 1;
        }
        Ok(fresh)
    }
}

#[async_trait]
impl MessageLog for MemoryLog {
    async fn append(&self, fields: &EntryFields) -> LogResult<EntryId> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(LogError::Append("connection refused".into()));
        }
        let id = {
            let mut inner = self.inner.lock().unwrap();
            inner.next_ms += 1;
            let id = EntryId::new(inner.next_ms, 0);
            inner.entries.push(LogEntry {
                id,
                fields: fields.clone(),
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, group: &str, start: GroupStart) -> LogResult<()> {
        if self.fail_group_setup.load(Ordering::SeqCst) {
            return Err(LogError::GroupSetup("ERR wrong type".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        let cursor = match start {
            GroupStart::Beginning => 0,
            GroupStart::Latest => inner.entries.len(),
            GroupStart::After(after) => inner
                .entries
                .iter()
                .position(|e| e.id > after)
                .unwrap_or(inner.entries.len()),
        };
        inner
            .groups
            .entry(group.to_string())
            .or_insert_with(|| GroupState {
                cursor,
                ..GroupState::default()
            });
        Ok(())
    }

    async fn read_next(
        &self,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: BlockMode,
        cancel: &CancellationToken,
    ) -> LogResult<Vec<LogEntry>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LogError::Read("connection reset".into()));
        }
        let deadline = match block {
            BlockMode::NoWait => return self.claim(group, consumer, max_count),
            BlockMode::For(wait) => Some(tokio::time::Instant::now() + wait),
            BlockMode::Forever => None,
        };

        loop {
            if cancel.is_cancelled() {
                return Ok(Vec::new());
            }
            let appended = self.appended.notified();
            let batch = self.claim(group, consumer, max_count)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            match deadline {
                Some(deadline) => tokio::select! {
                    _ = cancel.cancelled() => return Ok(Vec::new()),
                    _ = tokio::time::sleep_until(deadline) => return Ok(Vec::new()),
                    _ = appended => {}
                },
                None => tokio::select! {
                    _ = cancel.cancelled() => return Ok(Vec::new()),
                    _ = appended => {}
                },
            }
        }
    }

    async fn reclaim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        _max_count: usize,
    ) -> LogResult<usize> {
        if self.fail_reclaims.load(Ordering::SeqCst) {
            return Err(LogError::Reclaim("connection reset".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .groups
            .get_mut(group)
            .ok_or_else(|| LogError::Reclaim(format!("NOGROUP {group}")))?;

        let mut moved = 0;
        for claim in state.pending.values_mut() {
            if claim.consumer != consumer && claim.since.elapsed() >= min_idle {
                claim.consumer = consumer.to_string();
                claim.since = Instant::now();
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn acknowledge(&self, group: &str, id: EntryId) -> LogResult<bool> {
        if self.fail_acks.load(Ordering::SeqCst) {
            return Err(LogError::Ack("connection reset".into()));
        }
        let mut inner = self.inner.lock().unwrap();
        Ok(inner
            .groups
            .get_mut(group)
            .map(|g| g.pending.remove(&id).is_some())
            .unwrap_or(false))
    }

    async fn dead_letter(&self, entry: &LogEntry, reason: &str) -> LogResult<EntryId> {
        let mut inner = self.inner.lock().unwrap();
        inner.dead_letters.push((entry.clone(), reason.to_string()));
        Ok(EntryId::new(inner.dead_letters.len() as u64, 0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Looks like a dropped connection; retried without limit.
    Transient,
    /// Looks like a rejected statement; counts towards the dead-letter bound.
    Permanent,
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<uuid::Uuid, MessageRecord>>,
    failure: Mutex<Option<Failure>>,
    delay: Mutex<Option<Duration>>,
    pub persist_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, failure: Option<Failure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Make every unit of work take at least `delay`.
    pub fn delay_persist(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn get(&self, id: uuid::Uuid) -> Option<MessageRecord> {
        self.rows.lock().unwrap().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    /// Seed a row directly, bypassing the worker.
    pub fn insert(&self, record: MessageRecord) {
        self.rows.lock().unwrap().insert(record.message_id, record);
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_delivered(&self, record: &MessageRecord) -> StoreResult<PersistOutcome> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = *self.failure.lock().unwrap();
        match failure {
            Some(Failure::Transient) => {
                return Err(StoreError::Unavailable("connection refused".into()))
            }
            Some(Failure::Permanent) => {
                return Err(StoreError::Database(sqlx::Error::Protocol(
                    "new row violates check constraint".into(),
                )))
            }
            None => {}
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&record.message_id) {
            return Ok(PersistOutcome::Duplicate);
        }
        let mut row = record.clone();
        if row.status == MessageStatus::Sent {
            row.status = MessageStatus::Delivered;
        }
        rows.insert(row.message_id, row);
        Ok(PersistOutcome::Delivered)
    }

    async fn conversation(&self, user1: &str, user2: &str) -> StoreResult<Vec<MessageRecord>> {
        let rows = self.rows.lock().unwrap();
        let mut found: Vec<MessageRecord> = rows
            .values()
            .filter(|r| {
                (r.sender_id == user1 && r.receiver_id == user2)
                    || (r.sender_id == user2 && r.receiver_id == user1)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(found)
    }

    async fn mark_read(&self, message_id: uuid::Uuid) -> StoreResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        Ok(match rows.get_mut(&message_id) {
            Some(row) => {
                row.read = true;
                row.status = MessageStatus::Read;
                true
            }
            None => false,
        })
    }

    async fn mark_delivered(&self, message_id: uuid::Uuid) -> StoreResult<bool> {
        let mut rows = self.rows.lock().unwrap();
        Ok(match rows.get_mut(&message_id) {
            Some(row) if row.status == MessageStatus::Sent => {
                row.status = MessageStatus::Delivered;
                true
            }
            _ => false,
        })
    }

    async fn delete(&self, message_id: uuid::Uuid) -> StoreResult<bool> {
        Ok(self.rows.lock().unwrap().remove(&message_id).is_some())
    }
}
