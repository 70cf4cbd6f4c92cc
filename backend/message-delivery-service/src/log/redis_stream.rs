//! Redis Streams-backed durable log
//! XADD appends, XGROUP CREATE sets up consumer groups, XREADGROUP claims and
//! XACK acknowledges. Pending entries are re-read before new ones, and
//! XAUTOCLAIM takes over entries left behind by other consumer names.

use super::{
    BlockMode, EntryFields, EntryId, GroupStart, LogEntry, LogError, LogResult, MessageLog,
};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest single server-side BLOCK issued while waiting indefinitely.
/// Cancellation is also raced locally, this only bounds how long the
/// connection stays parked after a cancelled wait.
const DEFAULT_BLOCK_SLICE: Duration = Duration::from_secs(5);

/// Field names added to dead-lettered entries.
const FIELD_DEAD_LETTER_REASON: &str = "dead_letter_reason";
const FIELD_SOURCE_ENTRY_ID: &str = "source_entry_id";

/// Redis Streams implementation of [`MessageLog`].
///
/// A blocking XREADGROUP occupies the connection it is sent on, so the
/// producer and the delivery worker should each hold their own instance.
#[derive(Clone)]
pub struct RedisStreamLog {
    conn: ConnectionManager,
    stream_key: String,
    dead_letter_key: String,
    block_slice: Duration,
}

impl RedisStreamLog {
    pub fn new(conn: ConnectionManager, stream_key: impl Into<String>) -> Self {
        let stream_key = stream_key.into();
        Self {
            conn,
            dead_letter_key: format!("{stream_key}:dead-letter"),
            stream_key,
            block_slice: DEFAULT_BLOCK_SLICE,
        }
    }

    /// Override the per-request BLOCK used for indefinite waits.
    pub fn with_block_slice(mut self, slice: Duration) -> Self {
        self.block_slice = slice.max(Duration::from_millis(1));
        self
    }

    pub fn dead_letter_key(&self) -> &str {
        &self.dead_letter_key
    }

    async fn xadd(&self, key: &str, fields: &EntryFields) -> redis::RedisResult<String> {
        let mut conn = self.conn.clone();
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        conn.xadd(key, "*", items.as_slice()).await
    }

    /// One XREADGROUP call. `from` is `0` for the consumer's pending list or
    /// `>` for never-delivered entries.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        max_count: usize,
        from: &str,
        block_ms: Option<usize>,
    ) -> LogResult<Vec<LogEntry>> {
        let mut conn = self.conn.clone();
        let mut opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(max_count.max(1));
        if let Some(ms) = block_ms {
            opts = opts.block(ms);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[self.stream_key.as_str()], &[from], &opts)
            .await
            .map_err(|e| LogError::Read(e.to_string()))?;

        let mut entries = Vec::new();
        for key in reply.unwrap_or_default().keys {
            for stream_id in key.ids {
                let id = stream_id
                    .id
                    .parse::<EntryId>()
                    .map_err(|e| LogError::MalformedId(e.0))?;

                let mut fields = EntryFields::new();
                for (name, value) in stream_id.map.iter() {
                    match redis::from_redis_value::<String>(value) {
                        Ok(text) => {
                            fields.insert(name.clone(), text);
                        }
                        Err(e) => {
                            warn!(entry_id = %id, field = %name, error = %e, "skipping non-text stream field");
                        }
                    }
                }

                entries.push(LogEntry { id, fields });
            }
        }

        Ok(entries)
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: BlockMode,
        cancel: &CancellationToken,
    ) -> LogResult<Vec<LogEntry>> {
        match block {
            BlockMode::NoWait => self.read_group(group, consumer, max_count, ">", None).await,
            BlockMode::For(wait) if wait.is_zero() => {
                self.read_group(group, consumer, max_count, ">", None).await
            }
            BlockMode::For(wait) => {
                let block_ms = wait.as_millis().max(1) as usize;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Ok(Vec::new()),
                    res = self.read_group(group, consumer, max_count, ">", Some(block_ms)) => res,
                }
            }
            BlockMode::Forever => {
                let slice_ms = self.block_slice.as_millis().max(1) as usize;
                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(Vec::new()),
                        res = self.read_group(group, consumer, max_count, ">", Some(slice_ms)) => {
                            let batch = res?;
                            if !batch.is_empty() {
                                return Ok(batch);
                            }
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MessageLog for RedisStreamLog {
    async fn append(&self, fields: &EntryFields) -> LogResult<EntryId> {
        let raw_id = self
            .xadd(&self.stream_key, fields)
            .await
            .map_err(|e| LogError::Append(e.to_string()))?;

        let id = raw_id
            .parse::<EntryId>()
            .map_err(|e| LogError::MalformedId(e.0))?;

        debug!(stream = %self.stream_key, entry_id = %id, "appended entry");
        Ok(id)
    }

    async fn create_group(&self, group: &str, start: GroupStart) -> LogResult<()> {
        let mut conn = self.conn.clone();
        let start_arg = match start {
            GroupStart::Beginning => "0".to_string(),
            GroupStart::Latest => "$".to_string(),
            GroupStart::After(id) => id.to_string(),
        };

        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(group)
            .arg(&start_arg)
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                debug!(stream = %self.stream_key, group, start = %start_arg, "consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream = %self.stream_key, group, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(LogError::GroupSetup(e.to_string())),
        }
    }

    async fn read_next(
        &self,
        group: &str,
        consumer: &str,
        max_count: usize,
        block: BlockMode,
        cancel: &CancellationToken,
    ) -> LogResult<Vec<LogEntry>> {
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let pending = self.read_group(group, consumer, max_count, "0", None).await?;
        if !pending.is_empty() {
            debug!(group, consumer, count = pending.len(), "redelivering pending entries");
            return Ok(pending);
        }

        self.read_new(group, consumer, max_count, block, cancel).await
    }

    async fn reclaim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        max_count: usize,
    ) -> LogResult<usize> {
        let mut conn = self.conn.clone();
        let min_idle_ms = min_idle.as_millis() as u64;
        let mut cursor = "0-0".to_string();
        let mut moved = 0;

        loop {
            // Reply: [next cursor, claimed ids, deleted ids (Redis 7+)]
            let reply: Vec<redis::Value> = redis::cmd("XAUTOCLAIM")
                .arg(&self.stream_key)
                .arg(group)
                .arg(consumer)
                .arg(min_idle_ms)
                .arg(&cursor)
                .arg("COUNT")
                .arg(max_count.max(1))
                .arg("JUSTID")
                .query_async(&mut conn)
                .await
                .map_err(|e| LogError::Reclaim(e.to_string()))?;

            let (next, claimed) = match reply.as_slice() {
                [next, claimed, ..] => (
                    redis::from_redis_value::<String>(next),
                    redis::from_redis_value::<Vec<String>>(claimed),
                ),
                _ => {
                    return Err(LogError::Reclaim(format!(
                        "unexpected XAUTOCLAIM reply with {} elements",
                        reply.len()
                    )))
                }
            };
            let next = next.map_err(|e| LogError::Reclaim(e.to_string()))?;
            let claimed = claimed.map_err(|e| LogError::Reclaim(e.to_string()))?;

            moved += claimed.len();
            if next == "0-0" {
                break;
            }
            cursor = next;
        }

        if moved > 0 {
            info!(stream = %self.stream_key, group, consumer, moved, "reclaimed pending entries");
        }
        Ok(moved)
    }

    async fn acknowledge(&self, group: &str, id: EntryId) -> LogResult<bool> {
        let mut conn = self.conn.clone();
        let acked: i64 = conn
            .xack(&self.stream_key, group, &[id.to_string()])
            .await
            .map_err(|e| LogError::Ack(e.to_string()))?;

        Ok(acked > 0)
    }

    async fn dead_letter(&self, entry: &LogEntry, reason: &str) -> LogResult<EntryId> {
        let mut fields = entry.fields.clone();
        fields.insert(FIELD_DEAD_LETTER_REASON.into(), reason.to_string());
        fields.insert(FIELD_SOURCE_ENTRY_ID.into(), entry.id.to_string());

        let raw_id = self
            .xadd(&self.dead_letter_key, &fields)
            .await
            .map_err(|e| LogError::DeadLetter(e.to_string()))?;

        raw_id
            .parse::<EntryId>()
            .map_err(|e| LogError::MalformedId(e.0))
    }
}
