use super::{PersistenceError, WorkerConfig, WorkerError, WorkerState};
use crate::log::{EntryId, LogEntry, LogError, MessageLog};
use crate::metrics::PipelineMetrics;
use crate::models::MessageRecord;
use crate::store::{MessageStore, PersistOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consumes the durable log for one consumer identity.
///
/// For each claimed entry: decode, persist inside one transaction, and only
/// after commit acknowledge. Anything that fails before commit is left
/// unacknowledged and comes back on the next poll.
pub struct DeliveryWorker {
    log: Arc<dyn MessageLog>,
    store: Arc<dyn MessageStore>,
    metrics: PipelineMetrics,
    config: WorkerConfig,
    state_tx: watch::Sender<WorkerState>,
    /// Permanent failures per entry, cleared on success or dead-letter.
    attempts: HashMap<EntryId, u32>,
}

enum EntryOutcome {
    Done,
    Retry,
}

impl DeliveryWorker {
    pub fn new(
        log: Arc<dyn MessageLog>,
        store: Arc<dyn MessageStore>,
        metrics: PipelineMetrics,
        config: WorkerConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Starting);
        Self {
            log,
            store,
            metrics,
            config,
            state_tx,
            attempts: HashMap::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }

    /// Run until `cancel` fires or group setup fails.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WorkerError> {
        self.set_state(WorkerState::Starting);

        if cancel.is_cancelled() {
            info!(consumer = %self.config.consumer, "Worker stopped before start");
            self.set_state(WorkerState::Stopped);
            return Ok(());
        }

        if let Err(e) = self
            .log
            .create_group(&self.config.group, self.config.group_start)
            .await
        {
            error!(
                group = %self.config.group,
                error = %e,
                "Failed to create consumer group, worker cannot start"
            );
            self.set_state(WorkerState::Stopped);
            return Err(WorkerError::GroupSetup(e));
        }

        self.set_state(WorkerState::GroupReady);
        self.metrics.worker_running.set(1);
        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            batch_size = self.config.batch_size,
            "Delivery worker started"
        );

        let mut backoff = self.config.retry_backoff;
        let mut reclaimed = false;

        while !cancel.is_cancelled() {
            self.set_state(WorkerState::Polling);

            if !reclaimed {
                match self.reclaim().await {
                    Ok(()) => reclaimed = true,
                    Err(e) => {
                        warn!(error = %e, retry_in = ?backoff, "Failed to reclaim pending entries");
                        if !self.pause(&cancel, &mut backoff).await {
                            break;
                        }
                        continue;
                    }
                }
            }

            let batch = match self
                .log
                .read_next(
                    &self.config.group,
                    &self.config.consumer,
                    self.config.batch_size,
                    self.config.block,
                    &cancel,
                )
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "Failed to read from log");
                    if !self.pause(&cancel, &mut backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if batch.is_empty() {
                continue;
            }

            self.set_state(WorkerState::Processing);
            debug!(count = batch.len(), "Processing claimed entries");

            let mut needs_retry = false;
            for entry in batch {
                if let EntryOutcome::Retry = self.process_entry(&entry).await {
                    needs_retry = true;
                }
            }

            if needs_retry {
                if !self.pause(&cancel, &mut backoff).await {
                    break;
                }
            } else {
                backoff = self.config.retry_backoff;
            }
        }

        self.metrics.worker_running.set(0);
        self.set_state(WorkerState::Stopped);
        info!(consumer = %self.config.consumer, "Delivery worker stopped");
        Ok(())
    }

    /// Take over entries a previous process left pending under another name.
    async fn reclaim(&self) -> Result<(), LogError> {
        let moved = self
            .log
            .reclaim(
                &self.config.group,
                &self.config.consumer,
                self.config.reclaim_min_idle,
                self.config.batch_size.max(100),
            )
            .await?;
        if moved > 0 {
            info!(
                consumer = %self.config.consumer,
                moved,
                "Reclaimed entries left pending by other consumers"
            );
        }
        Ok(())
    }

    /// Sleep for the current backoff, doubling it for next time.
    /// Returns `false` if the stop signal arrived while waiting.
    async fn pause(&self, cancel: &CancellationToken, backoff: &mut Duration) -> bool {
        let delay = *backoff;
        *backoff = (*backoff * 2).min(self.config.max_retry_backoff);

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn process_entry(&mut self, entry: &LogEntry) -> EntryOutcome {
        let record = match MessageRecord::try_from(entry) {
            Ok(record) => record,
            Err(e) => {
                warn!(entry_id = %entry.id, error = %e, "Undecodable log entry");
                return self.dead_letter(entry, &format!("decode: {e}")).await;
            }
        };

        match self.persist(&record).await {
            Ok(PersistOutcome::Delivered) => {
                self.metrics.delivered.inc();
                info!(
                    message_id = %record.message_id,
                    entry_id = %entry.id,
                    "Message delivered"
                );
            }
            Ok(PersistOutcome::Duplicate) => {
                self.metrics.duplicates.inc();
                info!(
                    message_id = %record.message_id,
                    entry_id = %entry.id,
                    "Message already persisted, acknowledging redelivery"
                );
            }
            Err(e) => {
                self.metrics.persist_failures.inc();
                return self.record_failure(entry, &record, e).await;
            }
        }

        self.attempts.remove(&entry.id);
        self.acknowledge(entry.id).await
    }

    async fn persist(&self, record: &MessageRecord) -> Result<PersistOutcome, PersistenceError> {
        match self.config.persist_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.store.persist_delivered(record)).await {
                    Ok(result) => Ok(result?),
                    Err(_) => Err(PersistenceError::Timeout(deadline)),
                }
            }
            None => Ok(self.store.persist_delivered(record).await?),
        }
    }

    async fn record_failure(
        &mut self,
        entry: &LogEntry,
        record: &MessageRecord,
        e: PersistenceError,
    ) -> EntryOutcome {
        if e.is_transient() {
            warn!(
                message_id = %record.message_id,
                entry_id = %entry.id,
                error = %e,
                "Persist failed, entry left for redelivery"
            );
            return EntryOutcome::Retry;
        }

        let attempts = {
            let count = self.attempts.entry(entry.id).or_insert(0);
            *count += 1;
            *count
        };

        error!(
            message_id = %record.message_id,
            entry_id = %entry.id,
            attempts,
            error = %e,
            "Persist failed, entry left for redelivery"
        );

        let max = self.config.max_attempts;
        if max > 0 && attempts >= max {
            return self
                .dead_letter(entry, &format!("persist failed {attempts} times: {e}"))
                .await;
        }

        EntryOutcome::Retry
    }

    /// Park the entry on the dead-letter stream, then acknowledge it.
    /// If the dead-letter append fails the entry stays pending.
    async fn dead_letter(&mut self, entry: &LogEntry, reason: &str) -> EntryOutcome {
        match self.log.dead_letter(entry, reason).await {
            Ok(dead_letter_id) => {
                self.metrics.dead_lettered.inc();
                warn!(
                    entry_id = %entry.id,
                    dead_letter_id = %dead_letter_id,
                    reason,
                    "Entry moved to dead-letter stream"
                );
                self.attempts.remove(&entry.id);
                self.acknowledge(entry.id).await
            }
            Err(e) => {
                error!(
                    entry_id = %entry.id,
                    error = %e,
                    "Failed to dead-letter entry, leaving it pending"
                );
                EntryOutcome::Retry
            }
        }
    }

    /// Acknowledge after commit. A failure here only means the entry will be
    /// redelivered and hit the idempotent insert.
    async fn acknowledge(&self, id: EntryId) -> EntryOutcome {
        match self.log.acknowledge(&self.config.group, id).await {
            Ok(true) => {
                debug!(entry_id = %id, "Entry acknowledged");
                EntryOutcome::Done
            }
            Ok(false) => {
                debug!(entry_id = %id, "Entry was already acknowledged");
                EntryOutcome::Done
            }
            Err(e) => {
                self.metrics.ack_failures.inc();
                warn!(
                    entry_id = %id,
                    error = %e,
                    "Failed to acknowledge persisted entry, it will be redelivered"
                );
                EntryOutcome::Retry
            }
        }
    }
}
