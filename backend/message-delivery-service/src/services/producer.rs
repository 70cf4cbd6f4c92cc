use crate::log::{encode_record, EntryId, LogError, MessageLog};
use crate::metrics::PipelineMetrics;
use crate::models::{MessageRecord, SendMessageRequest};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("sender_id, receiver_id and content are required ({0} is empty)")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum ProduceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to queue message: {0}")]
    Append(#[from] LogError),
}

/// A message accepted onto the log, not yet persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: Uuid,
    pub entry_id: EntryId,
}

/// Validates inbound messages and appends them to the durable log.
///
/// Never writes to the store; the delivery worker owns persistence.
#[derive(Clone)]
pub struct Producer {
    log: Arc<dyn MessageLog>,
    metrics: PipelineMetrics,
}

pub fn validate(req: &SendMessageRequest) -> Result<(), ValidationError> {
    if req.sender_id.is_empty() {
        return Err(ValidationError::MissingField("sender_id"));
    }
    if req.receiver_id.is_empty() {
        return Err(ValidationError::MissingField("receiver_id"));
    }
    if req.content.is_empty() {
        return Err(ValidationError::MissingField("content"));
    }
    Ok(())
}

impl Producer {
    pub fn new(log: Arc<dyn MessageLog>, metrics: PipelineMetrics) -> Self {
        Self { log, metrics }
    }

    /// Validate, stamp id/time/status and append exactly once.
    ///
    /// Append failures are returned to the caller as-is; there is no retry here.
    pub async fn send(&self, req: SendMessageRequest) -> Result<QueuedMessage, ProduceError> {
        validate(&req)?;

        let record = MessageRecord::new_outgoing(req.sender_id, req.receiver_id, req.content);
        let fields = encode_record(&record);

        let entry_id = self.log.append(&fields).await.map_err(|e| {
            error!(message_id = %record.message_id, error = %e, "failed to append message to log");
            e
        })?;

        self.metrics.queued.inc();
        info!(
            message_id = %record.message_id,
            entry_id = %entry_id,
            "message queued"
        );

        Ok(QueuedMessage {
            message_id: record.message_id,
            entry_id,
        })
    }
}
