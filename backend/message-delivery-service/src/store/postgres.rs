use super::{MessageStore, PersistOutcome, StoreError, StoreResult};
use crate::models::{MessageRecord, MessageStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

/// PostgreSQL implementation of [`MessageStore`].
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> StoreResult<MessageRecord> {
    let message_id: Uuid = row.try_get("message_id")?;
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<MessageStatus>()
        .map_err(|reason| StoreError::CorruptRow { message_id, reason })?;
    let timestamp: DateTime<Utc> = row.try_get("timestamp")?;

    Ok(MessageRecord {
        message_id,
        sender_id: row.try_get("sender_id")?,
        receiver_id: row.try_get("receiver_id")?,
        content: row.try_get("content")?,
        timestamp,
        read: row.try_get("read")?,
        status,
    })
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn persist_delivered(&self, record: &MessageRecord) -> StoreResult<PersistOutcome> {
        // Dropping `tx` on any early return rolls the whole unit back.
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (message_id, sender_id, receiver_id, content, "timestamp", read, status)
            VALUES ($1, $2, $3, $4, $5, FALSE, 'sent')
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(record.message_id)
        .bind(&record.sender_id)
        .bind(&record.receiver_id)
        .bind(&record.content)
        .bind(record.timestamp)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(message_id = %record.message_id, "message already persisted, skipping");
            return Ok(PersistOutcome::Duplicate);
        }

        sqlx::query(
            r#"
            UPDATE messages
            SET status = 'delivered'
            WHERE message_id = $1 AND status = 'sent'
            "#,
        )
        .bind(record.message_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(message_id = %record.message_id, "message persisted as delivered");
        Ok(PersistOutcome::Delivered)
    }

    async fn conversation(&self, user1: &str, user2: &str) -> StoreResult<Vec<MessageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT message_id, sender_id, receiver_id, content, "timestamp", read, status
            FROM messages
            WHERE (sender_id = $1 AND receiver_id = $2)
               OR (sender_id = $2 AND receiver_id = $1)
            ORDER BY "timestamp" DESC
            "#,
        )
        .bind(user1)
        .bind(user2)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn mark_read(&self, message_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET read = TRUE, status = 'read'
            WHERE message_id = $1
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(&self, message_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'delivered'
            WHERE message_id = $1 AND status = 'sent'
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, message_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE message_id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
