use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::lead::{Channel, LeadId};
use leadflow_core::domain::reply::ReplyEvent;

use super::lead::parse_timestamp;
use super::{ReplyRepository, RepositoryError};
use crate::DbPool;

pub struct SqlReplyRepository {
    pool: DbPool,
}

impl SqlReplyRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReplyRepository for SqlReplyRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<ReplyEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, lead_id, channel, raw_text, received_at, consumed
             FROM reply_event
             WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(reply_from_row).transpose()
    }

    async fn next_unconsumed(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<ReplyEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, lead_id, channel, raw_text, received_at, consumed
             FROM reply_event
             WHERE lead_id = ? AND consumed = 0
             ORDER BY received_at ASC
             LIMIT 1",
        )
        .bind(&lead_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(reply_from_row).transpose()
    }

    async fn save(&self, event: ReplyEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO reply_event (id, lead_id, channel, raw_text, received_at, consumed)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                consumed = excluded.consumed",
        )
        .bind(&event.id)
        .bind(&event.lead_id.0)
        .bind(event.channel.as_str())
        .bind(&event.raw_text)
        .bind(event.received_at.to_rfc3339())
        .bind(event.consumed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn reply_from_row(row: SqliteRow) -> Result<ReplyEvent, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = channel_raw
        .parse::<Channel>()
        .map_err(|_| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    Ok(ReplyEvent {
        id: row.try_get("id")?,
        lead_id: LeadId(row.try_get("lead_id")?),
        channel,
        raw_text: row.try_get("raw_text")?,
        received_at: parse_timestamp("received_at", row.try_get("received_at")?)?,
        consumed: row.try_get("consumed")?,
    })
}
