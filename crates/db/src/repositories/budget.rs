use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::budget::{AccountId, ChannelBudget};
use leadflow_core::domain::lead::Channel;

use super::lead::{parse_optional_timestamp, parse_u32};
use super::{BudgetRepository, RepositoryError};
use crate::DbPool;

pub struct SqlBudgetRepository {
    pool: DbPool,
}

impl SqlBudgetRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BudgetRepository for SqlBudgetRepository {
    async fn find(
        &self,
        account: &AccountId,
        channel: Channel,
    ) -> Result<Option<ChannelBudget>, RepositoryError> {
        let row = sqlx::query(
            "SELECT account, channel, sent_today, daily_cap, last_sent_at, window_day
             FROM channel_budget
             WHERE account = ? AND channel = ?",
        )
        .bind(&account.0)
        .bind(channel.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(budget_from_row).transpose()
    }

    async fn save(&self, budget: ChannelBudget) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO channel_budget (
                account,
                channel,
                sent_today,
                daily_cap,
                last_sent_at,
                window_day
             ) VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(account, channel) DO UPDATE SET
                sent_today = excluded.sent_today,
                daily_cap = excluded.daily_cap,
                last_sent_at = excluded.last_sent_at,
                window_day = excluded.window_day",
        )
        .bind(&budget.account.0)
        .bind(budget.channel.as_str())
        .bind(i64::from(budget.sent_today))
        .bind(i64::from(budget.daily_cap))
        .bind(budget.last_sent_at.map(|value| value.to_rfc3339()))
        .bind(budget.window_day.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset_all(&self, today: NaiveDate) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE channel_budget SET sent_today = 0, window_day = ?")
            .bind(today.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn budget_from_row(row: SqliteRow) -> Result<ChannelBudget, RepositoryError> {
    let channel_raw = row.try_get::<String, _>("channel")?;
    let channel = channel_raw
        .parse::<Channel>()
        .map_err(|_| RepositoryError::Decode(format!("unknown channel `{channel_raw}`")))?;

    let window_raw = row.try_get::<String, _>("window_day")?;
    let window_day = window_raw
        .parse::<NaiveDate>()
        .map_err(|_| RepositoryError::Decode(format!("invalid window_day `{window_raw}`")))?;

    Ok(ChannelBudget {
        account: AccountId(row.try_get("account")?),
        channel,
        sent_today: parse_u32("sent_today", row.try_get("sent_today")?)?,
        daily_cap: parse_u32("daily_cap", row.try_get("daily_cap")?)?,
        last_sent_at: parse_optional_timestamp("last_sent_at", row.try_get("last_sent_at")?)?,
        window_day,
    })
}
