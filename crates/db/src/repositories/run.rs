use std::collections::HashMap;

use sqlx::{sqlite::SqliteRow, Row};

use leadflow_core::domain::lead::LeadId;
use leadflow_core::domain::run::{ResumptionToken, Run, RunId, RunStatus, StepAttempt};

use super::lead::parse_timestamp;
use super::{RepositoryError, RunRepository};
use crate::DbPool;

pub struct SqlRunRepository {
    pool: DbPool,
}

impl SqlRunRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const RUN_COLUMNS: &str = "id,
    workflow,
    lead_id,
    status,
    current_step,
    variables_json,
    history_json,
    step_visits_json,
    resumption_token,
    last_error,
    cancel_requested,
    pause_requested,
    created_at,
    updated_at";

#[async_trait::async_trait]
impl RunRepository for SqlRunRepository {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM run WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(run_from_row).transpose()
    }

    async fn find_by_token(
        &self,
        token: &ResumptionToken,
    ) -> Result<Option<Run>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {RUN_COLUMNS} FROM run WHERE resumption_token = ?"))
                .bind(&token.0)
                .fetch_optional(&self.pool)
                .await?;

        row.map(run_from_row).transpose()
    }

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RUN_COLUMNS} FROM run WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(run_from_row).collect()
    }

    async fn save(&self, run: Run) -> Result<(), RepositoryError> {
        let variables_json = serde_json::to_string(&run.variables)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let history_json = serde_json::to_string(&run.history)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let step_visits_json = serde_json::to_string(&run.step_visits)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;

        sqlx::query(
            "INSERT INTO run (
                id,
                workflow,
                lead_id,
                status,
                current_step,
                variables_json,
                history_json,
                step_visits_json,
                resumption_token,
                last_error,
                cancel_requested,
                pause_requested,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                workflow = excluded.workflow,
                lead_id = excluded.lead_id,
                status = excluded.status,
                current_step = excluded.current_step,
                variables_json = excluded.variables_json,
                history_json = excluded.history_json,
                step_visits_json = excluded.step_visits_json,
                resumption_token = excluded.resumption_token,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at",
        )
        .bind(&run.id.0)
        .bind(&run.workflow)
        .bind(&run.lead_id.0)
        .bind(run.status.as_str())
        .bind(run.current_step.as_deref())
        .bind(&variables_json)
        .bind(&history_json)
        .bind(&step_visits_json)
        .bind(run.resumption_token.as_ref().map(|token| token.0.as_str()))
        .bind(run.last_error.as_deref())
        .bind(run.cancel_requested)
        .bind(run.pause_requested)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_pause_requested(
        &self,
        id: &RunId,
        value: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE run SET pause_requested = ?, updated_at = ? WHERE id = ?")
            .bind(value)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_cancel_requested(
        &self,
        id: &RunId,
        value: bool,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE run SET cancel_requested = ?, updated_at = ? WHERE id = ?")
            .bind(value)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn run_from_row(row: SqliteRow) -> Result<Run, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = status_raw
        .parse::<RunStatus>()
        .map_err(|_| RepositoryError::Decode(format!("unknown run status `{status_raw}`")))?;

    let variables = serde_json::from_str(&row.try_get::<String, _>("variables_json")?)
        .map_err(|error| RepositoryError::Decode(format!("invalid variables_json: {error}")))?;
    let history: Vec<StepAttempt> =
        serde_json::from_str(&row.try_get::<String, _>("history_json")?)
            .map_err(|error| RepositoryError::Decode(format!("invalid history_json: {error}")))?;
    let step_visits: HashMap<String, u32> =
        serde_json::from_str(&row.try_get::<String, _>("step_visits_json")?).map_err(|error| {
            RepositoryError::Decode(format!("invalid step_visits_json: {error}"))
        })?;

    Ok(Run {
        id: RunId(row.try_get("id")?),
        workflow: row.try_get("workflow")?,
        lead_id: LeadId(row.try_get("lead_id")?),
        status,
        current_step: row.try_get("current_step")?,
        variables,
        history,
        step_visits,
        resumption_token: row
            .try_get::<Option<String>, _>("resumption_token")?
            .map(ResumptionToken),
        last_error: row.try_get("last_error")?,
        cancel_requested: row.try_get("cancel_requested")?,
        pause_requested: row.try_get("pause_requested")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}
