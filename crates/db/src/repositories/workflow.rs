use chrono::Utc;
use sqlx::Row;

use leadflow_core::domain::workflow::WorkflowDefinition;

use super::{RepositoryError, WorkflowRepository};
use crate::DbPool;

pub struct SqlWorkflowRepository {
    pool: DbPool,
}

impl SqlWorkflowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WorkflowRepository for SqlWorkflowRepository {
    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition_json FROM workflow WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            let raw = row.try_get::<String, _>("definition_json")?;
            serde_json::from_str(&raw).map_err(|error| {
                RepositoryError::Decode(format!("invalid definition_json: {error}"))
            })
        })
        .transpose()
    }

    async fn save(&self, definition: WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(&definition)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO workflow (name, version, definition_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET
                version = excluded.version,
                definition_json = excluded.definition_json,
                updated_at = excluded.updated_at",
        )
        .bind(&definition.name)
        .bind(&definition.version)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use leadflow_core::domain::workflow::{
        OnFailure, Step, WorkflowDefaults, WorkflowDefinition,
    };

    use super::SqlWorkflowRepository;
    use crate::testing::memory_pool;
    use crate::migrations::run_pending;
    use crate::repositories::WorkflowRepository;

    fn definition(version: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            name: "outreach".to_string(),
            version: version.to_string(),
            steps: vec![Step {
                name: "scout".to_string(),
                capability: "scout_leads".to_string(),
                config: Map::new(),
                retry: None,
                timeout_secs: None,
                on_failure: OnFailure::default(),
                requires_human_approval: false,
            }],
            transitions: Vec::new(),
            variables: Map::new(),
            defaults: WorkflowDefaults::default(),
        }
    }

    #[tokio::test]
    async fn definitions_round_trip_and_upsert() {
        let pool = memory_pool().await;
        run_pending(&pool).await.expect("migrate");
        let repository = SqlWorkflowRepository::new(pool);

        repository.save(definition("1.0.0")).await.expect("insert");
        repository.save(definition("1.1.0")).await.expect("update");

        let found =
            repository.find_by_name("outreach").await.expect("find").expect("present");
        assert_eq!(found.version, "1.1.0");
        assert_eq!(found.steps.len(), 1);

        let missing = repository.find_by_name("ghost").await.expect("find");
        assert!(missing.is_none());
    }
}
