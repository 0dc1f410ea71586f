use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use leadflow_core::domain::budget::{AccountId, ChannelBudget};
use leadflow_core::domain::lead::{Channel, Lead, LeadId, LeadStatus};
use leadflow_core::domain::reply::ReplyEvent;
use leadflow_core::domain::run::{ResumptionToken, Run, RunId, RunStatus};
use leadflow_core::domain::workflow::WorkflowDefinition;

pub mod budget;
pub mod lead;
pub mod memory;
pub mod reply;
pub mod run;
pub mod workflow;

pub use budget::SqlBudgetRepository;
pub use lead::SqlLeadRepository;
pub use memory::{
    InMemoryBudgetRepository, InMemoryLeadRepository, InMemoryReplyRepository,
    InMemoryRunRepository, InMemoryWorkflowRepository,
};
pub use reply::SqlReplyRepository;
pub use run::SqlRunRepository;
pub use workflow::SqlWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

#[async_trait]
pub trait LeadRepository: Send + Sync {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    async fn list(
        &self,
        status: Option<LeadStatus>,
        approved: Option<bool>,
    ) -> Result<Vec<Lead>, RepositoryError>;
    async fn save(&self, lead: Lead) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError>;
    async fn save(&self, definition: WorkflowDefinition) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError>;
    async fn find_by_token(
        &self,
        token: &ResumptionToken,
    ) -> Result<Option<Run>, RepositoryError>;
    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<Run>, RepositoryError>;
    /// Persist a full row. The pause/cancel request flags are excluded: they
    /// belong to the dedicated setters below, so a save taken from a stale
    /// copy never clears a request that landed in between.
    async fn save(&self, run: Run) -> Result<(), RepositoryError>;
    async fn set_pause_requested(&self, id: &RunId, value: bool)
        -> Result<(), RepositoryError>;
    async fn set_cancel_requested(
        &self,
        id: &RunId,
        value: bool,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait BudgetRepository: Send + Sync {
    async fn find(
        &self,
        account: &AccountId,
        channel: Channel,
    ) -> Result<Option<ChannelBudget>, RepositoryError>;
    async fn save(&self, budget: ChannelBudget) -> Result<(), RepositoryError>;
    /// Zero every counter and move the window to `today`.
    async fn reset_all(&self, today: NaiveDate) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ReplyRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<ReplyEvent>, RepositoryError>;
    async fn next_unconsumed(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<ReplyEvent>, RepositoryError>;
    async fn save(&self, event: ReplyEvent) -> Result<(), RepositoryError>;
}
