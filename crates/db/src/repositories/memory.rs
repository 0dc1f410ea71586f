use std::collections::HashMap;

use chrono::NaiveDate;
use tokio::sync::RwLock;

use leadflow_core::domain::budget::{AccountId, ChannelBudget};
use leadflow_core::domain::lead::{Channel, Lead, LeadId, LeadStatus};
use leadflow_core::domain::reply::ReplyEvent;
use leadflow_core::domain::run::{ResumptionToken, Run, RunId, RunStatus};
use leadflow_core::domain::workflow::WorkflowDefinition;

use super::{
    BudgetRepository, LeadRepository, ReplyRepository, RepositoryError, RunRepository,
    WorkflowRepository,
};

#[derive(Default)]
pub struct InMemoryLeadRepository {
    leads: RwLock<HashMap<String, Lead>>,
}

#[async_trait::async_trait]
impl LeadRepository for InMemoryLeadRepository {
    async fn find_by_id(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        Ok(leads.get(&id.0).cloned())
    }

    async fn list(
        &self,
        status: Option<LeadStatus>,
        approved: Option<bool>,
    ) -> Result<Vec<Lead>, RepositoryError> {
        let leads = self.leads.read().await;
        let mut matching: Vec<Lead> = leads
            .values()
            .filter(|lead| status.map(|wanted| lead.status == wanted).unwrap_or(true))
            .filter(|lead| approved.map(|wanted| lead.approved == wanted).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn save(&self, lead: Lead) -> Result<(), RepositoryError> {
        let mut leads = self.leads.write().await;
        leads.insert(lead.id.0.clone(), lead);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,
}

#[async_trait::async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let definitions = self.definitions.read().await;
        Ok(definitions.get(name).cloned())
    }

    async fn save(&self, definition: WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut definitions = self.definitions.write().await;
        definitions.insert(definition.name.clone(), definition);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    runs: RwLock<HashMap<String, Run>>,
}

#[async_trait::async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn find_by_id(&self, id: &RunId) -> Result<Option<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.get(&id.0).cloned())
    }

    async fn find_by_token(
        &self,
        token: &ResumptionToken,
    ) -> Result<Option<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        Ok(runs.values().find(|run| run.resumption_token.as_ref() == Some(token)).cloned())
    }

    async fn list_by_status(&self, status: RunStatus) -> Result<Vec<Run>, RepositoryError> {
        let runs = self.runs.read().await;
        let mut matching: Vec<Run> =
            runs.values().filter(|run| run.status == status).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn save(&self, run: Run) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        let mut run = run;
        // The request flags belong to the setters; a save taken from a
        // stale copy must not clear a request that landed in between.
        if let Some(existing) = runs.get(&run.id.0) {
            run.cancel_requested = existing.cancel_requested;
            run.pause_requested = existing.pause_requested;
        }
        runs.insert(run.id.0.clone(), run);
        Ok(())
    }

    async fn set_pause_requested(
        &self,
        id: &RunId,
        value: bool,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(&id.0) {
            run.pause_requested = value;
        }
        Ok(())
    }

    async fn set_cancel_requested(
        &self,
        id: &RunId,
        value: bool,
    ) -> Result<(), RepositoryError> {
        let mut runs = self.runs.write().await;
        if let Some(run) = runs.get_mut(&id.0) {
            run.cancel_requested = value;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryBudgetRepository {
    budgets: RwLock<HashMap<(String, Channel), ChannelBudget>>,
}

#[async_trait::async_trait]
impl BudgetRepository for InMemoryBudgetRepository {
    async fn find(
        &self,
        account: &AccountId,
        channel: Channel,
    ) -> Result<Option<ChannelBudget>, RepositoryError> {
        let budgets = self.budgets.read().await;
        Ok(budgets.get(&(account.0.clone(), channel)).cloned())
    }

    async fn save(&self, budget: ChannelBudget) -> Result<(), RepositoryError> {
        let mut budgets = self.budgets.write().await;
        budgets.insert((budget.account.0.clone(), budget.channel), budget);
        Ok(())
    }

    async fn reset_all(&self, today: NaiveDate) -> Result<(), RepositoryError> {
        let mut budgets = self.budgets.write().await;
        for budget in budgets.values_mut() {
            budget.sent_today = 0;
            budget.window_day = today;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReplyRepository {
    events: RwLock<HashMap<String, ReplyEvent>>,
}

#[async_trait::async_trait]
impl ReplyRepository for InMemoryReplyRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<ReplyEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events.get(id).cloned())
    }

    async fn next_unconsumed(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<ReplyEvent>, RepositoryError> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|event| &event.lead_id == lead_id && !event.consumed)
            .min_by_key(|event| event.received_at)
            .cloned())
    }

    async fn save(&self, event: ReplyEvent) -> Result<(), RepositoryError> {
        let mut events = self.events.write().await;
        events.insert(event.id.clone(), event);
        Ok(())
    }
}
