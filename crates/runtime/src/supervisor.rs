//! Execution supervisor: owns run lifecycles end to end. Steps within a run
//! are strictly sequential; a failing step moves the run to `Failed` and
//! never takes the loop down with it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use leadflow_core::domain::budget::AccountId;
use leadflow_core::domain::lead::{Channel, Lead, LeadId, LeadStatus};
use leadflow_core::domain::reply::{ApprovalSignal, ReplyEvent};
use leadflow_core::domain::run::{AttemptOutcome, Run, RunId, RunStatus, StepAttempt};
use leadflow_core::domain::workflow::{OnFailure, Step, WorkflowDefinition};
use leadflow_core::errors::{DomainError, StepError};
use leadflow_core::gate::{self, GateOutcome};
use leadflow_core::graph::{Interpreter, NextStep};
use leadflow_db::repositories::{
    BudgetRepository, LeadRepository, ReplyRepository, RepositoryError, RunRepository,
    WorkflowRepository,
};

use crate::capability::{CapabilityKind, CapabilityRegistry};
use crate::dispatcher::ChannelDispatcher;
use crate::executor::StepExecutor;
use crate::router::{IntentRouter, RoutedReply};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("workflow `{0}` is not registered")]
    WorkflowNotFound(String),
    #[error("run `{0}` does not exist")]
    RunNotFound(RunId),
    #[error("lead `{0}` does not exist")]
    LeadNotFound(LeadId),
}

pub struct Supervisor {
    leads: Arc<dyn LeadRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    runs: Arc<dyn RunRepository>,
    replies: Arc<dyn ReplyRepository>,
    budgets: Arc<dyn BudgetRepository>,
    registry: CapabilityRegistry,
    executor: StepExecutor,
    interpreter: Interpreter,
    dispatcher: Arc<ChannelDispatcher>,
    router: IntentRouter,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        leads: Arc<dyn LeadRepository>,
        workflows: Arc<dyn WorkflowRepository>,
        runs: Arc<dyn RunRepository>,
        replies: Arc<dyn ReplyRepository>,
        budgets: Arc<dyn BudgetRepository>,
        registry: CapabilityRegistry,
        interpreter: Interpreter,
        dispatcher: Arc<ChannelDispatcher>,
        router: IntentRouter,
    ) -> Self {
        Self {
            leads,
            workflows,
            runs,
            replies,
            budgets,
            registry,
            executor: StepExecutor::new(),
            interpreter,
            dispatcher,
            router,
        }
    }

    /// Create a run for `lead_id`. Blacklisted leads are rejected here,
    /// before any step executes; so are definitions that fail validation or
    /// reference unregistered capabilities.
    pub async fn start(
        &self,
        workflow: &str,
        lead_id: &LeadId,
        input: Map<String, Value>,
    ) -> Result<RunId, RuntimeError> {
        let lead = self.load_lead(lead_id).await?;
        if lead.blacklisted {
            return Err(StepError::LeadBlacklisted(lead.id).into());
        }

        let definition = self
            .workflows
            .find_by_name(workflow)
            .await?
            .ok_or_else(|| RuntimeError::WorkflowNotFound(workflow.to_string()))?;

        let violations = definition.validate();
        if !violations.is_empty() {
            return Err(DomainError::InvalidDefinition(violations.join("; ")).into());
        }
        let missing = self.registry.missing_capabilities(&definition);
        if !missing.is_empty() {
            return Err(DomainError::InvalidDefinition(format!(
                "unregistered capabilities: {}",
                missing.join(", ")
            ))
            .into());
        }

        let mut variables = definition.variables.clone();
        variables.extend(input);

        let run = Run::new(definition.name.clone(), lead.id, variables);
        let run_id = run.id.clone();
        self.runs.save(run).await?;

        info!(run = %run_id, workflow, lead = %lead_id, "run created");
        Ok(run_id)
    }

    /// Advance the run until it completes, fails, parks at a gate, or a
    /// cooperative pause/cancel request lands. Safe to call again on a run
    /// that resumed.
    pub async fn drive(&self, run_id: &RunId) -> Result<RunStatus, RuntimeError> {
        let mut run = self.load_run(run_id).await?;
        let definition = self
            .workflows
            .find_by_name(&run.workflow)
            .await?
            .ok_or_else(|| RuntimeError::WorkflowNotFound(run.workflow.clone()))?;

        if run.status == RunStatus::Pending {
            run.transition_to(RunStatus::Running)?;
            self.runs.save(run.clone()).await?;
        }

        while run.status == RunStatus::Running {
            // Pause/cancel flags are set externally; pick them up at every
            // step boundary.
            if let Some(stored) = self.runs.find_by_id(&run.id).await? {
                run.cancel_requested = stored.cancel_requested;
                run.pause_requested = stored.pause_requested;
            }
            if run.cancel_requested {
                run.transition_to(RunStatus::Cancelled)?;
                self.runs.save(run.clone()).await?;
                info!(run = %run.id, "run cancelled");
                break;
            }
            if run.pause_requested {
                // The flag column is owned by the repository setters; a
                // full-row save never writes it.
                self.runs.set_pause_requested(&run.id, false).await?;
                run.pause_requested = false;
                run.transition_to(RunStatus::Paused)?;
                self.runs.save(run.clone()).await?;
                info!(run = %run.id, "run paused");
                break;
            }

            let step_name = match self.interpreter.next_step(&definition, &run) {
                NextStep::Completed => {
                    run.current_step = None;
                    run.transition_to(RunStatus::Completed)?;
                    self.runs.save(run.clone()).await?;
                    info!(run = %run.id, "run completed");
                    break;
                }
                NextStep::Step(name) => name,
            };

            let step = match definition.step(&step_name) {
                Some(step) => step.clone(),
                None => {
                    self.fail_run(&mut run, format!("unknown step `{step_name}`")).await?;
                    break;
                }
            };

            if let Err(error) = self.interpreter.record_visit(&mut run, &step_name) {
                self.fail_run(&mut run, error.to_string()).await?;
                break;
            }
            run.current_step = Some(step_name.clone());

            // A gate parks every time the interpreter lands on it; after an
            // approval the interpreter resumes at the successor, so landing
            // here again means the gate was re-entered and needs a fresh
            // decision.
            if step.requires_human_approval {
                let mut lead = self.load_lead(&run.lead_id).await?;
                let token = gate::park_at_gate(&mut run, &mut lead, &step_name)?;
                self.leads.save(lead).await?;
                self.runs.save(run.clone()).await?;
                info!(run = %run.id, step = %step_name, token = %token, "run awaiting approval");
                break;
            }

            match self.execute_step(&step, &definition, &mut run).await {
                Ok(output) => {
                    // A cancellation that landed mid-step discards the
                    // step's result; nothing beyond the step's own atomic
                    // side effect is committed.
                    if let Some(stored) = self.runs.find_by_id(&run.id).await? {
                        if stored.cancel_requested {
                            run.cancel_requested = true;
                            run.transition_to(RunStatus::Cancelled)?;
                            self.runs.save(run.clone()).await?;
                            info!(run = %run.id, "run cancelled; in-flight step result discarded");
                            break;
                        }
                    }
                    run.variables.insert(step.name.clone(), output);
                    if let Err(error) = self.advance_lead_status(&step, &run.lead_id).await {
                        self.fail_run(&mut run, error.to_string()).await?;
                        break;
                    }
                    self.runs.save(run.clone()).await?;
                }
                Err(error @ (StepError::GraphExhausted { .. } | StepError::LeadBlacklisted(_))) => {
                    self.fail_run(&mut run, error.to_string()).await?;
                    break;
                }
                Err(error) => match step.on_failure {
                    OnFailure::Stop => {
                        self.fail_run(&mut run, error.to_string()).await?;
                        break;
                    }
                    OnFailure::Skip => {
                        let now = Utc::now();
                        run.record_attempt(StepAttempt {
                            step: step.name.clone(),
                            attempt: 0,
                            outcome: AttemptOutcome::Skipped {
                                class: error.class().to_string(),
                                message: error.to_string(),
                            },
                            started_at: now,
                            finished_at: now,
                        });
                        run.last_error = Some(error.to_string());
                        warn!(run = %run.id, step = %step.name, "step skipped after failure: {error}");
                        self.runs.save(run.clone()).await?;
                    }
                    OnFailure::Continue => {
                        run.last_error = Some(error.to_string());
                        warn!(run = %run.id, step = %step.name, "step failure ignored: {error}");
                        self.runs.save(run.clone()).await?;
                    }
                },
            }
        }

        Ok(run.status)
    }

    async fn execute_step(
        &self,
        step: &Step,
        definition: &WorkflowDefinition,
        run: &mut Run,
    ) -> Result<Value, StepError> {
        let capability = self
            .registry
            .get(&step.capability)
            .ok_or_else(|| StepError::Fatal(format!("capability `{}` vanished", step.capability)))?;

        let input = json!({
            "lead_id": run.lead_id.0,
            "config": step.config,
            "variables": run.variables,
        });

        if capability.kind() == CapabilityKind::Send {
            let account = AccountId(
                step.config
                    .get("account")
                    .and_then(|value| value.as_str())
                    .unwrap_or("primary")
                    .to_string(),
            );
            let channel = step
                .config
                .get("channel")
                .and_then(|value| value.as_str())
                .ok_or_else(|| {
                    StepError::Fatal(format!("send step `{}` missing channel config", step.name))
                })?
                .parse::<Channel>()
                .map_err(|error| StepError::Fatal(error.to_string()))?;
            let lead_id = run.lead_id.clone();
            let dispatcher = self.dispatcher.clone();

            self.executor
                .execute(step, &definition.defaults, run, || {
                    dispatcher.dispatch(
                        &account,
                        channel,
                        &lead_id,
                        capability.clone(),
                        input.clone(),
                    )
                })
                .await
        } else {
            self.executor
                .execute(step, &definition.defaults, run, || {
                    let capability = capability.clone();
                    let input = input.clone();
                    async move { capability.invoke(input).await.map_err(StepError::from) }
                })
                .await
        }
    }

    /// Steps declare the lead status they advance to through a
    /// `lead_status` config key; a step without one leaves the lead alone.
    async fn advance_lead_status(
        &self,
        step: &Step,
        lead_id: &LeadId,
    ) -> Result<(), RuntimeError> {
        let Some(raw) = step.config.get("lead_status").and_then(|value| value.as_str()) else {
            return Ok(());
        };
        let next = raw.parse::<LeadStatus>()?;

        let mut lead = self.load_lead(lead_id).await?;
        if lead.status == next {
            return Ok(());
        }
        lead.transition_to(next)?;
        self.leads.save(lead).await?;
        Ok(())
    }

    async fn fail_run(&self, run: &mut Run, error: String) -> Result<(), RuntimeError> {
        warn!(run = %run.id, "run failed: {error}");
        run.fail(error)?;
        self.runs.save(run.clone()).await?;
        Ok(())
    }

    /// Request a cooperative pause; takes effect at the next step boundary.
    /// The flag goes through a dedicated repository update so a concurrent
    /// full-row save from the drive loop cannot lose it.
    pub async fn pause(&self, run_id: &RunId) -> Result<(), RuntimeError> {
        let run = self.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Err(DomainError::InvalidRunTransition {
                from: run.status,
                to: RunStatus::Paused,
            }
            .into());
        }
        self.runs.set_pause_requested(&run.id, true).await?;
        Ok(())
    }

    /// Resume a paused run and drive it forward. Runs parked at an approval
    /// gate resume through `apply_approval`, not here.
    pub async fn resume(&self, run_id: &RunId) -> Result<RunStatus, RuntimeError> {
        let mut run = self.load_run(run_id).await?;
        if run.resumption_token.is_some() {
            return Err(StepError::Fatal(
                "run is awaiting an approval decision".to_string(),
            )
            .into());
        }
        run.transition_to(RunStatus::Running)?;
        self.runs.save(run).await?;
        self.drive(run_id).await
    }

    /// Request cancellation. A pending run cancels immediately; a running
    /// one stops at the next step boundary, discarding any in-flight result.
    pub async fn cancel(&self, run_id: &RunId) -> Result<(), RuntimeError> {
        let mut run = self.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(());
        }
        self.runs.set_cancel_requested(&run.id, true).await?;
        if run.status == RunStatus::Pending {
            run.transition_to(RunStatus::Cancelled)?;
            self.runs.save(run).await?;
        }
        Ok(())
    }

    /// Apply an operator decision to a parked run and, on approval, drive
    /// the run onward from the gate.
    pub async fn apply_approval(
        &self,
        signal: &ApprovalSignal,
    ) -> Result<GateOutcome, RuntimeError> {
        let mut run = self.load_run(&signal.run_id).await?;
        let mut lead = self.load_lead(&signal.lead_id).await?;

        let outcome = gate::apply_decision(&mut run, &mut lead, signal)?;
        self.leads.save(lead).await?;
        self.runs.save(run.clone()).await?;

        if outcome == GateOutcome::Advanced {
            self.drive(&run.id).await?;
        }
        Ok(outcome)
    }

    /// Record an inbound reply and route it immediately.
    pub async fn ingest_reply(
        &self,
        lead_id: &LeadId,
        channel: Channel,
        raw_text: &str,
        received_at: DateTime<Utc>,
    ) -> Result<Option<RoutedReply>, RuntimeError> {
        let event = ReplyEvent::new(lead_id.clone(), channel, raw_text, received_at);
        self.replies.save(event).await?;
        Ok(self.router.route_next(lead_id).await?)
    }

    pub async fn reset_daily_budgets(&self) -> Result<(), RuntimeError> {
        self.budgets.reset_all(Utc::now().date_naive()).await?;
        info!("daily channel budgets reset");
        Ok(())
    }

    pub async fn paused_runs(&self) -> Result<Vec<Run>, RuntimeError> {
        Ok(self.runs.list_by_status(RunStatus::Paused).await?)
    }

    pub async fn failed_runs(&self) -> Result<Vec<Run>, RuntimeError> {
        Ok(self.runs.list_by_status(RunStatus::Failed).await?)
    }

    async fn load_run(&self, run_id: &RunId) -> Result<Run, RuntimeError> {
        self.runs
            .find_by_id(run_id)
            .await?
            .ok_or_else(|| RuntimeError::RunNotFound(run_id.clone()))
    }

    async fn load_lead(&self, lead_id: &LeadId) -> Result<Lead, RuntimeError> {
        self.leads
            .find_by_id(lead_id)
            .await?
            .ok_or_else(|| RuntimeError::LeadNotFound(lead_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::{json, Map, Value};

    use leadflow_core::domain::lead::{Channel, Contact, Lead, LeadId, LeadStatus};
    use leadflow_core::domain::reply::{ApprovalSignal, Decision};
    use leadflow_core::domain::run::{AttemptOutcome, RunStatus};
    use leadflow_core::domain::workflow::{
        Guard, OnFailure, RetrySettings, RetryStrategy, Step, Transition, WorkflowDefaults,
        WorkflowDefinition,
    };
    use leadflow_core::errors::StepError;
    use leadflow_core::gate::GateOutcome;
    use leadflow_core::graph::Interpreter;
    use leadflow_core::intent::Intent;
    use leadflow_db::repositories::{
        InMemoryBudgetRepository, InMemoryLeadRepository, InMemoryReplyRepository,
        InMemoryRunRepository, InMemoryWorkflowRepository, LeadRepository, RunRepository,
        WorkflowRepository,
    };

    use super::{RuntimeError, Supervisor};
    use crate::capability::{Capability, CapabilityError, CapabilityKind, CapabilityRegistry};
    use crate::dispatcher::ChannelDispatcher;
    use crate::router::{IntentRouter, TracingNotifier};

    struct StaticAction {
        name: &'static str,
        output: Value,
    }

    #[async_trait::async_trait]
    impl Capability for StaticAction {
        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Action
        }

        async fn invoke(&self, _input: Value) -> Result<Value, CapabilityError> {
            Ok(self.output.clone())
        }
    }

    struct BrokenAction;

    #[async_trait::async_trait]
    impl Capability for BrokenAction {
        fn name(&self) -> &str {
            "broken_enrich"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Action
        }

        async fn invoke(&self, _input: Value) -> Result<Value, CapabilityError> {
            Err(CapabilityError::Fatal("upstream rejected the request".to_string()))
        }
    }

    struct CountingSender {
        sends: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Capability for CountingSender {
        fn name(&self) -> &str {
            "send_email"
        }

        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Send
        }

        async fn invoke(&self, _input: Value) -> Result<Value, CapabilityError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"delivered": true}))
        }
    }

    struct Harness {
        supervisor: Supervisor,
        leads: Arc<InMemoryLeadRepository>,
        workflows: Arc<InMemoryWorkflowRepository>,
        runs: Arc<InMemoryRunRepository>,
        sends: Arc<AtomicU32>,
    }

    async fn harness(daily_cap: u32, max_step_visits: u32) -> Harness {
        let leads = Arc::new(InMemoryLeadRepository::default());
        let workflows = Arc::new(InMemoryWorkflowRepository::default());
        let runs = Arc::new(InMemoryRunRepository::default());
        let replies = Arc::new(InMemoryReplyRepository::default());
        let budgets = Arc::new(InMemoryBudgetRepository::default());
        let sends = Arc::new(AtomicU32::new(0));

        let mut registry = CapabilityRegistry::default();
        registry.register(StaticAction {
            name: "mine_context",
            output: json!({"summary": "industrial pump maker"}),
        });
        registry.register(StaticAction {
            name: "draft_message",
            output: json!({"draft": "SUBJECT: intro"}),
        });
        registry.register(StaticAction { name: "hold_for_approval", output: json!({}) });
        registry.register(BrokenAction);
        registry.register(CountingSender { sends: sends.clone() });

        let dispatcher = Arc::new(ChannelDispatcher::new(
            leads.clone(),
            budgets.clone(),
            daily_cap,
            Duration::ZERO,
            Duration::ZERO,
        ));
        let router = IntentRouter::new(
            leads.clone(),
            replies.clone(),
            None,
            None,
            Arc::new(TracingNotifier),
        );
        let supervisor = Supervisor::new(
            leads.clone(),
            workflows.clone(),
            runs.clone(),
            replies,
            budgets,
            registry,
            Interpreter::new(max_step_visits),
            dispatcher,
            router,
        );

        Harness { supervisor, leads, workflows, runs, sends }
    }

    fn action_step(name: &str, capability: &str, lead_status: Option<&str>) -> Step {
        let mut config = Map::new();
        if let Some(status) = lead_status {
            config.insert("lead_status".to_string(), json!(status));
        }
        Step {
            name: name.to_string(),
            capability: capability.to_string(),
            config,
            retry: None,
            timeout_secs: None,
            on_failure: OnFailure::default(),
            requires_human_approval: false,
        }
    }

    fn send_step(lead_status: Option<&str>) -> Step {
        let mut config = Map::new();
        config.insert("account".to_string(), json!("outbox-1"));
        config.insert("channel".to_string(), json!("email"));
        if let Some(status) = lead_status {
            config.insert("lead_status".to_string(), json!(status));
        }
        Step {
            name: "send".to_string(),
            capability: "send_email".to_string(),
            config,
            retry: Some(RetrySettings {
                strategy: RetryStrategy::Linear,
                max_attempts: 1,
                base_delay_ms: 0,
                max_delay_ms: 0,
            }),
            timeout_secs: None,
            on_failure: OnFailure::default(),
            requires_human_approval: false,
        }
    }

    fn outreach_definition() -> WorkflowDefinition {
        let mut gate = action_step("approval_gate", "hold_for_approval", None);
        gate.requires_human_approval = true;

        WorkflowDefinition {
            name: "outreach".to_string(),
            version: "1.0.0".to_string(),
            steps: vec![
                action_step("mine", "mine_context", Some("mined")),
                action_step("draft", "draft_message", Some("drafted")),
                gate,
                send_step(Some("emailed")),
            ],
            transitions: Vec::new(),
            variables: Map::new(),
            defaults: WorkflowDefaults::default(),
        }
    }

    fn double_gate_definition() -> WorkflowDefinition {
        let mut qualify = action_step("qualify_gate", "hold_for_approval", None);
        qualify.requires_human_approval = true;
        let mut send_gate = action_step("send_gate", "hold_for_approval", None);
        send_gate.requires_human_approval = true;

        WorkflowDefinition {
            name: "double_gate".to_string(),
            version: "1.0.0".to_string(),
            steps: vec![
                action_step("mine", "mine_context", Some("mined")),
                action_step("draft", "draft_message", Some("drafted")),
                qualify,
                send_gate,
                send_step(Some("emailed")),
            ],
            transitions: Vec::new(),
            variables: Map::new(),
            defaults: WorkflowDefaults::default(),
        }
    }

    fn blast_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            name: "blast".to_string(),
            version: "1.0.0".to_string(),
            steps: vec![send_step(None)],
            transitions: Vec::new(),
            variables: Map::new(),
            defaults: WorkflowDefaults::default(),
        }
    }

    async fn seed_lead(harness: &Harness, id: &str, status: LeadStatus) -> LeadId {
        let mut lead = Lead::new(LeadId(id.to_string()), "Acme Pumps", Contact::default());
        lead.status = status;
        let lead_id = lead.id.clone();
        harness.leads.save(lead).await.expect("save lead");
        lead_id
    }

    #[tokio::test(start_paused = true)]
    async fn approved_run_sends_and_a_buying_reply_books_a_meeting() {
        let harness = harness(10, 8).await;
        harness.workflows.save(outreach_definition()).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;

        let run_id =
            harness.supervisor.start("outreach", &lead_id, Map::new()).await.expect("start");
        let status = harness.supervisor.drive(&run_id).await.expect("drive");
        assert_eq!(status, RunStatus::Paused);

        let parked = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        let token = parked.resumption_token.clone().expect("token issued");
        let lead = harness.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert_eq!(lead.status, LeadStatus::AwaitingApproval);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 0, "nothing sent before approval");

        let outcome = harness
            .supervisor
            .apply_approval(&ApprovalSignal {
                lead_id: lead_id.clone(),
                run_id: run_id.clone(),
                token,
                decision: Decision::Approved,
            })
            .await
            .expect("approve");
        assert_eq!(outcome, GateOutcome::Advanced);

        let finished = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 1);
        let lead = harness.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert_eq!(lead.status, LeadStatus::Emailed);
        assert_eq!(lead.emails_sent, 1);

        let routed = harness
            .supervisor
            .ingest_reply(&lead_id, Channel::Email, "great, can we set up a call?", Utc::now())
            .await
            .expect("ingest")
            .expect("routed");
        assert_eq!(routed.intent, Intent::HighIntent);
        let lead = harness.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert_eq!(lead.status, LeadStatus::MeetingBooked);
    }

    #[tokio::test(start_paused = true)]
    async fn every_approval_gate_parks_until_its_own_decision() {
        let harness = harness(10, 8).await;
        harness.workflows.save(double_gate_definition()).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;

        let run_id =
            harness.supervisor.start("double_gate", &lead_id, Map::new()).await.expect("start");
        assert_eq!(harness.supervisor.drive(&run_id).await.expect("drive"), RunStatus::Paused);

        let first = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert_eq!(first.current_step.as_deref(), Some("qualify_gate"));
        let first_token = first.resumption_token.clone().expect("token issued");

        harness
            .supervisor
            .apply_approval(&ApprovalSignal {
                lead_id: lead_id.clone(),
                run_id: run_id.clone(),
                token: first_token.clone(),
                decision: Decision::Approved,
            })
            .await
            .expect("first approval");

        let second = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert_eq!(second.status, RunStatus::Paused, "the second gate parks the run again");
        assert_eq!(second.current_step.as_deref(), Some("send_gate"));
        let second_token = second.resumption_token.clone().expect("fresh token issued");
        assert_ne!(first_token, second_token);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 0, "nothing sent between the gates");

        harness
            .supervisor
            .apply_approval(&ApprovalSignal {
                lead_id: lead_id.clone(),
                run_id: run_id.clone(),
                token: second_token,
                decision: Decision::Approved,
            })
            .await
            .expect("second approval");

        let finished = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert_eq!(finished.status, RunStatus::Completed);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_reply_blacklists_and_blocks_future_runs() {
        let harness = harness(10, 8).await;
        harness.workflows.save(outreach_definition()).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Emailed).await;

        let routed = harness
            .supervisor
            .ingest_reply(&lead_id, Channel::Email, "not interested, please remove me", Utc::now())
            .await
            .expect("ingest")
            .expect("routed");
        assert_eq!(routed.intent, Intent::Reject);

        let lead = harness.leads.find_by_id(&lead_id).await.expect("find").expect("present");
        assert!(lead.blacklisted);

        let error = harness
            .supervisor
            .start("outreach", &lead_id, Map::new())
            .await
            .expect_err("blacklisted leads never start");
        assert!(matches!(error, RuntimeError::Step(StepError::LeadBlacklisted(_))));
        assert_eq!(harness.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_account_cap_fails_the_second_run() {
        let harness = harness(1, 8).await;
        harness.workflows.save(blast_definition()).await.expect("save workflow");
        let first = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;
        let second = seed_lead(&harness, "L-2", LeadStatus::Scouted).await;

        let run_one = harness.supervisor.start("blast", &first, Map::new()).await.expect("start");
        assert_eq!(harness.supervisor.drive(&run_one).await.expect("drive"), RunStatus::Completed);

        let run_two = harness.supervisor.start("blast", &second, Map::new()).await.expect("start");
        assert_eq!(harness.supervisor.drive(&run_two).await.expect("drive"), RunStatus::Failed);

        assert_eq!(harness.sends.load(Ordering::SeqCst), 1, "the cap admits exactly one send");
        let failed = harness.runs.find_by_id(&run_two).await.expect("find").expect("present");
        assert!(failed.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_request_takes_effect_at_the_step_boundary() {
        let harness = harness(10, 8).await;
        harness.workflows.save(blast_definition()).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;

        let run_id = harness.supervisor.start("blast", &lead_id, Map::new()).await.expect("start");
        harness.supervisor.pause(&run_id).await.expect("pause");

        assert_eq!(harness.supervisor.drive(&run_id).await.expect("drive"), RunStatus::Paused);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 0, "no step ran before the pause");

        assert_eq!(harness.supervisor.resume(&run_id).await.expect("resume"), RunStatus::Completed);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_pending_run_never_executes_a_step() {
        let harness = harness(10, 8).await;
        harness.workflows.save(blast_definition()).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;

        let run_id = harness.supervisor.start("blast", &lead_id, Map::new()).await.expect("start");
        harness.supervisor.cancel(&run_id).await.expect("cancel");

        let run = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(harness.supervisor.drive(&run_id).await.expect("drive"), RunStatus::Cancelled);
        assert_eq!(harness.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cycling_graph_trips_the_visit_cap_and_fails_the_run() {
        let harness = harness(10, 2).await;
        let definition = WorkflowDefinition {
            name: "loop".to_string(),
            version: "1.0.0".to_string(),
            steps: vec![action_step("ping", "mine_context", None)],
            transitions: vec![Transition {
                from: "ping".to_string(),
                to: "ping".to_string(),
                guard: Guard::Always,
            }],
            variables: Map::new(),
            defaults: WorkflowDefaults::default(),
        };
        harness.workflows.save(definition).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;

        let run_id = harness.supervisor.start("loop", &lead_id, Map::new()).await.expect("start");
        assert_eq!(harness.supervisor.drive(&run_id).await.expect("drive"), RunStatus::Failed);

        let run = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert!(run.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_on_failure_advances_past_the_failing_step() {
        let harness = harness(10, 8).await;
        let mut flaky = action_step("enrich", "broken_enrich", None);
        flaky.on_failure = OnFailure::Skip;
        flaky.retry = Some(RetrySettings {
            strategy: RetryStrategy::Linear,
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
        });
        let definition = WorkflowDefinition {
            name: "tolerant".to_string(),
            version: "1.0.0".to_string(),
            steps: vec![flaky, action_step("mine", "mine_context", None)],
            transitions: Vec::new(),
            variables: Map::new(),
            defaults: WorkflowDefaults::default(),
        };
        harness.workflows.save(definition).await.expect("save workflow");
        let lead_id = seed_lead(&harness, "L-1", LeadStatus::Scouted).await;

        let run_id =
            harness.supervisor.start("tolerant", &lead_id, Map::new()).await.expect("start");
        assert_eq!(harness.supervisor.drive(&run_id).await.expect("drive"), RunStatus::Completed);

        let run = harness.runs.find_by_id(&run_id).await.expect("find").expect("present");
        assert!(run
            .history
            .iter()
            .any(|attempt| matches!(attempt.outcome, AttemptOutcome::Skipped { .. })));
        assert!(run.variables.contains_key("mine"));
        assert!(run.last_error.is_some());
    }
}
