use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::lead::LeadId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque handle issued when a run parks at an approval gate. The decision
/// must carry it back; anything else is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumptionToken(pub String);

impl ResumptionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ResumptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::InvariantViolation(format!("unknown run status `{other}`"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AttemptOutcome {
    Succeeded,
    Failed { class: String, message: String },
    Skipped { class: String, message: String },
}

/// One executed attempt of one step, appended to run history in order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepAttempt {
    pub step: String,
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub workflow: String,
    pub lead_id: LeadId,
    pub status: RunStatus,
    /// Step the run is positioned at. `None` once the graph completed.
    pub current_step: Option<String>,
    pub variables: Map<String, Value>,
    pub history: Vec<StepAttempt>,
    /// Per-step visit counts for runaway-graph detection.
    pub step_visits: HashMap<String, u32>,
    pub resumption_token: Option<ResumptionToken>,
    pub last_error: Option<String>,
    pub cancel_requested: bool,
    pub pause_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(workflow: impl Into<String>, lead_id: LeadId, variables: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: RunId::generate(),
            workflow: workflow.into(),
            lead_id,
            status: RunStatus::Pending,
            current_step: None,
            variables,
            history: Vec::new(),
            step_visits: HashMap::new(),
            resumption_token: None,
            last_error: None,
            cancel_requested: false,
            pause_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::{Cancelled, Completed, Failed, Paused, Pending, Running};

        matches!(
            (self.status, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }

    pub fn transition_to(&mut self, next: RunStatus) -> Result<(), DomainError> {
        if self.can_transition_to(next) {
            self.status = next;
            self.updated_at = Utc::now();
            return Ok(());
        }

        Err(DomainError::InvalidRunTransition { from: self.status, to: next })
    }

    pub fn record_attempt(&mut self, attempt: StepAttempt) {
        self.history.push(attempt);
        self.updated_at = Utc::now();
    }

    /// Park the run at an approval gate. Issues a fresh token; the caller
    /// persists the run before surfacing the token to operators.
    pub fn park(&mut self, at_step: &str) -> Result<ResumptionToken, DomainError> {
        self.transition_to(RunStatus::Paused)?;
        self.current_step = Some(at_step.to_string());
        let token = ResumptionToken::generate();
        self.resumption_token = Some(token.clone());
        Ok(token)
    }

    /// Consumed exactly once when a decision is applied.
    pub fn clear_token(&mut self) {
        self.resumption_token = None;
        self.updated_at = Utc::now();
    }

    pub fn visit_count(&self, step: &str) -> u32 {
        self.step_visits.get(step).copied().unwrap_or(0)
    }

    pub fn fail(&mut self, error: String) -> Result<(), DomainError> {
        self.last_error = Some(error);
        self.transition_to(RunStatus::Failed)
    }
}
