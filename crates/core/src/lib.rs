pub mod config;
pub mod domain;
pub mod errors;
pub mod gate;
pub mod graph;
pub mod intent;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::budget::{AccountId, ChannelBudget};
pub use domain::lead::{Channel, Contact, DraftMessage, Lead, LeadId, LeadStatus};
pub use domain::reply::{ApprovalSignal, Decision, ReplyEvent};
pub use domain::run::{
    AttemptOutcome, ResumptionToken, Run, RunId, RunStatus, StepAttempt,
};
pub use domain::workflow::{
    Guard, OnFailure, RetrySettings, RetryStrategy, Step, Transition, WorkflowDefaults,
    WorkflowDefinition, END_STEP,
};
pub use errors::{DomainError, StepError};
pub use gate::{apply_decision, decision_variable, park_at_gate, GateOutcome};
pub use graph::{Interpreter, NextStep};
pub use intent::{apply_intent, Intent, IntentAction, KeywordClassifier};
