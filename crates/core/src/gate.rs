//! Human approval gate. A run parks here with a durable resumption token and
//! only an operator decision carrying that token moves it on.

use serde_json::{json, Value};

use crate::domain::lead::{Lead, LeadStatus};
use crate::domain::reply::{ApprovalSignal, Decision};
use crate::domain::run::{ResumptionToken, Run, RunStatus};
use crate::errors::{DomainError, StepError};

/// Prefix of the run-variable keys recording applied decisions. Keys are
/// scoped per gate step, so one gate's decision never satisfies another and
/// a workflow may hold several gates.
pub const DECISION_VARIABLE_PREFIX: &str = "approval_decision:";

/// Run-variable key for the decision applied at `gate_step`.
pub fn decision_variable(gate_step: &str) -> String {
    format!("{DECISION_VARIABLE_PREFIX}{gate_step}")
}

fn decision_record(decision: &str, token: &ResumptionToken) -> Value {
    json!({ "decision": decision, "token": token.0 })
}

/// Decision previously applied for `token`, if any.
fn recorded_decision<'a>(run: &'a Run, token: &ResumptionToken) -> Option<&'a str> {
    run.variables.iter().find_map(|(key, value)| {
        if !key.starts_with(DECISION_VARIABLE_PREFIX) {
            return None;
        }
        if value.get("token")?.as_str()? != token.0 {
            return None;
        }
        value.get("decision")?.as_str()
    })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// Approved. The run is back in `Running`, parked at the gate step so the
    /// interpreter resumes at its successor.
    Advanced,
    /// Rejected. The run is `Cancelled` and the lead marked `Rejected`.
    Terminated,
    /// The same decision was already applied; nothing changed.
    AlreadyApplied,
}

/// Park `run` at the gate step and move the lead to `AwaitingApproval`.
/// The caller persists both before surfacing the token.
pub fn park_at_gate(
    run: &mut Run,
    lead: &mut Lead,
    gate_step: &str,
) -> Result<ResumptionToken, DomainError> {
    let token = run.park(gate_step)?;
    // A lead that already cleared an earlier gate stays `Approved`; the
    // parked state lives on the run.
    if lead.status != LeadStatus::AwaitingApproval && lead.status != LeadStatus::Approved {
        lead.transition_to(LeadStatus::AwaitingApproval)?;
    }
    Ok(token)
}

/// Apply an operator decision to a parked run. Idempotent per token: a replay
/// of the applied decision is a no-op, any other mismatch is rejected with
/// `InvalidApprovalToken` and no state change.
pub fn apply_decision(
    run: &mut Run,
    lead: &mut Lead,
    signal: &ApprovalSignal,
) -> Result<GateOutcome, StepError> {
    if signal.run_id != run.id || signal.lead_id != lead.id {
        return Err(StepError::InvalidApprovalToken);
    }

    if let Some(recorded) = recorded_decision(run, &signal.token) {
        let replayed = match signal.decision {
            Decision::Approved => recorded == "approved",
            Decision::Rejected => recorded == "rejected",
        };
        return if replayed { Ok(GateOutcome::AlreadyApplied) } else {
            Err(StepError::InvalidApprovalToken)
        };
    }

    match &run.resumption_token {
        Some(token) if *token == signal.token => {}
        _ => return Err(StepError::InvalidApprovalToken),
    }

    // A parked run always carries its gate step.
    let gate_step = run.current_step.clone().ok_or(StepError::InvalidApprovalToken)?;

    match signal.decision {
        Decision::Approved => {
            if lead.status != LeadStatus::Approved {
                lead.transition_to(LeadStatus::Approved)
                    .map_err(|error| StepError::Fatal(error.to_string()))?;
            }
            lead.mark_approved();
            run.variables
                .insert(decision_variable(&gate_step), decision_record("approved", &signal.token));
            run.clear_token();
            run.transition_to(RunStatus::Running)
                .map_err(|error| StepError::Fatal(error.to_string()))?;
            Ok(GateOutcome::Advanced)
        }
        Decision::Rejected => {
            lead.transition_to(LeadStatus::Rejected)
                .map_err(|error| StepError::Fatal(error.to_string()))?;
            run.variables
                .insert(decision_variable(&gate_step), decision_record("rejected", &signal.token));
            run.clear_token();
            run.transition_to(RunStatus::Cancelled)
                .map_err(|error| StepError::Fatal(error.to_string()))?;
            Ok(GateOutcome::Terminated)
        }
    }
}
