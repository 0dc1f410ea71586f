use crate::commands::{block_on, CommandResult};
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::lead::LeadId;
use leadflow_core::domain::reply::{ApprovalSignal, Decision};
use leadflow_core::domain::run::{ResumptionToken, RunId};
use leadflow_core::errors::StepError;
use leadflow_core::gate::{self, GateOutcome};
use leadflow_db::connect;
use leadflow_db::repositories::{
    LeadRepository, RunRepository, SqlLeadRepository, SqlRunRepository,
};

/// Apply the operator's decision to a parked run. The supervisor picks the
/// approved run up on its next sweep of resumable work.
pub fn run(lead: &str, run_id: &str, token: &str, reject: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "approve",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let signal = ApprovalSignal {
        lead_id: LeadId(lead.to_string()),
        run_id: RunId(run_id.to_string()),
        token: ResumptionToken(token.to_string()),
        decision: if reject { Decision::Rejected } else { Decision::Approved },
    };

    let result = block_on("approve", async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let leads = SqlLeadRepository::new(pool.clone());
        let runs = SqlRunRepository::new(pool.clone());

        let mut run = runs
            .find_by_id(&signal.run_id)
            .await
            .map_err(|error| ("query", error.to_string(), 5u8))?
            .ok_or_else(|| ("not_found", format!("run `{}` does not exist", signal.run_id), 5u8))?;
        let mut lead = leads
            .find_by_id(&signal.lead_id)
            .await
            .map_err(|error| ("query", error.to_string(), 5u8))?
            .ok_or_else(|| {
                ("not_found", format!("lead `{}` does not exist", signal.lead_id), 5u8)
            })?;

        let outcome = gate::apply_decision(&mut run, &mut lead, &signal).map_err(|error| {
            let class = match error {
                StepError::InvalidApprovalToken => "invalid_token",
                _ => "decision",
            };
            (class, error.to_string(), 6u8)
        })?;

        leads.save(lead).await.map_err(|error| ("query", error.to_string(), 5u8))?;
        runs.save(run).await.map_err(|error| ("query", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(outcome)
    });

    match result {
        Ok(GateOutcome::Advanced) => {
            CommandResult::success("approve", "decision applied; run resumes at the next sweep")
        }
        Ok(GateOutcome::Terminated) => {
            CommandResult::success("approve", "rejection applied; run cancelled")
        }
        Ok(GateOutcome::AlreadyApplied) => {
            CommandResult::success("approve", "decision was already applied; nothing changed")
        }
        Err(failure) => failure,
    }
}
