use crate::commands::{block_on, CommandResult};
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::run::RunStatus;
use leadflow_db::connect;
use leadflow_db::repositories::{RunRepository, SqlRunRepository};

pub fn run(status: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "runs",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let status = match status.parse::<RunStatus>() {
        Ok(parsed) => parsed,
        Err(error) => {
            return CommandResult::failure("runs", "invalid_argument", error.to_string(), 2);
        }
    };

    let result = block_on("runs", async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let runs = SqlRunRepository::new(pool.clone())
            .list_by_status(status)
            .await
            .map_err(|error| ("query", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(runs)
    });

    match result {
        Ok(runs) => {
            let mut lines = vec![format!("{} {} run(s)", runs.len(), status.as_str())];
            for run in &runs {
                lines.push(format!(
                    "- {} workflow={} lead={} step={} awaiting_decision={}{}",
                    run.id,
                    run.workflow,
                    run.lead_id,
                    run.current_step.as_deref().unwrap_or("-"),
                    run.resumption_token.is_some(),
                    run.last_error
                        .as_deref()
                        .map(|error| format!(" last_error={error:?}"))
                        .unwrap_or_default(),
                ));
            }
            CommandResult::success("runs", lines.join("\n"))
        }
        Err(failure) => failure,
    }
}
