use crate::commands::{block_on, CommandResult};
use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::lead::LeadStatus;
use leadflow_db::connect;
use leadflow_db::repositories::{LeadRepository, SqlLeadRepository};

pub fn run(status: Option<&str>) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "leads",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let status_filter = match status {
        Some(raw) => match raw.parse::<LeadStatus>() {
            Ok(parsed) => Some(parsed),
            Err(error) => {
                return CommandResult::failure("leads", "invalid_argument", error.to_string(), 2);
            }
        },
        None => None,
    };

    let result = block_on("leads", async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        let leads = SqlLeadRepository::new(pool.clone())
            .list(status_filter, None)
            .await
            .map_err(|error| ("query", error.to_string(), 5u8))?;
        pool.close().await;
        Ok(leads)
    });

    match result {
        Ok(leads) => {
            let mut lines = vec![format!("{} lead(s)", leads.len())];
            for lead in &leads {
                lines.push(format!(
                    "- {} {} [{}] approved={} blacklisted={} emails={} whatsapps={}",
                    lead.id,
                    lead.company,
                    lead.status.as_str(),
                    lead.approved,
                    lead.blacklisted,
                    lead.emails_sent,
                    lead.whatsapps_sent,
                ));
            }
            CommandResult::success("leads", lines.join("\n"))
        }
        Err(failure) => failure,
    }
}
