use leadflow_core::config::{AppConfig, LoadOptions};
use leadflow_core::domain::run::RunStatus;
use leadflow_db::repositories::{RunRepository, SqlRunRepository};
use leadflow_db::{connect, migrations, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(engine_limits_check(&config));
            checks.push(channel_budget_check(&config));
            checks.push(notify_webhook_check(&config));
            checks.extend(database_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in [
                "engine_limits",
                "channel_budgets",
                "notify_webhook",
                "database_connectivity",
                "schema_migrations",
                "approval_backlog",
            ] {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Surface the effective engine limits so an operator can confirm what a
/// run will be bounded by before starting one.
fn engine_limits_check(config: &AppConfig) -> DoctorCheck {
    let engine = &config.engine;
    DoctorCheck::pass(
        "engine_limits",
        format!(
            "visit cap {}, up to {} attempt(s) per step, step timeout {}s",
            engine.max_step_visits, engine.max_attempts, engine.default_timeout_secs
        ),
    )
}

fn channel_budget_check(config: &AppConfig) -> DoctorCheck {
    let channels = &config.channels;
    DoctorCheck::pass(
        "channel_budgets",
        format!(
            "{} send(s)/day per account and channel, jitter {}..{}s between sends",
            channels.daily_cap, channels.jitter_min_secs, channels.jitter_max_secs
        ),
    )
}

fn notify_webhook_check(config: &AppConfig) -> DoctorCheck {
    let details = match &config.notify.webhook_url {
        Some(url) => format!("operator notifications post to `{url}`"),
        None => "no webhook configured; operator notifications stay on structured logs"
            .to_string(),
    };
    DoctorCheck::pass("notify_webhook", details)
}

fn database_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let unreachable = |details: String| {
        vec![
            DoctorCheck::fail("database_connectivity", details),
            DoctorCheck::skipped("schema_migrations", "skipped; database is unreachable"),
            DoctorCheck::skipped("approval_backlog", "skipped; database is unreachable"),
        ]
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return unreachable(format!("failed to initialize async runtime: {error}"));
        }
    };

    runtime.block_on(async {
        let pool = match connect(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return unreachable(format!("failed to connect to database: {error}"));
            }
        };

        let mut checks = vec![DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        )];

        match migrations::pending_count(&pool).await {
            Ok(0) => {
                checks.push(DoctorCheck::pass("schema_migrations", "schema is up to date"));
                checks.push(approval_backlog_check(&pool).await);
            }
            Ok(pending) => {
                checks.push(DoctorCheck::fail(
                    "schema_migrations",
                    format!("{pending} migration(s) pending; run `leadflow migrate`"),
                ));
                checks.push(DoctorCheck::skipped(
                    "approval_backlog",
                    "skipped until migrations are applied",
                ));
            }
            Err(error) => {
                checks.push(DoctorCheck::fail("schema_migrations", error.to_string()));
                checks.push(DoctorCheck::skipped(
                    "approval_backlog",
                    "skipped; migration state is unknown",
                ));
            }
        }

        pool.close().await;
        checks
    })
}

/// Paused runs are where operator attention goes: each one is either waiting
/// on an approval decision or an explicit resume.
async fn approval_backlog_check(pool: &DbPool) -> DoctorCheck {
    let runs = SqlRunRepository::new(pool.clone());
    match runs.list_by_status(RunStatus::Paused).await {
        Ok(paused) => {
            let awaiting =
                paused.iter().filter(|run| run.resumption_token.is_some()).count();
            DoctorCheck::pass(
                "approval_backlog",
                format!(
                    "{} paused run(s), {awaiting} awaiting an approval decision",
                    paused.len()
                ),
            )
        }
        Err(error) => DoctorCheck::fail("approval_backlog", error.to_string()),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
