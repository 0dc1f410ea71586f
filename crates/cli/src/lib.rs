pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use leadflow_core::config::LogFormat;

#[derive(Debug, Parser)]
#[command(
    name = "leadflow",
    about = "Leadflow operator CLI",
    long_about = "Operate the leadflow execution core: migrations, readiness checks, lead and run inspection, and approval decisions.",
    after_help = "Examples:\n  leadflow doctor --json\n  leadflow runs --status paused\n  leadflow approve --lead L-17 --run <run-id> --token <token>"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Run readiness checks: config, engine limits, database, migrations, approval backlog"
    )]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "List leads, optionally filtered by pipeline status")]
    Leads {
        #[arg(long, help = "Filter by lead status (e.g. drafted, awaiting_approval, emailed)")]
        status: Option<String>,
    },
    #[command(about = "List runs by lifecycle status")]
    Runs {
        #[arg(long, default_value = "paused", help = "Run status to list")]
        status: String,
    },
    #[command(about = "Apply an approval decision to a run parked at a human gate")]
    Approve {
        #[arg(long, help = "Lead identifier the parked run belongs to")]
        lead: String,
        #[arg(long, help = "Run identifier")]
        run: String,
        #[arg(long, help = "Resumption token issued when the run parked")]
        token: String,
        #[arg(long, help = "Reject instead of approving")]
        reject: bool,
    },
}

fn init_logging() {
    let (level, format) = match leadflow_core::config::AppConfig::load(Default::default()) {
        Ok(config) => (config.logging.level, config.logging.format),
        Err(_) => ("info".to_string(), LogFormat::Compact),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);
    // Ignore double-init: tests and embedded callers may have installed one.
    let _ = match format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Leads { status } => commands::leads::run(status.as_deref()),
        Command::Runs { status } => commands::runs::run(&status),
        Command::Approve { lead, run, token, reject } => {
            commands::approve::run(&lead, &run, &token, reject)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
