pub mod commands;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "spendgate",
    about = "Spendgate operator CLI",
    long_about = "Operate the spendgate approval engine: migrations, config inspection, \
                  escalation passes, and readiness checks.",
    after_help = "Examples:\n  spendgate migrate\n  spendgate escalate\n  spendgate doctor --json"
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
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Run one escalation pass over stale pending approvals")]
    Escalate {
        #[arg(long, help = "Evaluate timeouts as of this RFC 3339 instant instead of now")]
        at: Option<DateTime<Utc>>,
    },
    #[command(about = "Validate config, DB connectivity, and schema readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Escalate { at } => commands::escalate::run(at),
        Command::Doctor { json } => commands::doctor::run(json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
