//! # comply CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use comply_cli::rules::{run_rules, RulesArgs};
use comply_cli::schedule::{run_schedule, ScheduleArgs};
use comply_cli::score::{run_score, ScoreArgs};

/// Compliance engine operator tooling.
#[derive(Parser, Debug)]
#[command(name = "comply", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Catalog and rule validation.
    Rules(RulesArgs),

    /// Due-date and reminder preview.
    Schedule(ScheduleArgs),

    /// Score a review checklist.
    Score(ScoreArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Rules(args) => run_rules(&args),
        Commands::Schedule(args) => run_schedule(&args),
        Commands::Score(args) => run_score(&args),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
