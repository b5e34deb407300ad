//! # Rules Subcommand
//!
//! `comply rules validate <file>` checks a YAML catalog the way the API
//! bootstrap would apply it: shape, payload bounds, references to known
//! services and strictly increasing effective dates per series.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

/// Arguments for the `comply rules` subcommand.
#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub command: RulesCommand,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// Validate a catalog file.
    Validate {
        /// Path to the YAML catalog.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

/// Execute the rules subcommand.
pub fn run_rules(args: &RulesArgs) -> Result<u8> {
    match &args.command {
        RulesCommand::Validate { file } => validate(file),
    }
}

fn validate(file: &std::path::Path) -> Result<u8> {
    // Unreadable files are operational errors, rejected content is not.
    crate::read_input(file)?;
    match crate::load_engine(file) {
        Ok((_, summary)) => {
            println!(
                "OK: {} service(s), {} doc type(s), {} rule(s), {} template(s) ({} published), {} enrollment(s)",
                summary.services,
                summary.doc_types,
                summary.rules,
                summary.templates,
                summary.published,
                summary.enrollments
            );
            Ok(0)
        }
        Err(e) => {
            println!("FAIL: {e:#}");
            Ok(1)
        }
    }
}
