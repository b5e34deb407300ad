//! # Score Subcommand
//!
//! `comply score <checklist.json>` reads a JSON array of checklist items
//! and prints the weighted score and whether approval would be accepted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use comply_review::{decide, score, ChecklistItem};
use comply_state::Disposition;

/// Arguments for the `comply score` subcommand.
#[derive(Args, Debug)]
pub struct ScoreArgs {
    /// JSON array of `{category, item, status, is_mandatory, weight}`.
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

/// Execute the score subcommand. Exits 1 when approval would be blocked.
pub fn run_score(args: &ScoreArgs) -> Result<u8> {
    let source = crate::read_input(&args.file)?;
    let items: Vec<ChecklistItem> = serde_json::from_str(&source)
        .with_context(|| format!("{} is not a checklist", args.file.display()))?;

    println!("score: {}", score(&items));
    match decide(&items, Disposition::Approved) {
        Ok(_) => {
            println!("approval: allowed");
            Ok(0)
        }
        Err(e) => {
            println!("approval: blocked ({e})");
            Ok(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn run(json: &str) -> Result<u8> {
        let file = fixtures::write(json);
        run_score(&ScoreArgs {
            file: file.path().to_path_buf(),
        })
    }

    #[test]
    fn passing_checklist_allows_approval() {
        let code = run(
            r#"[
                {"category": "accuracy", "item": "Totals reconcile", "status": "passed", "is_mandatory": true, "weight": 6},
                {"category": "presentation", "item": "Cover note", "status": "failed", "weight": 4}
            ]"#,
        )
        .unwrap();
        assert_eq!(code, 0);
    }

    #[test]
    fn failed_mandatory_item_blocks_approval() {
        let code = run(
            r#"[{"category": "accuracy", "item": "Totals reconcile", "status": "failed", "is_mandatory": true, "weight": 6}]"#,
        )
        .unwrap();
        assert_eq!(code, 1);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(run("{not json").is_err());
    }
}
