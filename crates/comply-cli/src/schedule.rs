//! # Schedule Subcommand
//!
//! `comply schedule preview` resolves the rule governing one period of a
//! catalog and prints its due date and reminder instants, without
//! materializing anything.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use comply_core::{JurisdictionCode, Period, ServiceKey, Timestamp};
use comply_rules::{plan_obligation, RulePayloadWire, SchedulePlan};

/// Arguments for the `comply schedule` subcommand.
#[derive(Args, Debug)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Print the due date and reminders of one period.
    Preview(PreviewArgs),
}

#[derive(Args, Debug)]
pub struct PreviewArgs {
    /// YAML catalog holding the services and rules.
    #[arg(long, value_name = "FILE")]
    pub catalog: PathBuf,

    #[arg(long)]
    pub service: String,

    #[arg(long)]
    pub jurisdiction: String,

    /// `2025`, `2025-Q1` or `2025-02`.
    #[arg(long)]
    pub period: String,

    /// Planning instant (UTC, `Z` suffix); reminders before it are dropped.
    #[arg(long)]
    pub now: Option<String>,

    /// Reminder hour, UTC.
    #[arg(long, default_value_t = 9)]
    pub reminder_hour: u32,

    /// Print JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Machine-readable preview.
#[derive(Debug, Serialize)]
pub struct Preview {
    pub service_key: String,
    pub jurisdiction: String,
    pub period: String,
    pub due_date: String,
    pub rule_effective_from: String,
    pub rule: RulePayloadWire,
    pub reminders: Vec<String>,
}

impl From<SchedulePlan> for Preview {
    fn from(plan: SchedulePlan) -> Self {
        Self {
            service_key: plan.rule.service_key.to_string(),
            jurisdiction: plan.rule.jurisdiction.to_string(),
            period: plan.period.to_string(),
            due_date: plan.due_date.to_string(),
            rule_effective_from: plan.rule.effective_from.to_string(),
            rule: RulePayloadWire::from(plan.rule.payload),
            reminders: plan.reminders.iter().map(Timestamp::to_iso8601).collect(),
        }
    }
}

/// Execute the schedule subcommand.
pub fn run_schedule(args: &ScheduleArgs) -> Result<u8> {
    match &args.command {
        ScheduleCommand::Preview(preview) => run_preview(preview),
    }
}

fn run_preview(args: &PreviewArgs) -> Result<u8> {
    let service = ServiceKey::new(args.service.as_str()).context("invalid --service")?;
    let jurisdiction =
        JurisdictionCode::new(args.jurisdiction.as_str()).context("invalid --jurisdiction")?;
    let period = Period::parse(&args.period).context("invalid --period")?;
    let now = match &args.now {
        Some(raw) => Timestamp::parse(raw).context("invalid --now")?,
        None => Timestamp::now(),
    };
    anyhow::ensure!(args.reminder_hour <= 23, "--reminder-hour must be 0-23");

    let (engine, _) = crate::load_engine(&args.catalog)?;
    let plan = match plan_obligation(
        engine.rules(),
        &service,
        &jurisdiction,
        period,
        now,
        args.reminder_hour,
    ) {
        Ok(plan) => plan,
        Err(e) => {
            println!("FAIL: {e}");
            return Ok(1);
        }
    };

    let preview = Preview::from(plan);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else {
        print_text(&preview);
    }
    Ok(0)
}

fn print_text(p: &Preview) {
    println!("{} / {} / {}", p.service_key, p.jurisdiction, p.period);
    println!("  due date:  {}", p.due_date);
    println!("  rule:      effective from {}", p.rule_effective_from);
    if p.reminders.is_empty() {
        println!("  reminders: none");
    } else {
        println!("  reminders:");
        for r in &p.reminders {
            println!("    {r}");
        }
    }
}
