//! `stepwright plan`

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

use stepwright_common::EngineConfig;
use stepwright_engine::{Engine, ExecutionPlan, PlannedStep};

use crate::output::{
    format_duration, print_bullets, print_list, print_pairs, print_structured, OutputFormat,
    TableDisplay,
};

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Scenario files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Plan with a different retry count than the file sets
    #[arg(long)]
    pub retry_count: Option<u32>,
}

#[derive(Serialize)]
pub struct PlanRow {
    pub index: usize,
    pub action: String,
    pub target: String,
    pub risk: String,
    pub budget: u32,
    pub checkpoint: bool,
    pub reasons: String,
}

impl From<&PlannedStep> for PlanRow {
    fn from(p: &PlannedStep) -> Self {
        Self {
            index: p.index,
            action: p.step.kind().to_string(),
            target: p.step.summary(),
            risk: p.risk.to_string(),
            budget: p.retry_budget,
            checkpoint: p.checkpoint,
            reasons: p.reasons.join("; "),
        }
    }
}

impl TableDisplay for PlanRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Action", "Target", "Risk", "Retries", "Checkpoint", "Why"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.action.clone(),
            self.target.clone(),
            self.risk.clone(),
            self.budget.to_string(),
            if self.checkpoint { "📸".to_string() } else { String::new() },
            self.reasons.clone(),
        ]
    }
}

fn print_plan(plan: &ExecutionPlan, format: OutputFormat) {
    println!();
    println!("{}", plan.scenario.bold());
    let rows: Vec<PlanRow> = plan.steps.iter().map(PlanRow::from).collect();
    print_list(&rows, format);

    let a = &plan.analysis;
    print_pairs(
        &[
            ("Steps", a.total_steps.to_string()),
            ("Retry count", plan.retry_count.to_string()),
            (
                "Risk",
                format!(
                    "{} high, {} medium, {} low",
                    a.risk_counts.high, a.risk_counts.medium, a.risk_counts.low
                ),
            ),
            ("Complexity", a.complexity_score.to_string()),
            ("Estimated duration", format_duration(a.estimated_duration_ms)),
        ],
        format,
    );
    print_bullets("Notes", &a.notes);
    print_bullets("Recommendations", &a.recommendations);
}

pub fn execute(args: PlanArgs, config: &EngineConfig, format: OutputFormat) -> Result<i32> {
    let engine = Engine::new(config.clone())?;
    let scenarios = super::load_scenarios(&args.files, None, &config.defaults)?;

    let mut plans = Vec::with_capacity(scenarios.len());
    for (_, mut scenario) in scenarios {
        if let Some(retry_count) = args.retry_count {
            scenario.config.retry_count = retry_count;
        }
        plans.push(engine.plan(&scenario)?);
    }

    if format.is_structured() {
        print_structured(&plans, format);
    } else {
        for plan in &plans {
            print_plan(plan, format);
        }
    }
    Ok(0)
}
