//! Human-readable run reports and live progress

use colored::Colorize;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use stepwright_engine::{RunEvent, RunReport, StepOutcome, StepStatus};

use crate::output::{
    format_duration, print_bullets, print_list, print_pairs, print_warning, status_icon,
    verdict_label, OutputFormat, TableDisplay,
};

/// One executed (or skipped) step
#[derive(Serialize)]
pub struct StepRow {
    pub index: usize,
    pub action: String,
    pub target: String,
    pub risk: String,
    pub status: String,
    pub attempts: u32,
    pub duration: String,
    pub detail: String,
}

impl From<&StepOutcome> for StepRow {
    fn from(o: &StepOutcome) -> Self {
        let detail = match (&o.error, &o.locator) {
            (Some(error), _) => error.to_string(),
            (None, Some(locator)) => format!("via {}", locator),
            (None, None) => String::new(),
        };
        Self {
            index: o.index,
            action: o.action.to_string(),
            target: o.description.clone().unwrap_or_else(|| o.target.clone()),
            risk: o.risk.to_string(),
            status: format!("{} {}", status_icon(o.status), o.status),
            attempts: o.attempts,
            duration: format_duration(o.duration_ms),
            detail,
        }
    }
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Action", "Target", "Risk", "Status", "Attempts", "Duration", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.action.clone(),
            self.target.clone(),
            self.risk.clone(),
            self.status.clone(),
            self.attempts.to_string(),
            self.duration.clone(),
            self.detail.clone(),
        ]
    }
}

/// One line per scenario in a multi-scenario run
#[derive(Serialize)]
pub struct SummaryRow {
    pub scenario: String,
    pub verdict: String,
    pub grade: String,
    pub quality: String,
    pub passed: String,
    pub duration: String,
}

impl From<&RunReport> for SummaryRow {
    fn from(r: &RunReport) -> Self {
        Self {
            scenario: r.scenario.clone(),
            verdict: r.verdict.as_str().to_string(),
            grade: r.grade.as_str().to_string(),
            quality: format!("{:.2}", r.quality.score),
            passed: format!("{}/{}", r.summary.succeeded, r.summary.total),
            duration: format_duration(r.duration_ms),
        }
    }
}

impl TableDisplay for SummaryRow {
    fn headers() -> Vec<&'static str> {
        vec!["Scenario", "Verdict", "Grade", "Quality", "Passed", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.scenario.clone(),
            self.verdict.clone(),
            self.grade.clone(),
            self.quality.clone(),
            self.passed.clone(),
            self.duration.clone(),
        ]
    }
}

pub fn print_report(report: &RunReport, format: OutputFormat) {
    println!();
    println!(
        "{} {} {}",
        verdict_label(report.verdict),
        report.scenario.bold(),
        format!("({})", report.run_id).dimmed()
    );

    let rows: Vec<StepRow> = report.outcomes.iter().map(StepRow::from).collect();
    print_list(&rows, format);

    let q = &report.quality;
    let s = &report.summary;
    print_pairs(
        &[
            ("Grade", report.grade.as_str().to_string()),
            (
                "Quality",
                format!(
                    "{:.2} (success {:.2}, recovery {:.2}, timing {:.2})",
                    q.score, q.success_ratio, q.recovery_efficiency, q.timing_consistency
                ),
            ),
            (
                "Steps",
                format!(
                    "{} passed, {} failed, {} skipped, {} retried",
                    s.succeeded, s.failed, s.skipped, s.retried
                ),
            ),
            (
                "Assertions",
                format!("{}/{} passed", report.assertions.passed, report.assertions.total),
            ),
            ("Browser", report.browser.to_string()),
            ("Duration", format_duration(report.duration_ms)),
        ],
        format,
    );

    if let Some(abort) = &report.abort {
        print_warning(&format!("Run aborted at step {}: {}", abort.at_step, abort.message));
    }

    let failures: Vec<String> = report
        .failures
        .iter()
        .map(|f| {
            format!(
                "step {} {} {}: {} after {} attempt(s){}",
                f.index,
                f.action,
                f.target,
                f.message,
                f.attempts,
                if f.critical { " [critical]" } else { "" }
            )
        })
        .collect();
    print_bullets("Failures", &failures);
    print_bullets("Warnings", &report.warnings);
    print_bullets("Recommendations", &report.recommendations);

    let artifacts: Vec<String> = report
        .artifacts
        .iter()
        .map(|a| a.path.display().to_string())
        .collect();
    print_bullets("Artifacts", &artifacts);
}

/// Turns run events into progress lines
#[derive(Default)]
pub struct Progress {
    scenarios: HashMap<Uuid, String>,
    steps: HashMap<(Uuid, usize), String>,
}

impl Progress {
    fn scenario(&self, run_id: &Uuid) -> &str {
        self.scenarios.get(run_id).map(String::as_str).unwrap_or("?")
    }

    pub fn line(&mut self, event: &RunEvent) -> Option<String> {
        match event {
            RunEvent::RunStarted {
                run_id,
                scenario,
                steps,
            } => {
                self.scenarios.insert(*run_id, scenario.clone());
                Some(format!("▶ {} ({} steps)", scenario.bold(), steps))
            }
            RunEvent::PlanReady { .. } => None,
            RunEvent::StepStarted {
                run_id,
                index,
                action,
                target,
                ..
            } => {
                self.steps
                    .insert((*run_id, *index), format!("{} {}", action, target));
                None
            }
            RunEvent::AttemptFailed {
                run_id,
                index,
                attempt,
                error,
                will_retry,
            } => will_retry.then(|| {
                format!(
                    "  ↻ [{}] step {} attempt {} failed ({}), retrying",
                    self.scenario(run_id),
                    index,
                    attempt,
                    error.kind
                )
            }),
            RunEvent::StepFinished {
                run_id,
                index,
                status,
                attempts,
                duration_ms,
                ..
            } => {
                let step = self
                    .steps
                    .remove(&(*run_id, *index))
                    .unwrap_or_default();
                let retries = if *attempts > 1 {
                    format!(", {} attempts", attempts)
                } else {
                    String::new()
                };
                let duration = match status {
                    StepStatus::Skipped => String::new(),
                    _ => format!(" ({}{})", format_duration(*duration_ms), retries),
                };
                Some(format!(
                    "  {} [{}] {} {}{}",
                    status_icon(*status),
                    self.scenario(run_id),
                    index,
                    step,
                    duration
                ))
            }
            RunEvent::RunAborted {
                run_id,
                at_step,
                reason,
            } => Some(format!(
                "  ⛔ [{}] aborted at step {}: {}",
                self.scenario(run_id),
                at_step,
                reason
            )),
            RunEvent::RunFinished {
                run_id,
                scenario,
                verdict,
                quality,
                duration_ms,
            } => {
                self.scenarios.remove(run_id);
                Some(format!(
                    "■ {} {} quality {:.2} in {}",
                    scenario.bold(),
                    verdict_label(*verdict),
                    quality,
                    format_duration(*duration_ms)
                ))
            }
        }
    }
}
