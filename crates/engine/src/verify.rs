//! Verify stage: verdict, quality score and the run report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use stepwright_common::config::QualityConfig;
use stepwright_common::{ActionKind, BrowserKind, QualityWeights, Scenario};

use crate::context::RunContext;
use crate::execute::{AbortReason, ExecutionLedger};
use crate::outcome::{ArtifactRef, StepErrorKind, StepOutcome, StepStatus};
use crate::planner::{ExecutionPlan, PlanAnalysis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
        }
    }
}

/// Coarse reading of the success rate, for humans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Passed,
    PassedWithWarnings,
    PartiallyFailed,
    Failed,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::Passed => "passed",
            Grade::PassedWithWarnings => "passed_with_warnings",
            Grade::PartiallyFailed => "partially_failed",
            Grade::Failed => "failed",
        }
    }

    fn from_success_ratio(ratio: f64) -> Self {
        if ratio >= 1.0 {
            Grade::Passed
        } else if ratio >= 0.8 {
            Grade::PassedWithWarnings
        } else if ratio >= 0.5 {
            Grade::PartiallyFailed
        } else {
            Grade::Failed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: f64,
    pub success_ratio: f64,
    pub recovery_efficiency: f64,
    pub timing_consistency: f64,
    pub weights: QualityWeights,
    /// Duration above which a step counted as slow
    pub slow_threshold_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub retried: usize,
    pub oracle_assisted: usize,
    pub slow: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub index: usize,
    pub action: ActionKind,
    pub target: String,
    pub kind: StepErrorKind,
    pub message: String,
    pub attempts: u32,
    pub critical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Terminal, serializable result of one scenario run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub scenario: String,
    pub scenario_slug: String,
    pub browser: BrowserKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub verdict: Verdict,
    pub grade: Grade,
    pub quality: QualityScore,
    pub summary: StatusSummary,
    pub outcomes: Vec<StepOutcome>,
    pub failures: Vec<FailureDetail>,
    pub assertions: AssertionSummary,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<AbortReason>,
    pub plan: PlanAnalysis,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

pub struct Verifier {
    quality: QualityConfig,
}

/// Too many retried steps suggests a flaky scenario
const RETRY_WARNING_THRESHOLD: usize = 2;

impl Verifier {
    pub fn new(quality: QualityConfig) -> Self {
        Self { quality }
    }

    /// Pass iff every outcome succeeded
    pub fn verdict(outcomes: &[StepOutcome]) -> Verdict {
        if !outcomes.is_empty() && outcomes.iter().all(StepOutcome::is_success) {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }

    pub fn quality(&self, outcomes: &[StepOutcome]) -> (QualityScore, usize) {
        let weights = self.quality.weights;
        let total = outcomes.len();
        let threshold_ms = self.slow_threshold_ms(outcomes);

        if total == 0 {
            let empty = QualityScore {
                score: 0.0,
                success_ratio: 0.0,
                recovery_efficiency: 0.0,
                timing_consistency: 0.0,
                weights,
                slow_threshold_ms: threshold_ms,
            };
            return (empty, 0);
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let retried = outcomes.iter().filter(|o| o.was_retried()).count();
        let executed: Vec<&StepOutcome> = outcomes.iter().filter(|o| o.was_executed()).collect();
        let slow = executed.iter().filter(|o| o.duration_ms > threshold_ms).count();

        let success_ratio = succeeded as f64 / total as f64;
        let recovery_efficiency = 1.0 - retried as f64 / total as f64;
        let timing_consistency = if executed.is_empty() {
            1.0
        } else {
            1.0 - slow as f64 / executed.len() as f64
        };

        let score = (weights.success * success_ratio
            + weights.recovery * recovery_efficiency
            + weights.timing * timing_consistency)
            .clamp(0.0, 1.0);

        (
            QualityScore {
                score,
                success_ratio,
                recovery_efficiency,
                timing_consistency,
                weights,
                slow_threshold_ms: threshold_ms,
            },
            slow,
        )
    }

    fn slow_threshold_ms(&self, outcomes: &[StepOutcome]) -> u64 {
        let mut durations: Vec<u64> = outcomes
            .iter()
            .filter(|o| o.was_executed())
            .map(|o| o.duration_ms)
            .collect();
        let median = median(&mut durations);
        let scaled = (median * self.quality.slow_step_multiple).round() as u64;
        scaled.max(self.quality.slow_step_floor_ms)
    }

    pub fn verify(
        &self,
        scenario: &Scenario,
        plan: &ExecutionPlan,
        ledger: ExecutionLedger,
        context: &RunContext,
    ) -> RunReport {
        let finished_at = Utc::now();
        let outcomes = ledger.outcomes;
        let verdict = Self::verdict(&outcomes);
        let (quality, slow) = self.quality(&outcomes);

        let summary = StatusSummary {
            total: outcomes.len(),
            succeeded: outcomes.iter().filter(|o| o.status == StepStatus::Success).count(),
            failed: outcomes.iter().filter(|o| o.status == StepStatus::Failed).count(),
            skipped: outcomes.iter().filter(|o| o.status == StepStatus::Skipped).count(),
            retried: outcomes.iter().filter(|o| o.was_retried()).count(),
            oracle_assisted: outcomes.iter().filter(|o| o.used_oracle()).count(),
            slow,
        };

        let failures: Vec<FailureDetail> = outcomes
            .iter()
            .filter_map(|o| {
                let error = o.error.as_ref()?;
                Some(FailureDetail {
                    index: o.index,
                    action: o.action,
                    target: o.target.clone(),
                    kind: error.kind,
                    message: error.message.clone(),
                    attempts: o.attempts,
                    critical: o.action == ActionKind::Assert || error.kind.is_critical(),
                })
            })
            .collect();

        let mut assertions = AssertionSummary::default();
        for o in outcomes.iter().filter(|o| o.action == ActionKind::Assert) {
            assertions.total += 1;
            match o.status {
                StepStatus::Success => assertions.passed += 1,
                StepStatus::Failed => assertions.failed += 1,
                StepStatus::Skipped => assertions.skipped += 1,
            }
        }

        let warnings = warnings(&summary, &quality);
        let recommendations = recommendations(&outcomes, &failures);

        let mut artifacts: Vec<ArtifactRef> = outcomes
            .iter()
            .flat_map(|o| o.artifacts.iter().cloned())
            .collect();
        artifacts.extend(ledger.artifacts);

        let duration_ms = (finished_at - context.started_at).num_milliseconds().max(0) as u64;

        info!(
            scenario = %scenario.name,
            verdict = verdict.as_str(),
            quality = quality.score,
            failed = summary.failed,
            skipped = summary.skipped,
            "Run verified"
        );

        RunReport {
            run_id: context.run_id,
            scenario: scenario.name.clone(),
            scenario_slug: context.scenario_slug.clone(),
            browser: scenario.config.browser,
            started_at: context.started_at,
            finished_at,
            duration_ms,
            verdict,
            grade: Grade::from_success_ratio(quality.success_ratio),
            quality,
            summary,
            outcomes,
            failures,
            assertions,
            warnings,
            recommendations,
            artifacts,
            abort: ledger.abort,
            plan: plan.analysis.clone(),
        }
    }
}

fn median(values: &mut [u64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) as f64 / 2.0
    } else {
        values[mid] as f64
    }
}

fn warnings(summary: &StatusSummary, quality: &QualityScore) -> Vec<String> {
    let mut warnings = Vec::new();
    if summary.slow > 0 {
        warnings.push(format!(
            "{} step(s) took longer than {} ms",
            summary.slow, quality.slow_threshold_ms
        ));
    }
    if (0.8..1.0).contains(&quality.success_ratio) {
        warnings.push(format!(
            "success rate {:.0}% is below 100%",
            quality.success_ratio * 100.0
        ));
    }
    if summary.retried > RETRY_WARNING_THRESHOLD {
        warnings.push(format!(
            "{} steps needed retries; the scenario may be unstable",
            summary.retried
        ));
    }
    if summary.oracle_assisted > 0 {
        warnings.push(format!(
            "{} step(s) were located with the locator oracle",
            summary.oracle_assisted
        ));
    }
    warnings
}

fn recommendations(outcomes: &[StepOutcome], failures: &[FailureDetail]) -> Vec<String> {
    let mut recs = Vec::new();
    let has = |kind: StepErrorKind| failures.iter().any(|f| f.kind == kind);

    if has(StepErrorKind::Timeout) || has(StepErrorKind::ElementDetached) {
        recs.push(
            "add an explicit wait (for_element or for_url_contains) before steps that timed out"
                .to_string(),
        );
    }
    if has(StepErrorKind::Resolution) || has(StepErrorKind::NotInteractable) {
        recs.push(
            "strengthen locators: prefer a stable selector or label over visible text".to_string(),
        );
    }
    if has(StepErrorKind::Navigation) {
        recs.push("check network stability and the base_url of the scenario".to_string());
    }
    if failures.iter().any(|f| f.critical) && !has(StepErrorKind::Infrastructure) {
        recs.push("fix critical failures first; later steps depend on them".to_string());
    }
    if has(StepErrorKind::Infrastructure) {
        recs.push(
            "the browser or oracle became unavailable; check the environment and rerun".to_string(),
        );
    }

    for o in outcomes.iter().filter(|o| o.is_success() && o.used_oracle()) {
        if let Some(locator) = &o.locator {
            recs.push(format!(
                "step {}: pin the oracle-found locator {} in the scenario",
                o.index, locator
            ));
        }
    }
    recs
}
