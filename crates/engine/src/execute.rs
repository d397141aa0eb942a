//! Execute stage
//!
//! Runs planned steps strictly in order, one at a time. Each step goes
//! through the attempt loop until it succeeds or is exhausted. A step-level
//! failure never skips later steps; only an aborted run does.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use stepwright_common::{Action, Step, WaitCondition};

use crate::capability::{ArtifactKind, BrowserSession, LocatorCandidate};
use crate::context::{AttemptClock, RunContext};
use crate::events::{EventSink, RunEvent};
use crate::locator::{LocatorResolver, ResolutionTrace};
use crate::outcome::{
    ArtifactRef, AttemptRecord, FailureClass, StepError, StepErrorKind, StepOutcome, StepStatus,
};
use crate::planner::{ExecutionPlan, PlannedStep};
use crate::recovery::{AttemptLoop, FailureContext, RecoveryState};
use crate::step::{Performed, StepExecutor};

/// Upper bound for evidence captured after a failure
const FAILURE_CAPTURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Slack added to fixed delays so the wait itself cannot time out
const DELAY_SLACK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortReason {
    pub at_step: usize,
    pub kind: StepErrorKind,
    pub message: String,
}

/// Outcomes in plan order, one per planned step
#[derive(Debug, Clone, Default)]
pub struct ExecutionLedger {
    pub outcomes: Vec<StepOutcome>,
    pub abort: Option<AbortReason>,
    /// Run-level artifacts such as the trace
    pub artifacts: Vec<ArtifactRef>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecuteOptions {
    pub default_timeout: Duration,
    pub screenshot_on_failure: bool,
    pub checkpoint_screenshots: bool,
    pub trace_enabled: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            screenshot_on_failure: true,
            checkpoint_screenshots: true,
            trace_enabled: false,
        }
    }
}

type AttemptResult =
    Result<(Option<LocatorCandidate>, Performed), (Option<LocatorCandidate>, StepError)>;

pub struct ExecuteStage {
    browser: Arc<dyn BrowserSession>,
    executor: StepExecutor,
    resolver: Arc<LocatorResolver>,
    context: Arc<RunContext>,
    events: Arc<dyn EventSink>,
    options: ExecuteOptions,
}

impl ExecuteStage {
    pub fn new(
        browser: Arc<dyn BrowserSession>,
        executor: StepExecutor,
        resolver: Arc<LocatorResolver>,
        context: Arc<RunContext>,
        events: Arc<dyn EventSink>,
        options: ExecuteOptions,
    ) -> Self {
        Self {
            browser,
            executor,
            resolver,
            context,
            events,
            options,
        }
    }

    pub async fn run(&self, plan: &ExecutionPlan) -> ExecutionLedger {
        let mut ledger = ExecutionLedger::default();

        for planned in &plan.steps {
            if ledger.abort.is_none() && self.context.is_cancelled() {
                ledger.abort = Some(self.abort(
                    planned.index,
                    StepErrorKind::Timeout,
                    "scenario deadline exceeded",
                ));
            }
            if ledger.abort.is_some() {
                ledger.outcomes.push(skipped(planned));
                continue;
            }

            let outcome = self.run_step(planned).await;
            if let Some(error) = &outcome.error {
                if error.kind.aborts_run() {
                    ledger.abort = Some(self.abort(planned.index, error.kind, &error.message));
                } else if self.context.is_cancelled() {
                    ledger.abort = Some(self.abort(
                        planned.index,
                        StepErrorKind::Timeout,
                        "scenario deadline exceeded",
                    ));
                }
            }
            ledger.outcomes.push(outcome);
        }

        let browser_usable =
            !matches!(&ledger.abort, Some(a) if a.kind == StepErrorKind::Infrastructure);
        if self.options.trace_enabled && browser_usable {
            let clock = self.evidence_clock();
            match self
                .executor
                .capture(None, "trace", ArtifactKind::Trace, &clock)
                .await
            {
                Ok(artifact) => ledger.artifacts.push(artifact),
                Err(e) => warn!(error = %e, "Trace capture failed"),
            }
        }

        ledger
    }

    fn abort(&self, at_step: usize, kind: StepErrorKind, message: &str) -> AbortReason {
        self.events.emit(RunEvent::RunAborted {
            run_id: self.context.run_id,
            at_step,
            reason: message.to_string(),
        });
        AbortReason {
            at_step,
            kind,
            message: message.to_string(),
        }
    }

    /// Clock for evidence capture, independent of the run deadline
    fn evidence_clock(&self) -> AttemptClock {
        AttemptClock::new(
            FAILURE_CAPTURE_TIMEOUT.min(self.options.default_timeout),
            CancellationToken::new(),
        )
    }

    fn attempt_timeout(&self, step: &Step) -> Duration {
        let timeout = step.timeout(self.options.default_timeout);
        match &step.action {
            Action::Wait {
                condition: WaitCondition::Delay { ms },
            } => timeout.max(Duration::from_millis(*ms) + DELAY_SLACK),
            _ => timeout,
        }
    }

    /// Drive one step to a terminal recovery state
    pub async fn run_step(&self, planned: &PlannedStep) -> StepOutcome {
        let step = &planned.step;
        let run_id = self.context.run_id;
        let started = Instant::now();
        let timeout = self.attempt_timeout(step);

        self.events.emit(RunEvent::StepStarted {
            run_id,
            index: planned.index,
            action: step.kind(),
            target: step.summary(),
            risk: planned.risk,
            budget: planned.retry_budget,
        });

        let mut artifacts = Vec::new();
        if planned.checkpoint
            && self.options.checkpoint_screenshots
            && self.executor.has_artifact_sink()
        {
            let clock = self.context.attempt_clock(timeout);
            match self
                .executor
                .capture(Some(planned.index), "checkpoint", ArtifactKind::Screenshot, &clock)
                .await
            {
                Ok(artifact) => artifacts.push(artifact),
                Err(e) => {
                    warn!(step = planned.index, error = %e, "Checkpoint screenshot failed")
                }
            }
        }

        let mut lp = AttemptLoop::new(planned.retry_budget);
        let mut history = Vec::new();
        let mut oracle_consulted = false;
        let mut locator = None;
        let mut last_error = None;

        while let Some(attempt) = lp.begin() {
            let attempt_started = Instant::now();
            let clock = self.context.attempt_clock(timeout);
            let mut trace = ResolutionTrace::default();
            let excluded = lp.excluded().to_vec();

            let result = self.attempt(planned, &excluded, &clock, &mut trace).await;

            // Misses are excluded only when resolution itself failed
            if matches!(&result, Err((None, e)) if e.class() == FailureClass::Structural) {
                for miss in &trace.misses {
                    lp.exclude(miss.candidate.clone());
                }
            }
            oracle_consulted |= trace.oracle_consulted;

            let mut record = AttemptRecord {
                attempt,
                duration_ms: attempt_started.elapsed().as_millis() as u64,
                locator: None,
                misses: trace.misses,
                oracle_consulted: trace.oracle_consulted,
                error: None,
            };

            match result {
                Ok((used, performed)) => {
                    lp.succeed();
                    record.locator = used.clone();
                    history.push(record);
                    artifacts.extend(performed.artifacts);
                    locator = used;
                    last_error = None;
                    break;
                }
                Err((used, error)) => {
                    if let Some(candidate) = &used {
                        if error.class() == FailureClass::Structural {
                            lp.exclude(candidate.clone());
                        }
                    }
                    let has_alternate = step.action.needs_element()
                        && self
                            .resolver
                            .has_untried(&step.target, lp.excluded(), oracle_consulted);
                    let state = lp.fail(FailureContext {
                        class: error.class(),
                        has_alternate,
                        cancelled: clock.is_cancelled(),
                    });

                    self.events.emit(RunEvent::AttemptFailed {
                        run_id,
                        index: planned.index,
                        attempt,
                        error: error.clone(),
                        will_retry: state == RecoveryState::Retrying,
                    });

                    record.locator = used.clone();
                    record.error = Some(error.clone());
                    history.push(record);
                    locator = used;
                    last_error = Some(error);
                }
            }
        }

        let status = match lp.state() {
            RecoveryState::Succeeded => StepStatus::Success,
            _ => StepStatus::Failed,
        };

        if status == StepStatus::Failed
            && self.options.screenshot_on_failure
            && self.executor.has_artifact_sink()
        {
            let browser_gone = last_error
                .as_ref()
                .map_or(false, |e| e.kind == StepErrorKind::Infrastructure);
            if !browser_gone {
                let clock = self.evidence_clock();
                match self
                    .executor
                    .capture(Some(planned.index), "failure", ArtifactKind::Screenshot, &clock)
                    .await
                {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(e) => {
                        debug!(step = planned.index, error = %e, "Failure screenshot not captured")
                    }
                }
            }
        }

        let outcome = StepOutcome {
            index: planned.index,
            action: step.kind(),
            target: step.target.to_string(),
            description: step.description.clone(),
            risk: planned.risk,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            attempts: lp.attempts(),
            locator,
            error: last_error,
            artifacts,
            history,
        };

        self.events.emit(RunEvent::StepFinished {
            run_id,
            index: outcome.index,
            status: outcome.status,
            attempts: outcome.attempts,
            duration_ms: outcome.duration_ms,
            locator: outcome.locator.clone(),
        });

        outcome
    }

    /// Resolve (when the action needs an element) and perform once
    async fn attempt(
        &self,
        planned: &PlannedStep,
        excluded: &[LocatorCandidate],
        clock: &AttemptClock,
        trace: &mut ResolutionTrace,
    ) -> AttemptResult {
        let step = &planned.step;
        let resolved = if step.action.needs_element() {
            match self
                .resolver
                .resolve(self.browser.as_ref(), &step.target, excluded, clock, trace)
                .await
            {
                Ok(resolved) => Some(resolved),
                Err(e) => return Err((None, e.to_step_error())),
            }
        } else {
            None
        };

        let used = resolved.as_ref().map(|r| r.candidate.clone());
        let element = resolved.as_ref().map(|r| &r.element);
        match self.executor.perform(planned.index, step, element, clock).await {
            Ok(performed) => Ok((used, performed)),
            Err(error) => Err((used, error)),
        }
    }
}

fn skipped(planned: &PlannedStep) -> StepOutcome {
    StepOutcome {
        index: planned.index,
        action: planned.step.kind(),
        target: planned.step.target.to_string(),
        description: planned.step.description.clone(),
        risk: planned.risk,
        status: StepStatus::Skipped,
        duration_ms: 0,
        attempts: 0,
        locator: None,
        error: None,
        artifacts: Vec::new(),
        history: Vec::new(),
    }
}
