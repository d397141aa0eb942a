//! Structured run events

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use stepwright_common::{ActionKind, RiskTier};

use crate::capability::LocatorCandidate;
use crate::outcome::{StepError, StepStatus};
use crate::verify::Verdict;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: Uuid,
        scenario: String,
        steps: usize,
    },
    PlanReady {
        run_id: Uuid,
        high_risk: usize,
        complexity: u32,
    },
    StepStarted {
        run_id: Uuid,
        index: usize,
        action: ActionKind,
        target: String,
        risk: RiskTier,
        budget: u32,
    },
    AttemptFailed {
        run_id: Uuid,
        index: usize,
        attempt: u32,
        error: StepError,
        will_retry: bool,
    },
    StepFinished {
        run_id: Uuid,
        index: usize,
        status: StepStatus,
        attempts: u32,
        duration_ms: u64,
        locator: Option<LocatorCandidate>,
    },
    RunAborted {
        run_id: Uuid,
        at_step: usize,
        reason: String,
    },
    RunFinished {
        run_id: Uuid,
        scenario: String,
        verdict: Verdict,
        quality: f64,
        duration_ms: u64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::PlanReady { run_id, .. }
            | RunEvent::StepStarted { run_id, .. }
            | RunEvent::AttemptFailed { run_id, .. }
            | RunEvent::StepFinished { run_id, .. }
            | RunEvent::RunAborted { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => *run_id,
        }
    }
}

/// Receives events as a run progresses
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEvents;

impl EventSink for TracingEvents {
    fn emit(&self, event: RunEvent) {
        match &event {
            RunEvent::RunStarted { run_id, scenario, steps } => {
                info!(%run_id, %scenario, steps, "Run started");
            }
            RunEvent::PlanReady { run_id, high_risk, complexity } => {
                info!(%run_id, high_risk, complexity, "Plan ready");
            }
            RunEvent::StepStarted { run_id, index, action, target, risk, budget } => {
                info!(%run_id, step = index, %action, %target, %risk, budget, "Step started");
            }
            RunEvent::AttemptFailed { run_id, index, attempt, error, will_retry } => {
                warn!(
                    %run_id,
                    step = index,
                    attempt,
                    kind = %error.kind,
                    error = %error.message,
                    will_retry,
                    "Attempt failed"
                );
            }
            RunEvent::StepFinished { run_id, index, status, attempts, duration_ms, locator } => {
                let locator = locator.as_ref().map(|l| l.to_string()).unwrap_or_default();
                info!(
                    %run_id,
                    step = index,
                    %status,
                    attempts,
                    duration_ms,
                    %locator,
                    "Step finished"
                );
            }
            RunEvent::RunAborted { run_id, at_step, reason } => {
                warn!(%run_id, at_step, %reason, "Run aborted");
            }
            RunEvent::RunFinished { run_id, scenario, verdict, quality, duration_ms } => {
                info!(
                    %run_id,
                    %scenario,
                    verdict = verdict.as_str(),
                    quality,
                    duration_ms,
                    "Run finished"
                );
            }
        }
    }
}

/// Forwards events into a channel; a closed receiver is ignored
impl EventSink for mpsc::UnboundedSender<RunEvent> {
    fn emit(&self, event: RunEvent) {
        let _ = self.send(event);
    }
}

/// Sends each event to both sinks
pub struct Tee<A, B>(pub A, pub B);

impl<A: EventSink, B: EventSink> EventSink for Tee<A, B> {
    fn emit(&self, event: RunEvent) {
        self.0.emit(event.clone());
        self.1.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = Tee(TracingEvents, tx);
        let run_id = Uuid::new_v4();
        sink.emit(RunEvent::RunAborted {
            run_id,
            at_step: 2,
            reason: "browser disconnected".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "run_aborted");
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(RunEvent::RunStarted {
            run_id: Uuid::new_v4(),
            scenario: "x".into(),
            steps: 1,
        });
    }
}
