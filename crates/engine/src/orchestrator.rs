//! Run orchestrator: validate, plan, execute, verify

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use stepwright_common::{EngineConfig, Scenario};

use crate::capability::{ArtifactSink, BrowserSession, LocatorOracle};
use crate::context::RunContext;
use crate::events::{EventSink, RunEvent, TracingEvents};
use crate::execute::{ExecuteOptions, ExecuteStage};
use crate::locator::LocatorResolver;
use crate::planner::{ExecutionPlan, Planner, RiskPolicy};
use crate::step::StepExecutor;
use crate::verify::{RunReport, Verifier};

/// Errors that stop a run before any stage starts
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl From<stepwright_common::Error> for EngineError {
    fn from(err: stepwright_common::Error) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

/// Scenario execution engine.
///
/// One engine can serve many runs, concurrently if each run has its own
/// browser session.
pub struct Engine {
    config: EngineConfig,
    planner: Planner,
    resolver: Arc<LocatorResolver>,
    events: Arc<dyn EventSink>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let policy = RiskPolicy::from_rules(&config.risk.rules)?;
        let resolver =
            LocatorResolver::new(Duration::from_millis(config.resolver.probe_timeout_ms));
        Ok(Self {
            planner: Planner::new(policy),
            resolver: Arc::new(resolver),
            events: Arc::new(TracingEvents),
            config,
        })
    }

    /// Consult `oracle` when deterministic locators are exhausted
    pub fn with_oracle(mut self, oracle: Arc<dyn LocatorOracle>) -> Self {
        let settings = &self.config.oracle;
        let probe_timeout = Duration::from_millis(self.config.resolver.probe_timeout_ms);
        let resolver = LocatorResolver::new(probe_timeout)
            .with_oracle(
                oracle,
                settings.retries,
                Duration::from_millis(settings.timeout_ms),
                settings.max_elements,
            );
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate and plan without touching a browser
    pub fn plan(&self, scenario: &Scenario) -> Result<ExecutionPlan, EngineError> {
        scenario.validate()?;
        Ok(self.planner.plan(scenario))
    }

    pub async fn run(
        &self,
        scenario: &Scenario,
        browser: Arc<dyn BrowserSession>,
    ) -> Result<RunReport, EngineError> {
        self.run_with_artifacts(scenario, browser, None).await
    }

    /// Run a scenario to a report.
    ///
    /// Only a malformed scenario returns `Err`; every other failure,
    /// including a lost browser, is reported inside the `RunReport`.
    pub async fn run_with_artifacts(
        &self,
        scenario: &Scenario,
        browser: Arc<dyn BrowserSession>,
        artifacts: Option<Arc<dyn ArtifactSink>>,
    ) -> Result<RunReport, EngineError> {
        scenario.validate()?;

        let context = Arc::new(RunContext::new(scenario.slug()));
        info!(
            run_id = %context.run_id,
            scenario = %scenario.name,
            browser = %scenario.config.browser,
            "Starting run"
        );
        self.events.emit(RunEvent::RunStarted {
            run_id: context.run_id,
            scenario: scenario.name.clone(),
            steps: scenario.steps.len(),
        });

        let plan = self.planner.plan(scenario);
        self.events.emit(RunEvent::PlanReady {
            run_id: context.run_id,
            high_risk: plan.analysis.risk_counts.high,
            complexity: plan.analysis.complexity_score,
        });

        let watcher = scenario.config.deadline_ms.map(|ms| {
            let token = context.cancel.clone();
            let run_id = context.run_id;
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        warn!(
                            %run_id,
                            deadline_ms = ms,
                            "Scenario deadline reached, cancelling run"
                        );
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        });

        let executor = StepExecutor::new(
            browser.clone(),
            artifacts,
            context.clone(),
            scenario.config.base_url.clone(),
        );
        let options = ExecuteOptions {
            default_timeout: Duration::from_millis(scenario.config.timeout_ms),
            screenshot_on_failure: self.config.artifacts.screenshot_on_failure,
            checkpoint_screenshots: self.config.artifacts.checkpoint_screenshots,
            trace_enabled: self.config.artifacts.trace_enabled,
        };
        let stage = ExecuteStage::new(
            browser,
            executor,
            self.resolver.clone(),
            context.clone(),
            self.events.clone(),
            options,
        );
        let ledger = stage.run(&plan).await;

        if let Some(handle) = watcher {
            handle.abort();
        }

        let report =
            Verifier::new(self.config.quality.clone()).verify(scenario, &plan, ledger, &context);
        self.events.emit(RunEvent::RunFinished {
            run_id: report.run_id,
            scenario: report.scenario.clone(),
            verdict: report.verdict,
            quality: report.quality.score,
            duration_ms: report.duration_ms,
        });

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwright_common::{Step, TargetDescriptor};

    #[test]
    fn test_invalid_weights_rejected() {
        let mut config = EngineConfig::default();
        config.quality.weights.success = 0.9;
        assert!(matches!(Engine::new(config), Err(EngineError::Configuration(_))));
    }

    #[test]
    fn test_plan_validates_first() {
        let engine = Engine::new(EngineConfig::default()).unwrap();
        let bad = Scenario::new("bad", vec![Step::fill(TargetDescriptor::default(), "x")]);
        let err = engine.plan(&bad).unwrap_err();
        assert!(err.to_string().contains("fill needs a target"));
    }
}
