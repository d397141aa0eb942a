//! The bundled example scenario, run end to end against the simulated page

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use stepwright_common::config::DefaultsConfig;
use stepwright_common::loader::{example_scenario, parse_scenario};
use stepwright_common::{EngineConfig, TargetDescriptor};
use stepwright_driver::DryRunSession;
use stepwright_engine::{
    ArtifactSink, Confidence, Engine, LocatorCandidate, LocatorOracle, LocatorStrategy,
    OracleFailure, PageSummary, StepErrorKind, StepStatus, Verdict,
};

struct LogoutOracle;

#[async_trait]
impl LocatorOracle for LogoutOracle {
    async fn resolve(
        &self,
        _target: &TargetDescriptor,
        _page: &PageSummary,
        _timeout: Duration,
    ) -> Result<LocatorCandidate, OracleFailure> {
        Ok(LocatorCandidate::new(LocatorStrategy::Text, "Log out", Confidence::Low))
    }
}

#[tokio::test]
async fn test_example_runs_against_dry_page() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = parse_scenario(example_scenario(), &DefaultsConfig::default()).unwrap();
    let page = Arc::new(
        DryRunSession::new()
            .with_text("css=h1", "Dashboard")
            .with_artifacts_dir(dir.path()),
    );
    let sink: Arc<dyn ArtifactSink> = page.clone();

    let report = Engine::new(EngineConfig::default())
        .unwrap()
        .run_with_artifacts(&scenario, page.clone(), Some(sink))
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 11);
    assert!(report.outcomes[..9].iter().all(|o| o.status == StepStatus::Success));

    // Intent-only target and no oracle configured
    let logout = &report.outcomes[9];
    assert_eq!(logout.status, StepStatus::Failed);
    assert_eq!(logout.attempts, 1);
    assert_eq!(logout.error.as_ref().unwrap().kind, StepErrorKind::Resolution);
    assert_eq!(report.verdict, Verdict::Fail);

    assert_eq!(page.value_of("label=Email").as_deref(), Some("user@example.test"));
    let screenshot = report
        .artifacts
        .iter()
        .find(|a| a.name.ends_with("-s08-dashboard.png"))
        .expect("dashboard screenshot recorded");
    assert!(screenshot.path.exists());
}

#[tokio::test]
async fn test_oracle_resolves_intent_only_target() {
    let scenario = parse_scenario(example_scenario(), &DefaultsConfig::default()).unwrap();
    let page = Arc::new(DryRunSession::new().with_text("css=h1", "Dashboard"));

    let report = Engine::new(EngineConfig::default())
        .unwrap()
        .with_oracle(Arc::new(LogoutOracle))
        .run(&scenario, page.clone())
        .await
        .unwrap();

    let logout = &report.outcomes[9];
    assert_eq!(logout.status, StepStatus::Success);
    assert!(logout.used_oracle());
    assert!(page.calls().iter().any(|c| c == "click:text=Log out"));
    // The simulated page never leaves the dashboard
    assert_eq!(
        report.outcomes[10].error.as_ref().unwrap().kind,
        StepErrorKind::AssertionMismatch
    );
}
