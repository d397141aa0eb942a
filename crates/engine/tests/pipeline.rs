//! End-to-end runs of the engine against scripted collaborators

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use stepwright_common::{
    AssertCondition, EngineConfig, Scenario, ScenarioConfig, Step, TargetDescriptor, WaitCondition,
};
use stepwright_engine::execute::AbortReason;
use stepwright_engine::{
    ActOutput, ArtifactError, ArtifactKind, ArtifactSink, BrowserError, BrowserSession,
    Confidence, ElementAction, ElementHandle, Engine, LocatorCandidate, LocatorOracle,
    LocatorStrategy, OracleFailure, PageSummary, RunEvent, StepErrorKind, StepStatus, Verdict,
};

// ============================================================================
// Scripted collaborators
// ============================================================================

/// A fake page. Locators listed in `present` resolve; scripted errors are
/// returned (front first) before the normal behaviour kicks in.
#[derive(Default)]
struct ScriptedBrowser {
    present: Mutex<HashSet<String>>,
    find_errors: Mutex<HashMap<String, VecDeque<BrowserError>>>,
    act_errors: Mutex<HashMap<String, VecDeque<BrowserError>>>,
    hang_on_act: Mutex<HashSet<String>>,
    click_targets: Mutex<HashMap<String, String>>,
    texts: Mutex<HashMap<String, String>>,
    url: Mutex<String>,
    finds: Mutex<Vec<String>>,
    acts: Mutex<Vec<String>>,
}

impl ScriptedBrowser {
    fn with_present(locators: &[&str]) -> Arc<Self> {
        let browser = Self::default();
        browser
            .present
            .lock()
            .extend(locators.iter().map(|s| s.to_string()));
        Arc::new(browser)
    }

    fn fail_find(&self, locator: &str, errors: Vec<BrowserError>) {
        self.find_errors.lock().insert(locator.to_string(), errors.into());
    }

    fn fail_act(&self, locator: &str, errors: Vec<BrowserError>) {
        self.act_errors.lock().insert(locator.to_string(), errors.into());
    }

    fn finds_of(&self, locator: &str) -> usize {
        self.finds.lock().iter().filter(|f| *f == locator).count()
    }
}

#[async_trait]
impl BrowserSession for ScriptedBrowser {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        *self.url.lock() = url.to_string();
        Ok(())
    }

    async fn find(
        &self,
        candidate: &LocatorCandidate,
        _timeout: Duration,
    ) -> Result<ElementHandle, BrowserError> {
        let key = candidate.to_string();
        self.finds.lock().push(key.clone());
        let scripted = self.find_errors.lock().get_mut(&key).and_then(|q| q.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }
        let present = self.present.lock().contains(&key);
        if present {
            Ok(ElementHandle {
                id: key,
                locator: candidate.clone(),
            })
        } else {
            Err(BrowserError::NotFound(key))
        }
    }

    async fn act(
        &self,
        element: &ElementHandle,
        action: &ElementAction,
        _timeout: Duration,
    ) -> Result<ActOutput, BrowserError> {
        let key = element.id.clone();
        self.acts.lock().push(format!("{}:{}", action.name(), key));
        let hang = self.hang_on_act.lock().contains(&key);
        if hang {
            std::future::pending::<()>().await;
        }
        let scripted = self.act_errors.lock().get_mut(&key).and_then(|q| q.pop_front());
        if let Some(err) = scripted {
            return Err(err);
        }
        match action {
            ElementAction::Click => {
                let target = self.click_targets.lock().get(&key).cloned();
                if let Some(url) = target {
                    *self.url.lock() = url;
                }
                Ok(ActOutput::default())
            }
            ElementAction::ReadText => Ok(ActOutput {
                text: self.texts.lock().get(&key).cloned(),
                visible: None,
            }),
            ElementAction::IsVisible => Ok(ActOutput {
                text: None,
                visible: Some(true),
            }),
            ElementAction::Fill(_) | ElementAction::Select(_) => Ok(ActOutput::default()),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.url.lock().clone())
    }

    async fn wait_for(
        &self,
        condition: &WaitCondition,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        match condition {
            WaitCondition::UrlContains(fragment) => {
                let arrived = self.url.lock().contains(fragment.as_str());
                if arrived {
                    Ok(())
                } else {
                    Err(BrowserError::Timeout(format!("url never contained {}", fragment)))
                }
            }
            _ => Ok(()),
        }
    }

    async fn page_summary(&self) -> Result<PageSummary, BrowserError> {
        Ok(PageSummary {
            url: self.url.lock().clone(),
            title: "Scripted".into(),
            elements: Vec::new(),
        })
    }
}

struct StubOracle {
    answer: Result<LocatorCandidate, OracleFailure>,
    calls: Mutex<u32>,
}

impl StubOracle {
    fn suggesting(strategy: LocatorStrategy, value: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Ok(LocatorCandidate::new(strategy, value, Confidence::High)),
            calls: Mutex::new(0),
        })
    }
}

#[async_trait]
impl LocatorOracle for StubOracle {
    async fn resolve(
        &self,
        _target: &TargetDescriptor,
        _page: &PageSummary,
        _timeout: Duration,
    ) -> Result<LocatorCandidate, OracleFailure> {
        *self.calls.lock() += 1;
        self.answer.clone()
    }
}

#[derive(Default)]
struct RecordingSink {
    captured: Mutex<Vec<(ArtifactKind, String)>>,
}

#[async_trait]
impl ArtifactSink for RecordingSink {
    async fn capture(&self, kind: ArtifactKind, name: &str) -> Result<PathBuf, ArtifactError> {
        self.captured.lock().push((kind, name.to_string()));
        Ok(PathBuf::from("/artifacts").join(name))
    }
}

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

fn scenario(name: &str, retry_count: u32, steps: Vec<Step>) -> Scenario {
    Scenario::new(name, steps).with_config(ScenarioConfig {
        retry_count,
        base_url: Some("https://app.test".into()),
        ..Default::default()
    })
}

fn login_steps() -> Vec<Step> {
    vec![
        Step::navigate("/login"),
        Step::fill(TargetDescriptor::selector("#email"), "user@app.test"),
        Step::click(TargetDescriptor::text("Continue")),
        Step::assert(
            AssertCondition::UrlContains("/login".into()),
            TargetDescriptor::default(),
        ),
    ]
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_oracle_recovers_after_transient_failures() {
    let browser = ScriptedBrowser::with_present(&["css=[name=email]", "text=Continue"]);
    browser.fail_find(
        "css=#email",
        vec![
            BrowserError::Timeout("still loading".into()),
            BrowserError::Timeout("still loading".into()),
        ],
    );
    let oracle = StubOracle::suggesting(LocatorStrategy::Css, "[name=email]");
    let engine = engine().with_oracle(oracle.clone());

    let report = engine
        .run(&scenario("oracle", 2, login_steps()), browser.clone())
        .await
        .unwrap();

    let fill = &report.outcomes[1];
    assert_eq!(fill.status, StepStatus::Success);
    assert_eq!(fill.attempts, 3);
    assert_eq!(fill.history.len(), 3);
    assert_eq!(
        fill.history[0].error.as_ref().map(|e| e.kind),
        Some(StepErrorKind::Timeout)
    );
    assert!(fill.history[2].oracle_consulted);
    let locator = fill.locator.as_ref().unwrap();
    assert_eq!(locator.value, "[name=email]");
    assert_eq!(locator.confidence, Confidence::BestEffort);
    assert_eq!(*oracle.calls.lock(), 1);
    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.summary.oracle_assisted, 1);
    assert!(report
        .recommendations
        .iter()
        .any(|r| r.contains("pin the oracle-found locator css=[name=email]")));

    // Same scenario on a page where #email resolves immediately
    let clean = ScriptedBrowser::with_present(&["css=#email", "text=Continue"]);
    let baseline = engine
        .run(&scenario("oracle", 2, login_steps()), clean)
        .await
        .unwrap();
    assert_eq!(baseline.outcomes[1].attempts, 1);
    assert_eq!(baseline.verdict, Verdict::Pass);
    assert!(report.quality.score < baseline.quality.score);
}

#[tokio::test]
async fn test_high_risk_structural_failure_exhausts_after_one_attempt() {
    let browser = ScriptedBrowser::with_present(&["text=Delete account"]);
    browser.fail_act(
        "text=Delete account",
        vec![BrowserError::NotInteractable("covered by a modal".into()); 5],
    );
    let sink = Arc::new(RecordingSink::default());
    let artifacts: Arc<dyn ArtifactSink> = sink.clone();

    let report = engine()
        .run_with_artifacts(
            &scenario(
                "delete",
                3,
                vec![
                    Step::navigate("/settings"),
                    Step::click(TargetDescriptor::text("Delete account")),
                ],
            ),
            browser.clone(),
            Some(artifacts),
        )
        .await
        .unwrap();

    let click = &report.outcomes[1];
    assert_eq!(click.risk, stepwright_common::RiskTier::High);
    assert_eq!(click.status, StepStatus::Failed);
    assert_eq!(click.attempts, 1);
    assert_eq!(click.error.as_ref().unwrap().kind, StepErrorKind::NotInteractable);
    assert_eq!(browser.acts.lock().len(), 1);

    // Checkpoint before the first attempt, evidence after the failure
    let captured = sink.captured.lock();
    assert_eq!(captured.len(), 2);
    assert!(captured[0].1.ends_with("-s01-checkpoint.png"));
    assert!(captured[1].1.ends_with("-s01-failure.png"));
    assert_eq!(click.artifacts.len(), 2);
    assert_eq!(report.artifacts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_interrupts_hung_step() {
    let browser = ScriptedBrowser::with_present(&["text=Pay now", "text=Receipt"]);
    browser.hang_on_act.lock().insert("text=Pay now".into());

    let mut scenario = scenario(
        "deadline",
        2,
        vec![
            Step::navigate("/checkout"),
            Step::click(TargetDescriptor::text("Pay now")),
            Step::click(TargetDescriptor::text("Receipt")),
            Step::assert(
                AssertCondition::UrlContains("/done".into()),
                TargetDescriptor::default(),
            ),
        ],
    );
    scenario.config.deadline_ms = Some(500);

    let report = engine().run(&scenario, browser).await.unwrap();

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.outcomes[0].status, StepStatus::Success);
    let hung = &report.outcomes[1];
    assert_eq!(hung.status, StepStatus::Failed);
    assert_eq!(hung.error.as_ref().unwrap().kind, StepErrorKind::Timeout);
    assert_eq!(hung.attempts, 1);
    assert_eq!(report.outcomes[2].status, StepStatus::Skipped);
    assert_eq!(report.outcomes[3].status, StepStatus::Skipped);
    assert_eq!(
        report.abort,
        Some(AbortReason {
            at_step: 1,
            kind: StepErrorKind::Timeout,
            message: "scenario deadline exceeded".into(),
        })
    );
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test]
async fn test_lost_browser_aborts_but_still_reports() {
    let browser = ScriptedBrowser::with_present(&["css=#email", "text=Continue"]);
    browser.fail_act(
        "text=Continue",
        vec![BrowserError::Disconnected("target closed".into())],
    );

    let report = engine()
        .run(&scenario("lost", 2, login_steps()), browser)
        .await
        .unwrap();

    let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![
            StepStatus::Success,
            StepStatus::Success,
            StepStatus::Failed,
            StepStatus::Skipped
        ]
    );
    assert_eq!(report.outcomes[2].attempts, 1);
    let abort = report.abort.as_ref().unwrap();
    assert_eq!(abort.kind, StepErrorKind::Infrastructure);
    assert_eq!(abort.at_step, 2);
    assert_eq!(report.summary.skipped, 1);
    assert!(report.failures[0].critical);
}

#[tokio::test]
async fn test_structural_failure_moves_to_alternate_locator() {
    let browser = ScriptedBrowser::with_present(&["css=#save", "text=Save"]);
    browser.fail_act(
        "css=#save",
        vec![BrowserError::NotInteractable("disabled".into())],
    );
    let target = TargetDescriptor {
        selector: Some("#save".into()),
        text: Some("Save".into()),
        ..Default::default()
    };

    let report = engine()
        .run(
            &scenario("alternate", 2, vec![Step::navigate("/form"), Step::click(target)]),
            browser.clone(),
        )
        .await
        .unwrap();

    let click = &report.outcomes[1];
    assert_eq!(click.status, StepStatus::Success);
    assert_eq!(click.attempts, 2);
    assert_eq!(click.locator.as_ref().unwrap().strategy, LocatorStrategy::Text);
    // The failed selector is never probed again
    assert_eq!(browser.finds_of("css=#save"), 1);
}

#[tokio::test]
async fn test_missed_locator_is_probed_again_after_transient_failure() {
    let browser = ScriptedBrowser::with_present(&["css=#go", "text=Go"]);
    // Attempt 1: the selector is not there yet and the text match is re-rendering
    browser.fail_find("css=#go", vec![BrowserError::NotFound("css=#go".into())]);
    browser.fail_find("text=Go", vec![BrowserError::Detached("re-rendered".into())]);
    let target = TargetDescriptor {
        selector: Some("#go".into()),
        text: Some("Go".into()),
        ..Default::default()
    };

    let report = engine()
        .run(
            &scenario("late-selector", 1, vec![Step::click(target)]),
            browser.clone(),
        )
        .await
        .unwrap();

    let click = &report.outcomes[0];
    assert_eq!(click.status, StepStatus::Success);
    assert_eq!(click.attempts, 2);
    assert_eq!(click.locator.as_ref().unwrap().strategy, LocatorStrategy::Css);
    assert_eq!(browser.finds_of("css=#go"), 2);
}

#[tokio::test]
async fn test_transient_failures_consume_whole_budget() {
    let browser = ScriptedBrowser::with_present(&[]);
    browser.fail_find(
        "label=Email",
        vec![BrowserError::Detached("re-rendered".into()); 10],
    );

    let report = engine()
        .run(
            &scenario(
                "flaky",
                2,
                vec![Step::fill(TargetDescriptor::label("Email"), "a@b.c")],
            ),
            browser,
        )
        .await
        .unwrap();

    let fill = &report.outcomes[0];
    assert_eq!(fill.attempts, 3);
    assert_eq!(fill.error.as_ref().unwrap().kind, StepErrorKind::ElementDetached);
}

#[tokio::test]
async fn test_high_risk_step_never_retries_when_retries_disabled() {
    let browser = ScriptedBrowser::with_present(&["text=Delete account"]);
    browser.fail_act(
        "text=Delete account",
        vec![BrowserError::Timeout("no response".into()); 5],
    );

    let report = engine()
        .run(
            &scenario(
                "no-retries",
                0,
                vec![Step::click(TargetDescriptor::text("Delete account"))],
            ),
            browser.clone(),
        )
        .await
        .unwrap();

    let click = &report.outcomes[0];
    assert_eq!(click.risk, stepwright_common::RiskTier::High);
    assert_eq!(click.status, StepStatus::Failed);
    assert_eq!(click.attempts, 1);
    assert_eq!(browser.acts.lock().len(), 1);
}

#[tokio::test]
async fn test_failures_do_not_skip_later_steps() {
    let browser = ScriptedBrowser::with_present(&["text=Continue", "css=h1"]);
    browser
        .click_targets
        .lock()
        .insert("text=Continue".into(), "https://app.test/dashboard".into());
    browser
        .texts
        .lock()
        .insert("css=h1".into(), "Dashboard".into());

    let steps = vec![
        Step::navigate("/login"),
        Step::fill(TargetDescriptor::label("Missing"), "x"),
        Step::click(TargetDescriptor::text("Continue")),
        Step::wait(WaitCondition::UrlContains("/dashboard".into())),
        Step::assert(
            AssertCondition::TextContains("Dashboard".into()),
            TargetDescriptor::selector("h1"),
        ),
        Step::assert(
            AssertCondition::UrlNotContains("/login".into()),
            TargetDescriptor::default(),
        ),
    ];
    let report = engine()
        .run(&scenario("partial", 1, steps), browser)
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 6);
    assert!(report.abort.is_none());
    assert_eq!(report.outcomes[1].status, StepStatus::Failed);
    assert_eq!(report.outcomes[1].attempts, 1);
    assert_eq!(report.outcomes[1].error.as_ref().unwrap().kind, StepErrorKind::Resolution);
    assert!(report.outcomes[2..].iter().all(|o| o.status == StepStatus::Success));
    assert_eq!(report.assertions.total, 2);
    assert_eq!(report.assertions.passed, 2);
    assert_eq!(report.verdict, Verdict::Fail);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_outcome_count_and_attempt_bound() {
    let browser = ScriptedBrowser::with_present(&["css=#email", "text=Continue"]);
    browser.fail_find("css=#email", vec![BrowserError::Timeout("slow".into())]);
    browser.fail_act("text=Continue", vec![BrowserError::Detached("gone".into()); 2]);

    let engine = engine();
    let scenario = scenario("bounds", 1, login_steps());
    let plan = engine.plan(&scenario).unwrap();
    let report = engine.run(&scenario, browser).await.unwrap();

    assert_eq!(report.outcomes.len(), plan.steps.len());
    for (outcome, planned) in report.outcomes.iter().zip(&plan.steps) {
        assert_eq!(outcome.index, planned.index);
        assert!(outcome.attempts <= planned.retry_budget + 1);
    }
}

#[test]
fn test_plan_is_idempotent() {
    let engine = engine();
    let scenario = scenario("idempotent", 2, login_steps());
    assert_eq!(engine.plan(&scenario).unwrap(), engine.plan(&scenario).unwrap());
}

#[tokio::test]
async fn test_verdict_is_monotonic() {
    let good = ScriptedBrowser::with_present(&["css=#email", "text=Continue"]);
    let report = engine()
        .run(&scenario("mono", 0, login_steps()), good)
        .await
        .unwrap();
    assert_eq!(report.verdict, Verdict::Pass);

    // Turning any single step into a failure can only fail the run
    for broken in ["css=#email", "text=Continue"] {
        let browser = ScriptedBrowser::with_present(&["css=#email", "text=Continue"]);
        browser.present.lock().remove(broken);
        let report = engine()
            .run(&scenario("mono", 0, login_steps()), browser)
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Fail);
    }
}

#[tokio::test]
async fn test_invalid_scenario_is_rejected_before_running() {
    let browser = ScriptedBrowser::with_present(&[]);
    let bad = scenario("bad", 1, vec![]);
    let err = engine().run(&bad, browser.clone()).await.unwrap_err();
    assert!(err.to_string().contains("no steps"));
    assert!(browser.finds.lock().is_empty());
}

#[tokio::test]
async fn test_events_stream_through_channel() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = engine().with_events(Arc::new(tx));
    let browser = ScriptedBrowser::with_present(&["css=#email", "text=Continue"]);

    let report = engine
        .run(&scenario("events", 1, login_steps()), browser)
        .await
        .unwrap();
    drop(engine);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(RunEvent::RunStarted { steps: 4, .. })));
    assert!(matches!(events.last(), Some(RunEvent::RunFinished { .. })));
    let started = events
        .iter()
        .filter(|e| matches!(e, RunEvent::StepStarted { .. }))
        .count();
    assert_eq!(started, 4);
    assert!(events.iter().all(|e| e.run_id() == report.run_id));
}
