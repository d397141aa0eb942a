//! Step executor: one browser operation per call

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use stepwright_common::{join_url, Action, AssertCondition, Step, WaitCondition};

use crate::capability::{
    ActOutput, ArtifactKind, ArtifactSink, BrowserSession, ElementAction, ElementHandle,
};
use crate::context::{AttemptClock, Interrupted, RunContext};
use crate::outcome::{ArtifactRef, StepError, StepErrorKind};

/// Side products of a successful operation
#[derive(Debug, Default)]
pub struct Performed {
    pub artifacts: Vec<ArtifactRef>,
}

pub struct StepExecutor {
    browser: Arc<dyn BrowserSession>,
    artifacts: Option<Arc<dyn ArtifactSink>>,
    context: Arc<RunContext>,
    base_url: Option<String>,
}

fn interrupted(what: &str, err: Interrupted) -> StepError {
    StepError::new(StepErrorKind::Timeout, format!("{} interrupted: {}", what, err))
}

impl StepExecutor {
    pub fn new(
        browser: Arc<dyn BrowserSession>,
        artifacts: Option<Arc<dyn ArtifactSink>>,
        context: Arc<RunContext>,
        base_url: Option<String>,
    ) -> Self {
        Self {
            browser,
            artifacts,
            context,
            base_url,
        }
    }

    /// Perform exactly one operation for the step.
    ///
    /// `element` must be set for actions that operate on an element. Partial
    /// side effects of a failed operation are left in place.
    pub async fn perform(
        &self,
        index: usize,
        step: &Step,
        element: Option<&ElementHandle>,
        clock: &AttemptClock,
    ) -> Result<Performed, StepError> {
        match &step.action {
            Action::Navigate { url } => {
                let url = join_url(self.base_url.as_deref(), url);
                debug!(%url, "Navigating");
                clock
                    .guard(self.browser.navigate(&url, clock.remaining()))
                    .await
                    .map_err(|e| interrupted("navigation", e))??;
                Ok(Performed::default())
            }
            Action::Fill { value } => {
                self.act(element, ElementAction::Fill(value.clone()), clock).await?;
                Ok(Performed::default())
            }
            Action::Click => {
                self.act(element, ElementAction::Click, clock).await?;
                Ok(Performed::default())
            }
            Action::Select { option } => {
                self.act(element, ElementAction::Select(option.clone()), clock)
                    .await?;
                Ok(Performed::default())
            }
            Action::Assert { condition } => {
                self.check(condition, element, clock).await?;
                Ok(Performed::default())
            }
            Action::Wait { condition } => {
                self.wait(condition, clock).await?;
                Ok(Performed::default())
            }
            Action::Capture { name, full_page } => {
                let kind = if *full_page {
                    ArtifactKind::FullPageScreenshot
                } else {
                    ArtifactKind::Screenshot
                };
                let artifact = self.capture(Some(index), name, kind, clock).await?;
                Ok(Performed {
                    artifacts: vec![artifact],
                })
            }
        }
    }

    async fn act(
        &self,
        element: Option<&ElementHandle>,
        action: ElementAction,
        clock: &AttemptClock,
    ) -> Result<ActOutput, StepError> {
        let element = element.ok_or_else(|| {
            StepError::new(
                StepErrorKind::Configuration,
                format!("{} requires a resolved element", action.name()),
            )
        })?;
        debug!(locator = %element.locator, action = action.name(), "Acting on element");
        let output = clock
            .guard(self.browser.act(element, &action, clock.remaining()))
            .await
            .map_err(|e| interrupted(action.name(), e))??;
        Ok(output)
    }

    async fn check(
        &self,
        condition: &AssertCondition,
        element: Option<&ElementHandle>,
        clock: &AttemptClock,
    ) -> Result<(), StepError> {
        match condition {
            AssertCondition::UrlContains(fragment) => {
                let url = self.current_url(clock).await?;
                if url.contains(fragment.as_str()) {
                    Ok(())
                } else {
                    Err(StepError::new(
                        StepErrorKind::AssertionMismatch,
                        format!("expected URL to contain '{}', got '{}'", fragment, url),
                    ))
                }
            }
            AssertCondition::UrlNotContains(fragment) => {
                let url = self.current_url(clock).await?;
                if url.contains(fragment.as_str()) {
                    Err(StepError::new(
                        StepErrorKind::AssertionMismatch,
                        format!("expected URL not to contain '{}', got '{}'", fragment, url),
                    ))
                } else {
                    Ok(())
                }
            }
            AssertCondition::Visible => {
                let output = self.act(element, ElementAction::IsVisible, clock).await?;
                match output.visible {
                    Some(true) => Ok(()),
                    _ => Err(StepError::new(
                        StepErrorKind::AssertionMismatch,
                        "element is not visible",
                    )),
                }
            }
            AssertCondition::TextContains(expected) => {
                let output = self.act(element, ElementAction::ReadText, clock).await?;
                let text = output.text.unwrap_or_default();
                if text.contains(expected.as_str()) {
                    Ok(())
                } else {
                    Err(StepError::new(
                        StepErrorKind::AssertionMismatch,
                        format!("expected text to contain '{}'", expected),
                    )
                    .with_detail(format!("actual text: {}", text)))
                }
            }
        }
    }

    async fn wait(&self, condition: &WaitCondition, clock: &AttemptClock) -> Result<(), StepError> {
        match condition {
            WaitCondition::Delay { ms } => clock
                .guard(tokio::time::sleep(Duration::from_millis(*ms)))
                .await
                .map_err(|e| interrupted("wait", e)),
            other => {
                clock
                    .guard(self.browser.wait_for(other, clock.remaining()))
                    .await
                    .map_err(|e| interrupted("wait", e))??;
                Ok(())
            }
        }
    }

    async fn current_url(&self, clock: &AttemptClock) -> Result<String, StepError> {
        let url = clock
            .guard(self.browser.current_url())
            .await
            .map_err(|e| interrupted("reading URL", e))??;
        Ok(url)
    }

    /// Capture an artifact under a run-unique name
    pub async fn capture(
        &self,
        index: Option<usize>,
        label: &str,
        kind: ArtifactKind,
        clock: &AttemptClock,
    ) -> Result<ArtifactRef, StepError> {
        let sink = self.artifacts.as_ref().ok_or_else(|| {
            StepError::new(StepErrorKind::CaptureFailed, "no artifact sink configured")
        })?;
        let name = self.context.namer.name(index, label, kind);
        let path = clock
            .guard(sink.capture(kind, &name))
            .await
            .map_err(|e| interrupted("capture", e))?
            .map_err(|e| StepError::new(StepErrorKind::CaptureFailed, e.to_string()))?;
        Ok(ArtifactRef {
            kind,
            name,
            path,
            step: index,
        })
    }

    pub fn has_artifact_sink(&self) -> bool {
        self.artifacts.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{BrowserError, LocatorCandidate, PageSummary};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    struct StaticPage {
        url: String,
        text: String,
        visited: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BrowserSession for StaticPage {
        async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            self.visited.lock().push(url.to_string());
            Ok(())
        }

        async fn find(
            &self,
            candidate: &LocatorCandidate,
            _timeout: Duration,
        ) -> Result<ElementHandle, BrowserError> {
            Err(BrowserError::NotFound(candidate.to_string()))
        }

        async fn act(
            &self,
            _element: &ElementHandle,
            action: &ElementAction,
            _timeout: Duration,
        ) -> Result<ActOutput, BrowserError> {
            Ok(match action {
                ElementAction::ReadText => ActOutput {
                    text: Some(self.text.clone()),
                    visible: None,
                },
                ElementAction::IsVisible => ActOutput {
                    text: None,
                    visible: Some(false),
                },
                _ => ActOutput::default(),
            })
        }

        async fn current_url(&self) -> Result<String, BrowserError> {
            Ok(self.url.clone())
        }

        async fn wait_for(&self, _c: &WaitCondition, _t: Duration) -> Result<(), BrowserError> {
            Ok(())
        }

        async fn page_summary(&self) -> Result<PageSummary, BrowserError> {
            Ok(PageSummary::default())
        }
    }

    fn executor(page: Arc<StaticPage>) -> StepExecutor {
        StepExecutor::new(
            page,
            None,
            Arc::new(RunContext::new("unit")),
            Some("https://app.test".to_string()),
        )
    }

    fn page() -> Arc<StaticPage> {
        Arc::new(StaticPage {
            url: "https://app.test/login".into(),
            text: "Welcome back".into(),
            visited: Mutex::new(Vec::new()),
        })
    }

    fn element() -> ElementHandle {
        ElementHandle {
            id: "e1".into(),
            locator: LocatorCandidate::new(
                crate::capability::LocatorStrategy::Css,
                "h1",
                crate::capability::Confidence::Exact,
            ),
        }
    }

    fn clock() -> AttemptClock {
        AttemptClock::new(Duration::from_secs(5), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_navigate_joins_base_url() {
        let page = page();
        let exec = executor(page.clone());
        exec.perform(0, &Step::navigate("/login"), None, &clock())
            .await
            .unwrap();
        assert_eq!(page.visited.lock().as_slice(), ["https://app.test/login"]);
    }

    #[tokio::test]
    async fn test_url_assertions() {
        let exec = executor(page());
        let ok = Step::assert(
            AssertCondition::UrlContains("/login".into()),
            Default::default(),
        );
        assert!(exec.perform(0, &ok, None, &clock()).await.is_ok());

        let bad = Step::assert(
            AssertCondition::UrlNotContains("/login".into()),
            Default::default(),
        );
        let err = exec.perform(1, &bad, None, &clock()).await.unwrap_err();
        assert_eq!(err.kind, StepErrorKind::AssertionMismatch);
    }

    #[tokio::test]
    async fn test_text_and_visibility_assertions() {
        let exec = executor(page());
        let el = element();
        let text = Step::assert(
            AssertCondition::TextContains("Welcome".into()),
            stepwright_common::TargetDescriptor::selector("h1"),
        );
        assert!(exec.perform(0, &text, Some(&el), &clock()).await.is_ok());

        let visible = Step::assert(
            AssertCondition::Visible,
            stepwright_common::TargetDescriptor::selector("h1"),
        );
        let err = exec
            .perform(1, &visible, Some(&el), &clock())
            .await
            .unwrap_err();
        assert_eq!(err.kind, StepErrorKind::AssertionMismatch);
    }

    #[tokio::test]
    async fn test_capture_without_sink_fails() {
        let exec = executor(page());
        let err = exec
            .perform(0, &Step::capture("shot"), None, &clock())
            .await
            .unwrap_err();
        assert_eq!(err.kind, StepErrorKind::CaptureFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_beyond_deadline_times_out() {
        let exec = executor(page());
        let clock = AttemptClock::new(Duration::from_millis(100), CancellationToken::new());
        let step = Step::wait(WaitCondition::Delay { ms: 5_000 });
        let err = exec.perform(0, &step, None, &clock).await.unwrap_err();
        assert_eq!(err.kind, StepErrorKind::Timeout);
    }
}
