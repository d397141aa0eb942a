//! Simulated browser for dry runs
//!
//! The page is cooperative: every locator resolves unless marked missing,
//! waiting for a URL fragment "arrives" at it, and text reads echo the text
//! the element was located by. This exercises loading, planning and the
//! execute/verify pipeline without a real browser.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use stepwright_common::{join_url, WaitCondition};
use stepwright_engine::{
    ActOutput, ArtifactError, ArtifactKind, ArtifactSink, BrowserError, BrowserSession,
    ElementAction, ElementHandle, LocatorCandidate, LocatorStrategy, PageElement, PageSummary,
};

#[derive(Debug, Default)]
struct PageState {
    url: String,
    calls: Vec<String>,
    values: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct DryRunSession {
    state: Mutex<PageState>,
    missing: HashSet<String>,
    texts: HashMap<String, String>,
    artifacts_dir: Option<PathBuf>,
}

impl DryRunSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locators (`strategy=value`) that never resolve
    pub fn with_missing<I, S>(mut self, locators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.missing.extend(locators.into_iter().map(Into::into));
        self
    }

    /// Text returned when the element at `locator` is read
    pub fn with_text(mut self, locator: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(locator.into(), text.into());
        self
    }

    /// Write placeholder artifact files under `dir`
    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    /// Every call made so far, as `op:detail`
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Value last filled or selected into `locator`
    pub fn value_of(&self, locator: &str) -> Option<String> {
        self.state.lock().values.get(locator).cloned()
    }

    fn record(&self, call: String) {
        debug!(call = %call, "Dry run");
        self.state.lock().calls.push(call);
    }
}

/// `scheme://host` of an absolute URL
fn origin(url: &str) -> Option<&str> {
    let start = url.find("://")? + 3;
    match url[start..].find('/') {
        Some(end) => Some(&url[..start + end]),
        None => Some(url),
    }
}

#[async_trait]
impl BrowserSession for DryRunSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        self.record(format!("navigate:{}", url));
        self.state.lock().url = url.to_string();
        Ok(())
    }

    async fn find(
        &self,
        candidate: &LocatorCandidate,
        _timeout: Duration,
    ) -> Result<ElementHandle, BrowserError> {
        let key = candidate.to_string();
        self.record(format!("find:{}", key));
        if self.missing.contains(&key) {
            return Err(BrowserError::NotFound(key));
        }
        Ok(ElementHandle {
            id: key,
            locator: candidate.clone(),
        })
    }

    async fn act(
        &self,
        element: &ElementHandle,
        action: &ElementAction,
        _timeout: Duration,
    ) -> Result<ActOutput, BrowserError> {
        self.record(format!("{}:{}", action.name(), element.id));
        match action {
            ElementAction::Fill(value) | ElementAction::Select(value) => {
                self.state.lock().values.insert(element.id.clone(), value.clone());
                Ok(ActOutput::default())
            }
            ElementAction::Click => Ok(ActOutput::default()),
            ElementAction::ReadText => {
                let text = self.texts.get(&element.id).cloned().or_else(|| {
                    match element.locator.strategy {
                        LocatorStrategy::Css => None,
                        _ => Some(element.locator.value.clone()),
                    }
                });
                Ok(ActOutput {
                    text: Some(text.unwrap_or_default()),
                    visible: None,
                })
            }
            ElementAction::IsVisible => Ok(ActOutput {
                text: None,
                visible: Some(true),
            }),
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.state.lock().url.clone())
    }

    async fn wait_for(
        &self,
        condition: &WaitCondition,
        _timeout: Duration,
    ) -> Result<(), BrowserError> {
        match condition {
            WaitCondition::Delay { ms } => {
                self.record(format!("wait:delay {}ms", ms));
            }
            WaitCondition::Selector(selector) => {
                self.record(format!("wait:selector {}", selector));
                if self.missing.contains(&format!("css={}", selector)) {
                    return Err(BrowserError::Timeout(format!("{} never became visible", selector)));
                }
            }
            WaitCondition::UrlContains(fragment) => {
                self.record(format!("wait:url {}", fragment));
                let mut state = self.state.lock();
                if !state.url.contains(fragment.as_str()) {
                    let arrived = join_url(origin(&state.url), fragment);
                    state.url = arrived;
                }
            }
        }
        Ok(())
    }

    async fn page_summary(&self) -> Result<PageSummary, BrowserError> {
        let state = self.state.lock();
        let elements = state
            .values
            .keys()
            .map(|locator| PageElement {
                tag: "input".into(),
                id: None,
                role: None,
                name: Some(locator.clone()),
                text: None,
                placeholder: None,
            })
            .collect();
        Ok(PageSummary {
            url: state.url.clone(),
            title: "Dry run".into(),
            elements,
        })
    }
}

#[async_trait]
impl ArtifactSink for DryRunSession {
    async fn capture(&self, kind: ArtifactKind, name: &str) -> Result<PathBuf, ArtifactError> {
        self.record(format!("capture:{}", name));
        let dir = self
            .artifacts_dir
            .as_ref()
            .ok_or(ArtifactError::Unsupported(kind))?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(name);
        tokio::fs::write(&path, b"").await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwright_engine::Confidence;

    fn css(value: &str) -> LocatorCandidate {
        LocatorCandidate::new(LocatorStrategy::Css, value, Confidence::Exact)
    }

    #[tokio::test]
    async fn test_missing_locators_do_not_resolve() {
        let page = DryRunSession::new().with_missing(["css=#gone"]);
        let timeout = Duration::from_secs(1);
        assert!(page.find(&css("#here"), timeout).await.is_ok());
        assert!(matches!(
            page.find(&css("#gone"), timeout).await,
            Err(BrowserError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_url_follows_navigation_and_waits() {
        let page = DryRunSession::new();
        let timeout = Duration::from_secs(1);
        page.navigate("https://app.test/login", timeout).await.unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://app.test/login");

        page.wait_for(&WaitCondition::UrlContains("/dashboard".into()), timeout)
            .await
            .unwrap();
        assert_eq!(page.current_url().await.unwrap(), "https://app.test/dashboard");
    }

    #[test]
    fn test_origin() {
        assert_eq!(origin("https://app.test/a/b"), Some("https://app.test"));
        assert_eq!(origin("https://app.test"), Some("https://app.test"));
        assert_eq!(origin("/relative"), None);
    }

    #[tokio::test]
    async fn test_fill_and_read_back() {
        let page = DryRunSession::new().with_text("css=h1", "Welcome");
        let timeout = Duration::from_secs(1);
        let field = page.find(&css("#email"), timeout).await.unwrap();
        page.act(&field, &ElementAction::Fill("a@b.c".into()), timeout)
            .await
            .unwrap();
        assert_eq!(page.value_of("css=#email").as_deref(), Some("a@b.c"));

        let heading = page.find(&css("h1"), timeout).await.unwrap();
        let out = page.act(&heading, &ElementAction::ReadText, timeout).await.unwrap();
        assert_eq!(out.text.as_deref(), Some("Welcome"));

        let calls = page.calls();
        assert_eq!(calls[0], "find:css=#email");
        assert_eq!(calls[1], "fill:css=#email");
    }

    #[tokio::test]
    async fn test_capture_writes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let page = DryRunSession::new().with_artifacts_dir(dir.path());
        let path = page
            .capture(ArtifactKind::Screenshot, "run-s01-checkpoint.png")
            .await
            .unwrap();
        assert!(path.exists());

        let bare = DryRunSession::new();
        assert!(matches!(
            bare.capture(ArtifactKind::Trace, "run-trace.zip").await,
            Err(ArtifactError::Unsupported(ArtifactKind::Trace))
        ));
    }
}
