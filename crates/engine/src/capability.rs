//! Collaborator interfaces the engine drives
//!
//! The engine never talks to a browser, a language model or the filesystem
//! directly. It goes through these traits, which the driver crate (or a test
//! double) implements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use stepwright_common::{TargetDescriptor, WaitCondition};

// ============================================================================
// Locator candidates
// ============================================================================

/// How a candidate locates its element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorStrategy {
    Css,
    Label,
    AccessibleName,
    Placeholder,
    Text,
}

impl LocatorStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorStrategy::Css => "css",
            LocatorStrategy::Label => "label",
            LocatorStrategy::AccessibleName => "accessible_name",
            LocatorStrategy::Placeholder => "placeholder",
            LocatorStrategy::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "css" | "selector" => Some(LocatorStrategy::Css),
            "label" => Some(LocatorStrategy::Label),
            "accessible_name" | "role" | "name" | "aria" => Some(LocatorStrategy::AccessibleName),
            "placeholder" => Some(LocatorStrategy::Placeholder),
            "text" => Some(LocatorStrategy::Text),
            _ => None,
        }
    }
}

/// Confidence tier, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    BestEffort,
    Low,
    Medium,
    High,
    Exact,
}

/// A concrete way of locating an element on the live page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorCandidate {
    pub strategy: LocatorStrategy,
    pub value: String,
    pub confidence: Confidence,
}

impl LocatorCandidate {
    pub fn new(
        strategy: LocatorStrategy,
        value: impl Into<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            strategy,
            value: value.into(),
            confidence,
        }
    }

    /// Candidates denote the same locator iff strategy and value match
    pub fn same_locator(&self, other: &LocatorCandidate) -> bool {
        self.strategy == other.strategy && self.value == other.value
    }
}

impl fmt::Display for LocatorCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.as_str(), self.value)
    }
}

// ============================================================================
// Browser session
// ============================================================================

/// Opaque reference to a located element, valid until the page changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: String,
    pub locator: LocatorCandidate,
}

/// Operation applied to a located element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementAction {
    Fill(String),
    Click,
    Select(String),
    ReadText,
    IsVisible,
}

impl ElementAction {
    pub fn name(&self) -> &'static str {
        match self {
            ElementAction::Fill(_) => "fill",
            ElementAction::Click => "click",
            ElementAction::Select(_) => "select",
            ElementAction::ReadText => "read_text",
            ElementAction::IsVisible => "is_visible",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActOutput {
    pub text: Option<String>,
    pub visible: Option<bool>,
}

/// Compact structural description of the current page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub elements: Vec<PageElement>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageElement {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl PageSummary {
    /// One line per element, truncated to `max_elements`
    pub fn render_compact(&self, max_elements: usize) -> String {
        let mut out = format!("url: {}\ntitle: {}\n", self.url, self.title);
        for el in self.elements.iter().take(max_elements) {
            out.push('<');
            out.push_str(&el.tag);
            if let Some(id) = &el.id {
                out.push_str(&format!(" id=\"{}\"", id));
            }
            if let Some(role) = &el.role {
                out.push_str(&format!(" role=\"{}\"", role));
            }
            if let Some(name) = &el.name {
                out.push_str(&format!(" name=\"{}\"", name));
            }
            if let Some(p) = &el.placeholder {
                out.push_str(&format!(" placeholder=\"{}\"", p));
            }
            out.push('>');
            if let Some(text) = &el.text {
                let text: String = text.chars().take(80).collect();
                out.push_str(&text);
            }
            out.push('\n');
        }
        if self.elements.len() > max_elements {
            out.push_str(&format!("... {} more\n", self.elements.len() - max_elements));
        }
        out
    }
}

/// Failures reported by a browser session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrowserError {
    #[error("no element matches {0}")]
    NotFound(String),

    #[error("{locator} matches {count} elements")]
    Ambiguous { locator: String, count: usize },

    #[error("element is not interactable: {0}")]
    NotInteractable(String),

    #[error("element detached from the page: {0}")]
    Detached(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("browser disconnected: {0}")]
    Disconnected(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl BrowserError {
    /// Misses that another locator strategy might avoid
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            BrowserError::NotFound(_)
                | BrowserError::Ambiguous { .. }
                | BrowserError::NotInteractable(_)
        )
    }

    /// The session itself is unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrowserError::Disconnected(_) | BrowserError::Protocol(_))
    }
}

/// A live browser page driven by the engine.
///
/// Implementations enforce the timeouts they are given; the engine wraps
/// every call in its own attempt deadline as well.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Locate exactly one element for the candidate
    async fn find(
        &self,
        candidate: &LocatorCandidate,
        timeout: Duration,
    ) -> Result<ElementHandle, BrowserError>;

    async fn act(
        &self,
        element: &ElementHandle,
        action: &ElementAction,
        timeout: Duration,
    ) -> Result<ActOutput, BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn wait_for(
        &self,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    async fn page_summary(&self) -> Result<PageSummary, BrowserError>;

    /// Release the session
    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

// ============================================================================
// Locator oracle
// ============================================================================

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleFailure {
    #[error("oracle unreachable: {0}")]
    Unreachable(String),

    #[error("oracle timed out")]
    Timeout,

    #[error("oracle had no suggestion")]
    NoSuggestion,

    #[error("oracle response unusable: {0}")]
    InvalidResponse(String),
}

/// Suggests a locator when deterministic candidates are exhausted
#[async_trait]
pub trait LocatorOracle: Send + Sync {
    async fn resolve(
        &self,
        target: &TargetDescriptor,
        page: &PageSummary,
        timeout: Duration,
    ) -> Result<LocatorCandidate, OracleFailure>;
}

// ============================================================================
// Artifacts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Screenshot,
    FullPageScreenshot,
    Trace,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Screenshot | ArtifactKind::FullPageScreenshot => "png",
            ArtifactKind::Trace => "zip",
        }
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("{0:?} capture is not supported by this sink")]
    Unsupported(ArtifactKind),
}

/// Stores screenshots and traces under engine-chosen names
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Capture and persist an artifact; `name` is unique per run
    async fn capture(&self, kind: ArtifactKind, name: &str) -> Result<PathBuf, ArtifactError>;
}
