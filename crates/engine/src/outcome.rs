//! Per-step outcomes and the failure taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use stepwright_common::{ActionKind, RiskTier};

use crate::capability::{ArtifactKind, BrowserError, LocatorCandidate};

/// How the recovery policy treats a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// May succeed if tried again as is
    Transient,
    /// Will fail the same way unless a different locator is used
    Structural,
    /// Stops the step; infrastructure kinds also abort the run
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Resolution,
    Timeout,
    ElementDetached,
    Navigation,
    NotInteractable,
    AssertionMismatch,
    CaptureFailed,
    Infrastructure,
    Configuration,
}

impl StepErrorKind {
    pub fn class(&self) -> FailureClass {
        match self {
            StepErrorKind::Timeout | StepErrorKind::ElementDetached | StepErrorKind::Navigation => {
                FailureClass::Transient
            }
            StepErrorKind::Resolution
            | StepErrorKind::NotInteractable
            | StepErrorKind::AssertionMismatch
            | StepErrorKind::CaptureFailed => FailureClass::Structural,
            StepErrorKind::Infrastructure | StepErrorKind::Configuration => FailureClass::Fatal,
        }
    }

    /// Failures that invalidate everything after them
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            StepErrorKind::AssertionMismatch
                | StepErrorKind::Navigation
                | StepErrorKind::Infrastructure
                | StepErrorKind::Configuration
        )
    }

    /// Aborts the remaining plan
    pub fn aborts_run(&self) -> bool {
        matches!(self, StepErrorKind::Infrastructure | StepErrorKind::Configuration)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepErrorKind::Resolution => "resolution",
            StepErrorKind::Timeout => "timeout",
            StepErrorKind::ElementDetached => "element_detached",
            StepErrorKind::Navigation => "navigation",
            StepErrorKind::NotInteractable => "not_interactable",
            StepErrorKind::AssertionMismatch => "assertion_mismatch",
            StepErrorKind::CaptureFailed => "capture_failed",
            StepErrorKind::Infrastructure => "infrastructure",
            StepErrorKind::Configuration => "configuration",
        }
    }
}

impl fmt::Display for StepErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&BrowserError> for StepErrorKind {
    fn from(err: &BrowserError) -> Self {
        match err {
            BrowserError::NotFound(_) | BrowserError::Ambiguous { .. } => StepErrorKind::Resolution,
            BrowserError::NotInteractable(_) => StepErrorKind::NotInteractable,
            BrowserError::Detached(_) => StepErrorKind::ElementDetached,
            BrowserError::Navigation(_) => StepErrorKind::Navigation,
            BrowserError::Timeout(_) => StepErrorKind::Timeout,
            BrowserError::Disconnected(_) | BrowserError::Protocol(_) => {
                StepErrorKind::Infrastructure
            }
        }
    }
}

/// A classified step failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

impl From<BrowserError> for StepError {
    fn from(err: BrowserError) -> Self {
        StepError::new(StepErrorKind::from(&err), err.to_string())
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locator that missed during resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeMiss {
    pub candidate: LocatorCandidate,
    pub reason: String,
}

/// One pass through resolve and perform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<LocatorCandidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub misses: Vec<ProbeMiss>,
    pub oracle_consulted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub name: String,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
}

/// Result of one step; frozen once the attempt loop is done with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: ActionKind,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub risk: RiskTier,
    pub status: StepStatus,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<LocatorCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<AttemptRecord>,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }

    pub fn was_executed(&self) -> bool {
        self.status != StepStatus::Skipped
    }

    /// Needed more than one attempt
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    pub fn used_oracle(&self) -> bool {
        self.history.iter().any(|a| a.oracle_consulted)
    }

    pub fn error_kind(&self) -> Option<StepErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        use FailureClass::*;
        let cases = [
            (StepErrorKind::Timeout, Transient),
            (StepErrorKind::ElementDetached, Transient),
            (StepErrorKind::Navigation, Transient),
            (StepErrorKind::Resolution, Structural),
            (StepErrorKind::AssertionMismatch, Structural),
            (StepErrorKind::NotInteractable, Structural),
            (StepErrorKind::Infrastructure, Fatal),
            (StepErrorKind::Configuration, Fatal),
        ];
        for (kind, class) in cases {
            assert_eq!(kind.class(), class, "{}", kind.as_str());
        }
    }

    #[test]
    fn test_browser_error_mapping() {
        let err: StepError = BrowserError::Disconnected("pipe closed".into()).into();
        assert_eq!(err.kind, StepErrorKind::Infrastructure);
        assert!(err.kind.aborts_run());
        assert_eq!(err.to_string(), "infrastructure: browser disconnected: pipe closed");

        let err: StepError = BrowserError::Ambiguous {
            locator: "text=Save".into(),
            count: 3,
        }
        .into();
        assert_eq!(err.kind, StepErrorKind::Resolution);
    }

    #[test]
    fn test_serialized_kind_names() {
        let err = StepError::new(StepErrorKind::AssertionMismatch, "url was /login");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "assertion_mismatch");
        assert!(json.get("detail").is_none());
    }
}
