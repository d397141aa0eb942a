//! Core types for Stepwright scenarios

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Browser engine a scenario runs against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrowserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(Error::InvalidConfig(format!(
                "unknown browser '{}' (expected chromium, firefox or webkit)",
                other
            ))),
        }
    }
}

/// Run settings carried by a scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    /// Per-step timeout in milliseconds
    pub timeout_ms: u64,
    /// Default retry budget per step
    pub retry_count: u32,
    /// Whole-scenario deadline in milliseconds
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            browser: BrowserKind::Chromium,
            headless: true,
            timeout_ms: 30_000,
            retry_count: 2,
            deadline_ms: None,
            base_url: None,
        }
    }
}

/// A declaratively described browser test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config: ScenarioConfig,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            config: ScenarioConfig::default(),
            steps,
        }
    }

    pub fn with_config(mut self, config: ScenarioConfig) -> Self {
        self.config = config;
        self
    }

    /// Filesystem- and log-friendly identity of the scenario
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Check the contract the engine relies on.
    ///
    /// Scenarios normally arrive already validated by the loader; anything
    /// failing here is a configuration error and is never retried.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidScenario {
                scenario: "<unnamed>".to_string(),
                reason: "scenario name is empty".to_string(),
            });
        }
        if self.steps.is_empty() {
            return Err(Error::InvalidScenario {
                scenario: self.name.clone(),
                reason: "scenario has no steps".to_string(),
            });
        }
        if self.config.timeout_ms == 0 {
            return Err(Error::InvalidScenario {
                scenario: self.name.clone(),
                reason: "timeout must be greater than zero".to_string(),
            });
        }
        if self.config.deadline_ms == Some(0) {
            return Err(Error::InvalidScenario {
                scenario: self.name.clone(),
                reason: "deadline must be greater than zero".to_string(),
            });
        }

        for (index, step) in self.steps.iter().enumerate() {
            if let Err(reason) = step.check() {
                return Err(Error::InvalidStep {
                    scenario: self.name.clone(),
                    index,
                    reason,
                });
            }
        }
        Ok(())
    }
}

/// Lowercase, dash-separated form of a name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("scenario");
    }
    slug
}

/// How to find the element a step acts on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessible_name: Option<String>,
    /// Free-form description, only usable by the oracle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl TargetDescriptor {
    pub fn selector(value: impl Into<String>) -> Self {
        Self {
            selector: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn label(value: impl Into<String>) -> Self {
        Self {
            label: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn placeholder(value: impl Into<String>) -> Self {
        Self {
            placeholder: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            text: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn intent(value: impl Into<String>) -> Self {
        Self {
            intent: Some(value.into()),
            ..Default::default()
        }
    }

    /// Whether any human-authored locator field is present
    pub fn has_deterministic(&self) -> bool {
        [
            &self.selector,
            &self.label,
            &self.placeholder,
            &self.text,
            &self.accessible_name,
        ]
        .iter()
        .any(|f| f.as_deref().map_or(false, |v| !v.trim().is_empty()))
    }

    pub fn is_empty(&self) -> bool {
        !self.has_deterministic()
            && self
                .intent
                .as_deref()
                .map_or(true, |v| v.trim().is_empty())
    }

    /// All descriptor text, used by risk heuristics
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        [
            &self.selector,
            &self.label,
            &self.placeholder,
            &self.text,
            &self.accessible_name,
            &self.intent,
        ]
        .into_iter()
        .filter_map(|f| f.as_deref())
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(v) = &self.selector {
            parts.push(format!("selector={}", v));
        }
        if let Some(v) = &self.label {
            parts.push(format!("label={}", v));
        }
        if let Some(v) = &self.accessible_name {
            parts.push(format!("name={}", v));
        }
        if let Some(v) = &self.placeholder {
            parts.push(format!("placeholder={}", v));
        }
        if let Some(v) = &self.text {
            parts.push(format!("text={}", v));
        }
        if let Some(v) = &self.intent {
            parts.push(format!("intent={}", v));
        }
        if parts.is_empty() {
            f.write_str("-")
        } else {
            f.write_str(&parts.join(" "))
        }
    }
}

/// Kind of a step action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Navigate,
    Fill,
    Click,
    Select,
    Assert,
    Wait,
    Capture,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Navigate => "navigate",
            ActionKind::Fill => "fill",
            ActionKind::Click => "click",
            ActionKind::Select => "select",
            ActionKind::Assert => "assert",
            ActionKind::Wait => "wait",
            ActionKind::Capture => "capture",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "navigate" | "goto" => Ok(ActionKind::Navigate),
            "fill" => Ok(ActionKind::Fill),
            "click" => Ok(ActionKind::Click),
            "select" => Ok(ActionKind::Select),
            "assert" => Ok(ActionKind::Assert),
            "wait" => Ok(ActionKind::Wait),
            "capture" | "screenshot" => Ok(ActionKind::Capture),
            other => Err(Error::InvalidConfig(format!("unknown action kind '{}'", other))),
        }
    }
}

/// A condition checked by an assert step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssertCondition {
    UrlContains(String),
    UrlNotContains(String),
    /// The target resolves to a unique visible element
    Visible,
    /// The target element's text contains the value
    TextContains(String),
}

impl AssertCondition {
    pub fn needs_element(&self) -> bool {
        matches!(self, AssertCondition::Visible | AssertCondition::TextContains(_))
    }
}

/// A condition a wait step blocks on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitCondition {
    /// Fixed delay
    Delay { ms: u64 },
    /// A selector becomes visible
    Selector(String),
    UrlContains(String),
}

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Navigate { url: String },
    Fill { value: String },
    Click,
    Select { option: String },
    Assert { condition: AssertCondition },
    Wait { condition: WaitCondition },
    Capture {
        name: String,
        #[serde(default)]
        full_page: bool,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::Fill { .. } => ActionKind::Fill,
            Action::Click => ActionKind::Click,
            Action::Select { .. } => ActionKind::Select,
            Action::Assert { .. } => ActionKind::Assert,
            Action::Wait { .. } => ActionKind::Wait,
            Action::Capture { .. } => ActionKind::Capture,
        }
    }

    /// Whether the action operates on a located page element
    pub fn needs_element(&self) -> bool {
        match self {
            Action::Fill { .. } | Action::Click | Action::Select { .. } => true,
            Action::Assert { condition } => condition.needs_element(),
            Action::Navigate { .. } | Action::Wait { .. } | Action::Capture { .. } => false,
        }
    }

    /// Action parameter text (url, value, option, expected fragment)
    pub fn parameter(&self) -> Option<&str> {
        match self {
            Action::Navigate { url } => Some(url),
            Action::Fill { value } => Some(value),
            Action::Select { option } => Some(option),
            Action::Assert { condition } => match condition {
                AssertCondition::UrlContains(v)
                | AssertCondition::UrlNotContains(v)
                | AssertCondition::TextContains(v) => Some(v),
                AssertCondition::Visible => None,
            },
            Action::Wait { condition } => match condition {
                WaitCondition::Selector(v) | WaitCondition::UrlContains(v) => Some(v),
                WaitCondition::Delay { .. } => None,
            },
            Action::Capture { name, .. } => Some(name),
            Action::Click => None,
        }
    }
}

/// One declared test action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub action: Action,
    #[serde(default)]
    pub target: TargetDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Per-step timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Step {
    pub fn new(action: Action, target: TargetDescriptor) -> Self {
        Self {
            action,
            target,
            description: None,
            timeout_ms: None,
        }
    }

    /// Timeout for one attempt: the step override, else `default`
    pub fn timeout(&self, default: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(default)
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(Action::Navigate { url: url.into() }, TargetDescriptor::default())
    }

    pub fn fill(target: TargetDescriptor, value: impl Into<String>) -> Self {
        Self::new(Action::Fill { value: value.into() }, target)
    }

    pub fn click(target: TargetDescriptor) -> Self {
        Self::new(Action::Click, target)
    }

    pub fn select(target: TargetDescriptor, option: impl Into<String>) -> Self {
        Self::new(Action::Select { option: option.into() }, target)
    }

    pub fn assert(condition: AssertCondition, target: TargetDescriptor) -> Self {
        Self::new(Action::Assert { condition }, target)
    }

    pub fn wait(condition: WaitCondition) -> Self {
        Self::new(Action::Wait { condition }, TargetDescriptor::default())
    }

    pub fn capture(name: impl Into<String>) -> Self {
        Self::new(
            Action::Capture {
                name: name.into(),
                full_page: false,
            },
            TargetDescriptor::default(),
        )
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }

    /// Short human label for logs and reports
    pub fn summary(&self) -> String {
        if let Some(desc) = &self.description {
            return desc.clone();
        }
        match (&self.action, self.action.needs_element()) {
            (Action::Navigate { url }, _) => url.clone(),
            (_, true) => self.target.to_string(),
            (action, false) => action.parameter().unwrap_or("-").to_string(),
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.timeout_ms == Some(0) {
            return Err("timeout must be greater than zero".to_string());
        }
        if self.action.needs_element() && self.target.is_empty() {
            return Err(format!("{} needs a target", self.kind()));
        }
        match &self.action {
            Action::Navigate { url } if url.trim().is_empty() => {
                Err("navigate url is empty".into())
            }
            Action::Select { option } if option.trim().is_empty() => {
                Err("select option is empty".into())
            }
            Action::Capture { name, .. } if name.trim().is_empty() => {
                Err("capture name is empty".into())
            }
            Action::Assert { condition } => match condition {
                AssertCondition::UrlContains(v) | AssertCondition::UrlNotContains(v)
                    if v.is_empty() =>
                {
                    Err("url assertion fragment is empty".into())
                }
                _ => Ok(()),
            },
            Action::Wait {
                condition: WaitCondition::Selector(s),
            } if s.trim().is_empty() => Err("wait selector is empty".into()),
            _ => Ok(()),
        }
    }
}

/// Join a possibly relative URL onto a base URL
pub fn join_url(base: Option<&str>, url: &str) -> String {
    let is_absolute = url.contains("://") || url.starts_with("about:") || url.starts_with("data:");
    match base {
        Some(base) if !is_absolute => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            url.trim_start_matches('/')
        ),
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_scenario() -> Scenario {
        Scenario::new(
            "Login Flow",
            vec![
                Step::navigate("/login"),
                Step::fill(TargetDescriptor::label("Email"), "a@b.com"),
                Step::click(TargetDescriptor::text("Sign in")),
            ],
        )
    }

    #[test]
    fn test_valid_scenario() {
        assert!(login_scenario().validate().is_ok());
    }

    #[test]
    fn test_empty_steps_rejected() {
        let scenario = Scenario::new("empty", vec![]);
        let err = scenario.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_click_without_target_rejected() {
        let scenario = Scenario::new("bad", vec![Step::click(TargetDescriptor::default())]);
        match scenario.validate().unwrap_err() {
            Error::InvalidStep { index, reason, .. } => {
                assert_eq!(index, 0);
                assert_eq!(reason, "click needs a target");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_intent_only_target_is_valid() {
        let scenario = Scenario::new(
            "smart",
            vec![Step::click(TargetDescriptor::intent("the logout link"))],
        );
        assert!(scenario.validate().is_ok());
        assert!(!scenario.steps[0].target.has_deterministic());
    }

    #[test]
    fn test_step_timeout_override() {
        let scenario = login_scenario();
        let default = Duration::from_millis(5_000);
        let slow = scenario.steps[1].clone().with_timeout_ms(750);
        assert_eq!(scenario.steps[0].timeout(default), default);
        assert_eq!(slow.timeout(default), Duration::from_millis(750));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Login Flow"), "login-flow");
        assert_eq!(slugify("  Checkout / Pay!  "), "checkout-pay");
        assert_eq!(slugify("***"), "scenario");
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url(Some("https://a.test/"), "/login"), "https://a.test/login");
        assert_eq!(join_url(Some("https://a.test"), "https://b.test/x"), "https://b.test/x");
        assert_eq!(join_url(None, "/login"), "/login");
    }

    #[test]
    fn test_target_display() {
        let target = TargetDescriptor {
            selector: Some("#email".into()),
            label: Some("Email".into()),
            ..Default::default()
        };
        assert_eq!(target.to_string(), "selector=#email label=Email");
        assert_eq!(TargetDescriptor::default().to_string(), "-");
    }

    #[test]
    fn test_browser_kind_parse() {
        assert_eq!("Firefox".parse::<BrowserKind>().unwrap(), BrowserKind::Firefox);
        assert!("netscape".parse::<BrowserKind>().is_err());
    }

    #[test]
    fn test_action_serde_shape() {
        let step = Step::assert(
            AssertCondition::UrlContains("/dashboard".into()),
            TargetDescriptor::default(),
        );
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["action"]["kind"], "assert");
        assert_eq!(json["action"]["condition"]["url_contains"], "/dashboard");
    }
}
