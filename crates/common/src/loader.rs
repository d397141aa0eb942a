//! YAML scenario files
//!
//! A scenario file looks like:
//!
//! ```yaml
//! name: login
//! base_url: https://example.test
//! steps:
//!   - goto: /login
//!   - fill: { label: Email, value: a@b.com }
//!   - click: { text: Sign in }
//!   - assert_url_contains: /dashboard
//! ```
//!
//! Each step carries exactly one action key, plus optional `description`
//! and `timeout` (ms).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::DefaultsConfig;
use crate::error::{Error, Result};
use crate::types::{
    Action, AssertCondition, BrowserKind, Scenario, ScenarioConfig, Step, TargetDescriptor,
    WaitCondition,
};

/// Scenario as written on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub browser: Option<BrowserKind>,
    #[serde(default)]
    pub headless: Option<bool>,
    /// Per-step timeout in ms
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry_count: Option<u32>,
    /// Whole-scenario deadline in ms
    #[serde(default)]
    pub deadline: Option<u64>,
    #[serde(default)]
    pub base_url: Option<String>,
    pub steps: Vec<RawStep>,
}

/// Element locator fields shared by element-targeting steps
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTarget {
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "name")]
    pub accessible_name: Option<String>,
}

impl RawTarget {
    fn into_descriptor(self) -> TargetDescriptor {
        TargetDescriptor {
            selector: self.selector,
            label: self.label,
            placeholder: self.placeholder,
            text: self.text,
            accessible_name: self.accessible_name,
            intent: None,
        }
    }
}

/// A bare string is shorthand for a CSS selector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawElement {
    Selector(String),
    Target(RawTarget),
}

impl RawElement {
    fn into_descriptor(self) -> TargetDescriptor {
        match self {
            RawElement::Selector(s) => TargetDescriptor::selector(s),
            RawElement::Target(t) => t.into_descriptor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFill {
    #[serde(flatten)]
    pub target: RawTarget,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSelect {
    #[serde(flatten)]
    pub target: RawTarget,
    pub option: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAssertText {
    #[serde(flatten)]
    pub target: RawTarget,
    pub contains: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWait {
    #[serde(default)]
    pub seconds: Option<f64>,
    #[serde(default)]
    pub for_element: Option<String>,
    #[serde(default)]
    pub for_url_contains: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawScreenshot {
    Name(String),
    Spec {
        name: String,
        #[serde(default)]
        full_page: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSmartClick {
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSmartFill {
    pub intent: String,
    pub value: String,
}

/// Step as written on disk; exactly one action key must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<RawFill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click: Option<RawElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<RawSelect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_url_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_url_not_contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_visible: Option<RawElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_text: Option<RawAssertText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait: Option<RawWait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<RawScreenshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_click: Option<RawSmartClick>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smart_fill: Option<RawSmartFill>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Per-step timeout override in ms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

impl RawStep {
    fn action_count(&self) -> usize {
        [
            self.goto.is_some(),
            self.fill.is_some(),
            self.click.is_some(),
            self.select.is_some(),
            self.assert_url_contains.is_some(),
            self.assert_url_not_contains.is_some(),
            self.assert_visible.is_some(),
            self.assert_text.is_some(),
            self.wait.is_some(),
            self.screenshot.is_some(),
            self.smart_click.is_some(),
            self.smart_fill.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Convert into a model step
    pub fn into_step(self) -> std::result::Result<Step, String> {
        match self.action_count() {
            0 => return Err("step has no action".to_string()),
            1 => {}
            n => return Err(format!("step has {} actions, expected exactly one", n)),
        }

        let RawStep {
            goto,
            fill,
            click,
            select,
            assert_url_contains,
            assert_url_not_contains,
            assert_visible,
            assert_text,
            wait,
            screenshot,
            smart_click,
            smart_fill,
            description,
            timeout,
        } = self;

        let (action, target) = if let Some(url) = goto {
            (Action::Navigate { url }, TargetDescriptor::default())
        } else if let Some(f) = fill {
            (Action::Fill { value: f.value }, f.target.into_descriptor())
        } else if let Some(c) = click {
            (Action::Click, c.into_descriptor())
        } else if let Some(s) = select {
            (Action::Select { option: s.option }, s.target.into_descriptor())
        } else if let Some(fragment) = assert_url_contains {
            (
                Action::Assert {
                    condition: AssertCondition::UrlContains(fragment),
                },
                TargetDescriptor::default(),
            )
        } else if let Some(fragment) = assert_url_not_contains {
            (
                Action::Assert {
                    condition: AssertCondition::UrlNotContains(fragment),
                },
                TargetDescriptor::default(),
            )
        } else if let Some(el) = assert_visible {
            (
                Action::Assert {
                    condition: AssertCondition::Visible,
                },
                el.into_descriptor(),
            )
        } else if let Some(t) = assert_text {
            (
                Action::Assert {
                    condition: AssertCondition::TextContains(t.contains),
                },
                t.target.into_descriptor(),
            )
        } else if let Some(w) = wait {
            (Action::Wait { condition: wait_condition(w)? }, TargetDescriptor::default())
        } else if let Some(s) = screenshot {
            let (name, full_page) = match s {
                RawScreenshot::Name(name) => (name, false),
                RawScreenshot::Spec { name, full_page } => (name, full_page),
            };
            (Action::Capture { name, full_page }, TargetDescriptor::default())
        } else if let Some(s) = smart_click {
            (Action::Click, TargetDescriptor::intent(s.intent))
        } else if let Some(s) = smart_fill {
            (Action::Fill { value: s.value }, TargetDescriptor::intent(s.intent))
        } else {
            return Err("step has no action".to_string());
        };

        Ok(Step {
            action,
            target,
            description,
            timeout_ms: timeout,
        })
    }
}

fn wait_condition(raw: RawWait) -> std::result::Result<WaitCondition, String> {
    match (raw.seconds, raw.for_element, raw.for_url_contains) {
        (Some(secs), None, None) if secs >= 0.0 && secs.is_finite() => Ok(WaitCondition::Delay {
            ms: (secs * 1000.0).round() as u64,
        }),
        (Some(_), None, None) => Err("wait seconds must be a non-negative number".to_string()),
        (None, Some(sel), None) => Ok(WaitCondition::Selector(sel)),
        (None, None, Some(frag)) => Ok(WaitCondition::UrlContains(frag)),
        _ => Err("wait needs exactly one of seconds, for_element, for_url_contains".to_string()),
    }
}

impl RawScenario {
    /// Convert into a validated scenario, filling unset values from defaults
    pub fn into_scenario(self, defaults: &DefaultsConfig) -> Result<Scenario> {
        let config = ScenarioConfig {
            browser: self.browser.unwrap_or(defaults.browser),
            headless: self.headless.unwrap_or(defaults.headless),
            timeout_ms: self.timeout.unwrap_or(defaults.timeout_ms),
            retry_count: self.retry_count.unwrap_or(defaults.retry_count),
            deadline_ms: self.deadline.or(defaults.deadline_ms),
            base_url: self.base_url,
        };

        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, raw) in self.steps.into_iter().enumerate() {
            let step = raw.into_step().map_err(|reason| Error::InvalidStep {
                scenario: self.name.clone(),
                index,
                reason,
            })?;
            steps.push(step);
        }

        let scenario = Scenario {
            name: self.name,
            description: self.description,
            tags: self.tags,
            config,
            steps,
        };
        scenario.validate()?;
        Ok(scenario)
    }
}

fn is_scenario_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Parse a scenario from YAML text
pub fn parse_scenario(content: &str, defaults: &DefaultsConfig) -> Result<Scenario> {
    let raw: RawScenario = serde_yaml::from_str(content)?;
    raw.into_scenario(defaults)
}

/// Load one scenario file
pub fn load_file(path: &Path, defaults: &DefaultsConfig) -> Result<Scenario> {
    if !is_scenario_file(path) {
        return Err(Error::UnsupportedFile(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let scenario = parse_scenario(&content, defaults)?;
    debug!(
        path = %path.display(),
        scenario = %scenario.name,
        steps = scenario.steps.len(),
        "Loaded scenario"
    );
    Ok(scenario)
}

/// Load every `.yaml`/`.yml` scenario below a directory, sorted by path
pub fn load_dir(dir: &Path, defaults: &DefaultsConfig) -> Result<Vec<(PathBuf, Scenario)>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_scenario_file(e.path()))
        .map(|e| e.into_path())
        .collect();
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let scenario = load_file(&path, defaults)?;
            Ok((path, scenario))
        })
        .collect()
}

/// Result of checking a scenario file without running it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub path: PathBuf,
    pub scenario: Option<String>,
    pub steps: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a scenario file and collect errors and warnings
pub fn validate_file(path: &Path, defaults: &DefaultsConfig) -> ValidationReport {
    let mut report = ValidationReport {
        path: path.to_path_buf(),
        scenario: None,
        steps: 0,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    match load_file(path, defaults) {
        Ok(scenario) => {
            report.scenario = Some(scenario.name.clone());
            report.steps = scenario.steps.len();
            report.warnings = lint(&scenario);
        }
        Err(e) => report.errors.push(e.to_string()),
    }
    report
}

/// Non-fatal observations about a valid scenario
pub fn lint(scenario: &Scenario) -> Vec<String> {
    let mut warnings = Vec::new();

    if !matches!(scenario.steps.first().map(|s| &s.action), Some(Action::Navigate { .. })) {
        warnings.push("first step is not a navigation".to_string());
    }
    let has_relative = scenario.steps.iter().any(|s| match &s.action {
        Action::Navigate { url } => url.starts_with('/'),
        _ => false,
    });
    if has_relative && scenario.config.base_url.is_none() {
        warnings.push("relative navigation without base_url".to_string());
    }
    if !scenario
        .steps
        .iter()
        .any(|s| matches!(s.action, Action::Assert { .. }))
    {
        warnings.push("scenario has no assertions".to_string());
    }
    for (index, step) in scenario.steps.iter().enumerate() {
        if step.action.needs_element() && !step.target.has_deterministic() {
            warnings.push(format!(
                "step {} relies on the locator oracle only (no selector, label or text)",
                index
            ));
        }
        if let Action::Wait {
            condition: WaitCondition::Delay { ms },
        } = &step.action
        {
            if *ms > 10_000 {
                warnings.push(format!("step {} waits {} ms", index, ms));
            }
        }
    }
    warnings
}

/// A small, realistic scenario used by `stepwright example`
pub fn example_scenario() -> &'static str {
    r#"name: login-and-logout
description: Sign in with valid credentials, land on the dashboard, sign out
tags: [smoke, auth]
browser: chromium
headless: true
timeout: 30000
retry_count: 2
deadline: 120000
base_url: https://example.test
steps:
  - goto: /login
  - fill: { label: Email, value: user@example.test }
  - fill: { placeholder: Password, value: correct-horse }
  - click: { text: Sign in }
  - wait: { for_url_contains: /dashboard }
  - assert_url_contains: /dashboard
  - assert_visible: { text: Welcome }
  - assert_text: { selector: h1, contains: Dashboard }
  - screenshot: { name: dashboard, full_page: true }
  - smart_click: { intent: the logout link in the user menu }
  - assert_url_not_contains: /dashboard
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DefaultsConfig {
        DefaultsConfig::default()
    }

    #[test]
    fn test_example_scenario_parses() {
        let scenario = parse_scenario(example_scenario(), &defaults()).unwrap();
        assert_eq!(scenario.name, "login-and-logout");
        assert_eq!(scenario.steps.len(), 11);
        assert_eq!(scenario.config.deadline_ms, Some(120_000));
        let warnings = lint(&scenario);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].starts_with("step 9 relies on the locator oracle"));

        let logout = &scenario.steps[9];
        assert_eq!(logout.action, Action::Click);
        assert_eq!(logout.target.intent.as_deref(), Some("the logout link in the user menu"));
    }

    #[test]
    fn test_defaults_fill_unset_fields() {
        let mut d = defaults();
        d.retry_count = 7;
        d.browser = BrowserKind::Firefox;
        let scenario = parse_scenario(
            "name: t\nsteps:\n  - goto: https://a.test\n",
            &d,
        )
        .unwrap();
        assert_eq!(scenario.config.retry_count, 7);
        assert_eq!(scenario.config.browser, BrowserKind::Firefox);
    }

    #[test]
    fn test_string_click_is_selector() {
        let scenario = parse_scenario(
            "name: t\nsteps:\n  - click: '#submit'\n  - wait: { seconds: 1.5 }\n",
            &defaults(),
        )
        .unwrap();
        assert_eq!(scenario.steps[0].target.selector.as_deref(), Some("#submit"));
        assert_eq!(
            scenario.steps[1].action,
            Action::Wait {
                condition: WaitCondition::Delay { ms: 1_500 }
            }
        );
    }

    #[test]
    fn test_two_actions_rejected() {
        let err = parse_scenario(
            "name: t\nsteps:\n  - goto: /a\n    assert_url_contains: /a\n",
            &defaults(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("expected exactly one"));
    }

    #[test]
    fn test_empty_steps_rejected() {
        let err = parse_scenario("name: t\nsteps: []\n", &defaults()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = parse_scenario("name: t\nsteps:\n  - hover: '#x'\n", &defaults()).unwrap_err();
        assert!(matches!(err, Error::Yaml(_)));
    }

    #[test]
    fn test_load_dir_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.yaml"), "name: b\nsteps:\n  - goto: /b\n").unwrap();
        std::fs::write(
            dir.path().join("nested").join("a.yml"),
            "name: a\nsteps:\n  - goto: /a\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = load_dir(dir.path(), &defaults()).unwrap();
        let names: Vec<_> = loaded.iter().map(|(_, s)| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_validate_file_reports_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "name: broken\nsteps:\n  - click: {}\n").unwrap();

        let report = validate_file(&path, &defaults());
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("click needs a target"));
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_file(Path::new("scenario.json"), &defaults()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFile(_)));
    }
}
