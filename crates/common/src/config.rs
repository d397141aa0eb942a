//! Engine configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{ActionKind, BrowserKind, ScenarioConfig};

/// Engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Defaults applied to scenarios that do not set their own values
    pub defaults: DefaultsConfig,

    /// Quality score tuning
    pub quality: QualityConfig,

    /// Locator oracle configuration
    pub oracle: OracleConfig,

    /// Artifact capture configuration
    pub artifacts: ArtifactsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Locator resolver configuration
    pub resolver: ResolverConfig,

    /// Risk tiering table
    pub risk: RiskConfig,
}

/// Scenario defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub browser: BrowserKind,
    pub headless: bool,
    pub timeout_ms: u64,
    pub retry_count: u32,
    pub deadline_ms: Option<u64>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        let scenario = ScenarioConfig::default();
        Self {
            browser: scenario.browser,
            headless: scenario.headless,
            timeout_ms: scenario.timeout_ms,
            retry_count: scenario.retry_count,
            deadline_ms: scenario.deadline_ms,
        }
    }
}

impl DefaultsConfig {
    pub fn scenario_config(&self) -> ScenarioConfig {
        ScenarioConfig {
            browser: self.browser,
            headless: self.headless,
            timeout_ms: self.timeout_ms,
            retry_count: self.retry_count,
            deadline_ms: self.deadline_ms,
            base_url: None,
        }
    }
}

/// Weights of the three quality components
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub success: f64,
    pub recovery: f64,
    pub timing: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            success: 0.6,
            recovery: 0.25,
            timing: 0.15,
        }
    }
}

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.success + self.recovery + self.timing
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub weights: QualityWeights,

    /// A step is slow above this multiple of the median duration
    pub slow_step_multiple: f64,

    /// ...and above this absolute floor
    pub slow_step_floor_ms: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            slow_step_multiple: 3.0,
            slow_step_floor_ms: 1_000,
        }
    }
}

/// Locator oracle (language model) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub enabled: bool,

    /// OpenAI-compatible chat completions endpoint
    pub endpoint: String,

    pub model: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    pub timeout_ms: u64,

    /// Retries on an unreachable oracle before giving up
    pub retries: u32,

    /// Maximum number of page elements sent in a page summary
    pub max_elements: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_ms: 15_000,
            retries: 1,
            max_elements: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub screenshot_on_failure: bool,
    pub trace_enabled: bool,
    /// Screenshot before every high-risk step
    pub checkpoint_screenshots: bool,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
            screenshot_on_failure: true,
            trace_enabled: false,
            checkpoint_screenshots: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::InvalidConfig(format!("unknown log format '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Upper bound for a single candidate probe
    pub probe_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
        }
    }
}

/// Risk tier of a planned step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    /// Retry budget for a step of this tier given the scenario default.
    ///
    /// High-risk steps get one retry fewer, but never less than one unless
    /// retries are disabled altogether.
    pub fn retry_budget(&self, retry_count: u32) -> u32 {
        match self {
            RiskTier::High => retry_count.saturating_sub(1).max(1).min(retry_count),
            RiskTier::Low | RiskTier::Medium => retry_count,
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the risk table.
///
/// A rule matches when its action (if set) equals the step's action and its
/// pattern (if set) matches any of the step's target texts or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRule {
    #[serde(default)]
    pub action: Option<ActionKind>,
    #[serde(default)]
    pub pattern: Option<String>,
    pub tier: RiskTier,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Replaces the built-in rules when non-empty
    pub rules: Vec<RiskRule>,
}

impl EngineConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Internal(format!("config serialization: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `STEPWRIGHT_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STEPWRIGHT_BROWSER") {
            self.defaults.browser = v.parse()?;
        }
        if let Some(v) = lookup("STEPWRIGHT_HEADLESS") {
            self.defaults.headless = parse_bool("STEPWRIGHT_HEADLESS", &v)?;
        }
        if let Some(v) = lookup("STEPWRIGHT_TIMEOUT_MS") {
            self.defaults.timeout_ms = parse_num("STEPWRIGHT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("STEPWRIGHT_RETRY_COUNT") {
            self.defaults.retry_count = parse_num("STEPWRIGHT_RETRY_COUNT", &v)?;
        }
        if let Some(v) = lookup("STEPWRIGHT_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = lookup("STEPWRIGHT_LOG_FORMAT") {
            self.logging.format = v.parse()?;
        }
        if let Some(v) = lookup("STEPWRIGHT_TRACE_ENABLED") {
            self.artifacts.trace_enabled = parse_bool("STEPWRIGHT_TRACE_ENABLED", &v)?;
        }
        if let Some(v) = lookup("STEPWRIGHT_SCREENSHOT_ON_FAILURE") {
            self.artifacts.screenshot_on_failure =
                parse_bool("STEPWRIGHT_SCREENSHOT_ON_FAILURE", &v)?;
        }
        if let Some(v) = lookup("STEPWRIGHT_ORACLE_ENDPOINT") {
            self.oracle.endpoint = v;
        }
        if let Some(v) = lookup("STEPWRIGHT_ORACLE_MODEL") {
            self.oracle.model = v;
        }
        Ok(())
    }

    /// Check ranges and the quality weights
    pub fn validate(&self) -> Result<()> {
        let w = &self.quality.weights;
        if [w.success, w.recovery, w.timing].iter().any(|v| *v < 0.0) {
            return Err(Error::InvalidConfig(
                "quality weights must not be negative".to_string(),
            ));
        }
        if (w.sum() - 1.0).abs() > 1e-6 {
            return Err(Error::InvalidConfig(format!(
                "quality weights must sum to 1.0, got {:.3}",
                w.sum()
            )));
        }
        if self.quality.slow_step_multiple < 1.0 {
            return Err(Error::InvalidConfig(
                "slow_step_multiple must be at least 1.0".to_string(),
            ));
        }
        if self.defaults.timeout_ms == 0 {
            return Err(Error::InvalidConfig("defaults.timeout_ms must be > 0".to_string()));
        }
        if self.resolver.probe_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "resolver.probe_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.oracle.enabled && self.oracle.timeout_ms == 0 {
            return Err(Error::InvalidConfig("oracle.timeout_ms must be > 0".to_string()));
        }
        for rule in &self.risk.rules {
            if rule.action.is_none() && rule.pattern.is_none() {
                return Err(Error::InvalidConfig(
                    "risk rule needs an action or a pattern".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::InvalidConfig(format!("{}: not a boolean: {}", key, other))),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{}: not a number: {}", key, value)))
}
