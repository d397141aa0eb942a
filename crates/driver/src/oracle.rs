//! Locator oracle over an OpenAI-compatible chat completions endpoint

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use stepwright_common::config::OracleConfig;
use stepwright_common::TargetDescriptor;
use stepwright_engine::{
    Confidence, LocatorCandidate, LocatorOracle, LocatorStrategy, OracleFailure, PageSummary,
};

use crate::error::{DriverError, DriverResult};

const SYSTEM_PROMPT: &str = "You locate elements on web pages for a browser test runner. \
Given a description of the wanted element and a compact list of the page's interactive \
elements, answer with a single JSON object {\"strategy\": ..., \"value\": ...}. strategy is \
one of css, label, accessible_name, placeholder, text. Prefer a unique css selector built \
from an id or name attribute. If no element fits, answer {\"strategy\": \"none\", \"value\": \"\"}.";

#[derive(Debug, Deserialize)]
struct Completion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Suggestion {
    strategy: String,
    #[serde(default)]
    value: String,
}

pub struct ChatCompletionsOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_elements: usize,
}

impl ChatCompletionsOracle {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        max_elements: usize,
    ) -> DriverResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
            max_elements,
        })
    }

    /// Build from configuration, reading the key from the configured variable
    pub fn from_config(config: &OracleConfig) -> DriverResult<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| DriverError::MissingApiKey(config.api_key_env.clone()))?;
        Self::new(&config.endpoint, &config.model, api_key, config.max_elements)
    }

    fn prompt(&self, target: &TargetDescriptor, page: &PageSummary) -> String {
        let mut wanted = String::new();
        let fields = [
            ("selector (did not match)", &target.selector),
            ("label", &target.label),
            ("accessible name", &target.accessible_name),
            ("placeholder", &target.placeholder),
            ("visible text", &target.text),
            ("intent", &target.intent),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                wanted.push_str(&format!("- {}: {}\n", name, value));
            }
        }
        format!(
            "Wanted element:\n{}\nPage:\n{}",
            wanted,
            page.render_compact(self.max_elements)
        )
    }
}

/// Turn the model's answer into a candidate
pub fn parse_suggestion(content: &str) -> Result<LocatorCandidate, OracleFailure> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let suggestion: Suggestion = serde_json::from_str(body)
        .map_err(|e| OracleFailure::InvalidResponse(format!("{}: {}", e, body)))?;

    if suggestion.strategy.eq_ignore_ascii_case("none") || suggestion.value.trim().is_empty() {
        return Err(OracleFailure::NoSuggestion);
    }
    let strategy = LocatorStrategy::parse(&suggestion.strategy).ok_or_else(|| {
        OracleFailure::InvalidResponse(format!("unknown strategy {}", suggestion.strategy))
    })?;
    Ok(LocatorCandidate::new(
        strategy,
        suggestion.value.trim(),
        Confidence::BestEffort,
    ))
}

fn classify(err: reqwest::Error) -> OracleFailure {
    if err.is_timeout() {
        OracleFailure::Timeout
    } else if err.is_decode() {
        OracleFailure::InvalidResponse(err.to_string())
    } else {
        OracleFailure::Unreachable(err.to_string())
    }
}

#[async_trait]
impl LocatorOracle for ChatCompletionsOracle {
    async fn resolve(
        &self,
        target: &TargetDescriptor,
        page: &PageSummary,
        timeout: Duration,
    ) -> Result<LocatorCandidate, OracleFailure> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.prompt(target, page) },
            ],
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if status.is_server_error() || matches!(status.as_u16(), 401 | 403 | 429) {
            return Err(OracleFailure::Unreachable(format!("oracle returned {}", status)));
        }
        if !status.is_success() {
            return Err(OracleFailure::InvalidResponse(format!("oracle returned {}", status)));
        }

        let completion: Completion = resp.json().await.map_err(classify)?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(OracleFailure::NoSuggestion)?;
        debug!(answer = %content, "Oracle answered");
        parse_suggestion(&content)
    }
}
