//! Locator resolution
//!
//! Deterministic, human-authored signals are tried before the oracle:
//! explicit selector, label, accessible name, placeholder, visible text.
//! The oracle is consulted when none of those were given or all of them
//! missed on the live page.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use stepwright_common::TargetDescriptor;

use crate::capability::{
    BrowserError, BrowserSession, Confidence, ElementHandle, LocatorCandidate, LocatorOracle,
    LocatorStrategy, OracleFailure,
};
use crate::context::{AttemptClock, Interrupted};
use crate::outcome::{ProbeMiss, StepError, StepErrorKind};

/// Every candidate, including the oracle's, missed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no unique interactable element for {descriptor} ({} locators tried)", .attempted.len())]
pub struct ResolutionError {
    pub descriptor: String,
    pub attempted: Vec<ProbeMiss>,
    pub oracle_consulted: bool,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Unresolved(ResolutionError),

    #[error("probing {candidate} failed: {source}")]
    Probe {
        candidate: LocatorCandidate,
        source: BrowserError,
    },

    #[error("page summary failed: {0}")]
    PageSummary(BrowserError),

    #[error("locator oracle timed out")]
    OracleTimeout,

    #[error("locator oracle unavailable after {attempts} attempts: {reason}")]
    OracleUnavailable { attempts: u32, reason: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ResolveError {
    pub fn to_step_error(&self) -> StepError {
        match self {
            ResolveError::Unresolved(e) => {
                let detail = e
                    .attempted
                    .iter()
                    .map(|m| format!("{}: {}", m.candidate, m.reason))
                    .collect::<Vec<_>>()
                    .join("; ");
                StepError::new(StepErrorKind::Resolution, e.to_string()).with_detail(detail)
            }
            ResolveError::Probe { source, .. } | ResolveError::PageSummary(source) => {
                StepError::new(StepErrorKind::from(source), self.to_string())
            }
            ResolveError::OracleTimeout | ResolveError::Interrupted(_) => {
                StepError::new(StepErrorKind::Timeout, self.to_string())
            }
            ResolveError::OracleUnavailable { .. } => {
                StepError::new(StepErrorKind::Infrastructure, self.to_string())
            }
        }
    }
}

/// A located element and the candidate that found it
#[derive(Debug, Clone)]
pub struct Resolved {
    pub element: ElementHandle,
    pub candidate: LocatorCandidate,
}

/// What happened during one resolution, kept even when it fails
#[derive(Debug, Clone, Default)]
pub struct ResolutionTrace {
    pub misses: Vec<ProbeMiss>,
    pub oracle_consulted: bool,
}

pub struct LocatorResolver {
    oracle: Option<Arc<dyn LocatorOracle>>,
    oracle_retries: u32,
    oracle_timeout: Duration,
    probe_timeout: Duration,
    max_elements: usize,
}

impl LocatorResolver {
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            oracle: None,
            oracle_retries: 0,
            oracle_timeout: Duration::from_secs(15),
            probe_timeout,
            max_elements: 60,
        }
    }

    pub fn with_oracle(
        mut self,
        oracle: Arc<dyn LocatorOracle>,
        retries: u32,
        timeout: Duration,
        max_elements: usize,
    ) -> Self {
        self.oracle = Some(oracle);
        self.oracle_retries = retries;
        self.oracle_timeout = timeout;
        self.max_elements = max_elements;
        self
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    /// Deterministic candidates for a target, strongest first
    pub fn candidates(target: &TargetDescriptor) -> Vec<LocatorCandidate> {
        let fields = [
            (&target.selector, LocatorStrategy::Css, Confidence::Exact),
            (&target.label, LocatorStrategy::Label, Confidence::High),
            (&target.accessible_name, LocatorStrategy::AccessibleName, Confidence::High),
            (&target.placeholder, LocatorStrategy::Placeholder, Confidence::Medium),
            (&target.text, LocatorStrategy::Text, Confidence::Low),
        ];

        fields
            .into_iter()
            .filter_map(|(value, strategy, confidence)| {
                value
                    .as_deref()
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| LocatorCandidate::new(strategy, v, confidence))
            })
            .collect()
    }

    /// Whether another locator could still be tried for the target
    pub fn has_untried(
        &self,
        target: &TargetDescriptor,
        excluded: &[LocatorCandidate],
        oracle_consulted: bool,
    ) -> bool {
        let deterministic_left = Self::candidates(target)
            .iter()
            .any(|c| !excluded.iter().any(|e| e.same_locator(c)));
        deterministic_left || (self.has_oracle() && !oracle_consulted)
    }

    /// Resolve a target to exactly one element on the current page.
    ///
    /// Structural misses fall through to the next candidate. A transient
    /// probe failure ends resolution so the attempt can be retried.
    pub async fn resolve(
        &self,
        browser: &dyn BrowserSession,
        target: &TargetDescriptor,
        excluded: &[LocatorCandidate],
        clock: &AttemptClock,
        trace: &mut ResolutionTrace,
    ) -> Result<Resolved, ResolveError> {
        let is_excluded = |c: &LocatorCandidate| excluded.iter().any(|e| e.same_locator(c));

        for candidate in Self::candidates(target) {
            if is_excluded(&candidate) {
                continue;
            }
            if let Some(element) = self.try_candidate(browser, &candidate, clock, trace).await? {
                return Ok(Resolved { element, candidate });
            }
        }

        let Some(oracle) = &self.oracle else {
            return Err(self.unresolved(target, trace));
        };

        trace.oracle_consulted = true;
        let consulted = self.consult(oracle.as_ref(), browser, target, clock).await?;
        let Some(mut candidate) = consulted else {
            return Err(self.unresolved(target, trace));
        };
        candidate.confidence = Confidence::BestEffort;

        let already_missed = trace.misses.iter().any(|m| m.candidate.same_locator(&candidate));
        if is_excluded(&candidate) || already_missed {
            debug!(locator = %candidate, "Oracle suggested a locator that already missed");
            trace.misses.push(ProbeMiss {
                candidate,
                reason: "already tried".to_string(),
            });
            return Err(self.unresolved(target, trace));
        }

        match self.try_candidate(browser, &candidate, clock, trace).await? {
            Some(element) => Ok(Resolved { element, candidate }),
            None => Err(self.unresolved(target, trace)),
        }
    }

    /// Probe one candidate. `Ok(None)` is a structural miss.
    async fn try_candidate(
        &self,
        browser: &dyn BrowserSession,
        candidate: &LocatorCandidate,
        clock: &AttemptClock,
        trace: &mut ResolutionTrace,
    ) -> Result<Option<ElementHandle>, ResolveError> {
        let limit = clock.cap(self.probe_timeout);
        let probed = clock
            .guard(tokio::time::timeout(limit, browser.find(candidate, limit)))
            .await?
            .unwrap_or_else(|_| {
                Err(BrowserError::Timeout(format!(
                    "probe of {} exceeded {}ms",
                    candidate,
                    limit.as_millis()
                )))
            });

        match probed {
            Ok(element) => {
                debug!(locator = %candidate, "Resolved element");
                Ok(Some(element))
            }
            Err(e) if e.is_structural() => {
                debug!(locator = %candidate, error = %e, "Locator missed");
                trace.misses.push(ProbeMiss {
                    candidate: candidate.clone(),
                    reason: e.to_string(),
                });
                Ok(None)
            }
            Err(source) => Err(ResolveError::Probe {
                candidate: candidate.clone(),
                source,
            }),
        }
    }

    async fn consult(
        &self,
        oracle: &dyn LocatorOracle,
        browser: &dyn BrowserSession,
        target: &TargetDescriptor,
        clock: &AttemptClock,
    ) -> Result<Option<LocatorCandidate>, ResolveError> {
        let mut page = clock
            .guard(browser.page_summary())
            .await?
            .map_err(ResolveError::PageSummary)?;
        page.elements.truncate(self.max_elements);

        let mut tries = 0;
        loop {
            tries += 1;
            let limit = clock.cap(self.oracle_timeout);
            let answer = clock
                .guard(tokio::time::timeout(limit, oracle.resolve(target, &page, limit)))
                .await?
                .unwrap_or(Err(OracleFailure::Timeout));

            match answer {
                Ok(candidate) => {
                    debug!(locator = %candidate, "Oracle suggested locator");
                    return Ok(Some(candidate));
                }
                Err(OracleFailure::Unreachable(reason)) if tries <= self.oracle_retries => {
                    warn!(attempt = tries, %reason, "Locator oracle unreachable, retrying");
                }
                Err(OracleFailure::Unreachable(reason)) => {
                    return Err(ResolveError::OracleUnavailable {
                        attempts: tries,
                        reason,
                    });
                }
                Err(OracleFailure::Timeout) => return Err(ResolveError::OracleTimeout),
                Err(OracleFailure::NoSuggestion) => return Ok(None),
                Err(OracleFailure::InvalidResponse(reason)) => {
                    warn!(%reason, "Discarding unusable oracle response");
                    return Ok(None);
                }
            }
        }
    }

    fn unresolved(&self, target: &TargetDescriptor, trace: &ResolutionTrace) -> ResolveError {
        ResolveError::Unresolved(ResolutionError {
            descriptor: target.to_string(),
            attempted: trace.misses.clone(),
            oracle_consulted: trace.oracle_consulted,
        })
    }
}
