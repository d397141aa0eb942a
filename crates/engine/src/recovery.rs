//! Bounded per-step attempt loop
//!
//! ```text
//! Pending -> Attempting -> Succeeded
//!                       -> Retrying -> Attempting ...
//!                       -> Exhausted
//! ```
//!
//! A step may be attempted at most `budget + 1` times: one initial attempt
//! plus up to `budget` retries.

use serde::{Deserialize, Serialize};

use crate::capability::LocatorCandidate;
use crate::outcome::FailureClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Pending,
    Attempting,
    Retrying,
    Succeeded,
    Exhausted,
}

impl RecoveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Succeeded | RecoveryState::Exhausted)
    }
}

/// What the loop knows about a failed attempt
#[derive(Debug, Clone, Copy)]
pub struct FailureContext {
    pub class: FailureClass,
    /// An untried locator remains for this step
    pub has_alternate: bool,
    /// The run was cancelled while the attempt was in flight
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct AttemptLoop {
    budget: u32,
    attempts: u32,
    state: RecoveryState,
    excluded: Vec<LocatorCandidate>,
}

impl AttemptLoop {
    pub fn new(budget: u32) -> Self {
        Self {
            budget,
            attempts: 0,
            state: RecoveryState::Pending,
            excluded: Vec::new(),
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    fn retries_used(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Start the next attempt, returning its 1-based number.
    ///
    /// Returns `None` once the loop is terminal.
    pub fn begin(&mut self) -> Option<u32> {
        match self.state {
            RecoveryState::Pending | RecoveryState::Retrying => {
                self.attempts += 1;
                self.state = RecoveryState::Attempting;
                Some(self.attempts)
            }
            _ => None,
        }
    }

    pub fn succeed(&mut self) {
        debug_assert_eq!(self.state, RecoveryState::Attempting);
        self.state = RecoveryState::Succeeded;
    }

    /// Record a failed attempt and decide what happens next
    pub fn fail(&mut self, failure: FailureContext) -> RecoveryState {
        let budget_left = self.retries_used() < self.budget;
        self.state = if failure.cancelled {
            RecoveryState::Exhausted
        } else {
            match failure.class {
                FailureClass::Transient if budget_left => RecoveryState::Retrying,
                FailureClass::Structural if budget_left && failure.has_alternate => {
                    RecoveryState::Retrying
                }
                _ => RecoveryState::Exhausted,
            }
        };
        self.state
    }

    /// Never probe this locator again for the step
    pub fn exclude(&mut self, candidate: LocatorCandidate) {
        if !self.excluded.iter().any(|c| c.same_locator(&candidate)) {
            self.excluded.push(candidate);
        }
    }

    pub fn excluded(&self) -> &[LocatorCandidate] {
        &self.excluded
    }
}
