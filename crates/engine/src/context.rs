//! Run identity, deadlines and artifact naming

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::capability::ArtifactKind;

/// Why a guarded browser or oracle call did not complete
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum Interrupted {
    #[error("attempt deadline elapsed")]
    Elapsed,

    #[error("scenario deadline exceeded")]
    Cancelled,
}

/// State shared by every stage of one scenario run
#[derive(Debug)]
pub struct RunContext {
    pub run_id: Uuid,
    pub scenario_slug: String,
    pub started_at: DateTime<Utc>,
    pub cancel: CancellationToken,
    pub namer: ArtifactNamer,
}

impl RunContext {
    pub fn new(scenario_slug: impl Into<String>) -> Self {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let scenario_slug = scenario_slug.into();
        Self {
            namer: ArtifactNamer::new(&scenario_slug, started_at, run_id),
            run_id,
            scenario_slug,
            started_at,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clock for one attempt bounded by `timeout`
    pub fn attempt_clock(&self, timeout: Duration) -> AttemptClock {
        AttemptClock::new(timeout, self.cancel.clone())
    }
}

/// Collision-free artifact names: scenario slug, UTC start time, run id
#[derive(Debug)]
pub struct ArtifactNamer {
    prefix: String,
    issued: Mutex<Vec<String>>,
}

impl ArtifactNamer {
    pub fn new(slug: &str, started_at: DateTime<Utc>, run_id: Uuid) -> Self {
        let short_id: String = run_id.simple().to_string().chars().take(8).collect();
        Self {
            prefix: format!("{}-{}-{}", slug, started_at.format("%Y%m%dT%H%M%SZ"), short_id),
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Name for an artifact of step `index` (or the run when `None`)
    pub fn name(&self, index: Option<usize>, label: &str, kind: ArtifactKind) -> String {
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let base = match index {
            Some(i) => format!("{}-s{:02}-{}", self.prefix, i, label),
            None => format!("{}-{}", self.prefix, label),
        };

        let mut issued = self.issued.lock();
        let mut candidate = format!("{}.{}", base, kind.extension());
        let mut n = 1;
        while issued.contains(&candidate) {
            n += 1;
            candidate = format!("{}-{}.{}", base, n, kind.extension());
        }
        issued.push(candidate.clone());
        candidate
    }
}

/// Deadline of a single attempt, also interrupted by run cancellation
#[derive(Debug, Clone)]
pub struct AttemptClock {
    deadline: Instant,
    cancel: CancellationToken,
}

impl AttemptClock {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// `limit` capped to the time left in the attempt
    pub fn cap(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `fut` until it completes, the attempt deadline passes or the run
    /// is cancelled
    pub async fn guard<F, T>(&self, fut: F) -> Result<T, Interrupted>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            res = tokio::time::timeout_at(self.deadline, fut) => {
                res.map_err(|_| Interrupted::Elapsed)
            }
        }
    }
}
