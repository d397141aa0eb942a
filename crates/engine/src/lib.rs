//! Stepwright scenario execution engine
//!
//! The engine turns a validated [`Scenario`](stepwright_common::Scenario)
//! into a [`RunReport`] in three stages:
//!
//! 1. **Plan** assigns each step a risk tier, a retry budget and a
//!    checkpoint flag.
//! 2. **Execute** resolves each step's target to a live element, performs the
//!    action and recovers from transient failures within the budget.
//! 3. **Verify** computes the verdict, the quality score and the report.
//!
//! Browsers, the locator oracle and artifact storage are reached only through
//! the traits in [`capability`].

pub mod capability;
pub mod context;
pub mod events;
pub mod execute;
pub mod locator;
pub mod orchestrator;
pub mod outcome;
pub mod planner;
pub mod recovery;
pub mod step;
pub mod verify;

pub use capability::{
    ActOutput, ArtifactError, ArtifactKind, ArtifactSink, BrowserError, BrowserSession,
    Confidence, ElementAction, ElementHandle, LocatorCandidate, LocatorOracle, LocatorStrategy,
    OracleFailure, PageElement, PageSummary,
};
pub use events::{EventSink, RunEvent, Tee, TracingEvents};
pub use orchestrator::{Engine, EngineError};
pub use outcome::{FailureClass, StepError, StepErrorKind, StepOutcome, StepStatus};
pub use planner::{ExecutionPlan, PlannedStep, Planner, RiskPolicy};
pub use verify::{Grade, RunReport, Verdict};
