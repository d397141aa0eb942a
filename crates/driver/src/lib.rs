//! Reference collaborators for the Stepwright engine
//!
//! - [`PlaywrightSession`]: a real browser driven through a Playwright bridge
//! - [`DryRunSession`]: a simulated page for `--dry-run`
//! - [`ChatCompletionsOracle`]: locator suggestions from a chat model

pub mod dry_run;
pub mod error;
pub mod oracle;
pub mod playwright;

pub use dry_run::DryRunSession;
pub use error::{DriverError, DriverResult};
pub use oracle::ChatCompletionsOracle;
pub use playwright::{PlaywrightConfig, PlaywrightSession};
