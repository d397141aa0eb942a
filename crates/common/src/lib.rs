//! Stepwright Common Library
//!
//! Scenario model, engine configuration and scenario file loading shared by
//! the engine, the reference driver and the CLI.

pub mod config;
pub mod error;
pub mod loader;
pub mod types;

// Re-export commonly used types
pub use config::{EngineConfig, LogFormat, QualityWeights, RiskRule, RiskTier};
pub use error::{Error, Result};
pub use types::*;

/// Stepwright version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file path
pub fn default_config_path() -> std::path::PathBuf {
    std::path::PathBuf::from("stepwright.toml")
}
