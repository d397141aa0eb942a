//! Error types for Stepwright

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Stepwright Error
pub type Result<T> = std::result::Result<T, Error>;

/// Stepwright error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid scenario '{scenario}': {reason}")]
    InvalidScenario { scenario: String, reason: String },

    #[error("Invalid step {index} in scenario '{scenario}': {reason}")]
    InvalidStep {
        scenario: String,
        index: usize,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not a scenario file: {0}")]
    UnsupportedFile(PathBuf),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means the scenario or configuration itself is malformed
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidScenario { .. } | Error::InvalidStep { .. } | Error::InvalidConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = Error::InvalidStep {
            scenario: "login".to_string(),
            index: 2,
            reason: "fill needs a target".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid step 2 in scenario 'login': fill needs a target"
        );

        let err = Error::UnsupportedFile(PathBuf::from("notes.txt"));
        assert_eq!(err.to_string(), "Not a scenario file: notes.txt");
    }

    #[test]
    fn test_is_configuration() {
        assert!(Error::InvalidConfig("weights".into()).is_configuration());
        assert!(Error::InvalidScenario {
            scenario: "x".into(),
            reason: "no steps".into()
        }
        .is_configuration());
        assert!(!Error::Internal("boom".into()).is_configuration());
    }
}
