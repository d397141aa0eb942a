//! Error types for the reference driver

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("node not found. Install Node.js and run: npm install playwright && npx playwright install")]
    NodeNotFound,

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("bridge protocol error: {0}")]
    Bridge(String),

    #[error("locator oracle API key missing: set {0}")]
    MissingApiKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type DriverResult<T> = Result<T, DriverError>;
