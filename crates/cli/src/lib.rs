//! Stepwright CLI
//!
//! Runs, validates and plans declarative browser scenarios.

pub mod commands;
pub mod logging;
pub mod output;
pub mod report;
