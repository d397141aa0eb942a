//! CLI Commands

pub mod config;
pub mod example;
pub mod plan;
pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use stepwright_common::config::DefaultsConfig;
use stepwright_common::loader;
use stepwright_common::Scenario;

/// Load scenario files, then every scenario under `dir`, in that order
pub fn load_scenarios(
    files: &[PathBuf],
    dir: Option<&Path>,
    defaults: &DefaultsConfig,
) -> Result<Vec<(PathBuf, Scenario)>> {
    let mut scenarios = Vec::new();
    for path in files {
        let scenario = loader::load_file(path, defaults)
            .with_context(|| format!("loading {}", path.display()))?;
        scenarios.push((path.clone(), scenario));
    }
    if let Some(dir) = dir {
        let found = loader::load_dir(dir, defaults)
            .with_context(|| format!("loading scenarios from {}", dir.display()))?;
        scenarios.extend(found);
    }
    Ok(scenarios)
}
