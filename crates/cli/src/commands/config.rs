//! `stepwright config`

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use stepwright_common::EngineConfig;

use crate::output::{print_structured, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Also save the effective configuration to this file
    #[arg(long)]
    pub write: Option<PathBuf>,
}

pub fn execute(args: ConfigArgs, config: &EngineConfig, format: OutputFormat) -> Result<i32> {
    if let Some(path) = &args.write {
        config
            .save(path)
            .with_context(|| format!("saving {}", path.display()))?;
        print_success(&format!("Configuration written to {}", path.display()));
    }

    if format.is_structured() {
        print_structured(config, format);
    } else {
        let rendered = toml::to_string_pretty(config).context("rendering configuration")?;
        print!("{}", rendered);
    }
    Ok(0)
}
