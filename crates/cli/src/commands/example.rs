//! `stepwright example`

use anyhow::{bail, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};

use stepwright_common::loader::example_scenario;

use crate::output::print_success;

#[derive(Args, Debug)]
pub struct ExampleArgs {
    /// Where to write the scenario
    #[arg(default_value = "scenarios/example.yaml")]
    pub path: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub fn write_example(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, example_scenario())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

pub fn execute(args: ExampleArgs) -> Result<i32> {
    write_example(&args.path, args.force)?;
    print_success(&format!("Example scenario written to {}", args.path.display()));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwright_common::config::DefaultsConfig;
    use stepwright_common::loader::load_file;

    #[test]
    fn test_written_example_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/example.yaml");
        write_example(&path, false).unwrap();
        let scenario = load_file(&path, &DefaultsConfig::default()).unwrap();
        assert_eq!(scenario.name, "login-and-logout");
    }

    #[test]
    fn test_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example.yaml");
        std::fs::write(&path, "keep me").unwrap();
        assert!(write_example(&path, false).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
        write_example(&path, true).unwrap();
        assert_ne!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }
}
