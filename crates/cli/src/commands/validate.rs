//! `stepwright validate`

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;

use stepwright_common::loader::{self, ValidationReport};
use stepwright_common::EngineConfig;

use crate::output::{
    print_bullets, print_error, print_list, print_structured, print_success, OutputFormat,
    TableDisplay,
};

#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Scenario files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Treat warnings as failures
    #[arg(long)]
    pub strict: bool,
}

#[derive(Serialize)]
pub struct ValidationRow {
    pub file: String,
    pub scenario: String,
    pub steps: usize,
    pub status: String,
    pub issues: usize,
}

impl From<&ValidationReport> for ValidationRow {
    fn from(r: &ValidationReport) -> Self {
        let status = if !r.is_valid() {
            "❌ invalid"
        } else if !r.warnings.is_empty() {
            "⚠️  warnings"
        } else {
            "✅ valid"
        };
        Self {
            file: r.path.display().to_string(),
            scenario: r.scenario.clone().unwrap_or_else(|| "-".to_string()),
            steps: r.steps,
            status: status.to_string(),
            issues: r.errors.len() + r.warnings.len(),
        }
    }
}

impl TableDisplay for ValidationRow {
    fn headers() -> Vec<&'static str> {
        vec!["File", "Scenario", "Steps", "Status", "Issues"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.file.clone(),
            self.scenario.clone(),
            self.steps.to_string(),
            self.status.clone(),
            self.issues.to_string(),
        ]
    }
}

fn rejected(report: &ValidationReport, strict: bool) -> bool {
    !report.is_valid() || (strict && !report.warnings.is_empty())
}

pub fn execute(args: ValidateArgs, config: &EngineConfig, format: OutputFormat) -> Result<i32> {
    let reports: Vec<ValidationReport> = args
        .files
        .iter()
        .map(|path| loader::validate_file(path, &config.defaults))
        .collect();
    let failed = reports.iter().filter(|r| rejected(r, args.strict)).count();

    if format.is_structured() {
        print_structured(&reports, format);
    } else {
        let rows: Vec<ValidationRow> = reports.iter().map(ValidationRow::from).collect();
        print_list(&rows, format);
        for report in &reports {
            let issues: Vec<String> = report
                .errors
                .iter()
                .map(|e| format!("error: {}", e))
                .chain(report.warnings.iter().map(|w| format!("warning: {}", w)))
                .collect();
            print_bullets(&report.path.display().to_string(), &issues);
        }
        if failed == 0 {
            print_success(&format!("{} scenario file(s) valid", reports.len()));
        } else {
            print_error(&format!("{} of {} scenario file(s) rejected", failed, reports.len()));
        }
    }

    Ok(if failed == 0 { 0 } else { 1 })
}
