//! `stepwright run`

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Args};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

use stepwright_common::{BrowserKind, EngineConfig, Scenario};
use stepwright_driver::{ChatCompletionsOracle, DryRunSession, PlaywrightConfig, PlaywrightSession};
use stepwright_engine::{
    ArtifactSink, BrowserSession, Engine, LocatorOracle, RunEvent, RunReport, Tee, TracingEvents,
};

use crate::output::{print_error, print_info, print_list, print_structured, OutputFormat};
use crate::report::{print_report, Progress, SummaryRow};

#[derive(Args, Debug, Default)]
#[command(group(ArgGroup::new("source").required(true).multiple(true).args(["files", "dir"])))]
pub struct RunArgs {
    /// Scenario files
    #[arg(short = 'f', long = "file", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Run every scenario below a directory
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Drive a simulated page instead of a browser
    #[arg(long)]
    pub dry_run: bool,

    /// Show the browser window
    #[arg(long)]
    pub headful: bool,

    /// Browser engine (chromium, firefox, webkit)
    #[arg(long)]
    pub browser: Option<BrowserKind>,

    /// Retries per step
    #[arg(long)]
    pub retry_count: Option<u32>,

    /// Per-attempt timeout
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Base URL for relative navigation
    #[arg(long)]
    pub base_url: Option<String>,

    /// Scenarios run at the same time
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Write each report to <OUTPUT>/<run-id>.json
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Never consult the locator oracle
    #[arg(long)]
    pub no_oracle: bool,

    /// NODE_PATH used to resolve the playwright package
    #[arg(long, env = "STEPWRIGHT_NODE_PATH")]
    pub node_path: Option<PathBuf>,
}

/// Command-line settings win over the scenario file
pub fn apply_overrides(scenario: &mut Scenario, args: &RunArgs) {
    let config = &mut scenario.config;
    if let Some(browser) = args.browser {
        config.browser = browser;
    }
    if args.headful {
        config.headless = false;
    }
    if let Some(retry_count) = args.retry_count {
        config.retry_count = retry_count;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(base_url) = &args.base_url {
        config.base_url = Some(base_url.clone());
    }
}

/// Process exit code for a finished batch
pub fn exit_code(reports: &[RunReport], errors: usize) -> i32 {
    if errors > 0 {
        2
    } else if reports.iter().all(RunReport::passed) {
        0
    } else {
        1
    }
}

fn oracle(config: &EngineConfig, args: &RunArgs) -> Option<Arc<dyn LocatorOracle>> {
    if args.no_oracle || args.dry_run || !config.oracle.enabled {
        return None;
    }
    match ChatCompletionsOracle::from_config(&config.oracle) {
        Ok(oracle) => Some(Arc::new(oracle)),
        Err(e) => {
            warn!(error = %e, "Locator oracle disabled");
            None
        }
    }
}

#[derive(Clone)]
struct Sessions {
    dry_run: bool,
    artifacts_dir: PathBuf,
    trace: bool,
    node_path: Option<PathBuf>,
}

impl Sessions {
    async fn run(&self, engine: &Engine, scenario: &Scenario) -> Result<RunReport> {
        let artifacts_dir = self.artifacts_dir.join(scenario.slug());

        if self.dry_run {
            let page = Arc::new(DryRunSession::new().with_artifacts_dir(artifacts_dir));
            let sink: Arc<dyn ArtifactSink> = page.clone();
            return Ok(engine.run_with_artifacts(scenario, page, Some(sink)).await?);
        }

        let browser = Arc::new(
            PlaywrightSession::launch(PlaywrightConfig {
                browser: scenario.config.browser,
                headless: scenario.config.headless,
                artifacts_dir,
                trace: self.trace,
                node_path: self.node_path.clone(),
                ..Default::default()
            })
            .await
            .with_context(|| {
                format!("launching {} for '{}'", scenario.config.browser, scenario.name)
            })?,
        );
        let session: Arc<dyn BrowserSession> = browser.clone();
        let sink: Arc<dyn ArtifactSink> = browser.clone();
        let report = engine.run_with_artifacts(scenario, session, Some(sink)).await;
        if let Err(e) = browser.shutdown().await {
            warn!(error = %e, "Browser shutdown failed");
        }
        Ok(report?)
    }
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<RunEvent>) {
    let mut progress = Progress::default();
    while let Some(event) = rx.recv().await {
        if let Some(line) = progress.line(&event) {
            println!("{}", line);
        }
    }
}

fn write_reports(dir: &Path, reports: &[RunReport]) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    for report in reports {
        let path = dir.join(format!("{}.json", report.run_id));
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), scenario = %report.scenario, "Report written");
    }
    Ok(())
}

pub async fn execute(args: RunArgs, config: EngineConfig, format: OutputFormat) -> Result<i32> {
    let mut scenarios = super::load_scenarios(&args.files, args.dir.as_deref(), &config.defaults)?;
    if scenarios.is_empty() {
        bail!("no scenarios found");
    }
    for (_, scenario) in &mut scenarios {
        apply_overrides(scenario, &args);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut engine = Engine::new(config.clone())?.with_events(Arc::new(Tee(TracingEvents, tx)));
    if let Some(oracle) = oracle(&config, &args) {
        engine = engine.with_oracle(oracle);
    }
    let engine = Arc::new(engine);

    let printer = if format.is_structured() {
        drop(rx);
        None
    } else {
        Some(tokio::spawn(print_progress(rx)))
    };

    let sessions = Sessions {
        dry_run: args.dry_run,
        artifacts_dir: config.artifacts.dir.clone(),
        trace: config.artifacts.trace_enabled,
        node_path: args.node_path.clone(),
    };
    let semaphore = Arc::new(Semaphore::new(args.jobs.max(1)));
    let mut tasks = JoinSet::new();
    for (position, (path, scenario)) in scenarios.into_iter().enumerate() {
        let engine = engine.clone();
        let semaphore = semaphore.clone();
        let sessions = sessions.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = sessions.run(&engine, &scenario).await;
            (position, path, result)
        });
    }

    let mut finished = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        finished.push(joined.context("scenario task failed")?);
    }
    finished.sort_by_key(|(position, _, _)| *position);

    // Closing the event channel lets the printer drain and exit
    drop(engine);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    let mut reports = Vec::new();
    let mut errors = 0;
    for (_, path, result) in finished {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => {
                errors += 1;
                print_error(&format!("{}: {:#}", path.display(), e));
            }
        }
    }

    if let Some(dir) = &args.output {
        write_reports(dir, &reports)?;
        if !format.is_structured() {
            print_info(&format!("{} report(s) written to {}", reports.len(), dir.display()));
        }
    }

    if format.is_structured() {
        print_structured(&reports, format);
    } else {
        for report in &reports {
            print_report(report, format);
        }
        if reports.len() > 1 {
            println!();
            let rows: Vec<SummaryRow> = reports.iter().map(SummaryRow::from).collect();
            print_list(&rows, format);
        }
    }

    Ok(exit_code(&reports, errors))
}
