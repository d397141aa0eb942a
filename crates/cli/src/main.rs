//! Stepwright CLI - Main Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stepwright_cli::commands::{self, example, plan, run, validate};
use stepwright_cli::{logging, output};
use stepwright_common::{default_config_path, EngineConfig, LogFormat, VERSION};

/// Stepwright - declarative browser scenarios with self-healing locators
#[derive(Parser)]
#[command(name = "stepwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Engine configuration file
    #[arg(
        long,
        env = "STEPWRIGHT_CONFIG",
        default_value_os_t = default_config_path(),
        global = true
    )]
    config: PathBuf,

    /// Log filter (RUST_LOG wins when set)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute scenarios
    Run(run::RunArgs),

    /// Check scenario files without running them
    Validate(validate::ValidateArgs),

    /// Show the execution plan of scenario files
    Plan(plan::PlanArgs),

    /// Write an example scenario
    Example(example::ExampleArgs),

    /// Print the effective configuration
    Config(commands::config::ConfigArgs),

    /// Show version information
    Version,
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_env()?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;
    Ok(config)
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let config = load_config(&cli)?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Run(args) => run::execute(args, config, cli.format).await,
        Commands::Validate(args) => validate::execute(args, &config, cli.format),
        Commands::Plan(args) => plan::execute(args, &config, cli.format),
        Commands::Example(args) => example::execute(args),
        Commands::Config(args) => commands::config::execute(args, &config, cli.format),
        Commands::Version => {
            println!("Stepwright v{}", VERSION);
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            2
        }
    };
    std::process::exit(code);
}
