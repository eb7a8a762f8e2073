use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reqwatch::{
    cache::Cache,
    checker::default_service,
    config::{Config, ConfigFileRoots, RootProvider},
    model::{CycleReport, Status},
    output::{format_event, print_report, OutputFormat},
    platform::expand_home,
    CycleOutcome, ScanOrchestrator, Scheduler, StatusPublisher,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const INSECURE: u8 = 2;
}

#[derive(Parser)]
#[command(name = "reqwatch")]
#[command(
    author,
    version,
    about = "Watch project directories for vulnerable Python requirements"
)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan periodically until interrupted
    Watch {
        /// Root directory to monitor (repeatable, overrides the config file)
        #[arg(short, long)]
        root: Vec<PathBuf>,

        /// Seconds between scan cycles
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Run a single scan cycle and print the result
    Scan {
        /// Root directory to scan (repeatable, overrides the config file)
        #[arg(short, long)]
        root: Vec<PathBuf>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show or create config file
    Config {
        /// Generate default config file
        #[arg(long)]
        init: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Clear the vulnerability lookup cache
    ClearCache,
}

/// `RUST_LOG` wins when set and valid; `--debug` only changes the fallback.
fn log_filter(debug: bool, default_level: &str, rust_log: Option<&str>) -> EnvFilter {
    let level = if debug { "debug" } else { default_level };
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("reqwatch={level}")))
}

fn setup_logging(debug: bool, default_level: &str) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(debug, default_level, rust_log.as_deref());

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::config_path);

    match cli.command {
        Commands::Watch { root, interval } => {
            setup_logging(cli.debug, "info");
            let config = Config::load_from(&config_path)?;
            run_watch(config, &config_path, root, interval).await?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::Scan { root, format } => {
            setup_logging(cli.debug, "warn");
            let config = Config::load_from(&config_path)?;
            let format = OutputFormat::from_str(&format).map_err(|e| anyhow::anyhow!(e))?;
            run_scan(config, root, format).await
        }
        Commands::Config { init, path } => {
            handle_config(&config_path, init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            let cache = Cache::new();
            cache.clear()?;
            println!("Cache cleared.");
            Ok(exit_codes::SUCCESS)
        }
    }
}

/// Roots given on the command line win; otherwise the config file is re-read
/// every cycle.
fn root_provider(cli_roots: Vec<PathBuf>, config_path: &Path) -> Arc<dyn RootProvider> {
    if cli_roots.is_empty() {
        Arc::new(ConfigFileRoots::new(config_path))
    } else {
        Arc::new(cli_roots.iter().map(|r| expand_home(r)).collect::<Vec<_>>())
    }
}

async fn run_watch(
    config: Config,
    config_path: &Path,
    cli_roots: Vec<PathBuf>,
    interval: Option<u64>,
) -> Result<()> {
    let roots = root_provider(cli_roots, config_path);
    if roots.root_paths().is_empty() {
        warn!(config = %config_path.display(), "no roots configured yet, waiting for config changes");
    }

    let interval = interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| config.scan_interval());

    let (publisher, mut events) = StatusPublisher::channel();
    let service = Arc::new(default_service(&config));
    let orchestrator = ScanOrchestrator::new(roots, service, publisher).configured(&config);
    let scheduler = Arc::new(Scheduler::new(Arc::new(orchestrator), interval));

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", format_event(&event));
        }
    });

    let handle = scheduler.spawn();
    info!(interval_secs = interval.as_secs(), "watching, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    handle.shutdown().await;
    printer.abort();

    Ok(())
}

async fn run_scan(config: Config, cli_roots: Vec<PathBuf>, format: OutputFormat) -> Result<u8> {
    let roots: Arc<dyn RootProvider> = if cli_roots.is_empty() {
        Arc::new(config.root_paths())
    } else {
        Arc::new(cli_roots.iter().map(|r| expand_home(r)).collect::<Vec<_>>())
    };

    if roots.root_paths().is_empty() {
        bail!("no roots to scan; pass --root or add [[roots]] to the config file");
    }

    let is_interactive = format == OutputFormat::Table;
    let progress = if is_interactive {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Scanning projects...");
        Some(pb)
    } else {
        None
    };

    let service = Arc::new(default_service(&config));
    let orchestrator = ScanOrchestrator::new(roots, service, StatusPublisher::disabled())
        .configured(&config);
    let scheduler = Scheduler::new(Arc::new(orchestrator), config.scan_interval());

    let report = match scheduler.try_run_cycle().await {
        CycleOutcome::Completed(report) => report,
        CycleOutcome::Aborted(reason) => bail!("scan failed: {reason}"),
        CycleOutcome::Coalesced => bail!("scan already in progress"),
    };

    if let Some(pb) = progress {
        pb.finish_with_message(format!(
            "Checked {} manifests in {} projects",
            report.manifests_checked, report.projects_checked
        ));
    }

    let snapshot = scheduler.orchestrator().state().snapshot();
    print_report(&snapshot, format)?;

    if report.manifests_failed > 0 || report.roots_failed > 0 {
        eprintln!(
            "Warning: {} manifests could not be checked and {} roots could not be read; results are incomplete.",
            report.manifests_failed, report.roots_failed
        );
    }

    Ok(exit_code(snapshot.aggregate, &report))
}

/// A known vulnerability wins; otherwise an incomplete scan is an error
/// rather than a clean bill of health.
fn exit_code(aggregate: Status, report: &CycleReport) -> u8 {
    if aggregate == Status::Insecure {
        exit_codes::INSECURE
    } else if report.manifests_failed > 0 || report.roots_failed > 0 {
        exit_codes::ERROR
    } else {
        exit_codes::SUCCESS
    }
}

fn handle_config(config_path: &Path, init: bool, show_path: bool) -> Result<()> {
    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        let config = Config::default();
        config.save_to(config_path)?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("Default configuration:");
        println!("{}", Config::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'reqwatch config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
