use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wgdiag_core::demo::{DemoAdapter, DemoConnector};
use wgdiag_core::prelude::*;
use wgdiag_core::protocol::list_ports;

/// WGDiag - live data from KWP2000 diesel ECUs through ELM327 adapters
#[derive(Parser)]
#[command(name = "wgdiag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Package catalog file (JSON); the built-in catalog otherwise
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports, adapters first
    Ports,

    /// List the diagnostic packages of the catalog
    Packages {
        /// Print the whole catalog as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that an adapter answers like an ELM327
    Verify {
        /// Serial port or host:port
        address: String,

        /// Talk to the simulated adapter instead
        #[arg(long)]
        demo: bool,
    },

    /// Run a package and show its values
    Run {
        /// Serial port or host:port
        address: String,

        /// Package name (case-insensitive)
        #[arg(short, long)]
        package: String,

        /// CSV log file; defaults to a timestamped name
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Do not write a CSV log
        #[arg(long, conflicts_with = "log")]
        no_log: bool,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Seconds between value table refreshes
        #[arg(long, default_value = "1")]
        interval: u64,

        /// Skip adapter verification
        #[arg(long)]
        skip_verify: bool,

        /// Talk to the simulated adapter instead
        #[arg(long)]
        demo: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(cli.config.as_deref())?;
    let catalog = load_catalog(cli.catalog.as_deref())?;

    match cli.command {
        Commands::Ports => list(),
        Commands::Packages { json } => packages(&catalog, json),
        Commands::Verify { address, demo } => {
            let session = Arc::new(new_session(config, demo));
            let processor = Processor::with_verification(session, catalog.verification().to_vec());
            if verify(&processor, &address)? {
                println!("{}: adapter verified", address);
                Ok(())
            } else {
                bail!("{} did not answer like an ELM327 adapter", address)
            }
        }
        Commands::Run {
            address,
            package,
            log,
            no_log,
            duration,
            interval,
            skip_verify,
            demo,
        } => {
            let package = catalog
                .find(&package)
                .cloned()
                .with_context(|| {
                    let names: Vec<&str> = catalog.packages().iter().map(|p| p.name()).collect();
                    format!("Unknown package '{}', available: {}", package, names.join(", "))
                })?;
            let log = if no_log {
                None
            } else {
                Some(log.unwrap_or_else(default_log_path))
            };

            let session = Arc::new(new_session(config, demo));
            let processor = Processor::with_verification(session, catalog.verification().to_vec());
            if !skip_verify && !verify(&processor, &address)? {
                bail!("{} did not answer like an ELM327 adapter", address);
            }

            run(
                &processor,
                &address,
                package,
                log.as_deref(),
                duration.map(Duration::from_secs),
                Duration::from_secs(interval.max(1)),
            )
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<Catalog> {
    match path {
        Some(path) => Catalog::from_file(path)
            .with_context(|| format!("Failed to load catalog from {}", path.display())),
        None => Catalog::builtin().context("Built-in catalog is invalid"),
    }
}

fn new_session(config: SessionConfig, demo: bool) -> Session {
    if demo {
        info!("Using the simulated adapter");
        Session::with_connector(config, Arc::new(DemoConnector::new(DemoAdapter::new())))
    } else {
        Session::new(config)
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from(
        chrono::Local::now()
            .format("wgdiag_%Y%m%d_%H%M%S.csv")
            .to_string(),
    )
}

fn list() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" {:04x}:{:04x}", vid, pid),
            _ => String::new(),
        };
        let product = port.product.map(|p| format!(" {}", p)).unwrap_or_default();
        println!("{:<24} {:<10}{}{}", port.name, port.kind, ids, product);
    }
    Ok(())
}

fn packages(catalog: &Catalog, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(catalog)?);
        return Ok(());
    }
    for package in catalog.packages() {
        println!("{:<24} {}", package.name(), package.description());
        println!("{:<24} fields: {}", "", package.field_keys().join(", "));
    }
    Ok(())
}

fn verify(processor: &Processor, address: &str) -> Result<bool> {
    processor
        .verify(address)
        .with_context(|| format!("Failed to verify {}", address))
}

fn print_table(snapshot: &Snapshot) {
    println!();
    for entry in snapshot.entries() {
        let text = entry.text.as_deref().unwrap_or("-");
        println!("{:<36} {:>12}", entry.description, text);
    }
}

fn run(
    processor: &Processor,
    address: &str,
    package: Package,
    log: Option<&Path>,
    duration: Option<Duration>,
    interval: Duration,
) -> Result<()> {
    let snapshot = Arc::new(Snapshot::new());
    let mut handler = CompositeDataHandler::default().with(snapshot.clone());
    let logger = match log {
        Some(path) => {
            let logger = CsvLogger::create(path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            info!("Logging to {}", path.display());
            let logger = Arc::new(logger);
            handler = handler.with(logger.clone());
            Some(logger)
        }
        None => None,
    };

    let session = processor.session();
    session
        .start(address)
        .with_context(|| format!("Failed to start session on {}", address))?;
    let name = package.name().to_string();
    let handle = processor.run(package, Arc::new(handler))?;

    let started = Instant::now();
    let mut last_print = Instant::now();
    loop {
        if handle.is_finished() {
            break;
        }
        if duration.is_some_and(|d| started.elapsed() >= d) {
            info!("Run time elapsed, stopping '{}'", name);
            handle.interrupt(true);
            break;
        }
        if last_print.elapsed() >= interval {
            print_table(&snapshot);
            last_print = Instant::now();
        }
        thread::sleep(Duration::from_millis(100));
    }

    let outcome = handle.wait();
    session.stop();
    print_table(&snapshot);

    if let Some(logger) = logger {
        if let Err(e) = logger.flush() {
            warn!("Failed to flush log: {}", e);
        }
        println!("{} rows logged", logger.rows_written());
    }

    match outcome {
        RunOutcome::Cancelled => Ok(()),
        RunOutcome::InitFailed { request, response } => {
            bail!("ECU init failed: {:?} answered {:?}", request, response)
        }
        RunOutcome::Aborted(e) => Err(e).context(format!("Package '{}' aborted", name)),
        RunOutcome::Panicked => bail!("Package '{}' crashed", name),
    }
}
