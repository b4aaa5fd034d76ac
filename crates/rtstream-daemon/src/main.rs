//! rtstream daemon entry point.
//!
//! Opens the endpoints, launches the streamer, listener and reporter tasks
//! and exits with a diagnostic as soon as one of them fails.

use anyhow::{Context, Result};
use clap::Parser;
use rtstream_common::config::{RuntimeConfig, TaskKind};
use rtstream_common::error::{Endpoint, RtError, RtResult};
use rtstream_runtime::clock::MonotonicClock;
use rtstream_runtime::launcher::{TaskFailure, TaskLauncher};
use rtstream_runtime::pause::PauseState;
use rtstream_runtime::periodic::{PeriodicTask, TaskSpec};
use rtstream_runtime::realtime::{init_process, priority_control};
use rtstream_runtime::tasks::{AudioStreamer, CommandListener, StateReporter};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// rtstream daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "rtstream-daemon",
    about = "Real-time chunk streamer with pause control and periodic status",
    version,
    long_about = None
)]
struct Args {
    /// Path to a runtime configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data source to stream (overrides config file).
    #[arg(long, short = 'i', value_name = "FILE")]
    source: Option<PathBuf>,

    /// Output transport device (overrides config file).
    #[arg(long, short = 'o', value_name = "DEVICE")]
    transport: Option<PathBuf>,

    /// Run with default OS scheduling.
    #[arg(long)]
    no_realtime: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rtstream daemon");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    info!(
        source = %config.source.display(),
        transport = %config.transport.display(),
        chunk_size = config.chunk_size,
        realtime = config.realtime.enabled,
        "Configuration loaded"
    );

    let failure = run_daemon(&config)?;
    error!(
        task = %failure.task,
        kind = %failure.error.kind(),
        error = %failure.error,
        "Fatal task failure, shutting down"
    );
    Err(anyhow::Error::new(failure.error).context(format!("{} failed", failure.task)))
}

/// Initialize logging with the specified log level.
///
/// Logs go to stderr; stdout carries only status lines.
fn init_logging(level: &str) {
    let filter = format!(
        "rtstream_daemon={},rtstream_runtime={},rtstream_common={}",
        level, level, level
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(io::stderr)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `RTSTREAM_CONFIG_PATH` environment variable
/// 3. `/etc/rtstream/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<RuntimeConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return RuntimeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    if let Ok(env_path) = std::env::var("RTSTREAM_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from RTSTREAM_CONFIG_PATH");
            return RuntimeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from RTSTREAM_CONFIG_PATH={:?}", env_path)
            });
        }
        warn!(
            path = %env_path,
            "RTSTREAM_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for path in ["/etc/rtstream/config.toml", "config/default.toml"] {
        let config_path = PathBuf::from(path);
        if config_path.exists() {
            info!(?config_path, "Loading config file");
            return RuntimeConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from {:?}", config_path));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(RuntimeConfig::default())
}

/// Command-line flags take precedence over the file.
fn apply_overrides(config: &mut RuntimeConfig, args: &Args) {
    if let Some(source) = &args.source {
        config.source = source.clone();
    }
    if let Some(transport) = &args.transport {
        config.transport = transport.clone();
    }
    if args.no_realtime {
        config.realtime.enabled = false;
    }
}

fn periodic_task(config: &RuntimeConfig, kind: TaskKind) -> PeriodicTask<MonotonicClock> {
    PeriodicTask::new(TaskSpec::for_kind(config, kind), MonotonicClock::new())
        .with_metrics(config.metrics.history, config.metrics.report_every)
}

/// Open a file endpoint; failures are I/O failures of that endpoint.
fn open_endpoint(endpoint: Endpoint, path: &Path, options: &OpenOptions) -> RtResult<File> {
    options.open(path).map_err(|err| {
        let error = RtError::IoFailure {
            endpoint,
            reason: format!("cannot open {}: {err}", path.display()),
        };
        error!(%endpoint, kind = %error.kind(), %error, "Failed to open endpoint");
        error
    })
}

/// Launch the three tasks and wait for the first terminal failure.
fn run_daemon(config: &RuntimeConfig) -> Result<TaskFailure> {
    let ceiling = config.ceiling();
    init_process(&config.realtime, ceiling).context("Real-time setup failed")?;

    let source = open_endpoint(Endpoint::Source, &config.source, OpenOptions::new().read(true))?;
    let transport = open_endpoint(
        Endpoint::Transport,
        &config.transport,
        OpenOptions::new().read(true).write(true),
    )?;

    let pause = Arc::new(PauseState::new(ceiling, priority_control(&config.realtime)));
    let mut launcher = TaskLauncher::new(config.realtime.clone());

    let mut streamer = periodic_task(config, TaskKind::Streamer);
    let chunk_size = config.chunk_size;
    let shared = Arc::clone(&pause);
    launcher.spawn(config.scheduling(TaskKind::Streamer), move || {
        let mut body = AudioStreamer::new(source, transport, &shared, chunk_size);
        streamer.run(&mut body)
    })?;

    let mut listener = periodic_task(config, TaskKind::Listener);
    let shared = Arc::clone(&pause);
    launcher.spawn(config.scheduling(TaskKind::Listener), move || {
        let mut body = CommandListener::new(io::stdin().lock(), &shared);
        listener.run(&mut body)
    })?;

    let mut reporter = periodic_task(config, TaskKind::Reporter);
    let shared = Arc::clone(&pause);
    launcher.spawn(config.scheduling(TaskKind::Reporter), move || {
        let mut body = StateReporter::new(io::stdout().lock(), &shared);
        reporter.run(&mut body)
    })?;

    info!(ceiling, tasks = launcher.task_count(), "All tasks running");
    Ok(launcher.wait_for_failure()?)
}
