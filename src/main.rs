#![forbid(unsafe_code)]

//! `chartscript`: evaluate chart scripts in disposable worker processes.
//!
//! Logs go to stderr; stdout carries script output and results.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use chartscript::document::{ChartDocument, ChartModel, ScriptModel};
use chartscript::session::{AsyncSession, Session, SessionEvent, SyncSession};
use chartscript::watcher::DocumentWatcher;
use chartscript::{AppError, EngineConfig, Result};

/// Exit code for a script that raised an error or returned a bad value.
const EXIT_SCRIPT_ERROR: u8 = 1;
/// Exit code for an evaluation that was cancelled or timed out.
const EXIT_CANCELLED: u8 = 2;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "chartscript", about = "Evaluate chart scripts", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Evaluate one script received on the request channel (internal).
    #[command(hide = true)]
    Worker {
        /// Override the configured maximum call depth.
        #[arg(long)]
        max_call_depth: Option<usize>,
    },

    /// Evaluate a script file in a worker and print its data sources.
    Eval {
        /// Script file to evaluate.
        script: PathBuf,

        /// Cancel the evaluation after this many seconds.
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Evaluate a document inline and write the resulting chart state.
    Run {
        /// Document file (`.cht`).
        document: PathBuf,

        /// Write the chart state here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Re-evaluate a document whenever its file changes.
    Watch {
        /// Document file (`.cht`).
        document: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let config = match &args.config {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };

    match args.command {
        #[cfg(unix)]
        Command::Worker { max_call_depth } => {
            chartscript::engine::worker::run_worker(max_call_depth.unwrap_or(config.max_call_depth))?;
            Ok(ExitCode::SUCCESS)
        }
        #[cfg(not(unix))]
        Command::Worker { .. } => Err(AppError::Config(
            "the worker subcommand requires a unix platform".into(),
        )),
        Command::Run { document, output } => run_document(&config, &document, output.as_deref()),
        Command::Eval { script, timeout } => {
            runtime()?.block_on(eval_script(config, &script, timeout))
        }
        Command::Watch { document } => runtime()?.block_on(watch_document(config, &document)),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))
}

fn print_chunk(chunk: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(chunk.as_bytes());
    let _ = stdout.flush();
}

fn to_pretty_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Io(format!("failed to serialise output: {err}")))
}

// ── eval ─────────────────────────────────────────────────────────────────────

async fn eval_script(config: EngineConfig, path: &Path, timeout: Option<f64>) -> Result<ExitCode> {
    let script = std::fs::read_to_string(path)
        .map_err(|err| AppError::Io(format!("cannot read '{}': {err}", path.display())))?;
    let timeout = timeout
        .map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|err| AppError::Config(format!("invalid --timeout: {err}")))?;

    let document = Arc::new(ChartDocument::new(
        ChartModel::default(),
        ScriptModel::new(script),
    ));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = AsyncSession::from_config(config, events_tx)?;
    session.start().await?;
    session.set_document(document.clone());
    session.update().await?;

    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let interrupted = shutdown_signal();
    tokio::pin!(interrupted);

    let mut cancelled = false;
    let mut code = ExitCode::SUCCESS;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            () = &mut deadline, if !cancelled => {
                warn!(?timeout, "evaluation timed out; cancelling");
                cancelled = true;
                session.interrupt().await?;
                continue;
            }
            () = &mut interrupted, if !cancelled => {
                info!("interrupt received; cancelling evaluation");
                cancelled = true;
                session.interrupt().await?;
                continue;
            }
        };
        let Some(event) = event else {
            break;
        };
        match event {
            SessionEvent::Stdout(chunk) => print_chunk(&chunk),
            SessionEvent::UpdateStarted => {}
            SessionEvent::UpdateFinished if cancelled => {
                code = ExitCode::from(EXIT_CANCELLED);
                break;
            }
            SessionEvent::UpdateFinished => {
                let sources = document.chart().data_sources();
                print_chunk(&format!("{}\n", to_pretty_json(&sources)?));
                break;
            }
            SessionEvent::UpdateErrored => {
                code = ExitCode::from(EXIT_SCRIPT_ERROR);
                break;
            }
        }
    }

    session.stop().await?;
    Ok(code)
}

// ── run ──────────────────────────────────────────────────────────────────────

fn run_document(config: &EngineConfig, path: &Path, output: Option<&Path>) -> Result<ExitCode> {
    let document = Arc::new(ChartDocument::from_file(path, false)?);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = SyncSession::new(events_tx, config.max_call_depth);
    session.set_document(document.clone());
    session.update_blocking()?;

    let mut errored = false;
    while let Ok(event) = events.try_recv() {
        match event {
            // Script output goes to stderr so stdout stays valid JSON.
            SessionEvent::Stdout(chunk) => eprint!("{chunk}"),
            SessionEvent::UpdateErrored => errored = true,
            SessionEvent::UpdateStarted | SessionEvent::UpdateFinished => {}
        }
    }
    if errored {
        warn!(path = %path.display(), "script failed; chart state not written");
        return Ok(ExitCode::from(EXIT_SCRIPT_ERROR));
    }

    let state = to_pretty_json(&document.chart().chart_state())?;
    match output {
        Some(output) => {
            std::fs::write(output, state)
                .map_err(|err| AppError::Io(format!("cannot write '{}': {err}", output.display())))?;
            info!(path = %output.display(), "chart state written");
        }
        None => print_chunk(&format!("{state}\n")),
    }
    Ok(ExitCode::SUCCESS)
}

// ── watch ────────────────────────────────────────────────────────────────────

async fn watch_document(config: EngineConfig, path: &Path) -> Result<ExitCode> {
    let document = Arc::new(ChartDocument::from_file(path, false)?);
    let mut watcher = DocumentWatcher::new(path)?;
    let mut sources = document.chart().subscribe();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut session = AsyncSession::from_config(config, events_tx)?;
    session.start().await?;
    session.set_document(document.clone());
    session.update().await?;

    let interrupted = shutdown_signal();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                SessionEvent::Stdout(chunk) => print_chunk(&chunk),
                SessionEvent::UpdateStarted => info!("evaluation started"),
                SessionEvent::UpdateFinished => info!("evaluation finished"),
                SessionEvent::UpdateErrored => warn!("evaluation failed; keeping previous data"),
            },
            Ok(()) = sources.changed() => {
                let current = sources.borrow_and_update().clone();
                print_chunk(&format!("{}\n", to_pretty_json(&current)?));
            }
            Some(()) = watcher.changed() => match document.reload() {
                Ok(_) => {
                    if let Err(err) = session.update().await {
                        warn!(%err, "failed to start evaluation");
                    }
                }
                Err(err) => warn!(%err, "failed to reload document; keeping previous version"),
            },
            () = &mut interrupted => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    session.stop().await?;
    Ok(ExitCode::SUCCESS)
}

// ── plumbing ─────────────────────────────────────────────────────────────────

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
