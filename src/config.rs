//! Engine configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Smallest accepted value for [`EngineConfig::max_line_bytes`].
pub const MIN_LINE_BYTES: usize = 1024;

/// Where worker generations run.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// One OS process per generation, killed with `SIGKILL` on cancel.
    #[default]
    Process,
    /// One OS thread per generation, stopped through a cancellation flag.
    Thread,
}

/// How to launch a worker process.
///
/// When `program` is absent the engine re-executes its own binary, so the
/// default `args` select the hidden `worker` subcommand.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Worker executable. Defaults to the current executable.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Arguments passed to the worker executable.
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: default_worker_args(),
        }
    }
}

fn default_worker_args() -> Vec<String> {
    vec!["worker".into()]
}

fn default_cancel_timeout_ms() -> u64 {
    5000
}

fn default_ready_timeout_ms() -> u64 {
    5000
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

fn default_max_call_depth() -> usize {
    256
}

/// Engine configuration parsed from `chartscript.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Worker backend.
    #[serde(default)]
    pub backend: BackendKind,
    /// Upper bound on `cancel()` waiting for the busy flag to clear.
    #[serde(default = "default_cancel_timeout_ms")]
    pub cancel_timeout_ms: u64,
    /// Upper bound on waiting for a freshly spawned generation.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// Maximum accepted length of one protocol line.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Maximum nesting of script function calls.
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Worker process launch settings.
    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            cancel_timeout_ms: default_cancel_timeout_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
            max_line_bytes: default_max_line_bytes(),
            max_call_depth: default_max_call_depth(),
            worker: WorkerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Bound applied to `cancel()`.
    #[must_use]
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    /// Bound applied while waiting for a generation to become ready.
    #[must_use]
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Resolve the worker executable, falling back to the running binary.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if no program is configured and the
    /// current executable path cannot be determined.
    pub fn worker_program(&self) -> Result<PathBuf> {
        match &self.worker.program {
            Some(program) => Ok(program.clone()),
            None => std::env::current_exe()
                .map_err(|err| AppError::Config(format!("cannot locate worker executable: {err}"))),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.cancel_timeout_ms == 0 {
            return Err(AppError::Config(
                "cancel_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.ready_timeout_ms == 0 {
            return Err(AppError::Config(
                "ready_timeout_ms must be greater than zero".into(),
            ));
        }

        if self.max_call_depth == 0 {
            return Err(AppError::Config(
                "max_call_depth must be greater than zero".into(),
            ));
        }

        if self.max_line_bytes < MIN_LINE_BYTES {
            return Err(AppError::Config(format!(
                "max_line_bytes must be at least {MIN_LINE_BYTES}"
            )));
        }

        Ok(())
    }
}
