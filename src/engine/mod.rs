//! Script evaluation engine.
//!
//! - [`worker`]: the worker entry point, running one script per process.
//! - [`relay`]: ordered stdout forwarding to a single subscriber.
//! - [`backend`], [`process`], [`thread`]: worker generations.
//! - [`manager`]: the supervising loop keeping one generation ready.
//! - [`protocol`]: the supervisor/worker channel.

pub mod backend;
pub mod manager;
#[cfg(unix)]
pub mod process;
pub mod protocol;
pub mod relay;
pub mod thread;
pub mod worker;

use std::sync::Arc;

pub use manager::WorkerManager;
use protocol::{WireValue, WorkerOutcome};

use crate::config::{BackendKind, EngineConfig};
use crate::Result;

/// Mapping returned by a successful script and fed to the chart.
pub type DataSources = serde_json::Map<String, serde_json::Value>;

/// Diagnostic written to stdout when a script returns something other than
/// a mapping of primitives and collections.
pub const MALFORMED_RESULT_DIAGNOSTIC: &str =
    "\nError: Return type must be a dict containing only primitives and collections.\n";

/// Notifications emitted by the [`WorkerManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A script was submitted.
    Started,
    /// The evaluation ended. Follows [`EngineEvent::Errored`] when the
    /// script raised an error, and is also sent for terminated generations.
    Finished,
    /// The script raised an error or returned a malformed result. A malformed
    /// result is not followed by [`EngineEvent::Finished`].
    Errored,
    /// Data sources produced by a successful evaluation; always followed by
    /// [`EngineEvent::Finished`].
    Result(DataSources),
    /// A chunk of script output.
    Stdout(String),
}

/// Terminal classification of a worker generation.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// The script returned a valid mapping.
    Success(DataSources),
    /// The script raised an error.
    Error,
    /// The script completed but its value is not a mapping of primitives and
    /// collections.
    MalformedResult,
    /// The generation ended without reporting (cancelled or crashed).
    Terminated,
}

/// Classify what a generation reported.
#[must_use]
pub fn classify(outcome: Option<WorkerOutcome>) -> EvaluationOutcome {
    match outcome {
        None => EvaluationOutcome::Terminated,
        Some(WorkerOutcome { error: true, .. }) => EvaluationOutcome::Error,
        Some(WorkerOutcome { value, error: false }) => value
            .as_ref()
            .and_then(validate_result)
            .map_or(EvaluationOutcome::MalformedResult, EvaluationOutcome::Success),
    }
}

/// Accept `value` as data sources if it is a mapping whose values are
/// primitives or nested lists/mappings of primitives.
#[must_use]
pub fn validate_result(value: &WireValue) -> Option<DataSources> {
    match value {
        WireValue::Map(_) => match value.to_json()? {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

/// Build the backend selected by `config`.
///
/// # Errors
///
/// Returns `AppError::Config` when the process backend is selected but the
/// worker executable cannot be resolved, or on platforms without it.
pub fn backend_from_config(config: &EngineConfig) -> Result<Arc<dyn backend::WorkerBackend>> {
    match config.backend {
        #[cfg(unix)]
        BackendKind::Process => Ok(Arc::new(process::ProcessBackend::from_config(config)?)),
        #[cfg(not(unix))]
        BackendKind::Process => Err(crate::AppError::Config(
            "the process backend requires a unix platform".into(),
        )),
        BackendKind::Thread => Ok(Arc::new(thread::ThreadBackend::new(config.max_call_depth))),
    }
}
