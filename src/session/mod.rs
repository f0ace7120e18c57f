//! Session coordinators.
//!
//! A [`Session`] binds a [`Document`] (script source and data sink) to an
//! evaluator. Two interchangeable variants exist:
//!
//! - [`SyncSession`] evaluates inline and blocks for the whole script, for
//!   short headless work such as exporting a chart.
//! - [`AsyncSession`] delegates to a [`WorkerManager`](crate::engine::WorkerManager)
//!   and reports completion through [`SessionEvent`]s.
//!
//! Both follow `Idle --update--> Evaluating --(finished|errored)--> Idle`.
//! Only successful evaluations touch the document's data sources.

pub mod async_session;
pub mod sync_session;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use async_session::AsyncSession;
pub use sync_session::SyncSession;

use crate::engine::DataSources;
use crate::Result;

/// Context supplying the script and receiving evaluation results.
pub trait Document: Send + Sync {
    /// Current script text.
    fn script(&self) -> String;

    /// Store the data sources produced by a successful evaluation.
    fn set_data_sources(&self, sources: DataSources);
}

/// Notifications emitted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// An evaluation began.
    UpdateStarted,
    /// An evaluation ended: it succeeded, was terminated, or raised an error
    /// (after [`SessionEvent::UpdateErrored`]).
    UpdateFinished,
    /// An evaluation failed; the data sources were left untouched.
    UpdateErrored,
    /// Script output.
    Stdout(String),
}

/// Whether a session has an evaluation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing is running.
    Idle,
    /// An evaluation is in flight.
    Evaluating,
}

/// Shared contract of the session variants.
pub trait Session: Send {
    /// Attach the document to evaluate.
    fn set_document(&mut self, document: Arc<dyn Document>);

    /// The attached document, if any.
    fn document(&self) -> Option<Arc<dyn Document>>;

    /// Evaluate the document's current script, cancelling any evaluation
    /// already in flight.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NoDocument`](crate::AppError::NoDocument) without
    /// a document, or engine errors from submitting the script.
    fn update(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Cancel the evaluation in flight, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Timeout`](crate::AppError::Timeout) if the
    /// evaluation did not stop within the configured bound.
    fn cancel(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Whether an evaluation is in flight.
    fn is_evaluating(&self) -> bool;

    /// Current state.
    fn state(&self) -> SessionState {
        if self.is_evaluating() {
            SessionState::Evaluating
        } else {
            SessionState::Idle
        }
    }
}
