//! Worker backend abstraction.
//!
//! A [`WorkerBackend`] produces worker generations. Each generation accepts
//! one [`EvaluationRequest`] through a oneshot endpoint, streams its output
//! into the relay, and reports at most one [`WorkerOutcome`] once it has
//! exited. The manager only ever talks to generations through
//! [`WorkerProcess`], so process isolation and the in-process thread
//! fallback are interchangeable.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;

use crate::engine::protocol::{EvaluationRequest, WorkerOutcome};
use crate::engine::relay::RelaySender;
use crate::Result;

/// Boxed future used at the backend seams.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A freshly spawned generation.
pub struct SpawnedWorker {
    /// Request endpoint. Consumed by the one evaluation this generation runs.
    pub requests: oneshot::Sender<EvaluationRequest>,
    /// Lifecycle handle owned by the supervising loop.
    pub process: Box<dyn WorkerProcess>,
}

/// Factory for worker generations.
pub trait WorkerBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Spawn generation number `generation`, streaming its output to
    /// `stdout`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`](crate::AppError::Spawn) when the
    /// generation cannot be started.
    fn spawn(&self, generation: u64, stdout: RelaySender) -> BoxFuture<'_, Result<SpawnedWorker>>;
}

/// Lifecycle handle of one generation.
pub trait WorkerProcess: Send {
    /// OS process id, when the generation is a process.
    fn id(&self) -> Option<u32>;

    /// Resolve once the generation has exited. Cancel-safe and idempotent.
    fn exited(&mut self) -> BoxFuture<'_, ()>;

    /// Forcefully stop the generation without giving the script a chance to
    /// react. Returns once the stop has been issued.
    fn terminate(&mut self) -> BoxFuture<'_, ()>;

    /// After exit, drain remaining output and return the outcome the
    /// generation reported, if any.
    fn finish(self: Box<Self>) -> BoxFuture<'static, Option<WorkerOutcome>>;
}
