//! In-process worker backend.
//!
//! Each generation is a task that waits for its request and then runs the
//! interpreter on a dedicated OS thread. Termination sets the generation's
//! [`CancelFlag`]: the task stops waiting at once and the thread unwinds at
//! its next interpreter step (a `sleep` wakes immediately). Output written
//! after termination is discarded.

use std::io;
use std::thread;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::backend::{BoxFuture, SpawnedWorker, WorkerBackend, WorkerProcess};
use crate::engine::protocol::{EvaluationRequest, WorkerOutcome};
use crate::engine::relay::{RelaySender, RelayWriter};
use crate::engine::worker;
use crate::script::{CancelFlag, RunOptions};
use crate::Result;

/// Stack size for interpreter threads; deep recursion needs headroom.
const INTERPRETER_STACK_BYTES: usize = 16 * 1024 * 1024;

/// Runs generations on threads of the current process.
#[derive(Debug, Clone)]
pub struct ThreadBackend {
    max_call_depth: usize,
}

impl ThreadBackend {
    /// Create a backend whose scripts may nest `max_call_depth` calls.
    #[must_use]
    pub fn new(max_call_depth: usize) -> Self {
        Self { max_call_depth }
    }
}

impl WorkerBackend for ThreadBackend {
    fn name(&self) -> &'static str {
        "thread"
    }

    fn spawn(&self, generation: u64, stdout: RelaySender) -> BoxFuture<'_, Result<SpawnedWorker>> {
        let max_call_depth = self.max_call_depth;
        Box::pin(async move {
            let (request_tx, request_rx) = oneshot::channel();
            let flag = CancelFlag::new();
            let stop = CancellationToken::new();
            let task = tokio::spawn(run_generation(
                generation,
                request_rx,
                stdout,
                RunOptions {
                    max_call_depth,
                    cancel: Some(flag.clone()),
                },
                stop.clone(),
            ));
            debug!(generation, "thread worker ready");
            Ok(SpawnedWorker {
                requests: request_tx,
                process: Box::new(ThreadWorker {
                    generation,
                    flag,
                    stop,
                    task,
                    outcome: None,
                }),
            })
        })
    }
}

struct ThreadWorker {
    generation: u64,
    flag: CancelFlag,
    stop: CancellationToken,
    task: JoinHandle<Option<WorkerOutcome>>,
    outcome: Option<Option<WorkerOutcome>>,
}

impl WorkerProcess for ThreadWorker {
    fn id(&self) -> Option<u32> {
        None
    }

    fn exited(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.outcome.is_some() {
                return;
            }
            let outcome = match (&mut self.task).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(generation = self.generation, %err, "thread worker task failed");
                    None
                }
            };
            self.outcome = Some(outcome);
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.flag.cancel();
            self.stop.cancel();
        })
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, Option<WorkerOutcome>> {
        let mut this = self;
        Box::pin(async move {
            this.exited().await;
            this.outcome.flatten()
        })
    }
}

async fn run_generation(
    generation: u64,
    requests: oneshot::Receiver<EvaluationRequest>,
    stdout: RelaySender,
    options: RunOptions,
    stop: CancellationToken,
) -> Option<WorkerOutcome> {
    let request = tokio::select! {
        biased;
        () = stop.cancelled() => return None,
        request = requests => request.ok()?,
    };

    let (outcome_tx, outcome_rx) = oneshot::channel();
    let flag = options.cancel.clone();
    let spawned = thread::Builder::new()
        .name(format!("chartscript-worker-{generation}"))
        .stack_size(INTERPRETER_STACK_BYTES)
        .spawn(move || {
            let mut out = GuardedWriter {
                inner: RelayWriter::new(stdout),
                flag,
            };
            let outcome = worker::evaluate(&request.script, &options, &mut out);
            let _ = outcome_tx.send(outcome);
        });
    if let Err(err) = spawned {
        warn!(generation, %err, "failed to start interpreter thread");
        return None;
    }

    tokio::select! {
        biased;
        () = stop.cancelled() => None,
        outcome = outcome_rx => outcome.ok(),
    }
}

/// Drops writes once the generation has been terminated.
struct GuardedWriter {
    inner: RelayWriter,
    flag: Option<CancelFlag>,
}

impl io::Write for GuardedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.flag.as_ref().is_some_and(CancelFlag::is_cancelled) {
            return Ok(buf.len());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
