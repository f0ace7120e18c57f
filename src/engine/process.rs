//! Process-isolated worker backend.
//!
//! Each generation is a child process running the `worker` subcommand:
//! - stdin is one end of a Unix socket pair, the private request/outcome
//!   channel of this generation;
//! - stdout is piped into the stdout relay as it is produced;
//! - stderr is inherited so worker logs reach the terminal;
//! - `kill_on_drop(true)` so an abandoned generation never outlives its
//!   handle.
//!
//! Cancellation is `SIGKILL` through [`tokio::process::Child::start_kill`].

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::PathBuf;
use std::process::Stdio;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::engine::backend::{BoxFuture, SpawnedWorker, WorkerBackend, WorkerProcess};
use crate::engine::protocol::{
    decode_line, encode_line, EvaluationRequest, ProtocolCodec, WorkerOutcome,
};
use crate::engine::relay::{RelaySender, Utf8Chunker};
use crate::{AppError, Result};

const STDOUT_READ_BYTES: usize = 8192;

/// Spawns one worker process per generation.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    max_line_bytes: usize,
}

impl ProcessBackend {
    /// Launch `program args…` for every generation.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, max_line_bytes: usize) -> Self {
        Self {
            program: program.into(),
            args,
            max_line_bytes,
        }
    }

    /// Build from engine configuration. When the running binary is reused as
    /// the worker, the configured call depth is passed along as
    /// `--max-call-depth`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the worker executable cannot be
    /// resolved.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let mut args = config.worker.args.clone();
        if config.worker.program.is_none() {
            args.extend(["--max-call-depth".to_owned(), config.max_call_depth.to_string()]);
        }
        Ok(Self::new(config.worker_program()?, args, config.max_line_bytes))
    }

    fn spawn_process(&self, generation: u64, stdout: RelaySender) -> Result<SpawnedWorker> {
        let (local, remote) = StdUnixStream::pair()
            .map_err(|err| AppError::Spawn(format!("failed to create request channel: {err}")))?;
        local
            .set_nonblocking(true)
            .map_err(|err| AppError::Spawn(format!("failed to configure request channel: {err}")))?;
        let local = UnixStream::from_std(local)
            .map_err(|err| AppError::Spawn(format!("failed to register request channel: {err}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::from(OwnedFd::from(remote)))
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!(
                "failed to spawn worker '{}': {err}",
                self.program.display()
            ))
        })?;
        // The command holds our copy of the remote socket end; release it so
        // the channel reports EOF once the child is gone.
        drop(cmd);

        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture worker stdout".into()))?;

        let pid = child.id();
        info!(generation, pid, "worker process spawned");

        let (request_tx, request_rx) = oneshot::channel();
        let pump = tokio::spawn(pump_stdout(generation, child_stdout, stdout));
        let channel = tokio::spawn(run_channel(
            generation,
            local,
            request_rx,
            self.max_line_bytes,
        ));

        Ok(SpawnedWorker {
            requests: request_tx,
            process: Box::new(ProcessWorker {
                generation,
                child,
                pump,
                channel,
            }),
        })
    }
}

impl WorkerBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn spawn(&self, generation: u64, stdout: RelaySender) -> BoxFuture<'_, Result<SpawnedWorker>> {
        Box::pin(async move { self.spawn_process(generation, stdout) })
    }
}

/// Lifecycle handle of one worker process.
struct ProcessWorker {
    generation: u64,
    child: Child,
    pump: JoinHandle<()>,
    channel: JoinHandle<Option<WorkerOutcome>>,
}

impl WorkerProcess for ProcessWorker {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn exited(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match self.child.wait().await {
                Ok(status) => debug!(generation = self.generation, %status, "worker process exited"),
                Err(err) => {
                    warn!(generation = self.generation, %err, "error waiting for worker process");
                }
            }
        })
    }

    fn terminate(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if let Err(err) = self.child.start_kill() {
                // Already reaped; nothing left to stop.
                debug!(generation = self.generation, %err, "worker kill skipped");
            }
        })
    }

    fn finish(self: Box<Self>) -> BoxFuture<'static, Option<WorkerOutcome>> {
        let Self {
            generation,
            pump,
            channel,
            ..
        } = *self;
        Box::pin(async move {
            if let Err(err) = pump.await {
                warn!(generation, %err, "stdout pump task failed");
            }
            match channel.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(generation, %err, "request channel task failed");
                    None
                }
            }
        })
    }
}

/// Forward the worker's stdout to the relay until EOF.
async fn pump_stdout(generation: u64, mut stdout: ChildStdout, relay: RelaySender) {
    let mut buf = vec![0_u8; STDOUT_READ_BYTES];
    let mut chunker = Utf8Chunker::default();
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Some(chunk) = chunker.push(&buf[..n]) {
                    relay.send(chunk);
                }
            }
            Err(err) => {
                warn!(generation, %err, "error reading worker stdout");
                break;
            }
        }
    }
    if let Some(chunk) = chunker.finish() {
        relay.send(chunk);
    }
    debug!(generation, "stdout pump reached EOF");
}

/// Deliver the request, if one arrives, and read back the outcome line.
///
/// Returns `None` when the request endpoint is dropped unused or the worker
/// closes the channel without answering.
async fn run_channel(
    generation: u64,
    mut socket: UnixStream,
    requests: oneshot::Receiver<EvaluationRequest>,
    max_line_bytes: usize,
) -> Option<WorkerOutcome> {
    let request = requests.await.ok()?;

    let bytes = match encode_line(&request) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(generation, %err, "failed to encode request");
            return None;
        }
    };
    if let Err(err) = socket.write_all(&bytes).await {
        debug!(generation, %err, "worker gone before request was delivered");
        return None;
    }

    let mut framed = FramedRead::new(socket, ProtocolCodec::new(max_line_bytes));
    match framed.next().await {
        Some(Ok(line)) => match decode_line::<WorkerOutcome>(&line) {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                warn!(generation, %err, "discarding malformed worker outcome");
                None
            }
        },
        Some(Err(err)) => {
            warn!(generation, %err, "error reading worker outcome");
            None
        }
        None => {
            debug!(generation, "worker closed channel without an outcome");
            None
        }
    }
}
