//! Worker entry point.
//!
//! A worker evaluates exactly one script in a fresh interpreter, streams
//! everything the script prints as it is produced, reports one
//! [`WorkerOutcome`], and ends. [`evaluate`] is the shared core; the
//! process backend reaches it through [`run_worker`] in a child process,
//! the thread backend and the synchronous session call it in-process.

use std::io::Write;
#[cfg(unix)]
use std::io::{self, BufRead, BufReader};
#[cfg(unix)]
use std::os::fd::AsFd;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

#[cfg(unix)]
use tracing::{debug, info_span};

#[cfg(unix)]
use crate::engine::protocol::{decode_line, encode_line, EvaluationRequest};
use crate::engine::protocol::WorkerOutcome;
use crate::script::{self, RunOptions};
#[cfg(unix)]
use crate::{AppError, Result};

/// Run `script` in a fresh interpreter, writing its output to `out`.
///
/// Errors are printed to `out` as `Error: <message>` so they appear in the
/// stdout stream before the outcome is reported.
pub fn evaluate(source: &str, options: &RunOptions, out: &mut dyn Write) -> WorkerOutcome {
    match script::run(source, options, out) {
        Ok(value) => WorkerOutcome::completed(value.as_ref()),
        Err(err) => {
            let _ = writeln!(out, "Error: {err}").and_then(|()| out.flush());
            WorkerOutcome::failed()
        }
    }
}

/// Entry point of the `worker` subcommand.
///
/// The request channel is the socket handed over as stdin. Reads one
/// [`EvaluationRequest`] line, evaluates it with stdout as the output
/// stream, and writes one [`WorkerOutcome`] line back. A closed channel
/// before any request means the supervisor discarded this generation.
///
/// # Errors
///
/// Returns [`AppError::Io`] or [`AppError::Protocol`] when the channel is
/// unusable.
#[cfg(unix)]
pub fn run_worker(max_call_depth: usize) -> Result<()> {
    let _span = info_span!("worker", pid = std::process::id()).entered();

    let channel = request_channel()?;
    let mut reader = BufReader::new(channel.try_clone()?);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        debug!("request channel closed before a request arrived");
        return Ok(());
    }
    let request: EvaluationRequest = decode_line(&line)?;

    let options = RunOptions {
        max_call_depth,
        cancel: None,
    };
    let outcome = {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        evaluate(&request.script, &options, &mut out)
    };
    debug!(error = outcome.error, "evaluation complete");

    let mut channel = channel;
    channel.write_all(&encode_line(&outcome)?)?;
    channel.flush()?;
    Ok(())
}

#[cfg(unix)]
fn request_channel() -> Result<UnixStream> {
    let fd = io::stdin()
        .as_fd()
        .try_clone_to_owned()
        .map_err(|err| AppError::Io(format!("cannot take request channel from stdin: {err}")))?;
    Ok(UnixStream::from(fd))
}
