//! Worker lifecycle manager.
//!
//! [`WorkerManager`] owns a supervising task that keeps exactly one worker
//! generation alive and ready:
//!
//! 1. spawn a generation and publish its request endpoint;
//! 2. wait until it exits on its own or its cancellation token fires, in
//!    which case it is killed;
//! 3. drain its stdout, classify what it reported, spawn the successor;
//! 4. emit the outcome events, then clear the busy flag.
//!
//! The busy flag is written only here. Callers may submit a new script once
//! it reads `false`; by then the next generation is already waiting.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::engine::backend::{SpawnedWorker, WorkerBackend, WorkerProcess};
use crate::engine::protocol::EvaluationRequest;
use crate::engine::relay::{RelaySender, StdoutRelay};
use crate::engine::{backend_from_config, classify, EngineEvent, EvaluationOutcome, MALFORMED_RESULT_DIAGNOSTIC};
use crate::{AppError, Result};

/// Pause between attempts when a generation fails to spawn.
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(250);

/// State shared between the manager handle and its supervising task.
struct Shared {
    slot: Mutex<Slot>,
    busy: watch::Sender<bool>,
    /// Number of the most recent generation that became ready.
    ready: watch::Sender<u64>,
    last_spawn_error: Mutex<Option<String>>,
}

/// The generation currently alive.
#[derive(Default)]
struct Slot {
    generation: u64,
    requests: Option<oneshot::Sender<EvaluationRequest>>,
    cancel: Option<CancellationToken>,
    in_flight: bool,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Running {
    stop: CancellationToken,
    supervisor: JoinHandle<()>,
    relay: StdoutRelay,
}

/// Keeps a worker generation ready and runs one evaluation at a time.
pub struct WorkerManager {
    config: EngineConfig,
    backend: Arc<dyn WorkerBackend>,
    events: mpsc::UnboundedSender<EngineEvent>,
    shared: Arc<Shared>,
    running: Option<Running>,
}

impl WorkerManager {
    /// Create a stopped manager emitting events on `events`.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn WorkerBackend>,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            backend,
            events,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::default()),
                busy: watch::channel(false).0,
                ready: watch::channel(0).0,
                last_spawn_error: Mutex::new(None),
            }),
            running: None,
        }
    }

    /// Create a stopped manager using the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the backend cannot be built.
    pub fn from_config(
        config: EngineConfig,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self> {
        let backend = backend_from_config(&config)?;
        Ok(Self::new(config, backend, events))
    }

    /// Start the relay and the supervising loop, and wait until the first
    /// generation is ready. Calling `start` on a running manager does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` or `AppError::Timeout` when no generation
    /// becomes ready within the configured bound; the manager is stopped
    /// again in that case.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Ok(());
        }

        let relay = StdoutRelay::spawn();
        let events = self.events.clone();
        relay.subscribe(move |chunk| {
            let _ = events.send(EngineEvent::Stdout(chunk));
        });

        let mut ready = self.shared.ready.subscribe();
        let previous = *ready.borrow_and_update();
        *self
            .shared
            .last_spawn_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;

        let stop = CancellationToken::new();
        let supervisor = Supervisor {
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            relay: relay.sender(),
            events: self.events.clone(),
            stop: stop.clone(),
            next_generation: previous,
        };
        let span = info_span!("supervisor", backend = self.backend.name());
        let supervisor = tokio::spawn(supervisor.run().instrument(span));
        self.running = Some(Running {
            stop,
            supervisor,
            relay,
        });

        let limit = self.config.ready_timeout();
        let became_ready = tokio::time::timeout(limit, ready.wait_for(|n| *n > previous))
            .await
            .is_ok_and(|result| result.is_ok());
        if became_ready {
            info!(backend = self.backend.name(), "worker manager started");
            return Ok(());
        }

        let spawn_error = self
            .shared
            .last_spawn_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.stop().await?;
        Err(match spawn_error {
            Some(err) => AppError::Spawn(err),
            None => AppError::Timeout(format!("no worker generation ready within {limit:?}")),
        })
    }

    /// Submit `script` to the ready generation.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning` before [`start`](Self::start).
    /// - `AppError::Busy` while an evaluation is in flight or the next
    ///   generation is still being spawned.
    pub fn evaluate(&self, script: impl Into<String>) -> Result<()> {
        if self.submit(script.into())? {
            Ok(())
        } else {
            Err(AppError::Busy("worker generation is restarting".into()))
        }
    }

    /// Like [`evaluate`](Self::evaluate), but when the previous generation
    /// exited while idle and its replacement is not published yet, wait up
    /// to the ready timeout for it instead of failing.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning` before [`start`](Self::start).
    /// - `AppError::Busy` while an evaluation is in flight.
    /// - `AppError::Timeout` when no generation becomes ready in time.
    pub async fn evaluate_when_ready(&self, script: impl Into<String>) -> Result<()> {
        let script = script.into();
        let limit = self.config.ready_timeout();
        let deadline = tokio::time::Instant::now() + limit;
        let mut ready = self.shared.ready.subscribe();
        loop {
            if self.submit(script.clone())? {
                return Ok(());
            }
            debug!("waiting for the replacement generation");
            let published = tokio::time::timeout_at(deadline, ready.changed())
                .await
                .is_ok_and(|changed| changed.is_ok());
            if !published {
                return Err(AppError::Timeout(format!(
                    "no worker generation ready within {limit:?}"
                )));
            }
        }
    }

    /// Hand `script` to the ready generation. `Ok(false)` means no generation
    /// is published yet.
    fn submit(&self, script: String) -> Result<bool> {
        if self.running.is_none() {
            return Err(AppError::NotRunning("worker manager not started".into()));
        }

        let mut slot = self.shared.slot();
        if *self.shared.busy.borrow() {
            return Err(AppError::Busy("an evaluation is already in flight".into()));
        }
        let Some(requests) = slot.requests.take() else {
            return Ok(false);
        };
        slot.in_flight = true;
        self.shared.busy.send_replace(true);
        // Emitted under the slot lock so it always precedes this
        // generation's terminal events.
        let _ = self.events.send(EngineEvent::Started);

        let generation = slot.generation;
        if requests.send(EvaluationRequest { script }).is_err() {
            warn!(generation, "generation exited before the request was delivered");
        }
        info!(generation, "evaluation started");
        Ok(true)
    }

    /// Kill the in-flight evaluation and wait until the manager is idle.
    /// Does nothing while idle.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` if the busy flag is still set after the
    /// configured cancel timeout.
    pub async fn cancel(&self) -> Result<()> {
        if !self.is_evaluating() {
            return Ok(());
        }
        let token = {
            let slot = self.shared.slot();
            if slot.in_flight {
                slot.cancel.clone().map(|token| (slot.generation, token))
            } else {
                None
            }
        };
        if let Some((generation, token)) = token {
            info!(generation, "cancelling evaluation");
            token.cancel();
        }
        self.wait_idle(self.config.cancel_timeout()).await
    }

    /// Whether an evaluation is in flight.
    #[must_use]
    pub fn is_evaluating(&self) -> bool {
        *self.shared.busy.borrow()
    }

    /// Whether [`start`](Self::start) has succeeded and [`stop`](Self::stop)
    /// has not been called since.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Replace the stdout subscriber. By default chunks are forwarded as
    /// [`EngineEvent::Stdout`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotRunning` before [`start`](Self::start).
    pub fn subscribe_stdout(&self, subscriber: impl FnMut(String) + Send + 'static) -> Result<()> {
        let running = self
            .running
            .as_ref()
            .ok_or_else(|| AppError::NotRunning("worker manager not started".into()))?;
        running.relay.subscribe(subscriber);
        Ok(())
    }

    /// Stop the supervising loop, killing the current generation, and wait
    /// for it to exit. Stopping a stopped manager does nothing.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible for parity with [`start`](Self::start).
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.stop.cancel();
        if let Err(err) = running.supervisor.await {
            warn!(%err, "supervisor task failed");
        }
        running.relay.shutdown().await;
        self.shared.busy.send_replace(false);
        info!("worker manager stopped");
        Ok(())
    }

    async fn wait_idle(&self, limit: Duration) -> Result<()> {
        let mut busy = self.shared.busy.subscribe();
        let waited = tokio::time::timeout(limit, busy.wait_for(|busy| !*busy))
            .await
            .is_ok();
        if waited {
            Ok(())
        } else {
            Err(AppError::Timeout(format!(
                "evaluation still running after {limit:?}"
            )))
        }
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.stop.cancel();
        }
    }
}

// ── Supervising loop ─────────────────────────────────────────────────────────

struct Generation {
    number: u64,
    process: Box<dyn WorkerProcess>,
    cancel: CancellationToken,
}

struct Supervisor {
    backend: Arc<dyn WorkerBackend>,
    shared: Arc<Shared>,
    relay: RelaySender,
    events: mpsc::UnboundedSender<EngineEvent>,
    stop: CancellationToken,
    next_generation: u64,
}

impl Supervisor {
    async fn run(mut self) {
        let mut current = self.spawn_ready().await;

        while let Some(Generation {
            number,
            mut process,
            cancel,
        }) = current
        {
            let killed = tokio::select! {
                () = process.exited() => false,
                () = cancel.cancelled() => true,
            };
            if killed {
                process.terminate().await;
                process.exited().await;
            }

            let in_flight = {
                let mut slot = self.shared.slot();
                slot.requests = None;
                slot.cancel = None;
                std::mem::take(&mut slot.in_flight)
            };

            let reported = process.finish().await;
            let outcome = if cancel.is_cancelled() {
                EvaluationOutcome::Terminated
            } else {
                classify(reported)
            };
            self.log_outcome(number, &outcome, cancel.is_cancelled(), in_flight);
            if outcome == EvaluationOutcome::MalformedResult {
                self.relay.send(MALFORMED_RESULT_DIAGNOSTIC);
            }
            self.relay.flush().await;

            current = self.spawn_ready().await;
            if in_flight {
                self.emit(outcome);
            }
            self.shared.busy.send_replace(false);
        }

        self.shared.busy.send_replace(false);
        debug!("supervising loop exited");
    }

    /// Spawn the next generation and publish it, retrying until it succeeds
    /// or a stop is requested.
    async fn spawn_ready(&mut self) -> Option<Generation> {
        loop {
            if self.stop.is_cancelled() {
                return None;
            }
            self.next_generation += 1;
            let number = self.next_generation;

            match self.backend.spawn(number, self.relay.clone()).await {
                Ok(SpawnedWorker { requests, process }) => {
                    let cancel = self.stop.child_token();
                    {
                        let mut slot = self.shared.slot();
                        slot.generation = number;
                        slot.requests = Some(requests);
                        slot.cancel = Some(cancel.clone());
                        slot.in_flight = false;
                    }
                    self.shared.ready.send_replace(number);
                    debug!(generation = number, pid = process.id(), "generation ready");
                    return Some(Generation {
                        number,
                        process,
                        cancel,
                    });
                }
                Err(err) => {
                    error!(generation = number, %err, "failed to spawn worker generation");
                    *self
                        .shared
                        .last_spawn_error
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(err.to_string());
                    tokio::select! {
                        () = self.stop.cancelled() => return None,
                        () = tokio::time::sleep(SPAWN_RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    fn log_outcome(&self, generation: u64, outcome: &EvaluationOutcome, killed: bool, in_flight: bool) {
        match outcome {
            EvaluationOutcome::Success(sources) => {
                info!(generation, keys = sources.len(), "evaluation succeeded");
            }
            EvaluationOutcome::Error => info!(generation, "script raised an error"),
            EvaluationOutcome::MalformedResult => {
                info!(generation, "script returned a malformed result");
            }
            EvaluationOutcome::Terminated if killed && self.stop.is_cancelled() => {
                debug!(generation, "generation stopped");
            }
            EvaluationOutcome::Terminated if killed => info!(generation, "evaluation cancelled"),
            EvaluationOutcome::Terminated => {
                // Reported to callers exactly like a cancellation.
                warn!(generation, in_flight, "worker exited without reporting an outcome");
            }
        }
    }

    fn emit(&self, outcome: EvaluationOutcome) {
        let terminal = match outcome {
            EvaluationOutcome::Success(sources) => {
                let _ = self.events.send(EngineEvent::Result(sources));
                EngineEvent::Finished
            }
            EvaluationOutcome::Error => {
                let _ = self.events.send(EngineEvent::Errored);
                EngineEvent::Finished
            }
            EvaluationOutcome::MalformedResult => EngineEvent::Errored,
            EvaluationOutcome::Terminated => EngineEvent::Finished,
        };
        let _ = self.events.send(terminal);
    }
}
