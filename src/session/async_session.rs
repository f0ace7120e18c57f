//! Session backed by the worker manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::engine::backend::WorkerBackend;
use crate::engine::{EngineEvent, WorkerManager};
use crate::session::{Document, Session, SessionEvent};
use crate::{AppError, Result};

type DocumentSlot = Arc<RwLock<Option<Arc<dyn Document>>>>;

/// Evaluates through a [`WorkerManager`] without blocking the caller.
///
/// Engine events are translated into [`SessionEvent`]s by a forwarding task;
/// results are written into the attached document before the matching
/// [`SessionEvent::UpdateFinished`] is sent.
pub struct AsyncSession {
    manager: WorkerManager,
    document: DocumentSlot,
    events: mpsc::UnboundedSender<SessionEvent>,
    engine_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    forwarder: Option<JoinHandle<()>>,
}

impl AsyncSession {
    /// Create a stopped session evaluating on `backend`.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn WorkerBackend>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        Self {
            manager: WorkerManager::new(config, backend, engine_tx),
            document: Arc::new(RwLock::new(None)),
            events,
            engine_rx: Some(engine_rx),
            forwarder: None,
        }
    }

    /// Create a stopped session using the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the backend cannot be built.
    pub fn from_config(
        config: EngineConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        let backend = crate::engine::backend_from_config(&config)?;
        Ok(Self::new(config, backend, events))
    }

    /// Start the underlying manager and the event forwarder.
    ///
    /// # Errors
    ///
    /// Propagates [`WorkerManager::start`] failures.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(engine_rx) = self.engine_rx.take() {
            self.forwarder = Some(tokio::spawn(forward_events(
                engine_rx,
                Arc::clone(&self.document),
                self.events.clone(),
            )));
        }
        self.manager.start().await?;
        info!("async session started");
        Ok(())
    }

    /// Stop the underlying manager, killing any evaluation in flight.
    ///
    /// # Errors
    ///
    /// Propagates [`WorkerManager::stop`] failures.
    pub async fn stop(&mut self) -> Result<()> {
        self.manager.stop().await
    }

    /// Cancel the evaluation in flight. Alias of [`Session::cancel`].
    ///
    /// # Errors
    ///
    /// See [`WorkerManager::cancel`].
    pub async fn interrupt(&self) -> Result<()> {
        self.manager.cancel().await
    }

    /// The manager driving this session.
    #[must_use]
    pub fn manager(&self) -> &WorkerManager {
        &self.manager
    }
}

impl Session for AsyncSession {
    fn set_document(&mut self, document: Arc<dyn Document>) {
        *self.document.write().unwrap_or_else(PoisonError::into_inner) = Some(document);
    }

    fn document(&self) -> Option<Arc<dyn Document>> {
        self.document
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn update(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let document = self.document().ok_or(AppError::NoDocument)?;
            if self.manager.is_evaluating() {
                debug!("update while evaluating; cancelling the running script first");
                self.manager.cancel().await?;
            }
            self.manager.evaluate_when_ready(document.script()).await
        })
    }

    fn cancel(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.manager.cancel().await })
    }

    fn is_evaluating(&self) -> bool {
        self.manager.is_evaluating()
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

async fn forward_events(
    mut engine_rx: mpsc::UnboundedReceiver<EngineEvent>,
    document: DocumentSlot,
    events: mpsc::UnboundedSender<SessionEvent>,
) {
    while let Some(event) = engine_rx.recv().await {
        let forwarded = match event {
            EngineEvent::Started => SessionEvent::UpdateStarted,
            EngineEvent::Finished => SessionEvent::UpdateFinished,
            EngineEvent::Errored => SessionEvent::UpdateErrored,
            EngineEvent::Stdout(chunk) => SessionEvent::Stdout(chunk),
            EngineEvent::Result(sources) => {
                let target = document
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match target {
                    Some(target) => target.set_data_sources(sources),
                    None => debug!("result arrived with no document attached; dropped"),
                }
                continue;
            }
        };
        if events.send(forwarded).is_err() {
            debug!("session event receiver dropped");
        }
    }
}
