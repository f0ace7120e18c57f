//! Inline session.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info_span};

use crate::engine::{classify, worker, EvaluationOutcome, MALFORMED_RESULT_DIAGNOSTIC};
use crate::script::RunOptions;
use crate::session::{Document, Session, SessionEvent};
use crate::{AppError, Result};

/// Evaluates on the caller's thread, blocking until the script ends.
///
/// There is no way to interrupt a running script, so `cancel` is a no-op.
pub struct SyncSession {
    document: Option<Arc<dyn Document>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    options: RunOptions,
}

impl SyncSession {
    /// Create a session emitting events on `events`.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<SessionEvent>, max_call_depth: usize) -> Self {
        Self {
            document: None,
            events,
            options: RunOptions {
                max_call_depth,
                cancel: None,
            },
        }
    }

    /// Evaluate the document's script and return once it has finished.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoDocument` if no document is attached.
    pub fn update_blocking(&mut self) -> Result<()> {
        let document = self.document.clone().ok_or(AppError::NoDocument)?;
        let _span = info_span!("sync_update").entered();

        self.emit(SessionEvent::UpdateStarted);
        let mut out = EventWriter {
            events: self.events.clone(),
        };
        let outcome = classify(Some(worker::evaluate(
            &document.script(),
            &self.options,
            &mut out,
        )));

        match outcome {
            EvaluationOutcome::Success(sources) => {
                debug!(keys = sources.len(), "evaluation succeeded");
                document.set_data_sources(sources);
                self.emit(SessionEvent::UpdateFinished);
            }
            EvaluationOutcome::MalformedResult => {
                self.emit(SessionEvent::Stdout(MALFORMED_RESULT_DIAGNOSTIC.into()));
                self.emit(SessionEvent::UpdateErrored);
            }
            EvaluationOutcome::Error => {
                self.emit(SessionEvent::UpdateErrored);
                self.emit(SessionEvent::UpdateFinished);
            }
            EvaluationOutcome::Terminated => self.emit(SessionEvent::UpdateFinished),
        }
        Ok(())
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Session for SyncSession {
    fn set_document(&mut self, document: Arc<dyn Document>) {
        self.document = Some(document);
    }

    fn document(&self) -> Option<Arc<dyn Document>> {
        self.document.clone()
    }

    fn update(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move { self.update_blocking() })
    }

    fn cancel(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn is_evaluating(&self) -> bool {
        false
    }
}

/// Turns script output into [`SessionEvent::Stdout`] events.
struct EventWriter {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl io::Write for EventWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() {
            let _ = self
                .events
                .send(SessionEvent::Stdout(String::from_utf8_lossy(buf).into_owned()));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
