//! Stdout relay.
//!
//! One long-lived task drains an unbounded channel of text chunks and hands
//! each chunk, in arrival order, to the single active subscriber. Producers
//! (per-generation stdout pumps, the thread backend's writer, the manager's
//! own diagnostics) hold cheap [`RelaySender`] clones and never block.
//!
//! Chunks arriving while no subscriber is installed are dropped.

use std::io;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Callback receiving stdout chunks.
pub type Subscriber = Box<dyn FnMut(String) + Send>;

enum RelayMessage {
    Chunk(String),
    Subscribe(Option<Subscriber>),
    Flush(oneshot::Sender<()>),
    Close,
}

/// Producer handle for the relay.
#[derive(Clone)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<RelayMessage>,
}

impl RelaySender {
    /// Queue a chunk for delivery. Returns `false` once the relay has shut
    /// down.
    pub fn send(&self, chunk: impl Into<String>) -> bool {
        self.tx.send(RelayMessage::Chunk(chunk.into())).is_ok()
    }

    /// Resolve once every chunk queued before this call has been delivered.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(RelayMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Owner handle for the relay task.
pub struct StdoutRelay {
    tx: mpsc::UnboundedSender<RelayMessage>,
    task: JoinHandle<()>,
}

impl StdoutRelay {
    /// Spawn the relay task on the current runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_relay(rx));
        Self { tx, task }
    }

    /// Producer handle feeding this relay.
    #[must_use]
    pub fn sender(&self) -> RelaySender {
        RelaySender {
            tx: self.tx.clone(),
        }
    }

    /// Replace the active subscriber. Chunks queued before this call go to
    /// the previous subscriber.
    pub fn subscribe(&self, subscriber: impl FnMut(String) + Send + 'static) {
        let _ = self
            .tx
            .send(RelayMessage::Subscribe(Some(Box::new(subscriber))));
    }

    /// Remove the active subscriber.
    pub fn unsubscribe(&self) {
        let _ = self.tx.send(RelayMessage::Subscribe(None));
    }

    /// Resolve once every chunk queued before this call has been delivered.
    pub async fn flush(&self) {
        self.sender().flush().await;
    }

    /// Stop the relay after delivering everything queued so far. Later
    /// sends through outstanding [`RelaySender`]s fail.
    pub async fn shutdown(self) {
        let _ = self.tx.send(RelayMessage::Close);
        let _ = self.task.await;
    }
}

async fn run_relay(mut rx: mpsc::UnboundedReceiver<RelayMessage>) {
    let mut subscriber: Option<Subscriber> = None;
    while let Some(message) = rx.recv().await {
        match message {
            RelayMessage::Chunk(chunk) => match subscriber.as_mut() {
                Some(deliver) => deliver(chunk),
                None => debug!(bytes = chunk.len(), "stdout relay: no subscriber, dropping chunk"),
            },
            RelayMessage::Subscribe(next) => subscriber = next,
            RelayMessage::Flush(ack) => {
                let _ = ack.send(());
            }
            RelayMessage::Close => break,
        }
    }
    debug!("stdout relay stopped");
}

/// Blocking [`io::Write`] adapter that forwards each write as one chunk.
///
/// Used where the interpreter runs in-process. Bytes are decoded lossily;
/// the interpreter always writes whole strings.
pub struct RelayWriter {
    sender: RelaySender,
}

impl RelayWriter {
    /// Wrap a relay producer handle.
    #[must_use]
    pub fn new(sender: RelaySender) -> Self {
        Self { sender }
    }
}

impl io::Write for RelayWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !buf.is_empty() && !self.sender.send(String::from_utf8_lossy(buf)) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stdout relay closed"));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Incremental UTF-8 decoder for byte streams read off a pipe, where a read
/// may split a multi-byte character.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    /// Append `bytes` and return the longest decodable prefix, if any.
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            // A hard error (not just a truncated tail) is decoded lossily.
            Err(err) if err.error_len().is_some() => self.pending.len(),
            Err(err) => err.valid_up_to(),
        };
        if valid == 0 {
            return None;
        }
        let rest = self.pending.split_off(valid);
        let chunk = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        Some(chunk)
    }

    /// Return whatever is left, decoded lossily.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(chunk)
    }
}
