//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all engine failure modes.
///
/// Script failures (syntax errors, runtime errors, malformed results) are
/// not application errors: they are evaluation outcomes reported through
/// [`EngineEvent::Errored`](crate::engine::EngineEvent::Errored).
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or pipe I/O failure.
    Io(String),
    /// A worker generation could not be spawned.
    Spawn(String),
    /// Malformed message on the supervisor/worker channel.
    Protocol(String),
    /// An evaluation is already in flight.
    Busy(String),
    /// A bounded wait elapsed (readiness, cancellation).
    Timeout(String),
    /// The engine has not been started or has been stopped.
    NotRunning(String),
    /// A session operation needs a document and none is attached.
    NoDocument,
    /// Document file could not be parsed.
    Document(String),
    /// File-system watcher failure.
    Watch(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::NoDocument => write!(f, "no document attached to session"),
            Self::Document(msg) => write!(f, "document: {msg}"),
            Self::Watch(msg) => write!(f, "watch: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
