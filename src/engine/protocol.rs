//! Supervisor/worker channel protocol.
//!
//! Each worker generation receives exactly one [`EvaluationRequest`] and
//! answers with at most one [`WorkerOutcome`]. Both travel as single NDJSON
//! lines over the generation's private socket, framed by [`ProtocolCodec`].
//!
//! [`WireValue`] keeps the distinction between integers, floats, lists and
//! maps that plain JSON would blur, so the supervisor sees exactly the value
//! the script returned.

use std::collections::BTreeMap;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::script::Value;
use crate::{AppError, Result};

/// Script text sent to a worker generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Source of the script to evaluate.
    pub script: String,
}

/// What a generation reports after its single evaluation: the returned value
/// (if any) and whether the script raised an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    /// Value of the script's final expression statement.
    pub value: Option<WireValue>,
    /// Set when lexing, parsing, or execution failed.
    pub error: bool,
}

impl WorkerOutcome {
    /// Outcome of a script that raised an error.
    #[must_use]
    pub fn failed() -> Self {
        Self {
            value: None,
            error: true,
        }
    }

    /// Outcome of a script that completed with `value`.
    #[must_use]
    pub fn completed(value: Option<&Value>) -> Self {
        Self {
            value: value.map(WireValue::from),
            error: false,
        }
    }
}

/// Type-preserving encoding of a script value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WireValue {
    /// `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Finite float.
    Float(f64),
    /// String.
    Str(String),
    /// List.
    List(Vec<WireValue>),
    /// String-keyed map.
    Map(BTreeMap<String, WireValue>),
    /// A value with no data representation (functions, non-finite floats),
    /// carried as its display text.
    Opaque(String),
}

impl From<&Value> for WireValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Int(i) => Self::Int(*i),
            Value::Float(x) if x.is_finite() => Self::Float(*x),
            Value::Str(s) => Self::Str(s.clone()),
            Value::List(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Map(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from(value)))
                    .collect(),
            ),
            other @ (Value::Float(_) | Value::Function(_) | Value::Builtin(_)) => {
                Self::Opaque(other.to_string())
            }
        }
    }
}

impl WireValue {
    /// Convert to plain JSON, or `None` if any nested value is opaque.
    #[must_use]
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(x) => serde_json::Number::from_f64(*x).map(serde_json::Value::Number)?,
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(Self::to_json).collect::<Option<Vec<_>>>()?,
            ),
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| value.to_json().map(|value| (key.clone(), value)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Self::Opaque(_) => return None,
        })
    }
}

/// Encode a message as one NDJSON line including the trailing newline.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialisation fails.
pub fn encode_line<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(message)
        .map_err(|err| AppError::Protocol(format!("failed to serialise message: {err}")))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one NDJSON line.
///
/// # Errors
///
/// Returns [`AppError::Protocol`]`("malformed json: …")` if the line does not
/// hold the expected message.
pub fn decode_line<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim_end())
        .map_err(|err| AppError::Protocol(format!("malformed json: {err}")))
}

/// NDJSON codec for the supervisor side of the channel.
///
/// Delegates framing to [`LinesCodec`] with a configured maximum line length
/// so a misbehaving worker cannot make the supervisor buffer without bound.
#[derive(Debug)]
pub struct ProtocolCodec {
    lines: LinesCodec,
    max_line_bytes: usize,
}

impl ProtocolCodec {
    /// Create a codec rejecting lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }

    fn map_error(&self, err: LinesCodecError) -> AppError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => AppError::Protocol(format!(
                "line too long: exceeded {} bytes",
                self.max_line_bytes
            )),
            LinesCodecError::Io(err) => AppError::Io(err.to_string()),
        }
    }
}

impl Decoder for ProtocolCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.lines.decode(src).map_err(|err| self.map_error(err))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.lines.decode_eof(src).map_err(|err| self.map_error(err))
    }
}
