//! The chart script language.
//!
//! A small expression-oriented language whose final expression is the value
//! handed to the chart renderer, e.g.
//!
//! ```text
//! fn bar() { [1, 2, 3] }
//! {'foo': bar()}
//! ```
//!
//! Every call to [`run`] builds a fresh [`Interpreter`]; nothing survives
//! between evaluations.

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod value;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub use interpreter::Interpreter;
pub use value::Value;

/// Default limit on nested function calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Failure while lexing, parsing, or executing a script.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScriptError {
    /// Input that does not form a token.
    #[error("line {line}: invalid token '{text}'")]
    Lex {
        /// Line of the offending text.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// Tokens that do not form a program.
    #[error("line {line}: syntax error: {message}")]
    Syntax {
        /// Line of the offending token.
        line: usize,
        /// What was expected.
        message: String,
    },
    /// Error raised while executing.
    #[error("line {line}: {message}")]
    Runtime {
        /// Line of the failing expression.
        line: usize,
        /// Description of the failure.
        message: String,
    },
    /// Function calls nested deeper than the configured limit.
    #[error("line {line}: maximum call depth of {limit} exceeded")]
    CallDepth {
        /// Line of the call that crossed the limit.
        line: usize,
        /// The configured limit.
        limit: usize,
    },
    /// The evaluation was cancelled from outside.
    #[error("evaluation interrupted")]
    Interrupted,
}

/// Cooperative cancellation flag shared between a controller and a running
/// interpreter.
///
/// Interpreter steps poll [`is_cancelled`](Self::is_cancelled); the `sleep`
/// builtin parks on a condition variable so cancellation wakes it at once.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl CancelFlag {
    /// Create an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake any sleeping interpreter.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        let _guard = self.0.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.0.wake.notify_all();
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` when the sleep ended because of cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.0.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .0
                .wake
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Per-evaluation settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Maximum nesting of function calls.
    pub max_call_depth: usize,
    /// Optional cooperative cancellation flag.
    pub cancel: Option<CancelFlag>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            cancel: None,
        }
    }
}

/// Lex, parse, and execute `source` in a fresh interpreter.
///
/// Text produced by `print` is written to `out` and flushed chunk by chunk.
/// Returns the value of the final expression statement, or `None` when the
/// script ends with any other kind of statement.
///
/// # Errors
///
/// Returns the first [`ScriptError`] raised.
pub fn run(source: &str, options: &RunOptions, out: &mut dyn Write) -> Result<Option<Value>, ScriptError> {
    let tokens = lexer::tokenize(source)?;
    let program = parser::Parser::new(tokens).parse_program()?;
    let mut interpreter = Interpreter::new(out, options.clone());
    interpreter.run(&program)
}
