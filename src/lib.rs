#![forbid(unsafe_code)]

//! `chartscript`: process-isolated evaluation of chart scripts.
//!
//! A script's final expression produces the data sources of a chart. The
//! [`engine`] runs each script in a disposable worker generation that can
//! be killed at any moment; [`session`] binds a [`document`] to the engine.

pub mod config;
pub mod document;
pub mod engine;
pub mod errors;
pub mod script;
pub mod session;
pub mod watcher;

pub use config::EngineConfig;
pub use errors::{AppError, Result};
