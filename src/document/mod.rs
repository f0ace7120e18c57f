//! Chart documents.
//!
//! A document pairs the script with the chart it feeds. On disk it is
//! pretty-printed JSON:
//!
//! ```json
//! {
//!  "_version_": 1,
//!  "chart": {"_version_": 1, "data": [], "layout": {}},
//!  "script": {"_version_": 1, "script": "{}"}
//! }
//! ```
//!
//! Data sources are never persisted; they are recomputed by evaluating the
//! script.

pub mod traces;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::engine::DataSources;
use crate::session::Document;
use crate::{AppError, Result};

/// Format version written to files.
pub const DOCUMENT_VERSION: u64 = 1;

fn require<'a>(object: &'a Value, key: &str) -> Result<&'a Value> {
    object
        .get(key)
        .ok_or_else(|| AppError::Document(format!("Document missing key: {key}")))
}

fn read<T: Clone>(lock: &RwLock<T>) -> T {
    lock.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Replace the value behind `lock`; returns whether it changed.
fn replace<T: PartialEq>(lock: &RwLock<T>, value: T) -> bool {
    let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
    if *guard == value {
        return false;
    }
    *guard = value;
    true
}

// ── Script model ─────────────────────────────────────────────────────────────

/// The script half of a document.
#[derive(Debug)]
pub struct ScriptModel {
    script: RwLock<String>,
}

impl ScriptModel {
    /// Script used by new documents.
    pub const DEFAULT_SCRIPT: &'static str = "{}";

    /// Create a model; an empty script falls back to [`Self::DEFAULT_SCRIPT`].
    #[must_use]
    pub fn new(script: impl Into<String>) -> Self {
        let script = script.into();
        Self {
            script: RwLock::new(if script.is_empty() {
                Self::DEFAULT_SCRIPT.to_owned()
            } else {
                script
            }),
        }
    }

    /// Current script text.
    #[must_use]
    pub fn script(&self) -> String {
        read(&self.script)
    }

    /// Replace the script text; returns whether it changed.
    pub fn set_script(&self, script: impl Into<String>) -> bool {
        replace(&self.script, script.into())
    }

    /// Serialised form.
    #[must_use]
    pub fn serialize(&self) -> Value {
        json!({ "_version_": DOCUMENT_VERSION, "script": self.script() })
    }

    /// Parse the serialised form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document` if `script` is missing or not a string.
    pub fn unserialize(data: &Value) -> Result<Self> {
        let script = require(data, "script")?
            .as_str()
            .ok_or_else(|| AppError::Document("script must be a string".into()))?;
        Ok(Self::new(script))
    }
}

impl Default for ScriptModel {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SCRIPT)
    }
}

// ── Chart model ──────────────────────────────────────────────────────────────

/// The chart half of a document: data sources, traces and layout.
#[derive(Debug)]
pub struct ChartModel {
    data_sources: watch::Sender<DataSources>,
    data: RwLock<Vec<Value>>,
    layout: RwLock<Value>,
}

impl ChartModel {
    /// Create a model with no data sources.
    #[must_use]
    pub fn new(data: Vec<Value>, layout: Value) -> Self {
        Self {
            data_sources: watch::channel(DataSources::new()).0,
            data: RwLock::new(data),
            layout: RwLock::new(layout),
        }
    }

    /// Current data sources.
    #[must_use]
    pub fn data_sources(&self) -> DataSources {
        self.data_sources.borrow().clone()
    }

    /// Replace the data sources, notifying subscribers only when the value
    /// changed. Returns whether it changed.
    pub fn set_data_sources(&self, sources: DataSources) -> bool {
        self.data_sources.send_if_modified(|current| {
            if *current == sources {
                return false;
            }
            *current = sources;
            true
        })
    }

    /// Observe data source changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DataSources> {
        self.data_sources.subscribe()
    }

    /// Trace list, without bound source data.
    #[must_use]
    pub fn chart_data(&self) -> Vec<Value> {
        read(&self.data)
    }

    /// Replace the trace list, stripping bound source data first. Returns
    /// whether it changed.
    pub fn set_chart_data(&self, mut data: Vec<Value>) -> bool {
        traces::remove_sources_from_traces(&mut data);
        replace(&self.data, data)
    }

    /// Chart layout.
    #[must_use]
    pub fn chart_layout(&self) -> Value {
        read(&self.layout)
    }

    /// Replace the layout after cleaning it. Returns whether it changed.
    pub fn set_chart_layout(&self, mut layout: Value) -> bool {
        traces::clean_layout(&mut layout);
        replace(&self.layout, layout)
    }

    /// State handed to the renderer: data sources, traces with the sources
    /// bound in, and the layout.
    #[must_use]
    pub fn chart_state(&self) -> Value {
        let sources = self.data_sources();
        let mut data = self.chart_data();
        traces::insert_sources_into_traces(&mut data, &sources);
        json!({
            "dataSources": sources,
            "data": data,
            "layout": self.chart_layout(),
        })
    }

    /// Serialised form. Data sources are not persisted.
    #[must_use]
    pub fn serialize(&self) -> Value {
        json!({
            "_version_": DOCUMENT_VERSION,
            "data": self.chart_data(),
            "layout": self.chart_layout(),
        })
    }

    /// Parse the serialised form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document` if `data` or `layout` is missing or
    /// `data` is not a list.
    pub fn unserialize(value: &Value) -> Result<Self> {
        let data = require(value, "data")?
            .as_array()
            .cloned()
            .ok_or_else(|| AppError::Document("chart data must be a list".into()))?;
        let layout = require(value, "layout")?.clone();
        Ok(Self::new(data, layout))
    }
}

impl Default for ChartModel {
    fn default() -> Self {
        Self::new(Vec::new(), Value::Object(Map::new()))
    }
}

// ── Document ─────────────────────────────────────────────────────────────────

/// A script together with the chart it feeds.
#[derive(Debug, Default)]
pub struct ChartDocument {
    chart: ChartModel,
    script: ScriptModel,
    filepath: RwLock<Option<PathBuf>>,
    modified: AtomicBool,
}

impl ChartDocument {
    /// Build a document from its models.
    #[must_use]
    pub fn new(chart: ChartModel, script: ScriptModel) -> Self {
        Self {
            chart,
            script,
            filepath: RwLock::new(None),
            modified: AtomicBool::new(false),
        }
    }

    /// The chart model.
    #[must_use]
    pub fn chart(&self) -> &ChartModel {
        &self.chart
    }

    /// The script model.
    #[must_use]
    pub fn script_model(&self) -> &ScriptModel {
        &self.script
    }

    /// Replace the script text, marking the document modified on change.
    pub fn set_script(&self, script: impl Into<String>) {
        if self.script.set_script(script) {
            self.modified.store(true, Ordering::SeqCst);
        }
    }

    /// Replace the traces, marking the document modified on change.
    pub fn set_chart_data(&self, data: Vec<Value>) {
        if self.chart.set_chart_data(data) {
            self.modified.store(true, Ordering::SeqCst);
        }
    }

    /// Replace the layout, marking the document modified on change.
    pub fn set_chart_layout(&self, layout: Value) {
        if self.chart.set_chart_layout(layout) {
            self.modified.store(true, Ordering::SeqCst);
        }
    }

    /// Whether the document changed since it was loaded or saved.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    /// File the document was loaded from or last saved to.
    #[must_use]
    pub fn filepath(&self) -> Option<PathBuf> {
        read(&self.filepath)
    }

    /// Serialised form.
    #[must_use]
    pub fn serialize(&self) -> Value {
        json!({
            "_version_": DOCUMENT_VERSION,
            "chart": self.chart.serialize(),
            "script": self.script.serialize(),
        })
    }

    /// Parse the serialised form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Document("Document missing key: …")` for a missing
    /// section or field.
    pub fn unserialize(data: &Value) -> Result<Self> {
        let chart = ChartModel::unserialize(require(data, "chart")?)?;
        let script = ScriptModel::unserialize(require(data, "script")?)?;
        Ok(Self::new(chart, script))
    }

    /// Load a document. A `template` keeps no file path, so saving it asks
    /// for a new location.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be read and
    /// `AppError::Document` if it is not a valid document.
    pub fn from_file(path: impl AsRef<Path>, template: bool) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| AppError::Io(format!("cannot read '{}': {err}", path.display())))?;
        let data: Value = serde_json::from_str(&raw)
            .map_err(|err| AppError::Document(format!("invalid document json: {err}")))?;
        let document = Self::unserialize(&data)?;
        if !template {
            *document
                .filepath
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(path.to_path_buf());
        }
        debug!(path = %path.display(), template, "document loaded");
        Ok(document)
    }

    /// Save the document, remembering `path` and clearing the modified flag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be written.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(&self.serialize())
            .map_err(|err| AppError::Document(format!("cannot serialise document: {err}")))?;
        std::fs::write(path, text)
            .map_err(|err| AppError::Io(format!("cannot write '{}': {err}", path.display())))?;
        *self.filepath.write().unwrap_or_else(PoisonError::into_inner) = Some(path.to_path_buf());
        self.modified.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Reload the script and chart from the document's file, keeping the
    /// current data sources. Returns whether the script changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoDocument` if the document has no file path, or
    /// the errors of [`from_file`](Self::from_file).
    pub fn reload(&self) -> Result<bool> {
        let path = self.filepath().ok_or(AppError::NoDocument)?;
        let fresh = Self::from_file(&path, true)?;
        self.chart.set_chart_data(fresh.chart.chart_data());
        self.chart.set_chart_layout(fresh.chart.chart_layout());
        let changed = self.script.set_script(fresh.script.script());
        self.modified.store(false, Ordering::SeqCst);
        Ok(changed)
    }
}

impl Document for ChartDocument {
    fn script(&self) -> String {
        self.script.script()
    }

    fn set_data_sources(&self, sources: DataSources) {
        self.chart.set_data_sources(sources);
    }
}
