//! Binding data sources into chart traces.
//!
//! A trace records which data source feeds each of its columns under
//! `meta.columnNames`, e.g. `{"x": "months", "marker": {"color": "temps"}}`.
//! Before rendering, the named sources are copied into the trace (`x`,
//! `xsrc`, `marker.color`, `marker.colorsrc`). A column whose source no
//! longer exists is unbound by setting its name to the empty string. Before
//! persisting, the copied values are stripped again so documents only store
//! the bindings.

use serde_json::{Map, Value};

use crate::engine::DataSources;

/// Column name marking an unbound column.
pub const REMOVED_SOURCE: &str = "";

/// Column holding nested marker bindings.
pub const MARKER_COLUMN: &str = "marker";

fn column_names(trace: &Map<String, Value>) -> Option<Map<String, Value>> {
    trace
        .get("meta")
        .and_then(|meta| meta.get("columnNames"))
        .and_then(Value::as_object)
        .cloned()
}

fn store_column_names(trace: &mut Map<String, Value>, columns: Map<String, Value>) {
    if let Some(meta) = trace.get_mut("meta").and_then(Value::as_object_mut) {
        meta.insert("columnNames".into(), Value::Object(columns));
    }
}

/// Copy bound data sources into each trace.
///
/// Traces without `meta.columnNames` are left alone. Columns bound to a
/// source missing from `sources` are unbound.
pub fn insert_sources_into_traces(traces: &mut [Value], sources: &DataSources) {
    for trace in traces.iter_mut().filter_map(Value::as_object_mut) {
        let Some(mut columns) = column_names(trace) else {
            continue;
        };

        for (column, binding) in &mut columns {
            if column == MARKER_COLUMN {
                let Some(marker_bindings) = binding.as_object_mut() else {
                    continue;
                };
                let markers = trace
                    .entry(MARKER_COLUMN)
                    .or_insert_with(|| Value::Object(Map::new()));
                let Some(markers) = markers.as_object_mut() else {
                    continue;
                };
                for (marker, source) in marker_bindings.iter_mut() {
                    match source.as_str().and_then(|name| sources.get_key_value(name)) {
                        Some((name, data)) => {
                            markers.insert(marker.clone(), data.clone());
                            markers.insert(format!("{marker}src"), Value::String(name.clone()));
                        }
                        None => *source = Value::String(REMOVED_SOURCE.into()),
                    }
                }
                continue;
            }

            let Some(name) = binding.as_str() else {
                continue;
            };
            if name == REMOVED_SOURCE {
                continue;
            }
            match sources.get_key_value(name) {
                Some((name, data)) => {
                    trace.insert(column.clone(), data.clone());
                    trace.insert(format!("{column}src"), Value::String(name.clone()));
                }
                None => *binding = Value::String(REMOVED_SOURCE.into()),
            }
        }

        store_column_names(trace, columns);
    }
}

/// Strip source data copied in by [`insert_sources_into_traces`], keeping
/// the bindings.
pub fn remove_sources_from_traces(traces: &mut [Value]) {
    for trace in traces.iter_mut().filter_map(Value::as_object_mut) {
        let Some(columns) = column_names(trace) else {
            continue;
        };

        for (column, binding) in &columns {
            if column == MARKER_COLUMN {
                let (Some(marker_bindings), Some(markers)) = (
                    binding.as_object(),
                    trace.get_mut(MARKER_COLUMN).and_then(Value::as_object_mut),
                ) else {
                    continue;
                };
                for marker in marker_bindings.keys() {
                    markers.remove(&format!("{marker}src"));
                    markers.remove(marker);
                }
            } else if binding.as_str() != Some(REMOVED_SOURCE) {
                trace.remove(&format!("{column}src"));
                trace.remove(column);
            }
        }
    }
}

/// Drop explicit axis ranges the renderer recomputes anyway.
pub fn clean_layout(layout: &mut Value) {
    for axis in ["xaxis", "yaxis"] {
        let Some(axis) = layout.get_mut(axis).and_then(Value::as_object_mut) else {
            continue;
        };
        let autorange = match axis.get("autorange") {
            Some(Value::Bool(enabled)) => *enabled,
            Some(Value::String(mode)) => !mode.is_empty(),
            _ => false,
        };
        if autorange {
            axis.remove("range");
        }
    }
}
