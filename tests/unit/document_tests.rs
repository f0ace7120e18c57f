use chartscript::document::{ChartDocument, ChartModel, ScriptModel, DOCUMENT_VERSION};
use chartscript::engine::DataSources;
use chartscript::session::Document;
use chartscript::AppError;
use serde_json::{json, Value};

fn sources(value: Value) -> DataSources {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

fn sample_document() -> Value {
    json!({
        "_version_": DOCUMENT_VERSION,
        "chart": {
            "_version_": DOCUMENT_VERSION,
            "data": [{"type": "scatter", "meta": {"columnNames": {"x": "foo"}}}],
            "layout": {"title": "demo"},
        },
        "script": {"_version_": DOCUMENT_VERSION, "script": "{'foo': [1, 2]}"},
    })
}

// ── ScriptModel ──────────────────────────────────────────────────────────────

#[test]
fn script_model_defaults_to_an_empty_map() {
    assert_eq!(ScriptModel::default().script(), ScriptModel::DEFAULT_SCRIPT);
    assert_eq!(ScriptModel::new("").script(), ScriptModel::DEFAULT_SCRIPT);
}

#[test]
fn set_script_reports_changes() {
    let model = ScriptModel::new("{'a': 1}");
    assert!(!model.set_script("{'a': 1}"));
    assert!(model.set_script("{'a': 2}"));
    assert_eq!(model.script(), "{'a': 2}");
}

// ── ChartModel ───────────────────────────────────────────────────────────────

#[test]
fn data_source_subscribers_see_only_real_changes() {
    let chart = ChartModel::default();
    let mut rx = chart.subscribe();

    assert!(chart.set_data_sources(sources(json!({"a": [1]}))));
    assert!(rx.has_changed().unwrap());
    rx.borrow_and_update();

    assert!(!chart.set_data_sources(sources(json!({"a": [1]}))));
    assert!(!rx.has_changed().unwrap(), "identical sources must not notify");
}

#[test]
fn chart_state_binds_sources_into_traces() {
    let document = ChartDocument::unserialize(&sample_document()).expect("valid document");
    document.set_data_sources(sources(json!({"foo": [1, 2]})));

    let state = document.chart().chart_state();
    assert_eq!(state["dataSources"], json!({"foo": [1, 2]}));
    assert_eq!(state["data"][0]["x"], json!([1, 2]));
    assert_eq!(state["layout"], json!({"title": "demo"}));
    assert!(
        document.chart().chart_data()[0].get("x").is_none(),
        "stored traces must not hold bound data"
    );
}

#[test]
fn set_chart_data_strips_bound_data() {
    let chart = ChartModel::default();
    chart.set_chart_data(vec![json!({
        "meta": {"columnNames": {"x": "foo"}},
        "x": [1, 2],
        "xsrc": "foo",
    })]);

    assert_eq!(
        chart.chart_data(),
        vec![json!({"meta": {"columnNames": {"x": "foo"}}})]
    );
}

// ── ChartDocument ────────────────────────────────────────────────────────────

#[test]
fn serialisation_excludes_data_sources() {
    let document = ChartDocument::unserialize(&sample_document()).expect("valid document");
    document.set_data_sources(sources(json!({"foo": [1, 2]})));

    let serialised = document.serialize();
    assert_eq!(serialised, sample_document());
}

#[test]
fn missing_section_is_reported() {
    let err = ChartDocument::unserialize(&json!({"chart": {"data": [], "layout": {}}}))
        .expect_err("script section missing");
    assert!(
        matches!(err, AppError::Document(ref msg) if msg == "Document missing key: script"),
        "unexpected error: {err}"
    );
}

#[test]
fn edits_mark_the_document_modified() {
    let document = ChartDocument::default();
    assert!(!document.is_modified());

    document.set_script(ScriptModel::DEFAULT_SCRIPT);
    assert!(!document.is_modified(), "unchanged script must not mark modified");

    document.set_script("{'x': 1}");
    assert!(document.is_modified());
}

#[test]
fn file_round_trip_remembers_the_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("demo.cht");
    let document = ChartDocument::unserialize(&sample_document()).expect("valid document");
    document.set_script("{'foo': [3]}");
    assert!(document.is_modified());

    document.to_file(&path).expect("save");
    assert!(!document.is_modified(), "saving clears the modified flag");
    assert_eq!(document.filepath().as_deref(), Some(path.as_path()));

    let loaded = ChartDocument::from_file(&path, false).expect("load");
    assert_eq!(loaded.script(), "{'foo': [3]}");
    assert_eq!(loaded.filepath().as_deref(), Some(path.as_path()));
}

#[test]
fn templates_have_no_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("template.cht");
    std::fs::write(&path, sample_document().to_string()).expect("write");

    let document = ChartDocument::from_file(&path, true).expect("load");
    assert!(document.filepath().is_none());
    assert!(matches!(document.reload(), Err(AppError::NoDocument)));
}

#[test]
fn invalid_json_is_a_document_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("broken.cht");
    std::fs::write(&path, "{").expect("write");

    assert!(matches!(
        ChartDocument::from_file(&path, false),
        Err(AppError::Document(_))
    ));
}

#[test]
fn reload_picks_up_external_edits_and_keeps_sources() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("demo.cht");
    std::fs::write(&path, sample_document().to_string()).expect("write");
    let document = ChartDocument::from_file(&path, false).expect("load");
    document.set_data_sources(sources(json!({"foo": [1, 2]})));

    let mut edited = sample_document();
    edited["script"]["script"] = json!("{'foo': [9]}");
    std::fs::write(&path, edited.to_string()).expect("rewrite");

    assert!(document.reload().expect("reload"));
    assert_eq!(document.script(), "{'foo': [9]}");
    assert_eq!(
        document.chart().data_sources(),
        sources(json!({"foo": [1, 2]})),
        "reload keeps the last evaluated sources"
    );
    assert!(!document.reload().expect("second reload"), "nothing changed");
}
