use chartscript::document::traces::{
    clean_layout, insert_sources_into_traces, remove_sources_from_traces, REMOVED_SOURCE,
};
use chartscript::engine::DataSources;
use serde_json::{json, Value};

fn sources() -> DataSources {
    match json!({"months": [1, 2, 3], "temps": [10, 12, 9], "sizes": [4, 5, 6]}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[test]
fn bound_columns_receive_their_source() {
    let mut traces = vec![json!({
        "type": "scatter",
        "meta": {"columnNames": {"x": "months", "y": "temps"}},
    })];

    insert_sources_into_traces(&mut traces, &sources());

    assert_eq!(traces[0]["x"], json!([1, 2, 3]));
    assert_eq!(traces[0]["xsrc"], json!("months"));
    assert_eq!(traces[0]["y"], json!([10, 12, 9]));
    assert_eq!(traces[0]["ysrc"], json!("temps"));
}

#[test]
fn marker_columns_bind_inside_the_marker() {
    let mut traces = vec![json!({
        "meta": {"columnNames": {"marker": {"size": "sizes"}}},
        "marker": {"symbol": "circle"},
    })];

    insert_sources_into_traces(&mut traces, &sources());

    assert_eq!(traces[0]["marker"]["size"], json!([4, 5, 6]));
    assert_eq!(traces[0]["marker"]["sizesrc"], json!("sizes"));
    assert_eq!(traces[0]["marker"]["symbol"], json!("circle"));
}

/// A binding to a source the script no longer produces is cleared rather
/// than left dangling.
#[test]
fn missing_sources_are_unbound() {
    let mut traces = vec![json!({
        "meta": {"columnNames": {"x": "gone", "marker": {"color": "also_gone"}}},
    })];

    insert_sources_into_traces(&mut traces, &sources());

    let columns = &traces[0]["meta"]["columnNames"];
    assert_eq!(columns["x"], json!(REMOVED_SOURCE));
    assert_eq!(columns["marker"]["color"], json!(REMOVED_SOURCE));
    assert!(traces[0].get("x").is_none(), "unbound column must not receive data");
}

#[test]
fn traces_without_bindings_are_untouched() {
    let original = json!({"type": "bar", "x": [1]});
    let mut traces = vec![original.clone()];

    insert_sources_into_traces(&mut traces, &sources());
    remove_sources_from_traces(&mut traces);

    assert_eq!(traces[0], original);
}

#[test]
fn remove_strips_bound_data_and_keeps_bindings() {
    let bare = json!({
        "meta": {"columnNames": {"x": "months", "marker": {"size": "sizes"}}},
        "marker": {},
    });
    let mut traces = vec![bare.clone()];
    insert_sources_into_traces(&mut traces, &sources());
    assert_ne!(traces[0], bare);

    remove_sources_from_traces(&mut traces);
    assert_eq!(traces[0], bare);
}

#[test]
fn clean_layout_drops_ranges_under_autorange() {
    let mut layout = json!({
        "xaxis": {"autorange": true, "range": [0, 10]},
        "yaxis": {"autorange": "reversed", "range": [5, 0]},
    });
    clean_layout(&mut layout);

    assert!(layout["xaxis"].get("range").is_none());
    assert!(layout["yaxis"].get("range").is_none());
}

#[test]
fn clean_layout_keeps_fixed_ranges() {
    let mut layout = json!({
        "xaxis": {"autorange": false, "range": [0, 10]},
        "yaxis": {"range": [1, 2]},
        "title": "t",
    });
    let before = layout.clone();
    clean_layout(&mut layout);

    assert_eq!(layout, before);
}
