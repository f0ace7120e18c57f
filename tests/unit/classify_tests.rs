//! Outcome classification and the in-process worker core.

use chartscript::engine::protocol::{WireValue, WorkerOutcome};
use chartscript::engine::{classify, validate_result, worker, EvaluationOutcome};
use chartscript::script::RunOptions;

fn wire_map(entries: Vec<(&str, WireValue)>) -> WireValue {
    WireValue::Map(
        entries
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect(),
    )
}

fn evaluate(source: &str) -> (WorkerOutcome, String) {
    let mut out = Vec::new();
    let outcome = worker::evaluate(source, &RunOptions::default(), &mut out);
    (outcome, String::from_utf8(out).expect("utf8 output"))
}

// ── classify ─────────────────────────────────────────────────────────────────

#[test]
fn missing_report_is_terminated() {
    assert_eq!(classify(None), EvaluationOutcome::Terminated);
}

#[test]
fn error_flag_wins() {
    assert_eq!(classify(Some(WorkerOutcome::failed())), EvaluationOutcome::Error);
}

#[test]
fn map_of_primitives_is_success() {
    let outcome = WorkerOutcome {
        value: Some(wire_map(vec![
            ("foo", WireValue::Int(1)),
            ("bar", WireValue::List(vec![WireValue::Str("a".into())])),
        ])),
        error: false,
    };

    let EvaluationOutcome::Success(sources) = classify(Some(outcome)) else {
        panic!("map of primitives must classify as success");
    };
    assert_eq!(sources.get("foo"), Some(&serde_json::json!(1)));
    assert_eq!(sources.get("bar"), Some(&serde_json::json!(["a"])));
}

#[test]
fn non_map_results_are_malformed() {
    for value in [
        None,
        Some(WireValue::List(vec![WireValue::Int(1)])),
        Some(WireValue::Int(3)),
        Some(WireValue::Null),
    ] {
        let outcome = WorkerOutcome {
            value: value.clone(),
            error: false,
        };
        assert_eq!(
            classify(Some(outcome)),
            EvaluationOutcome::MalformedResult,
            "{value:?} must be rejected"
        );
    }
}

#[test]
fn map_holding_a_function_is_malformed() {
    let value = wire_map(vec![("f", WireValue::Opaque("<fn f>".into()))]);
    assert!(validate_result(&value).is_none());
    assert_eq!(
        classify(Some(WorkerOutcome {
            value: Some(value),
            error: false,
        })),
        EvaluationOutcome::MalformedResult
    );
}

#[test]
fn nested_collections_are_accepted() {
    let value = wire_map(vec![(
        "series",
        wire_map(vec![("x", WireValue::List(vec![WireValue::Float(0.5)]))]),
    )]);
    let sources = validate_result(&value).expect("nested collections are valid");
    assert_eq!(sources["series"], serde_json::json!({"x": [0.5]}));
}

// ── worker::evaluate ─────────────────────────────────────────────────────────

#[test]
fn evaluate_reports_the_final_value() {
    let (outcome, out) = evaluate("print('hi')\n{'foo': 1}");

    assert!(!outcome.error);
    assert_eq!(outcome.value, Some(wire_map(vec![("foo", WireValue::Int(1))])));
    assert_eq!(out, "hi\n");
}

/// Script errors are printed to the output stream before the outcome.
#[test]
fn evaluate_prints_errors() {
    let (outcome, out) = evaluate("print('start')\nundefined_name");

    assert!(outcome.error);
    assert!(outcome.value.is_none());
    assert_eq!(out, "start\nError: line 2: name 'undefined_name' is not defined\n");
}

#[test]
fn evaluate_prints_syntax_errors() {
    let (outcome, out) = evaluate("{'foo': }");
    assert!(outcome.error);
    assert!(out.starts_with("Error: line 1: syntax error"), "got {out:?}");
}
