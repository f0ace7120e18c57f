//! Worker manager driving real worker processes.
//!
//! Validates:
//! - result and terminal events for successful scripts
//! - streamed stdout arriving before the terminal event
//! - `SIGKILL` cancellation of a sleeping script within the bound
//! - a crashing worker reported like a cancellation, then replaced
//! - stop killing an in-flight generation

use std::sync::Arc;
use std::time::{Duration, Instant};

use chartscript::engine::process::ProcessBackend;
use chartscript::engine::{EngineEvent, WorkerManager, MALFORMED_RESULT_DIAGNOSTIC};
use chartscript::AppError;
use serde_json::json;
use serial_test::serial;

use super::test_helpers::{
    process_backend, process_config, result, started_manager, stdout_of, until_terminal, wait_until_idle,
    without_stdout,
};

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn map_literal_produces_result_then_finished() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("{'foo': 1}").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        events,
        vec![EngineEvent::Started, result(json!({"foo": 1})), EngineEvent::Finished]
    );
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn function_values_reach_the_result() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager
        .evaluate("fn bar() { [1, 2, 3] }\n{'foo': bar()}")
        .expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        without_stdout(&events),
        vec![EngineEvent::Started, result(json!({"foo": [1, 2, 3]})), EngineEvent::Finished]
    );
    manager.stop().await.expect("stop");
}

/// Output is streamed while the script runs, not buffered until exit.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn stdout_streams_before_the_script_ends() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager
        .evaluate("print('early')\nsleep(2)\nprint('late')\n{}")
        .expect("submit");

    assert_eq!(rx.recv().await, Some(EngineEvent::Started));
    let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("first chunk must arrive before the sleep ends");
    assert_eq!(first, Some(EngineEvent::Stdout("early\n".into())));

    let rest = until_terminal(&mut rx).await;
    assert_eq!(stdout_of(&rest), "late\n");
    assert_eq!(rest.last(), Some(&EngineEvent::Finished));
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn utf8_output_survives_the_pipe() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("print('température ✓')\n{}").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(stdout_of(&events), "température ✓\n");
    manager.stop().await.expect("stop");
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn script_error_is_printed_then_errored_and_finished() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("print('a')\nnope").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        without_stdout(&events),
        vec![EngineEvent::Started, EngineEvent::Errored, EngineEvent::Finished]
    );
    assert_eq!(stdout_of(&events), "a\nError: line 2: name 'nope' is not defined\n");
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn malformed_result_prints_the_diagnostic() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("fn f() { 1 }\n{'f': f}").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(without_stdout(&events), vec![EngineEvent::Started, EngineEvent::Errored]);
    assert_eq!(stdout_of(&events), MALFORMED_RESULT_DIAGNOSTIC);
    manager.stop().await.expect("stop");
}

/// A worker that dies without reporting is indistinguishable from a
/// cancellation: `Finished`, no result.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn crashing_worker_finishes_and_is_replaced() {
    // A call depth far beyond what the worker's stack can hold makes the
    // process abort on stack overflow.
    let (mut manager, mut rx) =
        started_manager(process_backend(&["--max-call-depth", "100000000"])).await;

    manager.evaluate("fn f(n) { f(n + 1) }\nf(0)").expect("submit");
    let events = until_terminal(&mut rx).await;
    assert_eq!(without_stdout(&events), vec![EngineEvent::Started, EngineEvent::Finished]);
    wait_until_idle(&manager).await;

    manager.evaluate("{'alive': true}").expect("replacement generation");
    let events = until_terminal(&mut rx).await;
    assert_eq!(
        events,
        vec![EngineEvent::Started, result(json!({"alive": true})), EngineEvent::Finished]
    );
    manager.stop().await.expect("stop");
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn cancel_kills_a_sleeping_script() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("sleep(10)\n{'foo': 1}").expect("submit");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    manager.cancel().await.expect("cancel");
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "cancel must finish within the bound"
    );

    let events = until_terminal(&mut rx).await;
    assert_eq!(events, vec![EngineEvent::Started, EngineEvent::Finished]);
    assert!(!manager.is_evaluating());
    manager.stop().await.expect("stop");
}

/// A busy loop never yields to a cooperative flag; only killing the process
/// stops it.
#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn cancel_kills_a_busy_loop() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("n = 0\nwhile true { n = n + 1 }").expect("submit");
    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.cancel().await.expect("cancel");

    let events = until_terminal(&mut rx).await;
    assert_eq!(events, vec![EngineEvent::Started, EngineEvent::Finished]);

    manager.evaluate("{'next': 2}").expect("fresh generation");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last(), Some(&EngineEvent::Finished));
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn busy_manager_rejects_a_second_script() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("sleep(10)\n{}").expect("submit");
    assert!(matches!(manager.evaluate("{}"), Err(AppError::Busy(_))));

    manager.cancel().await.expect("cancel");
    until_terminal(&mut rx).await;
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn stop_kills_the_in_flight_generation() {
    let (mut manager, mut rx) = started_manager(process_backend(&[])).await;

    manager.evaluate("sleep(30)\n{}").expect("submit");
    let started = Instant::now();
    manager.stop().await.expect("stop");

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!manager.is_running());
    let events = until_terminal(&mut rx).await;
    assert_eq!(events, vec![EngineEvent::Started, EngineEvent::Finished]);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn start_fails_for_a_missing_worker_binary() {
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let mut config = process_config();
    config.ready_timeout_ms = 600;
    let backend = ProcessBackend::new("/nonexistent/chartscript", vec!["worker".into()], 4096);
    let mut manager = WorkerManager::new(config, Arc::new(backend), tx);

    let err = manager.start().await.expect_err("spawn must fail");
    assert!(matches!(err, AppError::Spawn(ref msg) if msg.contains("/nonexistent/chartscript")));
    assert!(!manager.is_running(), "failed start leaves the manager stopped");
}
