//! Worker manager behaviour on the in-process thread backend.
//!
//! Covers the event contract (`Started` → `Stdout`* → `Result`? →
//! `Finished`/`Errored`), cancellation, the busy guard and generation
//! isolation without spawning processes.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chartscript::config::{BackendKind, EngineConfig};
use chartscript::engine::thread::ThreadBackend;
use chartscript::engine::{EngineEvent, WorkerManager, MALFORMED_RESULT_DIAGNOSTIC};
use chartscript::AppError;
use serde_json::json;
use tokio::sync::mpsc;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn thread_config() -> EngineConfig {
    EngineConfig {
        backend: BackendKind::Thread,
        ..EngineConfig::default()
    }
}

async fn started_manager() -> (WorkerManager, mpsc::UnboundedReceiver<EngineEvent>) {
    let config = thread_config();
    let (tx, rx) = mpsc::unbounded_channel();
    let backend = Arc::new(ThreadBackend::new(config.max_call_depth));
    let mut manager = WorkerManager::new(config, backend, tx);
    manager.start().await.expect("manager starts");
    (manager, rx)
}

/// Collect events up to and including the next terminal event.
async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("terminal event within timeout")
            .expect("event channel open");
        match event {
            EngineEvent::Finished => {
                events.push(event);
                return events;
            }
            EngineEvent::Errored => {
                events.push(event);
                // A script error sends `Finished` right after `Errored`; a
                // malformed result sends nothing more.
                if let Ok(next) = rx.try_recv() {
                    events.push(next);
                }
                return events;
            }
            _ => events.push(event),
        }
    }
}

fn stdout_of(events: &[EngineEvent]) -> String {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::Stdout(chunk) => Some(chunk.as_str()),
            _ => None,
        })
        .collect()
}

fn without_stdout(events: &[EngineEvent]) -> Vec<EngineEvent> {
    events
        .iter()
        .filter(|event| !matches!(event, EngineEvent::Stdout(_)))
        .cloned()
        .collect()
}

fn result(value: serde_json::Value) -> EngineEvent {
    match value {
        serde_json::Value::Object(map) => EngineEvent::Result(map),
        other => panic!("expected an object, got {other}"),
    }
}

/// Terminal events are sent before the busy flag clears; poll until the
/// manager accepts work again.
async fn wait_until_idle(manager: &WorkerManager) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    while manager.is_evaluating() {
        assert!(Instant::now() < deadline, "manager must become idle");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Successful evaluations ───────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn map_literal_produces_result_then_finished() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("{'foo': 1}").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        events,
        vec![EngineEvent::Started, result(json!({"foo": 1})), EngineEvent::Finished]
    );
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn function_values_reach_the_result() {
    let (mut manager, mut rx) = started_manager().await;

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

/// Everything printed arrives before the terminal event.
#[tokio::test(flavor = "multi_thread")]
async fn stdout_precedes_the_terminal_event() {
    let (mut manager, mut rx) = started_manager().await;

    manager
        .evaluate("for i in range(3) { print('line', i) }\n{'n': 3}")
        .expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(stdout_of(&events), "line 0\nline 1\nline 2\n");
    let last_stdout = events
        .iter()
        .rposition(|event| matches!(event, EngineEvent::Stdout(_)))
        .expect("stdout events");
    assert!(last_stdout < events.len() - 2, "stdout must precede Result and Finished");
    manager.stop().await.expect("stop");
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn script_error_emits_errored_then_finished() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("print('before')\n1 +").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        without_stdout(&events),
        vec![EngineEvent::Started, EngineEvent::Errored, EngineEvent::Finished]
    );
    let out = stdout_of(&events);
    assert!(out.starts_with("before\nError: line 2: syntax error"), "got {out:?}");
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_map_result_is_malformed() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("[1, 2]").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(
        without_stdout(&events),
        vec![EngineEvent::Started, EngineEvent::Errored],
        "a malformed result is not followed by Finished"
    );
    assert_eq!(stdout_of(&events), MALFORMED_RESULT_DIAGNOSTIC);
    manager.stop().await.expect("stop");
}

// ── Busy guard and cancellation ──────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn second_submission_while_busy_is_rejected() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("sleep(10)\n{}").expect("submit");
    assert!(manager.is_evaluating());
    let err = manager.evaluate("{'b': 2}").expect_err("busy");
    assert!(matches!(err, AppError::Busy(_)), "unexpected error: {err}");

    manager.cancel().await.expect("cancel");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events, vec![EngineEvent::Started, EngineEvent::Finished]);
    manager.stop().await.expect("stop");
}

/// A sleeping script cancelled after one second finishes promptly and never
/// produces a result.
#[tokio::test(flavor = "multi_thread")]
async fn cancel_terminates_a_sleeping_script() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("sleep(10)\n{'foo': 1}").expect("submit");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = Instant::now();
    manager.cancel().await.expect("cancel");
    assert!(started.elapsed() < Duration::from_secs(5), "cancel must be prompt");
    assert!(!manager.is_evaluating(), "cancel returns once idle");

    let events = until_terminal(&mut rx).await;
    assert_eq!(events, vec![EngineEvent::Started, EngineEvent::Finished]);
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_while_idle_is_a_no_op() {
    let (mut manager, mut rx) = started_manager().await;

    manager.cancel().await.expect("idle cancel");
    assert!(rx.try_recv().is_err(), "idle cancel emits nothing");

    manager.evaluate("{'ok': true}").expect("still accepts work");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last(), Some(&EngineEvent::Finished));
    manager.stop().await.expect("stop");
}

/// Each evaluation runs in a fresh generation: nothing defined by one script
/// is visible to the next.
#[tokio::test(flavor = "multi_thread")]
async fn generations_do_not_share_state() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("secret = 42\n{}").expect("submit");
    until_terminal(&mut rx).await;
    wait_until_idle(&manager).await;

    manager.evaluate("{'leak': secret}").expect("submit");
    let events = until_terminal(&mut rx).await;
    assert_eq!(
        without_stdout(&events),
        vec![EngineEvent::Started, EngineEvent::Errored, EngineEvent::Finished]
    );
    assert!(stdout_of(&events).contains("name 'secret' is not defined"));
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelled_generation_is_replaced() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("while true { }").expect("submit");
    manager.cancel().await.expect("cancel");
    until_terminal(&mut rx).await;

    manager.evaluate("{'after': 1}").expect("fresh generation is ready");
    let events = until_terminal(&mut rx).await;
    assert_eq!(
        events,
        vec![EngineEvent::Started, result(json!({"after": 1})), EngineEvent::Finished]
    );
    manager.stop().await.expect("stop");
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn evaluate_before_start_is_rejected() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let manager = WorkerManager::new(thread_config(), Arc::new(ThreadBackend::new(16)), tx);

    assert!(!manager.is_running());
    assert!(matches!(manager.evaluate("{}"), Err(AppError::NotRunning(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_finishes_in_flight_evaluation() {
    let (mut manager, mut rx) = started_manager().await;

    manager.evaluate("sleep(30)\n{}").expect("submit");
    let started = Instant::now();
    manager.stop().await.expect("stop");
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!manager.is_running());
    assert!(!manager.is_evaluating());

    let events = until_terminal(&mut rx).await;
    assert_eq!(events, vec![EngineEvent::Started, EngineEvent::Finished]);
    assert!(matches!(manager.evaluate("{}"), Err(AppError::NotRunning(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn manager_can_restart_after_stop() {
    let (mut manager, mut rx) = started_manager().await;
    manager.stop().await.expect("stop");

    manager.start().await.expect("restart");
    manager.evaluate("{'again': 1}").expect("submit");
    let events = until_terminal(&mut rx).await;
    assert_eq!(events.last(), Some(&EngineEvent::Finished));
    manager.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_stdout_subscriber_replaces_events() {
    let (mut manager, mut rx) = started_manager().await;
    let seen = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&seen);
    manager
        .subscribe_stdout(move |chunk| sink.lock().unwrap().push_str(&chunk))
        .expect("subscribe");

    manager.evaluate("print('to subscriber')\n{}").expect("submit");
    let events = until_terminal(&mut rx).await;

    assert_eq!(stdout_of(&events), "", "stdout must bypass the event channel");
    assert_eq!(*seen.lock().unwrap(), "to subscriber\n");
    manager.stop().await.expect("stop");
}
