use std::path::PathBuf;
use std::time::Duration;

use chartscript::config::{BackendKind, EngineConfig, MIN_LINE_BYTES};
use chartscript::AppError;

fn full_toml() -> &'static str {
    r#"
backend = "thread"
cancel_timeout_ms = 2500
ready_timeout_ms = 750
max_line_bytes = 65536
max_call_depth = 64

[worker]
program = "/usr/local/bin/chartscript"
args = ["worker", "--log-format", "json"]
"#
}

#[test]
fn empty_config_uses_defaults() {
    let config = EngineConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.backend, BackendKind::Process);
    assert_eq!(config.cancel_timeout(), Duration::from_secs(5));
    assert_eq!(config.ready_timeout(), Duration::from_secs(5));
    assert_eq!(config.worker.args, vec!["worker".to_owned()]);
    assert!(config.worker.program.is_none());
}

#[test]
fn parses_every_field() {
    let config = EngineConfig::from_toml_str(full_toml()).expect("config parses");

    assert_eq!(config.backend, BackendKind::Thread);
    assert_eq!(config.cancel_timeout(), Duration::from_millis(2500));
    assert_eq!(config.ready_timeout(), Duration::from_millis(750));
    assert_eq!(config.max_line_bytes, 65536);
    assert_eq!(config.max_call_depth, 64);
    assert_eq!(
        config.worker_program().expect("program configured"),
        PathBuf::from("/usr/local/bin/chartscript")
    );
    assert_eq!(config.worker.args, ["worker", "--log-format", "json"]);
}

/// Without a configured program the engine re-executes its own binary.
#[test]
fn worker_program_defaults_to_current_exe() {
    let config = EngineConfig::default();
    let program = config.worker_program().expect("current exe resolves");

    assert_eq!(
        program,
        std::env::current_exe().expect("current exe"),
        "default worker program must be the running executable"
    );
}

#[test]
fn rejects_zero_cancel_timeout() {
    let err = EngineConfig::from_toml_str("cancel_timeout_ms = 0").expect_err("zero timeout");
    assert!(
        matches!(err, AppError::Config(ref msg) if msg.contains("cancel_timeout_ms")),
        "unexpected error: {err}"
    );
}

#[test]
fn rejects_zero_ready_timeout() {
    let err = EngineConfig::from_toml_str("ready_timeout_ms = 0").expect_err("zero timeout");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("ready_timeout_ms")));
}

#[test]
fn rejects_zero_call_depth() {
    let err = EngineConfig::from_toml_str("max_call_depth = 0").expect_err("zero depth");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("max_call_depth")));
}

#[test]
fn rejects_tiny_line_limit() {
    let raw = format!("max_line_bytes = {}", MIN_LINE_BYTES - 1);
    let err = EngineConfig::from_toml_str(&raw).expect_err("line limit below minimum");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("max_line_bytes")));
}

#[test]
fn rejects_unknown_backend() {
    let err = EngineConfig::from_toml_str(r#"backend = "fork""#).expect_err("unknown backend");
    assert!(
        matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")),
        "unexpected error: {err}"
    );
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("chartscript.toml");
    std::fs::write(&path, full_toml()).expect("write config");

    let config = EngineConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.backend, BackendKind::Thread);
}

#[test]
fn load_from_missing_path_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = EngineConfig::load_from_path(dir.path().join("absent.toml"))
        .expect_err("missing file must fail");
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("failed to read config")));
}
