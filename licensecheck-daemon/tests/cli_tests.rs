//! Binary-level tests: configuration validation and single-message mode.

use std::path::Path;
use std::process::{Command, Output};

fn daemon(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_licensecheck-daemon"));
    cmd.env_remove("RUST_LOG")
        .env("LICENSECHECK_STORAGE_RESULT_DIR", dir.join("results"))
        .env("LICENSECHECK_STORAGE_WORK_DIR", dir.join("work"))
        // any executable on PATH passes the scanner preflight
        .env("LICENSECHECK_SCANNER_PROGRAM", "sh");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("failed to launch licensecheck-daemon")
}

#[test]
fn validate_accepts_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(daemon(dir.path()).arg("--validate"));

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("configuration OK"));
}

#[test]
fn validate_rejects_bad_log_format() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(daemon(dir.path()).args(["--validate", "--log-format", "xml"]));

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("general.log_format"));
}

#[test]
fn missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(daemon(dir.path())
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .arg("--validate"));

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("config file not found"));
}

#[test]
fn once_ignores_unrelated_topic() {
    let dir = tempfile::tempdir().unwrap();
    let message = dir.path().join("message.json");
    std::fs::write(
        &message,
        r#"{"id":"e1","topic":"org.example.unrelated","body":{}}"#,
    )
    .unwrap();

    let output = run(daemon(dir.path()).arg("--once").arg(&message));

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(output.stdout.is_empty());
    assert!(dir.path().join("results").is_dir());
}

#[test]
fn once_fails_on_malformed_build_reference() {
    let dir = tempfile::tempdir().unwrap();
    let message = dir.path().join("message.json");
    std::fs::write(
        &message,
        r#"{"id":"e1","topic":"org.fedoraproject.prod.buildsys.build.state.change","body":{"name":"hello"}}"#,
    )
    .unwrap();

    let output = run(daemon(dir.path()).arg("--once").arg(&message));

    assert!(!output.status.success());
    assert!(!dir.path().join("results").join("e1").exists());
}

#[test]
fn stream_mode_ends_at_end_of_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("events.jsonl");
    std::fs::write(
        &input,
        "{\"id\":\"e1\",\"topic\":\"org.example.unrelated\",\"body\":{}}\nnot json\n",
    )
    .unwrap();

    let output = run(daemon(dir.path()).arg("--input").arg(&input));

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stderr).contains("consumer stopped"));
}
