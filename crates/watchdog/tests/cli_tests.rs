//! CLI integration tests

use std::process::{Command, Output};

fn watchdog(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_memory-watchdog"))
        .args(args)
        .env_remove("DEPLOYMENT")
        .env_remove("CHECK_INTERVAL")
        .env_remove("MEMORY_THRESHOLD")
        .output()
        .expect("Failed to execute memory-watchdog")
}

#[test]
fn test_cli_help() {
    let output = watchdog(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "help should succeed");
    for flag in ["--interval", "--namespace", "--deployment", "--threshold", "--kubectl", "--verbose"] {
        assert!(stdout.contains(flag), "help should mention {flag}");
    }
}

#[test]
fn test_cli_version() {
    let output = watchdog(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "version should succeed");
    assert!(stdout.contains("memory-watchdog"), "should show binary name");
}

#[test]
fn test_missing_deployment_is_fatal() {
    let output = watchdog(&[]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(
        stderr.contains("deployment name is required"),
        "unexpected stderr: {stderr}"
    );
}

#[test]
fn test_invalid_interval_is_rejected() {
    let output = watchdog(&["--deployment", "api", "--interval", "soon"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success());
    assert!(stderr.contains("--interval"), "unexpected stderr: {stderr}");
}
