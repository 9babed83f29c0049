//! Integration tests for the chartsync binary

use std::process::Command;

/// Helper to run the chartsync binary
fn chartsync(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_chartsync"))
        .args(args)
        .env_remove("WATCH_NAMESPACE")
        .env_remove("CHARTS_DIR")
        .output()
        .expect("Failed to execute chartsync")
}

#[test]
fn test_crd_prints_definition() {
    let output = chartsync(&["crd"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let crd: serde_yaml::Value = serde_yaml::from_str(&stdout).expect("CRD should be valid YAML");
    assert_eq!(crd["kind"], "CustomResourceDefinition");
    assert_eq!(crd["spec"]["group"], "chartsync.io");
    assert_eq!(crd["spec"]["names"]["kind"], "ReleaseRequest");
    assert_eq!(crd["spec"]["scope"], "Namespaced");
    assert!(stdout.contains("subresources"));
}

#[test]
fn test_help_lists_subcommands() {
    let output = chartsync(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("crd"));
}

#[test]
fn test_run_help_lists_flags() {
    let output = chartsync(&["run", "--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--charts-dir",
        "--namespace",
        "--reconcile-timeout",
        "--helm-binary",
        "--purge-cache-on-exit",
    ] {
        assert!(stdout.contains(flag), "missing {}", flag);
    }
}

#[test]
fn test_unknown_subcommand_fails() {
    let output = chartsync(&["frobnicate"]);
    assert!(!output.status.success());
}
