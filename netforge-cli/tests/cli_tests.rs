//! CLI integration tests

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::PathBuf;
use tempfile::TempDir;

/// Build command for the netforge-cli binary (finds it in target/debug when run via cargo test).
fn netforge_cli() -> Command {
    cargo_bin_cmd!("netforge-cli")
}

/// Path to netforge library test fixtures (relative to workspace).
fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("netforge")
        .join("tests")
        .join("fixtures")
        .join(name)
}

#[test]
fn test_cli_help() {
    let mut cmd = netforge_cli();

    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("KiCad"));
}

#[test]
fn test_cli_version() {
    let mut cmd = netforge_cli();

    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_rules_lists_builtins() {
    let mut cmd = netforge_cli();

    cmd.arg("rules").arg("--verbose");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("decoupling"))
        .stdout(predicate::str::contains("pullup"))
        .stdout(predicate::str::contains("bulk_capacitance"))
        .stdout(predicate::str::contains("touch_grid"));
}

#[test]
fn test_cli_rules_with_manifest() {
    let mut cmd = netforge_cli();

    cmd.arg("rules").arg("--config").arg(fixture("with_plugins.json"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("decoupling_1u"))
        .stdout(predicate::str::contains("touch_only"))
        .stderr(predicate::str::contains("unknown_factory"));
}

#[test]
fn test_cli_check_fixture() {
    let mut cmd = netforge_cli();

    cmd.arg("check").arg("--config").arg(fixture("touch_grid.json"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Design: touch_board"));
}

#[test]
fn test_cli_check_json_output() {
    let mut cmd = netforge_cli();

    cmd.arg("check")
        .arg("--config")
        .arg(fixture("touch_grid.json"))
        .arg("--format")
        .arg("json");

    let output = cmd.assert().success().get_output().stdout.clone();
    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["design"], "touch_board");
    assert_eq!(json["counts"]["error"], 0);
}

#[test]
fn test_cli_check_fail_on_warning() {
    let mut cmd = netforge_cli();

    cmd.arg("check")
        .arg("--config")
        .arg(fixture("with_plugins.json"))
        .arg("--fail-on")
        .arg("warning");

    cmd.assert().code(1);
}

#[test]
fn test_cli_generate() {
    let out = TempDir::new().unwrap();
    let mut cmd = netforge_cli();

    cmd.arg("generate")
        .arg("--config")
        .arg(fixture("touch_grid.json"))
        .arg("--out")
        .arg(out.path())
        .arg("--timestamp")
        .arg("2026-03-01T12:00:00Z")
        .arg("--revision")
        .arg("cafe123")
        .arg("--no-external");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Accepted"));

    assert!(out.path().join("touch_board.kicad_sch").is_file());
    assert!(out.path().join("touch_board.placement.csv").is_file());
    let summary = std::fs::read_to_string(out.path().join("touch_board.summary.json")).unwrap();
    assert!(summary.contains("cafe123"));
    assert!(summary.contains("2026-03-01T12:00:00Z"));
}

#[test]
fn test_cli_generate_missing_config() {
    let mut cmd = netforge_cli();

    cmd.arg("generate").arg("--config").arg("no_such_config.json");
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("no_such_config.json"));
}

#[test]
fn test_cli_generate_bad_timestamp() {
    let out = TempDir::new().unwrap();
    let mut cmd = netforge_cli();

    cmd.arg("generate")
        .arg("--out")
        .arg(out.path())
        .arg("--timestamp")
        .arg("yesterday");
    cmd.assert()
        .code(2)
        .stderr(predicate::str::contains("--timestamp"));
}

#[test]
fn test_cli_place() {
    let out = TempDir::new().unwrap();
    let table = out.path().join("grid.csv");
    let mut cmd = netforge_cli();

    cmd.arg("place")
        .arg("--config")
        .arg(fixture("touch_grid.json"))
        .arg("--output")
        .arg(&table)
        .arg("--accept")
        .arg("--unlock")
        .arg("TP1");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Placed:    30"))
        .stdout(predicate::str::contains("Locked:    29"));

    let csv = std::fs::read_to_string(&table).unwrap();
    assert!(csv.lines().next().unwrap().contains("reference"));
    assert_eq!(csv.lines().count(), 31);
}

#[test]
fn test_cli_diagnostics_empty() {
    let dir = TempDir::new().unwrap();
    let mut cmd = netforge_cli();

    cmd.arg("diagnostics").arg(dir.path());
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("No plugin diagnostics found"));
}

#[test]
fn test_cli_diagnostics_after_failed_plugin() {
    let out = TempDir::new().unwrap();

    netforge_cli()
        .arg("generate")
        .arg("--config")
        .arg(fixture("with_plugins.json"))
        .arg("--out")
        .arg(out.path().join("build"))
        .arg("--no-external")
        .assert()
        .success();

    let mut cmd = netforge_cli();
    cmd.arg("diagnostics").arg(out.path());
    cmd.assert()
        .code(1)
        .stdout(predicate::str::contains("unknown_factory=1"));
}

#[test]
fn test_cli_erc_tool_missing() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("netforge.json");
    std::fs::write(&config, r#"{ "external": { "kicad_cli": "netforge-no-such-tool" } }"#).unwrap();
    let schematic = dir.path().join("board.kicad_sch");
    std::fs::write(&schematic, "(kicad_sch)").unwrap();

    let mut cmd = netforge_cli();
    cmd.arg("erc").arg(&schematic).arg("--config").arg(&config);
    cmd.assert()
        .code(1)
        .stderr(predicate::str::contains("netforge-no-such-tool"));
}
