//! Tests for the dbheal command-line interface.

use assert_cmd::Command;

fn dbheal(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dbheal").expect("binary built");
    cmd.current_dir(dir.path())
        .env("DBHEAL_DATABASE_PATH", dir.path().join("cli.db"))
        .env("RUST_LOG", "warn")
        .arg("--config")
        .arg(dir.path().join("absent.toml"));
    cmd
}

#[test]
fn rules_prints_the_rulebook() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dbheal(&dir).arg("rules").output().expect("run");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DEADLOCK"));
    assert!(stdout.contains("\"total_rules\": 5"));
    assert!(!dir.path().join("cli.db").exists(), "rules needs no database");
}

#[test]
fn cycle_prints_a_cycle_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dbheal(&dir).arg("cycle").output().expect("run");
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert!(report["cycle_id"]
        .as_str()
        .is_some_and(|id| id.starts_with("cycle_")));
    assert_eq!(report["overall_success"], true);
    assert!(dir.path().join("cli.db").exists());
}

#[test]
fn pending_on_empty_database_is_an_empty_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = dbheal(&dir).arg("pending").output().expect("run");
    assert!(output.status.success());

    let pending: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout is JSON");
    assert_eq!(pending, serde_json::json!([]));
}

#[test]
fn review_of_unknown_id_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    dbheal(&dir)
        .args(["review", "missing", "--action", "APPROVED"])
        .assert()
        .failure();
}

#[test]
fn invalid_config_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[pipeline]\ninterval_secs = 1\n").expect("write config");

    let mut cmd = Command::cargo_bin("dbheal").expect("binary built");
    cmd.current_dir(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("rules")
        .assert()
        .failure();
}

#[test]
fn unparseable_log_level_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = dir.path().join("noisy.toml");
    std::fs::write(&config, "[logging]\nlevel = \"dbheal=loudest\"\n").expect("write config");

    let mut cmd = Command::cargo_bin("dbheal").expect("binary built");
    cmd.current_dir(dir.path())
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(&config)
        .arg("rules")
        .assert()
        .failure();
}
