use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn create_cli_test_environment() -> TempDir {
    TempDir::new().expect("Failed to create temporary directory")
}

/// `mp` with config, data and log dirs confined to `home`
fn mp_cmd(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("mp").expect("Failed to find mp binary");
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("XDG_DATA_HOME", home.join("data"))
        .env("NO_COLOR", "1");
    cmd
}

fn scenario(name: &str) -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
        .display()
        .to_string()
}

#[test]
fn test_cli_scale_with_base_quantity() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args([
            "scale",
            "--category",
            "protein",
            "--adults",
            "8",
            "--children",
            "2",
            "--base",
            "2",
            "--servings",
            "4",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("9.20"))
        .stdout(predicate::str::contains("4.60"));
}

#[test]
fn test_cli_scale_unknown_category_is_estimated() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["scale", "--category", "fondue", "--adults", "4"])
        .assert()
        .success()
        .stdout(predicate::str::contains("estimated"));
}

#[test]
fn test_cli_scale_requires_adults() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["scale", "--category", "protein"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--adults"));
}

#[test]
fn test_cli_sessions_list_empty() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["sessions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No sessions"));
}

#[test]
fn test_cli_sessions_show_unknown() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["sessions", "show", "nothing-here"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("session not found"));
}

#[test]
fn test_cli_simulate_dinner_party() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["simulate", &scenario("dinner_party.yml")])
        .assert()
        .success()
        .stdout(predicate::str::contains("delivery report"))
        .stdout(predicate::str::contains("in_chat: delivered"))
        .stdout(predicate::str::contains("google_tasks: failed"));
}

#[test]
fn test_cli_simulate_persist_then_list() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["simulate", &scenario("dinner_party.yml"), "--persist"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Snapshot written"));

    mp_cmd(temp_dir.path())
        .args(["sessions", "list", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"stage\": \"complete\""));

    mp_cmd(temp_dir.path())
        .args(["sessions", "show", "dinner"])
        .assert()
        .success()
        .stdout(predicate::str::contains("google_tasks: failed"))
        .stdout(predicate::str::contains("events:"));
}

#[test]
fn test_cli_simulate_missing_file() {
    let temp_dir = create_cli_test_environment();

    mp_cmd(temp_dir.path())
        .args(["simulate", "missing.yml"])
        .assert()
        .failure();
}

#[test]
fn test_cli_sessions_delete_rejects_path_ids() {
    let temp_dir = create_cli_test_environment();
    let outside = temp_dir.path().join("data").join("mealplan").join("x.json");
    std::fs::create_dir_all(outside.parent().unwrap()).unwrap();
    std::fs::write(&outside, "{}").unwrap();

    mp_cmd(temp_dir.path())
        .args(["sessions", "delete", "../x"])
        .assert()
        .failure();
    assert!(outside.exists());
}
