//! Smoke tests -- verify the binary runs and key subcommands load.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Write a config pointing every path into `tmp`.
fn config_in(tmp: &TempDir) -> std::path::PathBuf {
    let root = tmp.path().join("projects");
    let project = root.join("shop");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join("playwright.config.ts"), "export default {};\n").unwrap();

    let path = tmp.path().join("testdash.toml");
    std::fs::write(
        &path,
        format!(
            "[projects]\nroot = {:?}\n\n[storage]\ndb_path = {:?}\n",
            root.display().to_string(),
            tmp.path().join("testdash.db").display().to_string()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("testdash")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("end-to-end test suites"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("testdash")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("testdash"));
}

#[test]
fn test_subcommands_exist() {
    for sub in ["serve", "run", "run-all", "history", "projects"] {
        Command::cargo_bin("testdash")
            .unwrap()
            .args([sub, "--help"])
            .assert()
            .success();
    }
}

#[test]
fn test_projects_json_lists_discovered_project() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    Command::cargo_bin("testdash")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["projects", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": \"shop\""))
        .stdout(predicate::str::contains("\"canRunFromUI\": true"));
}

#[test]
fn test_history_of_fresh_project_is_empty() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    Command::cargo_bin("testdash")
        .unwrap()
        .env("TESTDASH_CONFIG", &config)
        .args(["history", "shop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No runs recorded for shop."));
}

#[test]
fn test_run_rejects_unsafe_grep() {
    let tmp = TempDir::new().unwrap();
    let config = config_in(&tmp);

    Command::cargo_bin("testdash")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["run", "shop", "--grep", "$(whoami)"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("disallowed character"));
}
