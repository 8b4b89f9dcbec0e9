//! CLI tests for the distronode-test runner
//!
//! This test suite covers:
//! - Help and version output
//! - Exit codes for usage errors and empty collections
//! - Scenario collection and disabled scenario runs

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn runner_cmd() -> Command {
    let mut cmd = Command::cargo_bin("distronode-test").unwrap();
    cmd.env_remove("DISTRONODE_CONFIG")
        .env_remove("DISTRONODE_INVENTORY")
        .env_remove("MOLECULE_OPTS");
    cmd
}

fn write_scenario(root: &std::path::Path, project: &str, name: &str, body: &str) {
    let dir = root.join(project).join("molecule").join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("molecule.yml"), body).unwrap();
}

// ============================================================================
// Help and Version
// ============================================================================

#[test]
fn test_help_lists_plugin_options() {
    runner_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--inventory"))
        .stdout(predicate::str::contains("--host-pattern"))
        .stdout(predicate::str::contains("--molecule"))
        .stdout(predicate::str::contains("collect"));
}

#[test]
fn test_version() {
    runner_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("distronode-test"));
}

#[test]
fn test_unknown_subcommand_fails() {
    runner_cmd().arg("playbook").assert().failure();
}

// ============================================================================
// Usage Errors
// ============================================================================

#[test]
fn test_adhoc_without_host_pattern() {
    let dir = tempdir().unwrap();
    runner_cmd()
        .args(["--inventory", "web1,web2,"])
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .args(["adhoc", "ping"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("--distronode-host-pattern"));
}

#[test]
fn test_facts_without_any_parameters() {
    let dir = tempdir().unwrap();
    runner_cmd()
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .arg("facts")
        .assert()
        .code(4);
}

// ============================================================================
// Scenario Collection
// ============================================================================

#[test]
fn test_collect_without_scenarios() {
    let dir = tempdir().unwrap();
    runner_cmd()
        .args(["collect", "--fixture", "molecule_scenario"])
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("No molecule scenarios found"));
}

#[test]
fn test_collect_lists_scenarios() {
    let dir = tempdir().unwrap();
    write_scenario(dir.path(), "webserver", "default", "driver:\n  name: docker\n");
    write_scenario(dir.path(), "database", "default", "");

    runner_cmd()
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .arg("collect")
        .assert()
        .success()
        .stdout(predicate::str::contains("molecule_scenario[database-default]"))
        .stdout(predicate::str::contains("molecule_scenario[webserver-default]"))
        .stdout(predicate::str::contains("2 items collected"));
}

#[test]
fn test_run_skips_when_molecule_disabled() {
    let dir = tempdir().unwrap();
    write_scenario(dir.path(), "webserver", "default", "");

    runner_cmd()
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .arg("run")
        .assert()
        .success()
        .stdout(predicate::str::contains("Molecule tests are disabled"))
        .stdout(predicate::str::contains("1 scenarios, 0 failed"));
}

#[test]
fn test_run_keyword_without_match() {
    let dir = tempdir().unwrap();
    write_scenario(dir.path(), "webserver", "default", "");

    runner_cmd()
        .args(["--rootdir", dir.path().to_str().unwrap()])
        .args(["run", "-k", "database"])
        .assert()
        .code(5);
}
