// CLI smoke tests: argument surface only, no panel required.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("xprov")
        .expect("binary builds")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("issue"))
        .stdout(predicate::str::contains("revoke"))
        .stdout(predicate::str::contains("inbound"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn no_subcommand_is_a_usage_error() {
    Command::cargo_bin("xprov")
        .expect("binary builds")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn revoke_rejects_a_malformed_uuid() {
    Command::cargo_bin("xprov")
        .expect("binary builds")
        .args(["revoke", "not-a-uuid"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn config_path_prints_a_toml_path() {
    Command::cargo_bin("xprov")
        .expect("binary builds")
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}
