//! Integration tests for asnmap CLI functionality
//!
//! None of these reach the network: each case fails or exits before the
//! first lookup.

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn asnmap() -> Command {
    Command::cargo_bin("asnmap").expect("Failed to find asnmap binary")
}

#[test]
fn test_help_output() {
    asnmap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Bulk IP to ASN mapping"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--sources"))
        .stdout(predicate::str::contains("--max-depth"))
        .stdout(predicate::str::contains("--cache"));
}

#[test]
fn test_version_output() {
    let output = asnmap().arg("--version").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("asnmap "));
}

#[test]
fn test_empty_source_list_is_rejected() {
    asnmap()
        .args(["--sources", "", "8.8.8.8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_unknown_source_is_rejected() {
    asnmap()
        .args(["--sources", "team_cymru,whois", "8.8.8.8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown source 'whois'"));
}

#[test]
fn test_duplicate_source_is_rejected() {
    asnmap()
        .args(["--sources", "ipapi,ip-api", "8.8.8.8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("appears twice"));
}

#[test]
fn test_zero_workers_is_rejected() {
    asnmap()
        .args(["--workers", "0", "8.8.8.8"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_no_valid_ips() {
    asnmap()
        .args(["not-an-ip", "999.1.1.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no valid IP addresses"));
}

#[test]
fn test_input_file_with_only_comments() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# exported from access logs").unwrap();
    writeln!(file).unwrap();
    writeln!(file, "   # nothing here").unwrap();

    asnmap()
        .arg("--input")
        .arg(file.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("no valid IP addresses"));
}

#[test]
fn test_invalid_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source_priority = []").unwrap();

    asnmap()
        .arg("--config")
        .arg(file.path())
        .arg("8.8.8.8")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}
