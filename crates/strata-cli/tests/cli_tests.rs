//! CLI integration tests for strata.
//!
//! These tests verify CLI command behavior, output format, and error handling.

use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

/// Get the strata binary command.
fn strata() -> Command {
    let mut cmd = Command::new(cargo_bin!("strata"));
    cmd.env_remove("STRATA_CACHE_DIR");
    cmd
}

/// A command pointed at `cache`.
fn strata_in(cache: &Path) -> Command {
    let mut cmd = strata();
    cmd.arg("--cache-dir").arg(cache);
    cmd
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), "import b.txt\nalpha\n").unwrap();
    fs::write(dir.path().join("b.txt"), "import c.txt\nbeta\n").unwrap();
    fs::write(dir.path().join("c.txt"), "gamma\n").unwrap();
    dir
}

// ========== Help and Version Tests ==========

#[test]
fn test_help_output() {
    strata()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("artifact cache"))
        .stdout(predicate::str::contains("index"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("gc"));
}

#[test]
fn test_version_output() {
    strata()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("strata"));
}

#[test]
fn test_no_args_shows_help() {
    strata()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

// ========== Fingerprint Tests ==========

#[test]
fn test_fingerprint_json() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("x.txt");
    fs::write(&file, "hello").unwrap();

    strata()
        .args(["--format", "json", "fingerprint"])
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"size\": 5"))
        // BLAKE3 of "hello"
        .stdout(predicate::str::contains(
            "ea8f163db38682925e4491c5e58d4bb3506ef8c14eb78a86e908c5624a67200f",
        ));
}

#[test]
fn test_fingerprint_missing_file() {
    let dir = TempDir::new().unwrap();
    strata()
        .arg("fingerprint")
        .arg(dir.path().join("nope.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("S0101"));
}

#[test]
fn test_fingerprint_missing_file_json_error() {
    let dir = TempDir::new().unwrap();
    strata()
        .args(["--format", "json", "fingerprint"])
        .arg(dir.path().join("nope.txt"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("\"code\": \"S0101\""));
}

// ========== Index Tests ==========

#[test]
fn test_index_builds_then_hits() {
    let src = project();
    let cache = TempDir::new().unwrap();

    strata_in(cache.path())
        .args(["--format", "json", "index"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"scanned\": 3"))
        .stdout(predicate::str::contains("\"hits\": 0"));

    strata_in(cache.path())
        .args(["--format", "json", "index"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hits\": 3"));
}

#[test]
fn test_index_rebuilds_dependents() {
    let src = project();
    let cache = TempDir::new().unwrap();

    strata_in(cache.path()).arg("index").arg(src.path()).assert().success();

    fs::write(src.path().join("c.txt"), "gamma changed\n").unwrap();
    strata_in(cache.path())
        .arg("index")
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("rebuilt text:a.txt"))
        .stdout(predicate::str::contains("rebuilt text:b.txt"))
        .stdout(predicate::str::contains("rebuilt text:c.txt"));
}

#[test]
fn test_index_reports_cycle() {
    let src = TempDir::new().unwrap();
    fs::write(src.path().join("a.txt"), "import b.txt\n").unwrap();
    fs::write(src.path().join("b.txt"), "import a.txt\n").unwrap();
    let cache = TempDir::new().unwrap();

    strata_in(cache.path())
        .arg("index")
        .arg(src.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("S0301"));
}

#[test]
fn test_index_skips_hidden_files() {
    let src = project();
    fs::create_dir(src.path().join(".git")).unwrap();
    fs::write(src.path().join(".git").join("HEAD"), "ref").unwrap();
    let cache = TempDir::new().unwrap();

    strata_in(cache.path())
        .args(["--format", "json", "index"])
        .arg(src.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"scanned\": 3"));
}

// ========== Maintenance Tests ==========

#[test]
fn test_stats_json() {
    let src = project();
    let cache = TempDir::new().unwrap();
    strata_in(cache.path()).arg("index").arg(src.path()).assert().success();

    strata_in(cache.path())
        .args(["--format", "json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cold_entries\": 3"))
        .stdout(predicate::str::contains("\"hit_rate\""));
}

#[test]
fn test_verify_clean_cache() {
    let src = project();
    let cache = TempDir::new().unwrap();
    strata_in(cache.path()).arg("index").arg(src.path()).assert().success();

    strata_in(cache.path())
        .arg("verify")
        .assert()
        .success()
        .stdout(predicate::str::contains("objects verified"));
}

#[test]
fn test_gc_and_clear() {
    let src = project();
    let cache = TempDir::new().unwrap();
    strata_in(cache.path()).arg("index").arg(src.path()).assert().success();

    strata_in(cache.path())
        .args(["--format", "json", "gc"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tombstones_removed"));

    strata_in(cache.path())
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("Success:"));

    strata_in(cache.path())
        .args(["--format", "json", "stats"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"cold_entries\": 0"));
}

#[test]
fn test_invalid_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("strata.json");
    fs::write(&config, "{ not json").unwrap();

    strata_in(dir.path())
        .arg("--config")
        .arg(&config)
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("S0401"));
}
