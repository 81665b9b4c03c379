use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const REGIONS: &str = r#"
default_region = "kernel"

[[regions]]
name = "user"

[[regions.connections]]
to = "kernel"
allow = { package = ["(package=org.kernel.api)"] }
"#;

fn modula() -> Command {
    Command::cargo_bin("modula").unwrap()
}

fn write_config(dir: &Path, content: &str) -> String {
    let path = dir.join("modula.toml");
    fs::write(&path, content).unwrap();
    path.to_string_lossy().to_string()
}

#[test]
fn test_store_write_then_read() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("state.dat");
    let file = file.to_str().unwrap();

    modula()
        .args(["store", "write", file, "--data", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Committed 5 bytes"));
    modula()
        .args(["store", "write", file, "--data", " world", "--append"])
        .assert()
        .success();

    modula()
        .args(["store", "read", file])
        .assert()
        .success()
        .stdout("hello world");
}

#[test]
fn test_store_write_reads_stdin() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("piped.dat");
    let file = file.to_str().unwrap();

    modula()
        .args(["store", "write", file])
        .write_stdin("from stdin")
        .assert()
        .success();
    modula()
        .args(["store", "read", file])
        .assert()
        .success()
        .stdout("from stdin");
}

#[test]
fn test_store_info_reports_generations() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("info.dat");
    let file = file.to_str().unwrap();

    modula()
        .args(["store", "write", file, "--data", "one"])
        .assert()
        .success();
    modula()
        .args(["store", "write", file, "--data", "three"])
        .assert()
        .success();

    let output = modula()
        .args(["store", "info", file, "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["live"]["status"], "valid");
    assert_eq!(report["live"]["logical_len"], 5);
    assert_eq!(report["bak"]["status"], "valid");
    assert_eq!(report["bak"]["logical_len"], 3);
    assert_eq!(report["new"]["status"], "missing");
    assert_eq!(report["tmp_present"], false);

    modula()
        .args(["store", "info", file])
        .assert()
        .success()
        .stdout(predicate::str::contains("live valid (5 bytes)"))
        .stdout(predicate::str::contains("tmp  absent"));
}

#[test]
fn test_store_recover_promotes_leftover_new_generation() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("app.dat");
    let other = dir.path().join("other.dat");

    modula()
        .args(["store", "write", file.to_str().unwrap(), "--data", "old"])
        .assert()
        .success();
    modula()
        .args(["store", "write", other.to_str().unwrap(), "--data", "newer"])
        .assert()
        .success();
    // a commit that stopped after sealing its .new generation
    fs::copy(&other, dir.path().join("app.dat.new")).unwrap();

    modula()
        .args(["store", "recover", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("(5 bytes)"));
    assert!(!dir.path().join("app.dat.new").exists());

    modula()
        .args(["store", "read", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout("newer");
}

#[test]
fn test_store_read_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    modula()
        .args(["store", "read", dir.path().join("absent").to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_region_list_and_check() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), REGIONS);

    modula()
        .args(["region", "list", "--config", &config])
        .assert()
        .success()
        .stdout(predicate::str::contains("user"))
        .stdout(predicate::str::contains("-> kernel"));

    modula()
        .args([
            "region", "check", "--config", &config, "--from", "user", "--namespace",
            "package", "--attr", "package=org.kernel.api", "--to",
            "kernel",
        ])
        .assert()
        .success()
        .stdout("visible\n");

    modula()
        .args([
            "region", "check", "--config", &config, "--from", "user", "--namespace",
            "package", "--attr", "package=org.kernel.impl", "--to",
            "kernel",
        ])
        .assert()
        .success()
        .stdout("not visible\n");
}

#[test]
fn test_region_check_unknown_region_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), REGIONS);

    modula()
        .args([
            "region", "check", "--config", &config, "--from", "user", "--namespace",
            "package", "--to", "nowhere",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn test_config_check() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), REGIONS);
    modula()
        .args(["config", "check", &config])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_region = \"kernel\""));

    let broken = dir.path().join("broken.toml");
    fs::write(
        &broken,
        "[[regions]]\nname = \"a\"\n[[regions.connections]]\nto = \"missing\"\n",
    )
    .unwrap();
    modula()
        .args(["config", "check", broken.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid configuration"));
}

#[test]
fn test_modules_list_of_fresh_storage() {
    let dir = TempDir::new().unwrap();
    let storage = dir.path().join("state");
    let config = write_config(
        dir.path(),
        &format!("storage_dir = {:?}\n", storage.to_str().unwrap()),
    );

    modula()
        .args(["modules", "list", "--config", &config, "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[]"));
}

#[test]
fn test_modules_list_requires_storage() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "");

    modula()
        .args(["modules", "list", "--config", &config])
        .assert()
        .failure()
        .stderr(predicate::str::contains("storage_dir"));
}

#[test]
fn test_unknown_log_level_is_rejected() {
    modula()
        .args(["--log-level", "loud", "config", "default"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown log level"));
}
