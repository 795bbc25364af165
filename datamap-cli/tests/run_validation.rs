use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn datamap_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("datamap"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("ASSET_BUCKET")
        .env_remove("DB_READONLY_URI")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    let home = TempDir::new().expect("home");
    datamap_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("run"))
        .stdout(contains("plan"));
}

#[test]
fn run_without_phases_prints_help() {
    let home = TempDir::new().expect("home");
    datamap_cmd(home.path())
        .arg("run")
        .assert()
        .success()
        .stdout(contains("--create"))
        .stdout(contains("--upload"));
}

#[test]
fn create_only_requires_output() {
    let home = TempDir::new().expect("home");
    datamap_cmd(home.path())
        .args(["run", "--create"])
        .assert()
        .failure()
        .stderr(contains("--output is required with --create"));
}

#[test]
fn upload_only_requires_output() {
    let home = TempDir::new().expect("home");
    datamap_cmd(home.path())
        .args(["run", "--upload"])
        .assert()
        .failure()
        .stderr(contains("--output is required with --upload"));
}

#[test]
fn upload_only_requires_existing_tiles() {
    let home = TempDir::new().expect("home");
    let output = TempDir::new().expect("output");
    datamap_cmd(home.path())
        .args(["run", "--upload", "--output"])
        .arg(output.path())
        .assert()
        .failure()
        .stderr(contains("tiles subfolder"));
}

#[test]
fn upload_requires_a_bucket() {
    let home = TempDir::new().expect("home");
    let output = TempDir::new().expect("output");
    fs::create_dir(output.path().join("tiles")).expect("tiles dir");
    datamap_cmd(home.path())
        .args(["run", "--upload", "--bucket", "/", "--output"])
        .arg(output.path())
        .assert()
        .failure()
        .stderr(contains("upload bucket"));
}

#[test]
fn create_requires_a_database() {
    let home = TempDir::new().expect("home");
    let output = TempDir::new().expect("output");
    datamap_cmd(home.path())
        .args(["run", "--create", "--output"])
        .arg(output.path())
        .assert()
        .failure()
        .stderr(contains("DB_READONLY_URI"));
}

#[test]
fn concurrency_must_be_positive() {
    let home = TempDir::new().expect("home");
    let output = TempDir::new().expect("output");
    datamap_cmd(home.path())
        .args(["run", "--create", "--concurrency", "0", "--output"])
        .arg(output.path())
        .assert()
        .failure()
        .stderr(contains("--concurrency must be between 1 and"));
}

#[test]
fn malformed_config_is_reported_with_its_path() {
    let home = TempDir::new().expect("home");
    let config = home.path().join("broken.yaml");
    fs::write(&config, "max_zoom: [\n").expect("write config");
    datamap_cmd(home.path())
        .args(["run", "--create", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("failed to load config"))
        .stderr(contains("broken.yaml"));
}

#[test]
fn invalid_config_values_are_rejected() {
    let home = TempDir::new().expect("home");
    let dir = home.path().join(".datamap");
    fs::create_dir_all(&dir).expect("config dir");
    fs::write(dir.join("config.yaml"), "delete_batch_size: 0\n").expect("write config");
    datamap_cmd(home.path())
        .arg("run")
        .assert()
        .failure()
        .stderr(contains("delete_batch_size"));
}

#[test]
fn plan_requires_existing_tiles() {
    let home = TempDir::new().expect("home");
    let output = TempDir::new().expect("output");
    datamap_cmd(home.path())
        .args(["plan", "--bucket", "assets", "--output"])
        .arg(output.path())
        .assert()
        .failure()
        .stderr(contains("no tiles to compare"));
}

#[test]
fn plan_list_and_json_conflict() {
    let home = TempDir::new().expect("home");
    datamap_cmd(home.path())
        .args(["plan", "--output", ".", "--list", "--json"])
        .assert()
        .failure();
}
