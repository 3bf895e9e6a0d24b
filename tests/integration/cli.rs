use std::fs;

use assert_cmd::Command;
use predicates::boolean::PredicateBooleanExt;
use predicates::str::contains;
use tempfile::tempdir;

fn archivectl() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("archivectl"))
}

#[test]
fn check_reports_enabled_services() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("archive.yaml");
    fs::write(
        &config_path,
        r#"
storage:
  enabled: true
  path: "/srv/archive"
query_retrieve:
  enabled: false
web:
  web_server: true
  web_services: false
  server_port: 9090
sop_classes:
  - "1.2.840.10008.5.1.4.1.1.2"
"#,
    )
    .expect("failed to write config");

    archivectl()
        .env_remove("ARCHIVECTL_TASK_THREADS")
        .arg("check")
        .arg("--config")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(
            contains("storage")
                .and(contains("configured"))
                .and(contains("port 9090"))
                .and(contains("no-op, status mirrors web-server"))
                .and(contains("task threads: 4")),
        );
}

#[test]
fn check_emits_json() {
    let temp = tempdir().expect("failed to create tempdir");
    let config_path = temp.path().join("archive.yaml");
    fs::write(&config_path, "web:\n  web_server: true\n").expect("failed to write config");

    let output = archivectl()
        .arg("check")
        .arg("--config")
        .arg(&config_path)
        .arg("--json")
        .output()
        .expect("failed to run check");
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("check --json prints JSON");
    assert_eq!(report["storage_configured"], false);
    assert_eq!(report["web_port"], 8080);

    let services = report["services"].as_array().expect("services array");
    assert_eq!(services.len(), 4);
    assert_eq!(services[2]["service"], "web-server");
    assert_eq!(services[2]["enabled"], true);
    assert_eq!(services[3]["mirrors"], "web-server");
}

#[test]
fn check_fails_on_missing_config() {
    let temp = tempdir().expect("failed to create tempdir");

    archivectl()
        .arg("check")
        .arg("--config")
        .arg(temp.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(contains("ConfigReadError"));
}

#[test]
fn logs_prints_tail_of_server_log() {
    let temp = tempdir().expect("failed to create tempdir");
    let log_path = temp.path().join("server.log");
    fs::write(
        &log_path,
        "2026-01-01 10:00:00 Starting DICOM Storage SCP\n\
         2026-01-01 10:00:01 Starting DICOM Query/Retrieve SCP\n\
         2026-01-01 10:05:00 Stopping DICOM Storage SCP\n",
    )
    .expect("failed to write log");

    archivectl()
        .arg("logs")
        .arg("--file")
        .arg(&log_path)
        .arg("--lines")
        .arg("1")
        .assert()
        .success()
        .stdout(contains("Stopping DICOM Storage SCP").and(contains("Starting").not()));
}

#[test]
fn logs_fails_for_missing_file() {
    let temp = tempdir().expect("failed to create tempdir");

    archivectl()
        .arg("logs")
        .arg("--file")
        .arg(temp.path().join("missing.log"))
        .assert()
        .failure()
        .stderr(contains("LogUnavailable"));
}
