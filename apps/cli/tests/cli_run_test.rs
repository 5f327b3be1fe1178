//! Integration tests for `kiln run`, `kiln models` and `kiln analyze`.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const SCRIPT: &str = r#"echo 'PROGRESS: {"epoch": 1, "total_epochs": 2, "train_loss": 0.8, "val_accuracy": 0.7}'
echo 'PROGRESS: {"epoch": 2, "total_epochs": 2, "train_loss": 0.4, "val_accuracy": 0.9, "status": "completed"}'
mkdir -p saved_models
printf 'weights' > saved_models/final_model.pt
"#;

/// Creates `<temp>/uploads/<folder>/train.sh` and returns the temp dir.
fn upload(folder: &str, body: &str) -> TempDir {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("uploads").join(folder);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("train.sh"), body).unwrap();
    temp
}

fn kiln(temp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("kiln-cli").unwrap();
    cmd.current_dir(temp.path())
        .env("KILN_UPLOAD_ROOT", temp.path().join("uploads"))
        .env("KILN_INTERPRETER", "sh")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_run_success_prints_summary() {
    let temp = upload("mnist", SCRIPT);

    kiln(&temp)
        .args(["run", "--folder", "mnist", "--script", "train.sh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Training Summary"))
        .stdout(predicate::str::contains("mnist/saved_models/final_model.pt"))
        .stdout(predicate::str::contains("completed"));

    kiln(&temp)
        .args(["models", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"entity\": \"mnist\""))
        .stdout(predicate::str::contains("mnist/saved_models/final_model.pt"));
}

#[test]
fn test_run_json_streams_events() {
    let temp = upload("mnist", SCRIPT);

    kiln(&temp)
        .args(["run", "--folder", "mnist", "--script", "train.sh", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"type\":\"metrics\""))
        .stdout(predicate::str::contains("\"type\":\"summary\""));
}

#[test]
fn test_run_failure_exits_non_zero() {
    let temp = upload("broken", "echo 'boom' >&2\nexit 2\n");

    kiln(&temp)
        .args(["run", "--folder", "broken", "--script", "train.sh"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("training failed"));
}

#[test]
fn test_run_unknown_folder() {
    let temp = upload("mnist", SCRIPT);

    kiln(&temp)
        .args(["run", "--folder", "cifar", "--script", "train.sh"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_run_passes_args_and_env() {
    let temp = upload("mnist", "echo \"arg=$1 lr=$LR\"\n");

    kiln(&temp)
        .args(["run", "--folder", "mnist", "--script", "train.sh", "--arg", "--fast", "--env", "LR=0.01"])
        .assert()
        .success()
        .stdout(predicate::str::contains("arg=--fast lr=0.01"));
}

#[test]
fn test_models_empty_registry() {
    let temp = upload("mnist", SCRIPT);

    kiln(&temp)
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("Trained Models (0)"));
}

#[test]
fn test_analyze_saved_progress() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("progress.json");
    fs::write(
        &path,
        r#"{
  "job_id": "mnist_1700000000_abcd1234",
  "owner_id": 1,
  "status": "completed",
  "current_epoch": 3,
  "total_epochs": 3,
  "start_time": "2024-01-01T00:00:00Z",
  "end_time": "2024-01-01T00:00:30Z",
  "logs": [],
  "metrics": [
    {"epoch": 1, "total_epochs": 3, "train_loss": 1.0, "val_loss": 1.1, "val_accuracy": 0.70},
    {"epoch": 2, "total_epochs": 3, "train_loss": 0.5, "val_loss": 0.55, "val_accuracy": 0.85},
    {"epoch": 3, "total_epochs": 3, "train_loss": 0.3, "val_loss": 0.33, "val_accuracy": 0.93}
  ],
  "final_metrics": null,
  "error_message": null,
  "model_path": "mnist/final.pth"
}"#,
    )
    .unwrap();

    kiln(&temp)
        .args(["analyze", "--progress"])
        .arg(&path)
        .arg("--json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"is_converging\": true"))
        .stdout(predicate::str::contains("\"performance_level\""));
}

#[test]
fn test_analyze_missing_file() {
    let temp = TempDir::new().unwrap();

    kiln(&temp)
        .args(["analyze", "--progress", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}
