use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

fn write_split(root: &Path, split: &str) {
    for (class, count) in [("regulus_regulus", 4), ("sitta_europaea", 5)] {
        let dir = root.join(split).join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            std::fs::write(dir.join(format!("{i}.jpg")), b"\xff\xd8").unwrap();
        }
    }
}

#[test]
fn test_fresh_run_trains_and_checkpoints() {
    let temp = TempDir::new().unwrap();
    write_split(&temp.path().join("dataset"), "train");

    Command::cargo_bin("finch")
        .unwrap()
        .current_dir(temp.path())
        .args([
            "--split",
            "train",
            "--world-size",
            "2",
            "--epochs",
            "2,3",
            "--port",
            "29611",
            "--log-level",
            "warn",
        ])
        .assert()
        .success();

    assert!(temp.path().join("s_train").join("checkpoint_epoch0.pth").exists());
    assert!(temp.path().join("s_train").join("checkpoint_epoch5.pth").exists());
}

#[test]
fn test_resume_past_schedule_exits_with_message() {
    let temp = TempDir::new().unwrap();
    write_split(&temp.path().join("dataset"), "train");

    Command::cargo_bin("finch")
        .unwrap()
        .current_dir(temp.path())
        .args([
            "--split",
            "train",
            "--world-size",
            "2",
            "--epochs",
            "2,3",
            "--resume",
            "5",
            "--port",
            "29612",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("past the end of the schedule"));
}

#[test]
fn test_invalid_resume_argument_is_rejected() {
    Command::cargo_bin("finch")
        .unwrap()
        .args(["--split", "train", "--resume", "latest"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid resume epoch"));
}
