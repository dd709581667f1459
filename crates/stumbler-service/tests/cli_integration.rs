//! CLI Integration Tests
//!
//! These tests drive the `stumbler-service` binary end to end against a
//! scratch directory.
//!
//! ```
//! cargo test --package stumbler-service --test cli_integration
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

use stumbler_store::decode_batch;
use stumbler_types::BatchName;

const BINARY: &str = env!("CARGO_BIN_EXE_stumbler-service");

/// Write a config file rooted in `dir` and return its path.
fn write_config(dir: &Path) -> std::path::PathBuf {
    let config = format!(
        "[storage]\nbase_dir = {:?}\nmax_reports_in_memory = 3\n\n[upload]\noutbox = {:?}\n",
        dir.join("data").display().to_string(),
        dir.join("outbox").display().to_string(),
    );
    let path = dir.join("service.toml");
    fs::write(&path, config).unwrap();
    path
}

fn run_service(config: &Path, args: &[&str], stdin: Option<&str>) -> Output {
    let mut child = Command::new(BINARY)
        .arg("--config")
        .arg(config)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to run stumbler-service binary");

    {
        let mut pipe = child.stdin.take().unwrap();
        if let Some(input) = stdin {
            pipe.write_all(input.as_bytes()).unwrap();
        }
    }

    child.wait_with_output().unwrap()
}

fn batch_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help() {
    let output = Command::new(BINARY).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["run", "status", "drain", "purge"] {
        assert!(stdout.contains(command), "help should list {}", command);
    }
}

#[test]
fn test_version() {
    let output = Command::new(BINARY).arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("stumbler-service"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let config = temp.path().join("bad.toml");
    fs::write(&config, "[retention]\nsweep_interval_secs = 1\n").unwrap();

    let output = run_service(&config, &["status"], None);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("retention.sweep_interval_secs"));
}

// =============================================================================
// End to end
// =============================================================================

#[test]
fn test_run_status_drain_cycle() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_config(temp.path());

    let input = [
        r#"{"report": {"timestamp": 1}, "wifis": 2, "cells": 1}"#,
        r#"{"report": "two", "wifis": 3}"#,
        "garbage",
        r#"{"report": "three", "cells": 4}"#,
        r#"{"report": "four", "wifis": 1, "cells": 1}"#,
    ]
    .join("\n");

    let output = run_service(&config, &["run"], Some(&input));
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    // Threshold flush of 3, then shutdown persists the remaining one
    let reports_dir = temp.path().join("data").join("reports");
    let files = batch_files(&reports_dir);
    assert_eq!(files.len(), 2);
    let total: u32 = files
        .iter()
        .map(|f| f.parse::<BatchName>().unwrap().reports)
        .sum();
    assert_eq!(total, 4);

    let output = run_service(&config, &["status", "--json"], None);
    assert!(output.status.success());
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["queued"]["reports"], 4);
    assert_eq!(status["queued"]["wifis"], 6);
    assert_eq!(status["queued"]["cells"], 6);
    assert_eq!(status["files"], 2);
    assert_eq!(status["expired"], false);

    let output = run_service(&config, &["drain"], None);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Drained 2 batch(es)"));
    assert!(batch_files(&reports_dir).is_empty());

    let outbox = temp.path().join("outbox");
    let mut texts: Vec<String> = batch_files(&outbox)
        .iter()
        .map(|f| decode_batch(&fs::read(outbox.join(f)).unwrap()).unwrap())
        .collect();
    texts.sort();
    assert_eq!(texts, vec!["four\n", "{\"timestamp\":1}\ntwo\nthree\n"]);

    let stats = fs::read_to_string(temp.path().join("data").join("upload_stats.ini")).unwrap();
    assert!(stats.contains("observationsSent=4"));
    assert!(stats.contains("wifisSent=6"));
}

#[test]
fn test_purge_force_and_human_status() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_config(temp.path());

    let input = (0..3)
        .map(|i| format!("{{\"report\": \"r{}\"}}", i))
        .collect::<Vec<_>>()
        .join("\n");
    let output = run_service(&config, &["run"], Some(&input));
    assert!(output.status.success());

    let output = run_service(&config, &["purge"], None);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("nothing purged"));

    let output = run_service(&config, &["purge", "--force"], None);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Deleted 1 batch file(s)"));

    let output = run_service(&config, &["status"], None);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Batch files:  0"));
    assert!(stdout.contains("Last upload:  never"));
}

#[test]
fn test_base_dir_flag_overrides_config() {
    let temp = tempfile::tempdir().unwrap();
    let config = write_config(temp.path());
    let other = temp.path().join("elsewhere");

    let output = run_service(
        &config,
        &["--base-dir", other.to_str().unwrap(), "run"],
        Some(r#"{"report": "x"}"#),
    );
    assert!(output.status.success());

    assert_eq!(batch_files(&other.join("reports")).len(), 1);
    assert!(batch_files(&temp.path().join("data").join("reports")).is_empty());
}
