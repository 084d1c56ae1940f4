use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use splat_volume::core::writers::write_ply;
use splat_volume::{PointSet, Splat};
use tempfile::TempDir;

fn box_scan(dz: f32) -> PointSet {
    (0..8)
        .map(|i| {
            Splat::new(
                [
                    (i & 1) as f32 * 2.0,
                    ((i >> 1) & 1) as f32 * 3.0,
                    ((i >> 2) & 1) as f32 * dz,
                ],
                0.9,
            )
        })
        .collect()
}

fn scan_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    write_ply(&dir.path().join("day1.ply"), &box_scan(4.0)).unwrap();
    write_ply(&dir.path().join("day7.ply"), &box_scan(6.0)).unwrap();
    let flat: PointSet = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]]
        .iter()
        .map(|&p| Splat::new(p, 1.0))
        .collect();
    write_ply(&dir.path().join("flat.ply"), &flat).unwrap();
    dir
}

fn cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("splat-volume").unwrap();
    cmd.arg("--scan-dir").arg(dir.path());
    cmd
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help_lists_commands() {
    Command::cargo_bin("splat-volume")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("analyze"))
        .stdout(predicate::str::contains("growth"));
}

#[test]
fn test_analyze_json() {
    let dir = scan_dir();
    let output = cmd(&dir)
        .args(["--json", "analyze", "day1.ply"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["point_count"], 8);
    assert!((json["volume_hull_units"].as_f64().unwrap() - 24.0).abs() < 1e-6);
    assert!((json["volume_bbox_units"].as_f64().unwrap() - 24.0).abs() < 1e-6);
}

#[test]
fn test_analyze_summary() {
    let dir = scan_dir();
    cmd(&dir)
        .args(["analyze", "day1.ply", "--threshold", "0.5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Volume Analysis Complete"))
        .stdout(predicate::str::contains("24.000000"));
}

#[test]
fn test_growth_json() {
    let dir = scan_dir();
    let output = cmd(&dir)
        .args(["--json", "growth", "day1.ply", "day7.ply"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert!((json["growth_percentage"].as_f64().unwrap() - 50.0).abs() < 1e-6);
    assert_eq!(json["file1"], "day1.ply");
}

#[test]
fn test_missing_scan_exit_code() {
    let dir = scan_dir();
    cmd(&dir)
        .args(["--json", "analyze", "nope.ply"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("\"not_found\""));
}

#[test]
fn test_degenerate_baseline_exit_code() {
    let dir = scan_dir();
    cmd(&dir)
        .args(["--json", "growth", "flat.ply", "day1.ply"])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("degenerate_baseline"));
}

#[test]
fn test_unparseable_scan_exit_code() {
    let dir = scan_dir();
    fs::write(dir.path().join("junk.ply"), b"garbage bytes").unwrap();
    cmd(&dir)
        .args(["--json", "analyze", "junk.ply"])
        .assert()
        .code(3)
        .stdout(predicate::str::contains("parse_error"));
}

#[test]
fn test_request_from_stdin() {
    let dir = scan_dir();
    let output = cmd(&dir)
        .args(["request", "growth"])
        .write_stdin(r#"{"file1": "day1.ply", "file2": "day7.ply", "threshold": 0.5}"#)
        .output()
        .unwrap();

    assert!(output.status.success());
    let json = stdout_json(&output);
    assert!((json["volume2"].as_f64().unwrap() - 36.0).abs() < 1e-6);
}

#[test]
fn test_request_rejects_bad_threshold() {
    let dir = scan_dir();
    cmd(&dir)
        .args(["request", "scan"])
        .write_stdin(r#"{"file": "day1.ply", "threshold": 2.0}"#)
        .assert()
        .code(6)
        .stdout(predicate::str::contains("invalid_request"));
}

#[test]
fn test_list_json() {
    let dir = scan_dir();
    let output = cmd(&dir).args(["--json", "list"]).output().unwrap();

    assert!(output.status.success());
    let names: Vec<String> = stdout_json(&output)
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"day7.ply".to_string()));
}

#[test]
fn test_batch_writes_csv() {
    let dir = scan_dir();
    let out = dir.path().join("reports").join("batch.csv");
    cmd(&dir)
        .args(["--json", "batch", "day1.ply", "day7.ply", "--csv"])
        .arg(&out)
        .assert()
        .success();

    let content = fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("file,volume_hull_units"));
    assert!(lines[1].starts_with("day1.ply,"));
}

#[test]
fn test_export_writes_ply() {
    let dir = scan_dir();
    let out = dir.path().join("filtered.ply");
    cmd(&dir)
        .args(["export", "day1.ply"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Export Complete"));

    let loaded = splat_volume::core::loaders::load_scan(&out).unwrap();
    assert_eq!(loaded.len(), 8);
}

#[test]
fn test_export_writes_splat() {
    let dir = scan_dir();
    let out = dir.path().join("filtered.splat");
    cmd(&dir)
        .args(["export", "day1.ply"])
        .arg(&out)
        .args(["--format", "splat"])
        .assert()
        .success();

    assert_eq!(fs::metadata(&out).unwrap().len(), 8 * 32);
    let loaded = splat_volume::core::loaders::load_scan(&out).unwrap();
    assert_eq!(loaded.len(), 8);
    assert_eq!(loaded.position(7), [2.0, 3.0, 4.0]);
}

#[test]
fn test_invalid_config_exit_code() {
    let dir = scan_dir();
    let config = dir.path().join("config.yaml");
    fs::write(&config, "filter:\n  opacity_threshold: 1.5\n").unwrap();

    cmd(&dir)
        .arg("--config")
        .arg(&config)
        .args(["--json", "analyze", "day1.ply"])
        .assert()
        .code(6)
        .stdout(predicate::str::contains("invalid_request"));
}
