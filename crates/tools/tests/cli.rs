use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::TempDir;

/// Kings on a1 (White) and b1 (Black), Black to move, rule50 3, score -25, result 2.
const KINGS_ONLY: [u8; 18] = [
    0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // occupancy
    0x07, // turn + rule50
    0x98, // White king, Black king
    0xE7, 0xFF, 0xFF, 0xFF, // score
    0x02, 0x00, 0x00, 0x00, // result
];

/// Adds a white knight on c1 to `KINGS_ONLY`.
const WITH_KNIGHT: [u8; 19] = [
    0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // occupancy
    0x00, // turn + rule50
    0x98, 0x00, // White king, Black king | White knight, padding
    0x0A, 0x00, 0x00, 0x00, // score
    0x01, 0x00, 0x00, 0x00, // result
];

fn bin_path(name: &str) -> PathBuf {
    PathBuf::from(std::env::var(format!("CARGO_BIN_EXE_{name}")).expect("binary built by cargo"))
}

fn write_dataset(dir: &TempDir, name: &str, records: &[&[u8]]) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = File::create(&path).expect("create dataset");
    for record in records {
        f.write_all(record).expect("write dataset");
    }
    path
}

fn run(name: &str, args: &[&str], dataset: &Path) -> std::process::Output {
    Command::new(bin_path(name))
        .args(args)
        .arg(dataset)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run binary")
}

#[test]
fn test_dump_records_json_lines() {
    let dir = TempDir::new().unwrap();
    let path = write_dataset(&dir, "dump.bin", &[&KINGS_ONLY, &WITH_KNIGHT]);

    let out = run("dump_records", &[], &path);
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<serde_json::Value> =
        stdout.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(lines.len(), 2);

    assert_eq!(lines[0]["turn"], "Black");
    assert_eq!(lines[0]["rules50"], 3);
    assert_eq!(lines[0]["score"], -25);
    assert_eq!(lines[0]["result"], 2);
    assert_eq!(lines[0]["kings"], serde_json::json!([0, 1]));
    assert_eq!(lines[0]["white_features"], serde_json::json!([]));

    // knight on 2: 2 + (2 + 0) from the white king, 2 + (2 + 1) from the black king
    assert_eq!(lines[1]["index"], 1);
    assert_eq!(lines[1]["white_features"], serde_json::json!([4]));
    assert_eq!(lines[1]["black_features"], serde_json::json!([5]));
}

#[test]
fn test_dump_records_skip_and_limit() {
    let dir = TempDir::new().unwrap();
    let path = write_dataset(&dir, "dump.bin", &[&KINGS_ONLY, &WITH_KNIGHT, &KINGS_ONLY]);

    let out = run("dump_records", &["--skip", "1", "--limit", "1"], &path);
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    let line: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(line["index"], 1);
}

#[test]
fn test_scan_dataset_json_summary() {
    let dir = TempDir::new().unwrap();
    let records: Vec<&[u8]> = (0..7).map(|_| &KINGS_ONLY[..]).collect();
    let path = write_dataset(&dir, "scan.bin", &records);

    let out = run(
        "scan_dataset",
        &["--batch-size", "3", "--epochs", "2", "--poll-interval-ms", "10", "--json", "--dataset"],
        &path,
    );
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8(out.stdout).unwrap();
    let reports: Vec<serde_json::Value> =
        stdout.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
    assert_eq!(reports.len(), 2);
    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report["epoch"], i as u64 + 1);
        assert_eq!(report["batches_consumed"], 2);
        assert_eq!(report["positions_read"], 7);
        assert_eq!(report["positions_batched"], 6);
        assert_eq!(report["positions_dropped"], 1);
    }
}

#[test]
fn test_scan_dataset_fails_on_malformed_record() {
    let dir = TempDir::new().unwrap();
    let path = write_dataset(&dir, "bad.bin", &[&KINGS_ONLY, &KINGS_ONLY[..10]]);

    let out = run("scan_dataset", &["--batch-size", "1", "--dataset"], &path);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("malformed record #1"), "stderr: {stderr}");
}
