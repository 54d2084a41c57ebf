use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn trk_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("trk");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Export layout
    let export_dir = root.join("export");
    fs::create_dir_all(export_dir.join("Fitbit")).unwrap();
    fs::write(
        export_dir.join("Fitbit").join("heart_rate-2023-06-01.json"),
        r#"[
            {"dateTime": "2023-06-01T10:00:00", "value": {"bpm": 60, "confidence": 2}},
            {"dateTime": "2023-06-01T10:00:05", "value": {"bpm": 120, "confidence": 2}},
            {"time": "10:00:10", "value": {"bpm": 0, "confidence": 0}}
        ]"#,
    )
    .unwrap();
    fs::write(
        export_dir.join("Fitbit").join("steps-2023-06-01.json"),
        r#"{"value": [{"dateTime": "2023-06-01T10:00:00", "value": 12}]}"#,
    )
    .unwrap();
    fs::write(
        export_dir.join("daily_summary.csv"),
        "date,steps,calories\n2023-06-01,8000,2100\n",
    )
    .unwrap();
    fs::write(export_dir.join("README.txt"), "export notes").unwrap();

    let config_content = format!(
        r#"[source]
root = "{}/export"

[cache]
dir = "{}/cache"
"#,
        root.display(),
        root.display()
    );

    let config_path = config_dir.join("trk.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_trk(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = trk_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run trk binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_sync_ingests_export() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trk(&config_path, &["sync", "--progress", "off"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("heart_rate: 3 records"), "got: {}", stdout);
    assert!(stdout.contains("steps:      1 records"), "got: {}", stdout);
    assert!(stdout.contains("daily:      1 records"), "got: {}", stdout);
    assert!(stdout.contains("ibi:        2 points"), "got: {}", stdout);
    assert!(stdout.contains("4 visited, 0 skipped, 3 ingested, 1 unmatched, 0 failed"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_sync_incremental() {
    let (tmp, config_path) = setup_test_env();

    run_trk(&config_path, &["sync", "--progress", "off"]);

    // Nothing changed: every source is skipped, datasets are unchanged
    let (stdout, _, success) = run_trk(&config_path, &["sync", "--progress", "off"]);
    assert!(success);
    assert!(
        stdout.contains("4 visited, 4 skipped, 0 ingested"),
        "Expected all sources skipped, got: {}",
        stdout
    );
    assert!(stdout.contains("heart_rate: 3 records"));

    // A new source is the only one parsed
    fs::write(
        tmp.path().join("export").join("heart_rate-2023-06-02.json"),
        r#"[{"dateTime": "2023-06-02T08:00:00", "value": {"bpm": 55}}]"#,
    )
    .unwrap();
    let (stdout, _, _) = run_trk(&config_path, &["sync", "--progress", "off"]);
    assert!(
        stdout.contains("1 ingested"),
        "Expected 1 source ingested, got: {}",
        stdout
    );
    assert!(stdout.contains("heart_rate: 4 records"), "got: {}", stdout);
}

#[test]
fn test_sync_writes_cache_artifacts() {
    let (tmp, config_path) = setup_test_env();

    let (_, _, success) = run_trk(&config_path, &["sync", "--progress", "off"]);
    assert!(success);

    let cache = tmp.path().join("cache");
    let heart_rate = fs::read_to_string(cache.join("heart_rate.csv")).unwrap();
    assert!(heart_rate.starts_with("dateTime,bpm,confidence"));
    assert!(heart_rate.contains("2023-06-01T10:00:10"));
    assert!(cache.join("steps.csv").exists());
    assert!(cache.join("daily.csv").exists());
    assert!(!cache.join("sleep.csv").exists());

    let ledger: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(cache.join("processed_sources.json")).unwrap())
            .unwrap();
    assert!(ledger["Fitbit/heart_rate-2023-06-01.json"].is_i64());
    assert!(ledger["README.txt"].is_i64());
}

#[test]
fn test_sync_trace_is_json_lines() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_trk(&config_path, &["sync", "--progress", "off", "--trace"]);
    assert!(success);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(events.iter().any(|e| e["event"] == "unmatched" && e["source"] == "README.txt"));
    assert!(events
        .iter()
        .any(|e| e["event"] == "merged" && e["category"] == "heart_rate" && e["total"] == 3));
}

#[test]
fn test_sync_json_progress_on_stderr() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trk(&config_path, &["sync", "--progress", "json"]);
    assert!(success);
    assert!(!stdout.contains("\"event\""), "stdout must stay clean: {}", stdout);
    assert!(
        stderr.contains("\"event\":\"ingested\""),
        "Expected JSON progress on stderr, got: {}",
        stderr
    );
}

#[test]
fn test_sync_missing_root_still_succeeds() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("export")).unwrap();

    let (stdout, _, success) = run_trk(&config_path, &["sync", "--progress", "off"]);
    assert!(success, "A missing root is reported, not fatal");
    assert!(stdout.contains("heart_rate: 0 records"));
    assert!(stdout.contains("1 failed"));
}

#[test]
fn test_status_reports_freshness() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_trk(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("heart_rate"));
    assert!(stdout.contains("never"));

    run_trk(&config_path, &["sync", "--progress", "off"]);
    let (stdout, _, _) = run_trk(&config_path, &["status"]);
    let heart_rate = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("heart_rate"))
        .unwrap();
    assert!(heart_rate.trim_end().ends_with("yes"), "got: {}", heart_rate);
    let sleep = stdout
        .lines()
        .find(|l| l.trim_start().starts_with("sleep"))
        .unwrap();
    assert!(sleep.trim_end().ends_with("no"), "got: {}", sleep);
}

#[test]
fn test_inventory_lists_data_files() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_trk(&config_path, &["inventory"]);
    assert!(success);
    assert!(stdout.contains("Fitbit/heart_rate-2023-06-01.json"));
    assert!(stdout.contains("daily_summary.csv"));
    assert!(!stdout.contains("README.txt"));
    assert!(stdout.contains("Total: 3"));
}

#[test]
fn test_ibi_from_cache() {
    let (_tmp, config_path) = setup_test_env();

    run_trk(&config_path, &["sync", "--progress", "off"]);
    let (stdout, _, success) = run_trk(&config_path, &["ibi"]);
    assert!(success);
    assert!(stdout.contains("2023-06-01T10:00:00,1000.0"));
    assert!(stdout.contains("2023-06-01T10:00:05,500.0"));
    assert!(!stdout.contains("10:00:10"));

    let (stdout, _, _) = run_trk(&config_path, &["ibi", "--limit", "1"]);
    assert_eq!(stdout.lines().count(), 2);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_trk(&tmp.path().join("nope.toml"), &["status"]);
    assert!(!success);
    assert!(
        stderr.contains("Failed to read config file"),
        "Should report config error, got: {}",
        stderr
    );
}
