use std::fs;

use lib_common::loggers::setup_logging;
use tempfile::tempdir;

#[test]
fn test_setup_logging_writes_json_files() {
    // Create a temporary directory for log files
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let log_dir = temp_dir.path().join("logs");

    let guard = setup_logging(&log_dir, "test_app", "debug").expect("logging setup failed");
    tracing::info!(rows = 3, "This is an info message");
    tracing::warn!("This is a warning message");

    // Dropping the guard flushes the non-blocking writer
    drop(guard);

    let log_files: Vec<_> = fs::read_dir(&log_dir)
        .expect("Failed to read log directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("test_app"))
        })
        .collect();
    assert_eq!(log_files.len(), 1, "expected one daily log file");

    let content = fs::read_to_string(&log_files[0]).expect("Failed to read log file");
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|line| serde_json::from_str(line).expect("log line is not JSON"))
        .collect();
    assert!(lines
        .iter()
        .any(|line| line["fields"]["message"] == "This is an info message"));
    assert!(lines.iter().any(|line| line["level"] == "WARN"));

    // A second global subscriber is refused instead of panicking
    assert!(setup_logging(&log_dir, "test_app", "info").is_err());
}
