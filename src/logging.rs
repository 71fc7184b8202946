use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RUNTIME_LOG_FILE_NAME: &str = "runtime.log";

pub fn runtime_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RUNTIME_LOG_FILE_NAME)
}

/// Append one JSON line to the runtime log. Best-effort: logging must never
/// take down a task.
pub fn append_runtime_log(state_dir: &Path, level: &str, event: &str, message: &str) {
    let payload = serde_json::json!({
        "timestamp": chrono::Utc::now().timestamp(),
        "level": level,
        "event": event,
        "message": message,
    });

    let Ok(line) = serde_json::to_string(&payload) else {
        return;
    };

    let path = runtime_log_path(state_dir);
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return;
        }
    }
    let Ok(mut file) = fs::OpenOptions::new().create(true).append(true).open(path) else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn appends_json_lines() {
        let dir = tempdir().expect("tempdir");
        let state_dir = dir.path().join("bot");
        append_runtime_log(&state_dir, "info", "task.started", "review-page");
        append_runtime_log(&state_dir, "error", "task.failed", "boom");

        let raw = fs::read_to_string(runtime_log_path(&state_dir)).expect("read log");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("parse line");
        assert_eq!(first["event"], "task.started");
        assert_eq!(first["level"], "info");
    }
}
