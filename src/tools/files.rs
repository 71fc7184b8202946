use super::{resolve_in_root, ToolOutcome, READ_MAX_LINES};
use std::fs;
use std::path::Path;

pub fn read(
    root: &Path,
    file_path: &str,
    offset: Option<usize>,
    limit: Option<usize>,
) -> ToolOutcome {
    let resolved = match resolve_in_root(root, file_path) {
        Ok(path) => path,
        Err(outcome) => return outcome,
    };

    let raw = match fs::read(&resolved) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return ToolOutcome::Error(format!("File not found: {file_path}"))
        }
        Err(err) => return ToolOutcome::Error(err.to_string()),
    };

    let lines: Vec<&str> = raw.lines().collect();
    let start = offset.map(|o| o.saturating_sub(1)).unwrap_or(0);
    let count = limit.unwrap_or(READ_MAX_LINES).min(READ_MAX_LINES);
    let selected: Vec<String> = lines
        .iter()
        .enumerate()
        .skip(start)
        .take(count)
        .map(|(index, line)| format!("{}→{line}", index + 1))
        .collect();

    if selected.is_empty() {
        return ToolOutcome::Ok("[Empty file]".to_string());
    }
    ToolOutcome::Ok(selected.join("\n"))
}

pub fn write(root: &Path, file_path: &str, content: &str) -> ToolOutcome {
    let resolved = match resolve_in_root(root, file_path) {
        Ok(path) => path,
        Err(outcome) => return outcome,
    };

    if let Some(parent) = resolved.parent() {
        if let Err(err) = fs::create_dir_all(parent) {
            return ToolOutcome::Error(err.to_string());
        }
    }
    if let Err(err) = fs::write(&resolved, content) {
        return ToolOutcome::Error(err.to_string());
    }
    ToolOutcome::Ok(format!(
        "[OK] Written {} bytes to {file_path}",
        content.len()
    ))
}
