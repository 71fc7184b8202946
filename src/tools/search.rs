use super::{resolve_in_root, ToolOutcome, GREP_MAX_RESULTS};
use regex::RegexBuilder;
use std::fs;
use std::path::{Path, PathBuf};

pub fn glob_files(root: &Path, pattern: &str, path: Option<&str>) -> ToolOutcome {
    let search_root = match resolve_in_root(root, path.unwrap_or(".")) {
        Ok(path) => path,
        Err(outcome) => return outcome,
    };

    let full_pattern = search_root.join(pattern).display().to_string();
    let paths = match glob::glob(&full_pattern) {
        Ok(paths) => paths,
        Err(err) => return ToolOutcome::Error(format!("Invalid glob pattern: {err}")),
    };

    let mut matches: Vec<String> = paths
        .flatten()
        .map(|entry| {
            entry
                .strip_prefix(root)
                .map(|rel| rel.display().to_string())
                .unwrap_or_else(|_| entry.display().to_string())
        })
        .collect();
    matches.sort();

    if matches.is_empty() {
        return ToolOutcome::Ok("[No matches]".to_string());
    }
    ToolOutcome::Ok(matches.join("\n"))
}

pub fn grep(
    root: &Path,
    pattern: &str,
    path: &str,
    glob_filter: Option<&str>,
    case_insensitive: bool,
) -> ToolOutcome {
    let resolved = match resolve_in_root(root, path) {
        Ok(path) => path,
        Err(outcome) => return outcome,
    };

    let regex = match RegexBuilder::new(pattern)
        .case_insensitive(case_insensitive)
        .build()
    {
        Ok(regex) => regex,
        Err(err) => return ToolOutcome::Error(format!("Invalid regex: {err}")),
    };

    let mut files = if resolved.is_file() {
        vec![resolved]
    } else if let Some(filter) = glob_filter {
        let full_pattern = resolved.join("**").join(filter).display().to_string();
        match glob::glob(&full_pattern) {
            Ok(paths) => paths.flatten().filter(|p| p.is_file()).collect(),
            Err(err) => return ToolOutcome::Error(format!("Invalid glob pattern: {err}")),
        }
    } else {
        let mut collected = Vec::new();
        walk_skipping_dot_dirs(&resolved, &mut collected);
        collected
    };
    files.sort();

    let mut results = Vec::new();
    for file in files {
        let Ok(bytes) = fs::read(&file) else {
            continue;
        };
        let text = String::from_utf8_lossy(&bytes);
        let rel = file
            .strip_prefix(root)
            .map(|r| r.display().to_string())
            .unwrap_or_else(|_| file.display().to_string());
        for (index, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                results.push(format!("{rel}:{}: {}", index + 1, line.trim_end()));
                if results.len() >= GREP_MAX_RESULTS {
                    results.push("[TRUNCATED — limit reached]".to_string());
                    return ToolOutcome::Ok(results.join("\n"));
                }
            }
        }
    }

    if results.is_empty() {
        return ToolOutcome::Ok("[No matches]".to_string());
    }
    ToolOutcome::Ok(results.join("\n"))
}

fn walk_skipping_dot_dirs(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            if !name.starts_with('.') {
                walk_skipping_dot_dirs(&path, files);
            }
        } else {
            files.push(path);
        }
    }
}
