use crate::telegram::ChatGateway;
use std::fs;
use std::path::{Path, PathBuf};

pub const SUMMARY_TEXT_LIMIT: usize = 3800;

const OUTPUT_DIRS: &[&str] = &["reviews", "social-reviews"];

/// Send the final summary plus today's review files as attachments. Every
/// send is best-effort; a failed attachment becomes a warning message.
pub fn deliver_result(gateway: &dyn ChatGateway, chat_id: i64, project_root: &Path, summary: &str) {
    let _ = gateway.send_message(chat_id, &truncate_summary(summary));

    let files = todays_review_files(project_root);
    if files.is_empty() {
        let _ = gateway.send_message(
            chat_id,
            "Note: full review files will be available in the output folder.",
        );
        return;
    }

    for path in files {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match fs::read(&path) {
            Ok(bytes) => {
                if let Err(err) =
                    gateway.send_document(chat_id, &filename, &bytes, &filename)
                {
                    let _ = gateway.send_message(
                        chat_id,
                        &format!("Could not send file {filename}: {err}"),
                    );
                }
            }
            Err(err) => {
                let _ = gateway
                    .send_message(chat_id, &format!("Could not send file {filename}: {err}"));
            }
        }
    }
}

pub fn truncate_summary(summary: &str) -> String {
    if summary.chars().count() <= SUMMARY_TEXT_LIMIT {
        return summary.to_string();
    }
    let truncated: String = summary.chars().take(SUMMARY_TEXT_LIMIT).collect();
    format!("{truncated}\n\n...[truncated]")
}

/// Markdown files under the review output directories whose names carry
/// today's date stamp, sorted.
pub fn todays_review_files(project_root: &Path) -> Vec<PathBuf> {
    let today = chrono::Local::now().date_naive().to_string();
    let mut files = Vec::new();
    for dir in OUTPUT_DIRS {
        let root = project_root.join(dir);
        if !root.is_dir() {
            continue;
        }
        let pattern = root.join("**").join(format!("*{today}*.md"));
        if let Ok(paths) = glob::glob(&pattern.display().to_string()) {
            files.extend(paths.flatten().filter(|p| p.is_file()));
        }
    }
    files.sort();
    files
}
