use serde_json::Value;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub mod files;
pub mod schema;
pub mod search;
pub mod shell;

pub use schema::tool_definitions;

pub const SHELL_OUTPUT_MAX_CHARS: usize = 50_000;
pub const READ_MAX_LINES: usize = 2000;
pub const GREP_MAX_RESULTS: usize = 500;

/// Outcome of one tool call. Failures are data: they render into the result
/// text handed back to the completion service, never into errors crossing the
/// dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Ok(String),
    Blocked(String),
    Timeout(Duration),
    Error(String),
}

impl ToolOutcome {
    pub fn render(self) -> String {
        match self {
            ToolOutcome::Ok(text) => text,
            ToolOutcome::Blocked(reason) => format!("[BLOCKED] {reason}"),
            ToolOutcome::Timeout(timeout) => {
                format!("[TIMEOUT] Command exceeded {}s limit", timeout.as_secs_f64())
            }
            ToolOutcome::Error(reason) => format!("[ERROR] {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxContext {
    pub root: PathBuf,
    pub shell_timeout: Duration,
}

impl SandboxContext {
    pub fn new(root: &Path, shell_timeout: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            shell_timeout,
        }
    }
}

/// Dispatch one tool invocation. Every tool is a pure function of
/// (sandbox root, input), so concurrent tasks can call this freely.
pub fn dispatch(ctx: &SandboxContext, name: &str, input: &Value) -> String {
    let outcome = match name {
        "bash" => shell::run(ctx, str_arg(input, "command")),
        "read" => files::read(
            &ctx.root,
            str_arg(input, "file_path"),
            usize_arg(input, "offset"),
            usize_arg(input, "limit"),
        ),
        "write" => files::write(
            &ctx.root,
            str_arg(input, "file_path"),
            str_arg(input, "content"),
        ),
        "glob" => search::glob_files(&ctx.root, str_arg(input, "pattern"), opt_str_arg(input, "path")),
        "grep" => search::grep(
            &ctx.root,
            str_arg(input, "pattern"),
            opt_str_arg(input, "path").unwrap_or("."),
            opt_str_arg(input, "glob"),
            bool_arg(input, "case_insensitive"),
        ),
        other => ToolOutcome::Error(format!("Unknown tool: {other}")),
    };
    outcome.render()
}

fn str_arg<'a>(input: &'a Value, key: &str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or("")
}

fn opt_str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

fn usize_arg(input: &Value, key: &str) -> Option<usize> {
    input
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
}

fn bool_arg(input: &Value, key: &str) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Resolve a tool-supplied path against the sandbox root, rejecting anything
/// that lexically escapes it. The path does not have to exist yet.
pub(crate) fn resolve_in_root(root: &Path, raw: &str) -> Result<PathBuf, ToolOutcome> {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut normalized = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => normalized.push(component.as_os_str()),
            Component::Normal(v) => normalized.push(v),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(ToolOutcome::Error("Path traversal not allowed".to_string()));
                }
            }
        }
    }

    if !normalized.starts_with(root) {
        return Err(ToolOutcome::Error("Path traversal not allowed".to_string()));
    }
    Ok(normalized)
}
