use super::{SandboxContext, ToolOutcome, SHELL_OUTPUT_MAX_CHARS};
use regex::Regex;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Commands matching any of these are refused before execution: destructive
/// deletes, privilege escalation, permission changes, disk-device writes and
/// remote delete verbs.
const BLOCKED_PATTERNS: &[&str] = &[
    r"\brm\s+-rf\b",
    r"\bsudo\b",
    r"\bchmod\b",
    r"\bgdrive\b",
    r"\bcurl\s+.*-X\s+DELETE",
    r">\s*/dev/sd",
];

pub fn is_blocked(command: &str) -> bool {
    BLOCKED_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .any(|regex| regex.is_match(command))
}

pub fn run(ctx: &SandboxContext, command: &str) -> ToolOutcome {
    if is_blocked(command) {
        return ToolOutcome::Blocked("Command matches blocked pattern".to_string());
    }

    let mut child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.root)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(err) => return ToolOutcome::Error(err.to_string()),
    };

    let Some(stdout) = child.stdout.take() else {
        return ToolOutcome::Error("missing stdout pipe".to_string());
    };
    let Some(stderr) = child.stderr.take() else {
        return ToolOutcome::Error("missing stderr pipe".to_string());
    };

    let stdout_reader = thread::spawn(move || read_to_string_lossy(stdout));
    let stderr_reader = thread::spawn(move || read_to_string_lossy(stderr));

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_status)) => break,
            Ok(None) => {
                if start.elapsed() > ctx.shell_timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    let _ = stdout_reader.join();
                    let _ = stderr_reader.join();
                    return ToolOutcome::Timeout(ctx.shell_timeout);
                }
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => return ToolOutcome::Error(err.to_string()),
        }
    }

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    let mut combined = stdout;
    if !stderr.is_empty() {
        combined.push_str("\n[STDERR]\n");
        combined.push_str(&stderr);
    }
    if combined.chars().count() > SHELL_OUTPUT_MAX_CHARS {
        combined = combined.chars().take(SHELL_OUTPUT_MAX_CHARS).collect();
        combined.push_str("\n[TRUNCATED]");
    }
    if combined.is_empty() {
        return ToolOutcome::Ok("[No output]".to_string());
    }
    ToolOutcome::Ok(combined)
}

fn read_to_string_lossy<R: Read>(mut source: R) -> String {
    let mut buf = Vec::new();
    let _ = source.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn ctx(root: &Path) -> SandboxContext {
        SandboxContext::new(root, Duration::from_secs(5))
    }

    #[test]
    fn blocked_command_is_never_executed() {
        let dir = tempdir().expect("tempdir");
        let marker = dir.path().join("marker");
        let command = format!("touch {} && sudo id", marker.display());

        let outcome = run(&ctx(dir.path()), &command);
        assert_eq!(
            outcome,
            ToolOutcome::Blocked("Command matches blocked pattern".to_string())
        );
        assert!(!marker.exists(), "blocked command must have no side effects");
    }

    #[test]
    fn denylist_covers_destructive_patterns() {
        for command in [
            "rm -rf /",
            "sudo reboot",
            "chmod 777 secrets",
            "gdrive upload report.md",
            "curl https://api.example.com/v1/things -X DELETE",
            "echo oops > /dev/sda",
        ] {
            assert!(is_blocked(command), "expected `{command}` to be blocked");
        }
        assert!(!is_blocked("ls -la"));
        assert!(!is_blocked("rm notes.txt"));
    }

    #[test]
    fn captures_stdout_and_stderr_with_separator() {
        let dir = tempdir().expect("tempdir");
        let outcome = run(&ctx(dir.path()), "echo out; echo err 1>&2");
        let text = outcome.render();
        assert!(text.starts_with("out\n"));
        assert!(text.contains("[STDERR]"));
        assert!(text.contains("err"));
    }

    #[test]
    fn empty_output_is_reported() {
        let dir = tempdir().expect("tempdir");
        let outcome = run(&ctx(dir.path()), "true");
        assert_eq!(outcome, ToolOutcome::Ok("[No output]".to_string()));
    }

    #[test]
    fn long_output_is_truncated_with_marker() {
        let dir = tempdir().expect("tempdir");
        let outcome = run(
            &ctx(dir.path()),
            "head -c 60000 /dev/zero | tr '\\0' 'x'",
        );
        let text = outcome.render();
        assert!(text.ends_with("\n[TRUNCATED]"));
        assert!(text.chars().count() <= SHELL_OUTPUT_MAX_CHARS + "\n[TRUNCATED]".len());
    }

    #[test]
    fn slow_command_times_out() {
        let dir = tempdir().expect("tempdir");
        let ctx = SandboxContext::new(dir.path(), Duration::from_millis(200));
        let outcome = run(&ctx, "sleep 5");
        assert_eq!(outcome, ToolOutcome::Timeout(Duration::from_millis(200)));
        assert_eq!(outcome.render(), "[TIMEOUT] Command exceeded 0.2s limit");
    }

    #[test]
    fn runs_in_sandbox_root() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("here.txt"), "x").expect("write file");
        let outcome = run(&ctx(dir.path()), "ls");
        assert!(outcome.render().contains("here.txt"));
    }
}
