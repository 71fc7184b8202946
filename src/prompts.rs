use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("command file not found: {0}")]
    CommandFileMissing(String),
    #[error("failed to read command file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

const ARGUMENTS_PLACEHOLDER: &str = "$ARGUMENTS";

const BASE_SYSTEM_PROMPT: &str = "You are the website analysis orchestration agent running inside a chat bot.

Working directory: {working_dir}

IMPORTANT: You are running in a chat bot environment with the following constraints:

1. **File paths**: All file paths must be relative to the working directory above. Use forward slashes.

2. **Google Drive**: Do NOT attempt gdrive uploads. The `gdrive` CLI is not available in this environment.
   - Skip all \"Upload to Google Drive\" or \"gdrive upload\" steps silently.
   - The review files will be sent to the user as chat file attachments instead.

3. **Chat output format**:
   - Output a SUMMARY suitable for a chat message (max 3800 characters):
     - Overall score and category scores
     - Top 3-5 action items in priority order
     - Local file paths where full reviews were written
   - Do NOT output the full review text inline — it will be sent as a file attachment.
   - Full markdown review files will be automatically uploaded as documents.

4. **Clarifying questions**:
   - If you need to ask the user a clarifying question (e.g., \"analyze section root or all sub-pages?\"),
     output your question starting with the prefix: ASK_USER: <your question>
   - Then stop executing. The bot will relay the question and resume with the user's reply.

5. **Tool use**: You have access to bash, read, write, glob, and grep tools. Use them freely to:
   - Run existing scripts (fetch_page.py, crawl_site.py, etc.)
   - Read agent files and command files for context
   - Write review output files to reviews/ or social-reviews/ directories
   - Search and list files as needed

---

COMMAND INSTRUCTIONS
====================

{command_instructions}";

fn command_file(command: &str) -> Option<&'static str> {
    match command {
        "review-page" => Some(".claude/commands/review-page.md"),
        "brief" => Some(".claude/commands/brief.md"),
        "social-review" => Some(".claude/commands/social-review.md"),
        _ => None,
    }
}

/// Resolve a command plus its free-text argument into the system prompt for
/// one task. Fails when the command is unknown or its instruction file is
/// missing; the orchestrator surfaces that and stops.
pub fn build_system_prompt(
    project_root: &Path,
    command: &str,
    arguments: &str,
) -> Result<String, PromptError> {
    let relative = command_file(command)
        .ok_or_else(|| PromptError::UnknownCommand(command.to_string()))?;
    let path = project_root.join(relative);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(PromptError::CommandFileMissing(relative.to_string()))
        }
        Err(source) => {
            return Err(PromptError::Read {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let instructions = if raw.contains(ARGUMENTS_PLACEHOLDER) {
        raw.replace(ARGUMENTS_PLACEHOLDER, arguments)
    } else {
        format!("{raw}\n\nUser input: {arguments}")
    };

    Ok(BASE_SYSTEM_PROMPT
        .replace("{working_dir}", &project_root.display().to_string())
        .replace("{command_instructions}", &instructions))
}
