use crate::agent::{self, AgentRun, CompletionService, Message, ProgressEvent, RunProfile};
use crate::config::Settings;
use crate::delivery;
use crate::history::HistoryStore;
use crate::logging::append_runtime_log;
use crate::mailbox::ReplyMailboxes;
use crate::prompts;
use crate::telegram::{ChatGateway, CommandKind};
use crate::tools::SandboxContext;
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const ASK_USER_PREFIX: &str = "ASK_USER:";

pub const BUSY_MESSAGE: &str = "A task is already running for you. Please wait for it to finish.";
pub const CANCELLED_MESSAGE: &str = "No reply received. Task cancelled.";
pub const COMPLETE_MESSAGE: &str = "Review complete.";

const PROGRESS_WINDOW: usize = 5;
const ERROR_DETAIL_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// One queued command, as accepted by the polling loop.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub user_id: i64,
    pub chat_id: i64,
    pub command: CommandKind,
    pub arguments: String,
    /// The "Starting review..." placeholder the poller sent; progress and the
    /// final status are edits to this message.
    pub status_message_id: i64,
}

/// Everything a task thread needs, cloned per spawn so threads own their
/// handles outright.
#[derive(Clone)]
pub struct TaskContext {
    pub settings: Settings,
    pub gateway: Arc<dyn ChatGateway>,
    pub service: Arc<dyn CompletionService>,
    pub history: HistoryStore,
    pub mailboxes: Arc<ReplyMailboxes>,
}

enum TaskOutcome {
    Completed,
    Cancelled,
}

/// Run one review command end to end: claim the user's task slot, record the
/// task row, drive the agent (relaying clarifying questions through the reply
/// mailbox), persist the exchange, and deliver the result.
pub fn run_review_task(ctx: &TaskContext, task: &TaskRequest) {
    let state_dir = ctx.settings.state_dir();
    let command = task.command.command_id();

    let Some(lease) = ctx.mailboxes.try_lease(task.user_id) else {
        let _ = ctx.gateway.send_message(task.chat_id, BUSY_MESSAGE);
        return;
    };

    let task_id = match ctx
        .history
        .create_task(task.user_id, task.chat_id, command, &task.arguments)
    {
        Ok(id) => id,
        Err(err) => {
            append_runtime_log(&state_dir, "error", "task.record_failed", &err.to_string());
            let _ = ctx.gateway.edit_message(
                task.chat_id,
                task.status_message_id,
                "Error: could not record the task",
            );
            return;
        }
    };
    let _ = ctx
        .history
        .update_task_status(task_id, TaskStatus::Running, None);
    append_runtime_log(&state_dir, "info", "task.started", command);

    match execute(ctx, task) {
        Ok(TaskOutcome::Completed) => {
            let _ = ctx
                .history
                .update_task_status(task_id, TaskStatus::Completed, None);
            append_runtime_log(&state_dir, "info", "task.completed", command);
        }
        Ok(TaskOutcome::Cancelled) => {
            let _ = ctx
                .history
                .update_task_status(task_id, TaskStatus::Cancelled, None);
            append_runtime_log(&state_dir, "info", "task.cancelled", command);
        }
        Err(message) => {
            let _ = ctx.gateway.edit_message(
                task.chat_id,
                task.status_message_id,
                &format!("Error: {}", truncate_chars(&message, ERROR_DETAIL_LIMIT)),
            );
            let _ = ctx
                .history
                .update_task_status(task_id, TaskStatus::Failed, Some(&message));
            append_runtime_log(&state_dir, "error", "task.failed", &message);
        }
    }
    drop(lease);
}

fn execute(ctx: &TaskContext, task: &TaskRequest) -> Result<TaskOutcome, String> {
    let root = ctx.settings.project_root.clone();
    let command = task.command.command_id();

    let system_prompt = prompts::build_system_prompt(&root, command, &task.arguments)
        .map_err(|err| err.to_string())?;
    let conversation = ctx
        .history
        .create_or_get_conversation(task.user_id)
        .map_err(|err| err.to_string())?;
    let mut transcript = ctx
        .history
        .recent_messages(task.user_id, ctx.settings.history_limit)
        .map_err(|err| err.to_string())?;
    let command_turn = format!("/{command} {}", task.arguments).trim_end().to_string();
    transcript.push(Message::user_text(&command_turn));

    let (progress_tx, progress_rx) = mpsc::channel::<ProgressEvent>();
    let progress_thread = spawn_progress_editor(ctx, task, progress_rx);
    let _ = progress_tx.send(ProgressEvent::TaskStarted {
        command: command.to_string(),
    });

    let sandbox = SandboxContext::new(&root, ctx.settings.shell_timeout());
    let outcome = {
        let run = AgentRun {
            service: ctx.service.as_ref(),
            sandbox: &sandbox,
            profile: RunProfile::chat(ctx.settings.agent_max_turns),
            model: &ctx.settings.model,
            system_prompt: &system_prompt,
            progress: &progress_tx,
        };
        let mut final_text = agent::run_agent(&run, &mut transcript);
        loop {
            let question = final_text
                .trim()
                .strip_prefix(ASK_USER_PREFIX)
                .map(|q| q.trim().to_string());
            let Some(question) = question else {
                break (TaskOutcome::Completed, final_text);
            };
            let _ = ctx.gateway.send_message(task.chat_id, &question);
            match ctx
                .mailboxes
                .await_reply(task.user_id, ctx.settings.reply_timeout())
            {
                Some(reply) => {
                    transcript.push(Message::user_text(reply));
                    final_text = agent::run_agent(&run, &mut transcript);
                }
                None => break (TaskOutcome::Cancelled, final_text),
            }
        }
    };
    drop(progress_tx);
    let _ = progress_thread.join();

    let (outcome, final_text) = outcome;
    if let TaskOutcome::Cancelled = outcome {
        // Nothing from an abandoned run is worth replaying into later context.
        let _ = ctx.gateway.send_message(task.chat_id, CANCELLED_MESSAGE);
        return Ok(TaskOutcome::Cancelled);
    }

    // Only the command and the final answer enter the replayable history.
    // Tool round-trips and clarifying exchanges stay in-memory: replaying a
    // bounded window that slices into one would start a later transcript
    // with an orphan tool-result turn.
    for message in [
        Message::user_text(&command_turn),
        Message::assistant_text(&final_text),
    ] {
        ctx.history
            .save_message(conversation, message.role, &message.content)
            .map_err(|err| err.to_string())?;
    }

    delivery::deliver_result(ctx.gateway.as_ref(), task.chat_id, &root, &final_text);
    let _ = ctx
        .gateway
        .edit_message(task.chat_id, task.status_message_id, COMPLETE_MESSAGE);
    Ok(TaskOutcome::Completed)
}

fn spawn_progress_editor(
    ctx: &TaskContext,
    task: &TaskRequest,
    events: mpsc::Receiver<ProgressEvent>,
) -> thread::JoinHandle<()> {
    let gateway = Arc::clone(&ctx.gateway);
    let interval = Duration::from_secs(ctx.settings.progress_interval_seconds);
    let chat_id = task.chat_id;
    let message_id = task.status_message_id;
    thread::spawn(move || {
        let mut throttle = ProgressThrottle::new(interval);
        for event in events {
            if let Some(text) = throttle.push(event.render()) {
                let _ = gateway.edit_message(chat_id, message_id, &text);
            }
        }
    })
}

/// Rolling five-line activity window, rendered into the status message at
/// most once per interval.
pub struct ProgressThrottle {
    window: VecDeque<String>,
    last_edit: Instant,
    interval: Duration,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            window: VecDeque::new(),
            last_edit: Instant::now(),
            interval,
        }
    }

    /// Record one activity line. Returns the rendered status text when enough
    /// time has passed since the last edit, `None` otherwise.
    pub fn push(&mut self, line: String) -> Option<String> {
        self.push_at(line, Instant::now())
    }

    fn push_at(&mut self, line: String, now: Instant) -> Option<String> {
        self.window.push_back(line);
        while self.window.len() > PROGRESS_WINDOW {
            self.window.pop_front();
        }
        if now.duration_since(self.last_edit) < self.interval {
            return None;
        }
        self.last_edit = now;
        Some(self.render())
    }

    fn render(&self) -> String {
        let mut text = String::from("Working on your review...\n");
        for line in &self.window {
            text.push_str("\n- ");
            text.push_str(line);
        }
        text
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_match_task_rows() {
        assert_eq!(TaskStatus::Pending.as_str(), "pending");
        assert_eq!(TaskStatus::Cancelled.as_str(), "cancelled");
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn throttle_suppresses_edits_inside_the_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(30));
        assert!(throttle.push("Running: bash(ls)".to_string()).is_none());
        assert!(throttle.push("Running: read(a.md)".to_string()).is_none());
    }

    #[test]
    fn throttle_emits_after_the_interval_and_rearms() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(30));
        let later = Instant::now() + Duration::from_secs(31);

        let text = throttle
            .push_at("Starting review-page...".to_string(), later)
            .expect("interval elapsed");
        assert_eq!(text, "Working on your review...\n\n- Starting review-page...");
        // The clock was just reset, so the next push is suppressed again.
        assert!(throttle
            .push_at("Running: bash(ls)".to_string(), later)
            .is_none());
    }

    #[test]
    fn throttle_window_keeps_the_last_five_lines() {
        let mut throttle = ProgressThrottle::new(Duration::ZERO);
        let mut last = None;
        for index in 0..7 {
            last = throttle.push_at(format!("line {index}"), Instant::now());
        }
        let text = last.expect("zero interval always renders");
        assert!(!text.contains("line 0"));
        assert!(!text.contains("line 1"));
        for index in 2..7 {
            assert!(text.contains(&format!("line {index}")));
        }
    }

    #[test]
    fn error_detail_is_bounded() {
        let long = "e".repeat(500);
        assert_eq!(truncate_chars(&long, ERROR_DETAIL_LIMIT).chars().count(), 100);
        assert_eq!(truncate_chars("short", ERROR_DETAIL_LIMIT), "short");
    }
}
