use crate::tools::{self, SandboxContext};
use serde_json::Value;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;

pub mod api;

pub use api::{
    AgentError, AnthropicClient, CompletionService, ContentBlock, Message, MessagesRequest,
    MessagesResponse, Role,
};

pub const MAX_TURNS_MESSAGE: &str = "[Agent reached maximum turns without completing]";

const STOP_REASON_END_TURN: &str = "end_turn";
const STOP_REASON_TOOL_USE: &str = "tool_use";

/// Request shaping per invocation style: chat-driven runs get a smaller
/// output budget plus a pacing delay between requests to stay under outbound
/// rate limits; batch runs get the full budget with no delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProfile {
    pub max_turns: u32,
    pub max_output_tokens: u32,
    pub pacing: Duration,
}

impl RunProfile {
    pub fn chat(max_turns: u32) -> Self {
        Self {
            max_turns,
            max_output_tokens: 4096,
            pacing: Duration::from_secs(1),
        }
    }

    pub fn batch(max_turns: u32) -> Self {
        Self {
            max_turns,
            max_output_tokens: 8096,
            pacing: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    TaskStarted { command: String },
    ToolStarted { tool: String, summary: String },
}

impl ProgressEvent {
    pub fn render(&self) -> String {
        match self {
            ProgressEvent::TaskStarted { command } => format!("Starting {command}..."),
            ProgressEvent::ToolStarted { tool, summary } => {
                format!("Running: {tool}({summary})")
            }
        }
    }
}

/// One loop iteration, made explicit so the transitions are testable on their
/// own: Request -> Append -> Branch -> (Request | Finished).
#[derive(Debug, Clone)]
pub enum TurnState {
    Request,
    Append(MessagesResponse),
    Branch(MessagesResponse),
    Finished(String),
}

pub struct AgentRun<'a> {
    pub service: &'a dyn CompletionService,
    pub sandbox: &'a SandboxContext,
    pub profile: RunProfile,
    pub model: &'a str,
    pub system_prompt: &'a str,
    pub progress: &'a Sender<ProgressEvent>,
}

/// Drive the turn-bounded tool loop. The transcript is mutated in place so
/// the caller observes the complete exchange, including tool round-trips.
pub fn run_agent(run: &AgentRun<'_>, transcript: &mut Vec<Message>) -> String {
    let mut turns = 0u32;
    let mut state = TurnState::Request;
    loop {
        state = match state {
            TurnState::Request => {
                if turns >= run.profile.max_turns {
                    return MAX_TURNS_MESSAGE.to_string();
                }
                if turns > 0 && !run.profile.pacing.is_zero() {
                    thread::sleep(run.profile.pacing);
                }
                turns += 1;
                request_turn(run, transcript)
            }
            TurnState::Append(response) => {
                transcript.push(Message {
                    role: Role::Assistant,
                    content: response.content.clone(),
                });
                TurnState::Branch(response)
            }
            TurnState::Branch(response) => branch_on_stop_reason(run, transcript, response),
            TurnState::Finished(text) => return text,
        };
    }
}

fn request_turn(run: &AgentRun<'_>, transcript: &[Message]) -> TurnState {
    let request = MessagesRequest {
        model: run.model.to_string(),
        max_tokens: run.profile.max_output_tokens,
        system: run.system_prompt.to_string(),
        messages: transcript.to_vec(),
        tools: tools::tool_definitions(),
    };
    match run.service.complete(&request) {
        Ok(response) => TurnState::Append(response),
        // Upstream failures are terminal for this invocation; retry policy,
        // if any, belongs to the caller.
        Err(err) => TurnState::Finished(format!("[Agent error: {err}]")),
    }
}

fn branch_on_stop_reason(
    run: &AgentRun<'_>,
    transcript: &mut Vec<Message>,
    response: MessagesResponse,
) -> TurnState {
    match response.stop_reason.as_deref() {
        Some(STOP_REASON_END_TURN) => {
            let text = response
                .content
                .iter()
                .find_map(|block| match block {
                    ContentBlock::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .unwrap_or_default();
            TurnState::Finished(text)
        }
        Some(STOP_REASON_TOOL_USE) => {
            let mut results = Vec::new();
            for block in &response.content {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    let _ = run.progress.send(ProgressEvent::ToolStarted {
                        tool: name.clone(),
                        summary: summarize_tool_input(input),
                    });
                    let content = tools::dispatch(run.sandbox, name, input);
                    results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content,
                    });
                }
            }
            transcript.push(Message::tool_results(results));
            TurnState::Request
        }
        other => TurnState::Finished(format!(
            "[Agent stopped with unexpected reason: {}]",
            other.unwrap_or("none")
        )),
    }
}

/// Short human-readable rendering of a tool input for progress display.
pub fn summarize_tool_input(input: &Value) -> String {
    if let Some(text) = input.as_str() {
        return truncate_chars(text, 50);
    }
    if let Some(object) = input.as_object() {
        if let Some(command) = object.get("command").and_then(Value::as_str) {
            return format!("bash: {}", truncate_chars(command, 40));
        }
        for key in ["file_path", "pattern", "path"] {
            if let Some(value) = object.get(key).and_then(Value::as_str) {
                return format!("{key}: {value}");
            }
        }
    }
    truncate_chars(&input.to_string(), 50)
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit).collect();
    format!("{truncated}...")
}
