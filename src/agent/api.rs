use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("completion service rejected the request: {0}")]
    BadRequest(String),
    #[error("completion request failed: {0}")]
    Api(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn tool_results(results: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: results,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesResponse {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// One synchronous completion turn. The loop never retries; a failure here is
/// terminal for the current invocation.
pub trait CompletionService: Send + Sync {
    fn complete(&self, request: &MessagesRequest) -> Result<MessagesResponse, AgentError>;
}

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    api_base: String,
    api_key: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        let api_base = std::env::var("SITEREVIEW_ANTHROPIC_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_API_BASE.to_string());
        Self { api_base, api_key }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.api_base.trim_end_matches('/'))
    }
}

impl CompletionService for AnthropicClient {
    fn complete(&self, request: &MessagesRequest) -> Result<MessagesResponse, AgentError> {
        let body = serde_json::to_value(request).map_err(|e| AgentError::Api(e.to_string()))?;
        let response = ureq::post(&self.endpoint())
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .send_json(body);

        match response {
            Ok(response) => response
                .into_json::<MessagesResponse>()
                .map_err(|e| AgentError::Api(e.to_string())),
            Err(ureq::Error::Status(400, response)) => Err(AgentError::BadRequest(
                response.into_string().unwrap_or_default(),
            )),
            Err(err) => Err(AgentError::Api(err.to_string())),
        }
    }
}
