use serde::Deserialize;
use serde_json::json;

const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("telegram api request failed: {0}")]
    ApiRequest(String),
    #[error("telegram api response error: {0}")]
    ApiResponse(String),
}

/// The outbound surface the task orchestrator needs from the chat gateway.
/// Callers treat every method as best-effort; failures are swallowed at the
/// point of use.
pub trait ChatGateway: Send + Sync {
    fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, TelegramError>;
    fn edit_message(&self, chat_id: i64, message_id: i64, text: &str)
        -> Result<(), TelegramError>;
    fn send_document(
        &self,
        chat_id: i64,
        filename: &str,
        bytes: &[u8],
        caption: &str,
    ) -> Result<(), TelegramError>;
}

// No `#[serde(default)]` on the options: that would put a `T: Default`
// bound on the derived impl, and missing fields decode as `None` anyway.
#[derive(Debug, Clone, Deserialize)]
struct TelegramEnvelope<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    #[serde(default)]
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone)]
pub struct TelegramApiClient {
    api_base: String,
    bot_token: String,
}

impl TelegramApiClient {
    pub fn new(bot_token: String) -> Self {
        let api_base = std::env::var("SITEREVIEW_TELEGRAM_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TELEGRAM_API_BASE.to_string());
        Self {
            api_base,
            bot_token,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base.trim_end_matches('/'),
            self.bot_token
        )
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, TelegramError> {
        let response = ureq::post(&self.endpoint(method))
            .send_json(body)
            .map_err(|e| TelegramError::ApiRequest(e.to_string()))?;
        let envelope: TelegramEnvelope<T> = response
            .into_json()
            .map_err(|e| TelegramError::ApiRequest(e.to_string()))?;
        if !envelope.ok {
            return Err(TelegramError::ApiResponse(
                envelope
                    .description
                    .unwrap_or_else(|| format!("{method} failed")),
            ));
        }
        envelope
            .result
            .ok_or_else(|| TelegramError::ApiResponse(format!("{method} returned no result")))
    }

    pub fn get_updates(
        &self,
        offset: i64,
        timeout_seconds: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let url = format!(
            "{}?offset={}&timeout={}",
            self.endpoint("getUpdates"),
            offset,
            timeout_seconds
        );
        let response = ureq::get(&url)
            .call()
            .map_err(|e| TelegramError::ApiRequest(e.to_string()))?;
        let envelope: TelegramEnvelope<Vec<Update>> = response
            .into_json()
            .map_err(|e| TelegramError::ApiRequest(e.to_string()))?;
        if !envelope.ok {
            return Err(TelegramError::ApiResponse(
                envelope
                    .description
                    .unwrap_or_else(|| "getUpdates failed".to_string()),
            ));
        }
        Ok(envelope.result.unwrap_or_default())
    }
}

impl ChatGateway for TelegramApiClient {
    fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, TelegramError> {
        let sent: SentMessage = self.post_json(
            "sendMessage",
            json!({"chat_id": chat_id, "text": text}),
        )?;
        Ok(sent.message_id)
    }

    fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), TelegramError> {
        let _: serde_json::Value = self.post_json(
            "editMessageText",
            json!({"chat_id": chat_id, "message_id": message_id, "text": text}),
        )?;
        Ok(())
    }

    fn send_document(
        &self,
        chat_id: i64,
        filename: &str,
        bytes: &[u8],
        caption: &str,
    ) -> Result<(), TelegramError> {
        let boundary = multipart_boundary();
        let body = multipart_document_body(&boundary, chat_id, filename, bytes, caption);
        let response = ureq::post(&self.endpoint("sendDocument"))
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={boundary}"),
            )
            .send_bytes(&body)
            .map_err(|e| TelegramError::ApiRequest(e.to_string()))?;
        let envelope: TelegramEnvelope<serde_json::Value> = response
            .into_json()
            .map_err(|e| TelegramError::ApiRequest(e.to_string()))?;
        if !envelope.ok {
            return Err(TelegramError::ApiResponse(
                envelope
                    .description
                    .unwrap_or_else(|| "sendDocument failed".to_string()),
            ));
        }
        Ok(())
    }
}

fn multipart_boundary() -> String {
    let mut buf = [0u8; 16];
    let _ = getrandom::getrandom(&mut buf);
    let suffix: String = buf.iter().map(|b| format!("{b:02x}")).collect();
    format!("sitereview{suffix}")
}

fn multipart_document_body(
    boundary: &str,
    chat_id: i64,
    filename: &str,
    bytes: &[u8],
    caption: &str,
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in [("chat_id", chat_id.to_string()), ("caption", caption.to_string())] {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"document\"; filename=\"{filename}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

/// Commands the bot accepts. Telegram command tokens use underscores; the
/// prompt builder's command ids use hyphens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    ReviewPage,
    Brief,
    SocialReview,
}

impl CommandKind {
    pub fn command_id(self) -> &'static str {
        match self {
            CommandKind::Start => "start",
            CommandKind::ReviewPage => "review-page",
            CommandKind::Brief => "brief",
            CommandKind::SocialReview => "social-review",
        }
    }

    pub fn requires_arguments(self) -> bool {
        matches!(self, CommandKind::ReviewPage | CommandKind::Brief)
    }

    pub fn usage(self) -> &'static str {
        match self {
            CommandKind::Start => "/start",
            CommandKind::ReviewPage => "Usage: /review_page <url>",
            CommandKind::Brief => "Usage: /brief <description>",
            CommandKind::SocialReview => "Usage: /social_review [brand]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedMessage {
    Command { kind: CommandKind, arguments: String },
    UnknownCommand(String),
    Text(String),
}

pub fn parse_message(text: &str) -> ParsedMessage {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return ParsedMessage::Text(trimmed.to_string());
    }

    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let token = parts.next().unwrap_or_default();
    let arguments = parts.next().unwrap_or("").trim().to_string();
    // Strip an @BotName suffix used in group chats.
    let command = token
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or_default();

    let kind = match command {
        "start" => CommandKind::Start,
        "review_page" => CommandKind::ReviewPage,
        "brief" => CommandKind::Brief,
        "social_review" => CommandKind::SocialReview,
        other => return ParsedMessage::UnknownCommand(other.to_string()),
    };
    ParsedMessage::Command { kind, arguments }
}
