use crate::access;
use crate::agent::AnthropicClient;
use crate::config::Settings;
use crate::history::{HistoryError, HistoryStore};
use crate::logging::append_runtime_log;
use crate::mailbox::ReplyMailboxes;
use crate::task::{self, TaskContext, TaskRequest};
use crate::telegram::{parse_message, CommandKind, ParsedMessage, TelegramApiClient, Update};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const WELCOME_MESSAGE: &str = "Hi! I'm the website review bot.

Commands:
/review_page <url> - Review a single page
/brief <description> - Free-form analysis task
/social_review [brand] - Review social media presence

I'll post progress while I work and attach the full review files when done.";

pub const NOT_AUTHORIZED_MESSAGE: &str = "Sorry, you are not authorized to use this bot.";
pub const STARTING_MESSAGE: &str = "Starting review, this may take a few minutes...";

const POLL_TIMEOUT_SECONDS: u64 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Long-poll Telegram for updates and fan incoming commands out to task
/// threads until `stop` is raised. Poll failures back off and retry; only a
/// broken database stops the loop.
pub fn run_bot(settings: Settings, stop: Arc<AtomicBool>) -> Result<(), RuntimeError> {
    let history = HistoryStore::open(&settings.resolve_db_path())?;
    let client = TelegramApiClient::new(settings.telegram_bot_token.clone());
    let state_dir = settings.state_dir();
    let ctx = TaskContext {
        gateway: Arc::new(client.clone()),
        service: Arc::new(AnthropicClient::new(settings.anthropic_api_key.clone())),
        history,
        mailboxes: ReplyMailboxes::new(),
        settings,
    };

    append_runtime_log(&state_dir, "info", "bot.started", &ctx.settings.model);
    let mut offset = 0i64;
    let mut workers: Vec<thread::JoinHandle<()>> = Vec::new();
    while !stop.load(Ordering::SeqCst) {
        let updates = match client.get_updates(offset, POLL_TIMEOUT_SECONDS) {
            Ok(updates) => updates,
            Err(err) => {
                append_runtime_log(&state_dir, "error", "poll.failed", &err.to_string());
                sleep_with_stop(POLL_RETRY_DELAY, &stop);
                continue;
            }
        };
        for update in updates {
            offset = offset.max(update.update_id + 1);
            handle_update(&ctx, update, &mut workers);
        }
        workers.retain(|handle| !handle.is_finished());
    }

    for handle in workers {
        let _ = handle.join();
    }
    append_runtime_log(&state_dir, "info", "bot.stopped", "");
    Ok(())
}

fn handle_update(ctx: &TaskContext, update: Update, workers: &mut Vec<thread::JoinHandle<()>>) {
    let Some(message) = update.message else {
        return;
    };
    let Some(user) = message.from else {
        return;
    };
    let Some(text) = message.text else {
        return;
    };
    let chat_id = message.chat.id;

    if let Err(err) = ctx.history.register_user(user.id, user.username.as_deref()) {
        append_runtime_log(
            &ctx.settings.state_dir(),
            "error",
            "user.register_failed",
            &err.to_string(),
        );
    }
    if !access::is_allowed(&ctx.settings, user.id) {
        let _ = ctx.gateway.send_message(chat_id, NOT_AUTHORIZED_MESSAGE);
        return;
    }

    match parse_message(&text) {
        ParsedMessage::Text(reply) => {
            if !reply.is_empty() {
                ctx.mailboxes.enqueue(user.id, reply);
            }
        }
        ParsedMessage::UnknownCommand(command) => {
            let _ = ctx
                .gateway
                .send_message(chat_id, &format!("Unknown command: /{command}"));
        }
        ParsedMessage::Command {
            kind: CommandKind::Start,
            ..
        } => {
            let _ = ctx.gateway.send_message(chat_id, WELCOME_MESSAGE);
        }
        ParsedMessage::Command { kind, arguments } => {
            if kind.requires_arguments() && arguments.is_empty() {
                let _ = ctx.gateway.send_message(chat_id, kind.usage());
                return;
            }
            let status_message_id = match ctx.gateway.send_message(chat_id, STARTING_MESSAGE) {
                Ok(id) => id,
                Err(err) => {
                    append_runtime_log(
                        &ctx.settings.state_dir(),
                        "error",
                        "status.send_failed",
                        &err.to_string(),
                    );
                    // Progress edits will be dropped, but the task still runs.
                    0
                }
            };
            let request = TaskRequest {
                user_id: user.id,
                chat_id,
                command: kind,
                arguments,
                status_message_id,
            };
            let ctx = ctx.clone();
            workers.push(thread::spawn(move || {
                task::run_review_task(&ctx, &request);
            }));
        }
    }
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool) {
    let mut remaining = duration;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(STOP_POLL_INTERVAL);
        thread::sleep(step);
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{
        AgentError, CompletionService, ContentBlock, MessagesRequest, MessagesResponse,
    };
    use crate::telegram::{ChatGateway, IncomingMessage, TelegramChat, TelegramError, TelegramUser};
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingGateway {
        messages: Mutex<Vec<(i64, String)>>,
        edits: Mutex<Vec<(i64, String)>>,
    }

    impl ChatGateway for RecordingGateway {
        fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, TelegramError> {
            let mut messages = self.messages.lock().expect("lock");
            messages.push((chat_id, text.to_string()));
            Ok(messages.len() as i64)
        }

        fn edit_message(
            &self,
            chat_id: i64,
            _message_id: i64,
            text: &str,
        ) -> Result<(), TelegramError> {
            self.edits
                .lock()
                .expect("lock")
                .push((chat_id, text.to_string()));
            Ok(())
        }

        fn send_document(
            &self,
            _chat_id: i64,
            _filename: &str,
            _bytes: &[u8],
            _caption: &str,
        ) -> Result<(), TelegramError> {
            Ok(())
        }
    }

    struct OneShotService {
        text: String,
    }

    impl CompletionService for OneShotService {
        fn complete(&self, _request: &MessagesRequest) -> Result<MessagesResponse, AgentError> {
            Ok(MessagesResponse {
                content: vec![ContentBlock::Text {
                    text: self.text.clone(),
                }],
                stop_reason: Some("end_turn".to_string()),
            })
        }
    }

    fn context(root: &std::path::Path, service_text: &str) -> (TaskContext, Arc<RecordingGateway>) {
        let gateway = Arc::new(RecordingGateway::default());
        let settings = Settings {
            telegram_bot_token: "tok".to_string(),
            anthropic_api_key: "key".to_string(),
            allowed_user_ids: vec![42],
            project_root: root.to_path_buf(),
            db_path: None,
            model: "test-model".to_string(),
            agent_max_turns: 5,
            progress_interval_seconds: 30,
            shell_timeout_seconds: 5,
            reply_timeout_seconds: 1,
            history_limit: 20,
        };
        let history = HistoryStore::open(&settings.resolve_db_path()).expect("open store");
        let ctx = TaskContext {
            settings,
            gateway: gateway.clone(),
            service: Arc::new(OneShotService {
                text: service_text.to_string(),
            }),
            history,
            mailboxes: ReplyMailboxes::new(),
        };
        (ctx, gateway)
    }

    fn update(user_id: i64, text: &str) -> Update {
        Update {
            update_id: 1,
            message: Some(IncomingMessage {
                from: Some(TelegramUser {
                    id: user_id,
                    username: Some("thom".to_string()),
                }),
                chat: TelegramChat { id: 99 },
                text: Some(text.to_string()),
            }),
        }
    }

    fn sent_texts(gateway: &RecordingGateway) -> Vec<String> {
        gateway
            .messages
            .lock()
            .expect("lock")
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    #[test]
    fn unlisted_users_are_refused() {
        let dir = tempdir().expect("tempdir");
        let (ctx, gateway) = context(dir.path(), "unused");
        let mut workers = Vec::new();

        handle_update(
            &ctx,
            update(7, "/review_page https://example.com"),
            &mut workers,
        );

        assert_eq!(sent_texts(&gateway), [NOT_AUTHORIZED_MESSAGE]);
        assert!(workers.is_empty());
    }

    #[test]
    fn start_command_sends_the_welcome() {
        let dir = tempdir().expect("tempdir");
        let (ctx, gateway) = context(dir.path(), "unused");
        let mut workers = Vec::new();

        handle_update(&ctx, update(42, "/start"), &mut workers);

        assert_eq!(sent_texts(&gateway), [WELCOME_MESSAGE]);
        assert!(workers.is_empty());
    }

    #[test]
    fn commands_missing_required_arguments_get_usage_help() {
        let dir = tempdir().expect("tempdir");
        let (ctx, gateway) = context(dir.path(), "unused");
        let mut workers = Vec::new();

        handle_update(&ctx, update(42, "/review_page"), &mut workers);

        assert_eq!(sent_texts(&gateway), ["Usage: /review_page <url>"]);
        assert!(workers.is_empty());
    }

    #[test]
    fn unknown_commands_are_named_in_the_reply() {
        let dir = tempdir().expect("tempdir");
        let (ctx, gateway) = context(dir.path(), "unused");
        let mut workers = Vec::new();

        handle_update(&ctx, update(42, "/restart now"), &mut workers);

        assert_eq!(sent_texts(&gateway), ["Unknown command: /restart"]);
    }

    #[test]
    fn free_text_lands_in_the_reply_mailbox() {
        let dir = tempdir().expect("tempdir");
        let (ctx, _gateway) = context(dir.path(), "unused");
        let mut workers = Vec::new();

        handle_update(&ctx, update(42, "the homepage please"), &mut workers);

        assert_eq!(
            ctx.mailboxes.await_reply(42, Duration::from_millis(10)),
            Some("the homepage please".to_string())
        );
    }

    #[test]
    fn a_valid_command_spawns_a_task_to_completion() {
        let dir = tempdir().expect("tempdir");
        let commands = dir.path().join(".claude/commands");
        fs::create_dir_all(&commands).expect("mkdir");
        fs::write(commands.join("brief.md"), "Analyze: $ARGUMENTS").expect("write command");
        let (ctx, gateway) = context(dir.path(), "Score: 82");
        let mut workers = Vec::new();

        handle_update(&ctx, update(42, "/brief check the homepage"), &mut workers);
        assert_eq!(workers.len(), 1);
        for handle in workers {
            handle.join().expect("task thread");
        }

        let texts = sent_texts(&gateway);
        assert_eq!(texts[0], STARTING_MESSAGE);
        assert!(texts.contains(&"Score: 82".to_string()));
        let edits = gateway.edits.lock().expect("lock");
        assert!(edits.iter().any(|(_, text)| text == task::COMPLETE_MESSAGE));
    }
}
