use crate::agent::{ContentBlock, Message, Role};
use crate::task::TaskStatus;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
}

impl From<rusqlite::Error> for HistoryError {
    fn from(source: rusqlite::Error) -> Self {
        HistoryError::Sql { source }
    }
}

/// Conversation/message/task persistence. One store per process; every call
/// opens a short-lived connection, so concurrent tasks do not share handles.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
}

impl HistoryStore {
    pub fn open(db_path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| HistoryError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, HistoryError> {
        Connection::open(&self.db_path).map_err(|source| HistoryError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }

    pub fn ensure_schema(&self) -> Result<(), HistoryError> {
        let connection = self.connect()?;
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                user_id        INTEGER PRIMARY KEY,
                username       TEXT,
                first_seen     TEXT NOT NULL,
                last_active    TEXT NOT NULL,
                is_allowed     INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL,
                session_id     TEXT NOT NULL UNIQUE,
                created_at     TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                role            TEXT NOT NULL,
                content         TEXT NOT NULL,
                timestamp       TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            );

            CREATE TABLE IF NOT EXISTS tasks (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id        INTEGER NOT NULL,
                chat_id        INTEGER NOT NULL,
                command        TEXT NOT NULL,
                arguments      TEXT NOT NULL,
                status         TEXT NOT NULL DEFAULT 'pending',
                started_at     TEXT,
                completed_at   TEXT,
                error_message  TEXT,
                FOREIGN KEY (user_id) REFERENCES users(user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON tasks(user_id);
            CREATE INDEX IF NOT EXISTS idx_conversations_user_id ON conversations(user_id);
            ",
        )?;
        Ok(())
    }

    pub fn register_user(&self, user_id: i64, username: Option<&str>) -> Result<(), HistoryError> {
        let connection = self.connect()?;
        let now = now_iso();
        let existing: Option<i64> = connection
            .query_row(
                "SELECT user_id FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            connection.execute(
                "UPDATE users SET username = ?1, last_active = ?2 WHERE user_id = ?3",
                params![username, now, user_id],
            )?;
        } else {
            connection.execute(
                "INSERT INTO users (user_id, username, first_seen, last_active, is_allowed)
                 VALUES (?1, ?2, ?3, ?3, 1)",
                params![user_id, username, now],
            )?;
        }
        Ok(())
    }

    /// Most recent conversation for the user, creating one on first contact.
    pub fn create_or_get_conversation(&self, user_id: i64) -> Result<i64, HistoryError> {
        let connection = self.connect()?;
        let existing: Option<i64> = connection
            .query_row(
                "SELECT id FROM conversations WHERE user_id = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok(id);
        }
        connection.execute(
            "INSERT INTO conversations (user_id, session_id, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, random_session_id(), now_iso()],
        )?;
        Ok(connection.last_insert_rowid())
    }

    /// Last `limit` messages for the user, reordered oldest-first, in the
    /// completion-service message shape. Content rows hold JSON block lists;
    /// anything unparsable is carried as one plain text block.
    pub fn recent_messages(&self, user_id: i64, limit: u32) -> Result<Vec<Message>, HistoryError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT m.role, m.content
             FROM messages m
             JOIN conversations c ON m.conversation_id = c.id
             WHERE c.user_id = ?1
             ORDER BY m.id DESC
             LIMIT ?2",
        )?;
        let rows = statement.query_map(params![user_id, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content) = row?;
            let Some(role) = Role::parse(&role) else {
                continue;
            };
            let blocks = serde_json::from_str::<Vec<ContentBlock>>(&content)
                .unwrap_or_else(|_| vec![ContentBlock::Text { text: content }]);
            messages.push(Message {
                role,
                content: blocks,
            });
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn save_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &[ContentBlock],
    ) -> Result<(), HistoryError> {
        let connection = self.connect()?;
        let encoded = serde_json::to_string(content).unwrap_or_default();
        connection.execute(
            "INSERT INTO messages (conversation_id, role, content, timestamp)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role.as_str(), encoded, now_iso()],
        )?;
        Ok(())
    }

    pub fn create_task(
        &self,
        user_id: i64,
        chat_id: i64,
        command: &str,
        arguments: &str,
    ) -> Result<i64, HistoryError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO tasks (user_id, chat_id, command, arguments, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user_id,
                chat_id,
                command,
                arguments,
                TaskStatus::Pending.as_str(),
                now_iso()
            ],
        )?;
        Ok(connection.last_insert_rowid())
    }

    pub fn update_task_status(
        &self,
        task_id: i64,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<(), HistoryError> {
        let connection = self.connect()?;
        let completed_at = status.is_terminal().then(now_iso);
        connection.execute(
            "UPDATE tasks SET status = ?1, completed_at = ?2, error_message = ?3 WHERE id = ?4",
            params![status.as_str(), completed_at, error_message, task_id],
        )?;
        Ok(())
    }

    pub fn task_status(&self, task_id: i64) -> Result<Option<String>, HistoryError> {
        let connection = self.connect()?;
        let status = connection
            .query_row(
                "SELECT status FROM tasks WHERE id = ?1",
                params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(status)
    }
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn random_session_id() -> String {
    let mut buf = [0u8; 16];
    let _ = getrandom::getrandom(&mut buf);
    buf.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, HistoryStore) {
        let dir = tempdir().expect("tempdir");
        let store = HistoryStore::open(&dir.path().join("bot").join("bot.db")).expect("open store");
        (dir, store)
    }

    #[test]
    fn open_creates_parent_directories_and_schema() {
        let (_dir, store) = store();
        store.register_user(1, Some("thom")).expect("register");
        store.register_user(1, Some("thom2")).expect("re-register");
    }

    #[test]
    fn conversation_is_reused_per_user() {
        let (_dir, store) = store();
        store.register_user(1, None).expect("register");
        let first = store.create_or_get_conversation(1).expect("create");
        let second = store.create_or_get_conversation(1).expect("get");
        assert_eq!(first, second);

        store.register_user(2, None).expect("register");
        let other = store.create_or_get_conversation(2).expect("create");
        assert_ne!(first, other);
    }

    #[test]
    fn recent_messages_come_back_oldest_first_with_limit() {
        let (_dir, store) = store();
        store.register_user(1, None).expect("register");
        let conversation = store.create_or_get_conversation(1).expect("conversation");
        for index in 0..5 {
            store
                .save_message(
                    conversation,
                    Role::User,
                    &[ContentBlock::Text {
                        text: format!("message {index}"),
                    }],
                )
                .expect("save");
        }

        let messages = store.recent_messages(1, 3).expect("recent");
        let texts: Vec<String> = messages
            .iter()
            .flat_map(|m| &m.content)
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["message 2", "message 3", "message 4"]);
    }

    #[test]
    fn plain_text_rows_fall_back_to_one_text_block() {
        let (_dir, store) = store();
        store.register_user(1, None).expect("register");
        let conversation = store.create_or_get_conversation(1).expect("conversation");
        let connection = store.connect().expect("connect");
        connection
            .execute(
                "INSERT INTO messages (conversation_id, role, content, timestamp)
                 VALUES (?1, 'user', 'not json', ?2)",
                params![conversation, now_iso()],
            )
            .expect("insert raw");

        let messages = store.recent_messages(1, 10).expect("recent");
        assert_eq!(
            messages[0].content,
            vec![ContentBlock::Text {
                text: "not json".to_string()
            }]
        );
    }

    #[test]
    fn task_rows_track_status_transitions() {
        let (_dir, store) = store();
        store.register_user(1, None).expect("register");
        let task = store
            .create_task(1, 99, "review-page", "https://example.com")
            .expect("create task");
        assert_eq!(store.task_status(task).expect("status"), Some("pending".to_string()));

        store
            .update_task_status(task, TaskStatus::Running, None)
            .expect("running");
        assert_eq!(store.task_status(task).expect("status"), Some("running".to_string()));

        store
            .update_task_status(task, TaskStatus::Failed, Some("boom"))
            .expect("failed");
        assert_eq!(store.task_status(task).expect("status"), Some("failed".to_string()));
    }
}
