use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
    #[error("failed to resolve home directory for global config path")]
    HomeDirectoryUnavailable,
}

pub const GLOBAL_STATE_DIR: &str = ".sitereview";
pub const GLOBAL_SETTINGS_FILE_NAME: &str = "config.yaml";

pub const DEFAULT_MODEL: &str = "claude-opus-4-6";
pub const DEFAULT_AGENT_MAX_TURNS: u32 = 40;
pub const DEFAULT_PROGRESS_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_SHELL_TIMEOUT_SECONDS: u64 = 120;
pub const DEFAULT_REPLY_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub telegram_bot_token: String,
    pub anthropic_api_key: String,
    pub allowed_user_ids: Vec<i64>,
    pub project_root: PathBuf,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_agent_max_turns")]
    pub agent_max_turns: u32,
    #[serde(default = "default_progress_interval_seconds")]
    pub progress_interval_seconds: u64,
    #[serde(default = "default_shell_timeout_seconds")]
    pub shell_timeout_seconds: u64,
    #[serde(default = "default_reply_timeout_seconds")]
    pub reply_timeout_seconds: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_agent_max_turns() -> u32 {
    DEFAULT_AGENT_MAX_TURNS
}

fn default_progress_interval_seconds() -> u64 {
    DEFAULT_PROGRESS_INTERVAL_SECONDS
}

fn default_shell_timeout_seconds() -> u64 {
    DEFAULT_SHELL_TIMEOUT_SECONDS
}

fn default_reply_timeout_seconds() -> u64 {
    DEFAULT_REPLY_TIMEOUT_SECONDS
}

fn default_history_limit() -> u32 {
    DEFAULT_HISTORY_LIMIT
}

pub fn default_global_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::HomeDirectoryUnavailable)?;
    Ok(PathBuf::from(home)
        .join(GLOBAL_STATE_DIR)
        .join(GLOBAL_SETTINGS_FILE_NAME))
}

impl Settings {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut settings: Settings =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::from_path(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(root) = env_string("SITEREVIEW_PROJECT_ROOT") {
            self.project_root = PathBuf::from(root);
        }
        if let Some(db) = env_string("SITEREVIEW_DB_PATH") {
            self.db_path = Some(PathBuf::from(db));
        }
        if let Some(model) = env_string("SITEREVIEW_MODEL") {
            self.model = model;
        }
        if let Some(turns) = env_parse::<u32>("SITEREVIEW_AGENT_MAX_TURNS") {
            self.agent_max_turns = turns;
        }
        if let Some(interval) = env_parse::<u64>("SITEREVIEW_PROGRESS_INTERVAL_SECONDS") {
            self.progress_interval_seconds = interval;
        }
        if let Some(timeout) = env_parse::<u64>("SITEREVIEW_SHELL_TIMEOUT_SECONDS") {
            self.shell_timeout_seconds = timeout;
        }
        if let Some(timeout) = env_parse::<u64>("SITEREVIEW_REPLY_TIMEOUT_SECONDS") {
            self.reply_timeout_seconds = timeout;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(ConfigError::Settings(
                "telegram_bot_token must be non-empty".to_string(),
            ));
        }
        if self.anthropic_api_key.trim().is_empty() {
            return Err(ConfigError::Settings(
                "anthropic_api_key must be non-empty".to_string(),
            ));
        }
        if self.allowed_user_ids.is_empty() {
            return Err(ConfigError::Settings(
                "allowed_user_ids must contain at least one user id".to_string(),
            ));
        }
        if !self.project_root.is_dir() {
            return Err(ConfigError::Settings(format!(
                "project_root does not exist: {}",
                self.project_root.display()
            )));
        }
        if self.agent_max_turns == 0 {
            return Err(ConfigError::Settings(
                "agent_max_turns must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolve_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.project_root.join("bot").join("bot.db"))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.project_root.join("bot")
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.shell_timeout_seconds)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_seconds)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|raw| raw.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_settings(dir: &Path, project_root: &Path, extra: &str) -> PathBuf {
        let path = dir.join("config.yaml");
        fs::write(
            &path,
            format!(
                "telegram_bot_token: tok\nanthropic_api_key: key\nallowed_user_ids: [42]\nproject_root: {}\n{extra}",
                project_root.display()
            ),
        )
        .expect("write settings");
        path
    }

    #[test]
    fn loads_settings_with_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = write_settings(dir.path(), dir.path(), "");

        let settings = Settings::load(&path).expect("load settings");
        assert_eq!(settings.model, DEFAULT_MODEL);
        assert_eq!(settings.agent_max_turns, DEFAULT_AGENT_MAX_TURNS);
        assert_eq!(settings.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(
            settings.resolve_db_path(),
            dir.path().join("bot").join("bot.db")
        );
    }

    #[test]
    fn rejects_empty_allowlist() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            format!(
                "telegram_bot_token: tok\nanthropic_api_key: key\nallowed_user_ids: []\nproject_root: {}\n",
                dir.path().display()
            ),
        )
        .expect("write settings");

        let err = Settings::load(&path).expect_err("allowlist must not be empty");
        assert!(err.to_string().contains("allowed_user_ids"));
    }

    #[test]
    fn rejects_missing_project_root() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("does-not-exist");
        let path = write_settings(dir.path(), &missing, "");

        let err = Settings::load(&path).expect_err("project root must exist");
        assert!(err.to_string().contains("project_root"));
    }

    #[test]
    fn explicit_values_override_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = write_settings(
            dir.path(),
            dir.path(),
            "model: test-model\nagent_max_turns: 3\nshell_timeout_seconds: 5\n",
        );

        let settings = Settings::load(&path).expect("load settings");
        assert_eq!(settings.model, "test-model");
        assert_eq!(settings.agent_max_turns, 3);
        assert_eq!(settings.shell_timeout(), Duration::from_secs(5));
    }
}
