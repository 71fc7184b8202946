use crate::config::Settings;

/// Allowlist check for inbound commands and replies.
pub fn is_allowed(settings: &Settings, user_id: i64) -> bool {
    settings.allowed_user_ids.contains(&user_id)
}
