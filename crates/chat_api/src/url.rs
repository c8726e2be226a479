/// Default chat-completions root.
pub const DEFAULT_CHAT_BASE_URL: &str = "https://api.openai.com/v1";

const COMPLETIONS_PATH: &str = "/chat/completions";

/// Normalizes a configured base URL into the chat-completions endpoint.
///
/// Accepts either an API root (`https://host/v1`) or an already-complete
/// endpoint; trailing slashes are stripped before comparison.
#[must_use]
pub fn normalize_chat_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return format!("{DEFAULT_CHAT_BASE_URL}{COMPLETIONS_PATH}");
    }

    if trimmed.ends_with(COMPLETIONS_PATH) {
        trimmed.to_string()
    } else {
        format!("{trimmed}{COMPLETIONS_PATH}")
    }
}
