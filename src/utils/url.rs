//! Endpoint URL helpers

const CHAT_COMPLETIONS_PATH: &str = "chat/completions";

/// Resolve the chat completions URL for an OpenAI-compatible endpoint.
///
/// A base such as `http://host:5000/v1` gets `chat/completions` appended; an
/// endpoint that already names the full path is used as-is. Trailing slashes
/// never produce a double slash.
///
/// ```
/// use chatrelay::utils::url::chat_completions_url;
///
/// assert_eq!(
///     chat_completions_url("http://127.0.0.1:5000/v1/"),
///     "http://127.0.0.1:5000/v1/chat/completions"
/// );
/// assert_eq!(
///     chat_completions_url("http://127.0.0.1:5000/v1/chat/completions"),
///     "http://127.0.0.1:5000/v1/chat/completions"
/// );
/// ```
pub fn chat_completions_url(endpoint: &str) -> String {
    let base = endpoint.trim_end_matches('/');
    if base.ends_with(CHAT_COMPLETIONS_PATH) {
        base.to_string()
    } else {
        format!("{base}/{CHAT_COMPLETIONS_PATH}")
    }
}
