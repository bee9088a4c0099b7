//! URL derivation for OpenAI-compatible APIs.

/// Joins `chat/completions` onto a base API URL such as `https://host/v1`.
#[must_use]
pub fn chat_completions_url(api_url: &str) -> String {
    if api_url.ends_with('/') {
        format!("{api_url}chat/completions")
    } else {
        format!("{api_url}/chat/completions")
    }
}

/// Derives the Prometheus endpoint served next to an OpenAI-compatible API.
///
/// The first `/v1` segment is dropped and trailing slashes are trimmed, so
/// `http://gpu:8000/v1` becomes `http://gpu:8000/metrics`.
#[must_use]
pub fn metrics_url(api_url: &str) -> String {
    let base = api_url.replacen("/v1", "", 1);
    format!("{}/metrics", base.trim_end_matches('/'))
}
