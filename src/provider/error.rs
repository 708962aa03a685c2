//! Provider error types.

use thiserror::Error;

/// Format an API error for display, extracting the message from JSON if present.
///
/// Ollama reports failures as `{"error": "..."}`, e.g.
/// `HTTP 404: {"error":"model 'x' not found"}` becomes
/// `HTTP 404: model 'x' not found`. Plain text is returned as-is.
#[must_use]
pub fn format_api_error(error: &str) -> String {
    if let Some(json_start) = error.find('{') {
        let json_str = &error[json_start..];

        if let Ok(json) = serde_json::from_str::<serde_json::Value>(json_str)
            && let Some(msg) = extract_error_message(&json)
        {
            let prefix = error[..json_start].trim();
            if prefix.is_empty() {
                return msg;
            }
            return format!("{prefix} {msg}");
        }
    }

    error.to_string()
}

fn extract_error_message(json: &serde_json::Value) -> Option<String> {
    if let Some(error) = json.get("error") {
        if let Some(msg) = error.as_str() {
            return Some(msg.to_string());
        }
        if let Some(msg) = error.get("message").and_then(|v| v.as_str()) {
            return Some(msg.to_string());
        }
    }

    json.get("message")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("API error: {0}")]
    Api(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Message for the terminal, with Ollama's JSON error bodies unwrapped.
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::Api(message) => format_api_error(message),
            other => other.to_string(),
        }
    }
}
