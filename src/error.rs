use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(String),
}

impl Error {
    /// True when the error came from a user-initiated abort.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Provider(crate::provider::Error::Cancelled))
    }

    /// Message shown to the user. Backend errors drop the wrapper prefixes
    /// and JSON bodies.
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::Provider(e) => e.display_message(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
