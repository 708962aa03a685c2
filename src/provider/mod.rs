//! Model backend access.
//!
//! [`ModelApi`] is the seam the conversation store talks to; [`OllamaClient`]
//! is the HTTP implementation for a local Ollama server.
//!
//! # Example
//!
//! ```ignore
//! use nexus_chat::provider::{GenerateRequest, ModelApi, OllamaClient};
//!
//! let client = OllamaClient::new("http://localhost:11434")?;
//! let reply = client.generate(GenerateRequest::new("Why is the sky blue?"), None).await?;
//! ```

mod error;
mod ndjson;
mod ollama;
mod response;
#[cfg(test)]
pub(crate) mod test_server;
mod types;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use error::{Error, format_api_error};
pub use ndjson::NdjsonParser;
pub use ollama::{
    DEFAULT_HOST, DEFAULT_NUM_PREDICT, DEFAULT_TEMPERATURE, OllamaClient, api_base_url,
    read_ndjson,
};
pub use response::{
    ChatFragment, Fragment, GenerateFragment, ReasoningFilter, ResponseCollector, strip_reasoning,
};
pub use types::*;

/// Request/response contract with the inference server.
///
/// Implementations return the fully assembled reply with reasoning blocks
/// removed and whitespace trimmed. When `tx` is given, raw text deltas are
/// forwarded as they arrive, followed by [`StreamEvent::Done`].
#[async_trait]
pub trait ModelApi: Send + Sync {
    /// Names of the models installed on the server.
    async fn list_models(&self) -> Result<Vec<String>, Error>;

    /// Single-prompt completion.
    async fn generate(
        &self,
        request: GenerateRequest,
        tx: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<String, Error>;

    /// Multi-turn chat completion.
    async fn chat(
        &self,
        request: ChatRequest,
        tx: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<String, Error>;
}
