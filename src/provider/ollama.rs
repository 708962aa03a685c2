//! Ollama HTTP client.
//!
//! Talks to the native API at `<host>/api` (`/tags`, `/generate`, `/chat`).
//! Responses are consumed as newline-delimited JSON, concatenated, then
//! cleaned of reasoning blocks.

use super::error::Error;
use super::ndjson::NdjsonParser;
use super::response::{ChatFragment, Fragment, GenerateFragment, ResponseCollector, parse_fragment};
use super::types::{ChatRequest, ChatTurn, GenerateRequest, SamplingOptions, StreamEvent};
use super::ModelApi;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_NUM_PREDICT: u32 = 1024;

/// Generations can run for minutes on local hardware.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    options: SamplingOptions,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    options: SamplingOptions,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

/// Normalize an Ollama host (`OLLAMA_HOST` style) into an API base URL.
///
/// Accepts `host:port` without a scheme, strips trailing slashes and a
/// trailing `/api`, and appends `/api`.
pub fn api_base_url(host: &str) -> Result<String, Error> {
    let host = host.trim();
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    let url = Url::parse(&with_scheme).map_err(|e| Error::InvalidUrl(format!("{host}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "{host}: unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let base = url.as_str().trim_end_matches('/');
    let base = base.strip_suffix("/api").unwrap_or(base);
    Ok(format!("{base}/api"))
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    default_model: String,
    temperature: f32,
    num_predict: u32,
}

impl OllamaClient {
    /// Create a client for the server at `host` (e.g. `http://localhost:11434`).
    pub fn new(host: &str) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            client,
            base_url: api_base_url(host)?,
            default_model: crate::model::DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            num_predict: DEFAULT_NUM_PREDICT,
        })
    }

    /// Model used when a request carries no override.
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, num_predict: u32) -> Self {
        self.temperature = temperature;
        self.num_predict = num_predict;
        self
    }

    /// API base, always ending in `/api`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is reachable at the configured host.
    pub async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/tags", self.base_url))
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn generate_options(&self) -> SamplingOptions {
        SamplingOptions {
            temperature: self.temperature,
            num_predict: Some(self.num_predict),
        }
    }

    fn chat_options(&self) -> SamplingOptions {
        SamplingOptions {
            temperature: self.temperature,
            num_predict: None,
        }
    }

    async fn post_ndjson<B: Serialize + Sync, F: Fragment>(
        &self,
        path: &str,
        body: &B,
        tx: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<String, Error> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%url, "Ollama request");

        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        read_ndjson::<F, _>(response.bytes_stream(), tx).await
    }
}

/// Drain an NDJSON byte stream into the final cleaned text.
///
/// Each fragment's text is forwarded to `tx` as it arrives; `Done` is sent
/// once the stream ends cleanly.
pub async fn read_ndjson<F, S>(
    stream: S,
    tx: Option<mpsc::Sender<StreamEvent>>,
) -> Result<String, Error>
where
    F: Fragment,
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut parser = NdjsonParser::new();
    let mut collector = ResponseCollector::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        for line in parser.feed(&chunk) {
            absorb_line::<F>(&line, &mut collector, tx.as_ref()).await?;
        }
    }
    if let Some(line) = parser.finish() {
        absorb_line::<F>(&line, &mut collector, tx.as_ref()).await?;
    }

    if let Some(tx) = &tx {
        let _ = tx.send(StreamEvent::Done).await;
    }

    tracing::debug!(
        fragments = collector.fragments(),
        bytes = collector.raw().len(),
        "Ollama response complete"
    );
    Ok(collector.finish())
}

async fn absorb_line<F: Fragment>(
    line: &str,
    collector: &mut ResponseCollector,
    tx: Option<&mpsc::Sender<StreamEvent>>,
) -> Result<(), Error> {
    let fragment = parse_fragment::<F>(line)?;
    if let Some(text) = collector.push(&fragment)
        && let Some(tx) = tx
    {
        // Receiver gone only means nobody is watching live output
        let _ = tx.send(StreamEvent::TextDelta(text.to_string())).await;
    }
    Ok(())
}

#[async_trait]
impl ModelApi for OllamaClient {
    async fn list_models(&self) -> Result<Vec<String>, Error> {
        let url = format!("{}/tags", self.base_url);
        tracing::debug!(%url, "Listing models");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| Error::Stream(format!("Failed to parse models: {e}")))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(
        &self,
        request: GenerateRequest,
        tx: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<String, Error> {
        let body = GenerateBody {
            model: request.model.as_deref().unwrap_or(&self.default_model),
            prompt: &request.prompt,
            options: self.generate_options(),
        };
        self.post_ndjson::<_, GenerateFragment>("/generate", &body, tx)
            .await
    }

    async fn chat(
        &self,
        request: ChatRequest,
        tx: Option<mpsc::Sender<StreamEvent>>,
    ) -> Result<String, Error> {
        let body = ChatBody {
            model: request.model.as_deref().unwrap_or(&self.default_model),
            messages: &request.messages,
            options: self.chat_options(),
        };
        self.post_ndjson::<_, ChatFragment>("/chat", &body, tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;
    use crate::provider::test_server::serve_once;

    #[test]
    fn test_api_base_url() {
        assert_eq!(
            api_base_url("http://localhost:11434").unwrap(),
            "http://localhost:11434/api"
        );
        assert_eq!(
            api_base_url("http://localhost:11434/").unwrap(),
            "http://localhost:11434/api"
        );
        assert_eq!(
            api_base_url("http://localhost:11434/api").unwrap(),
            "http://localhost:11434/api"
        );
        assert_eq!(
            api_base_url("127.0.0.1:11434").unwrap(),
            "http://127.0.0.1:11434/api"
        );
        assert_eq!(
            api_base_url("https://ollama.lan").unwrap(),
            "https://ollama.lan/api"
        );
    }

    #[test]
    fn test_api_base_url_rejects_bad_scheme() {
        assert!(matches!(
            api_base_url("ftp://localhost:11434"),
            Err(Error::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_list_models() {
        let (host, handle) = serve_once(
            200,
            r#"{"models":[{"name":"llama3.1"},{"name":"gemma3"},{"name":"mistral"}]}"#,
        );
        let client = OllamaClient::new(&host).unwrap();

        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["llama3.1", "gemma3", "mistral"]);

        let captured = handle.join().unwrap();
        assert_eq!(captured.method, "GET");
        assert_eq!(captured.url, "/api/tags");
    }

    #[tokio::test]
    async fn test_list_models_http_error() {
        let (host, handle) = serve_once(500, "boom");
        let client = OllamaClient::new(&host).unwrap();

        match client.list_models().await {
            Err(Error::Api(msg)) => assert!(msg.contains("500")),
            other => panic!("Expected Api error, got {other:?}"),
        }
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_generate_request_shape_and_response() {
        let (host, handle) = serve_once(
            200,
            "{\"response\":\"<think>plan</think>\",\"done\":false}\n{\"response\":\"Hello!  \",\"done\":false}\n{\"response\":\"\",\"done\":true}\n",
        );
        let client = OllamaClient::new(&host).unwrap().with_default_model("gemma3");

        let text = client
            .generate(GenerateRequest::new("User: Hi"), None)
            .await
            .unwrap();
        assert_eq!(text, "Hello!");

        let captured = handle.join().unwrap();
        assert_eq!(captured.method, "POST");
        assert_eq!(captured.url, "/api/generate");
        let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "gemma3",
                "prompt": "User: Hi",
                "options": { "temperature": 0.7, "num_predict": 1024 }
            })
        );
    }

    #[tokio::test]
    async fn test_chat_request_shape_and_response() {
        let (host, handle) = serve_once(200, "{\"message\":{\"content\":\"Hello\"}}");
        let client = OllamaClient::new(&host).unwrap();

        let request = ChatRequest::new(vec![ChatTurn::new(Role::User, "Say hello")])
            .with_model("llama3.1");
        let text = client.chat(request, None).await.unwrap();
        assert_eq!(text, "Hello");

        let captured = handle.join().unwrap();
        assert_eq!(captured.url, "/api/chat");
        let body: serde_json::Value = serde_json::from_str(&captured.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "model": "llama3.1",
                "messages": [{ "role": "user", "content": "Say hello" }],
                "options": { "temperature": 0.7 }
            })
        );
    }

    #[tokio::test]
    async fn test_chat_model_not_found() {
        let (host, handle) = serve_once(404, r#"{"error":"model 'nope' not found"}"#);
        let client = OllamaClient::new(&host).unwrap();

        let err = client
            .chat(ChatRequest::new(vec![]).with_model("nope"), None)
            .await
            .unwrap_err();
        let formatted = crate::provider::format_api_error(&err.to_string());
        assert!(formatted.contains("model 'nope' not found"));
        handle.join().unwrap();
    }

    #[tokio::test]
    async fn test_read_ndjson_forwards_deltas() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> = vec![
            Ok(Bytes::from_static(b"{\"response\":\"Hel")),
            Ok(Bytes::from_static(b"lo\"}\n{\"response\":\" there\"}\n")),
            Ok(Bytes::from_static(b"{\"done\":true}")),
        ];
        let (tx, mut rx) = mpsc::channel(16);

        let text = read_ndjson::<GenerateFragment, _>(futures::stream::iter(chunks), Some(tx))
            .await
            .unwrap();
        assert_eq!(text, "Hello there");

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                StreamEvent::TextDelta("Hello".into()),
                StreamEvent::TextDelta(" there".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        // Bind then drop to get a port nobody listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let client = OllamaClient::new(&format!("127.0.0.1:{port}")).unwrap();

        assert!(!client.is_available().await);
        assert!(matches!(client.list_models().await, Err(Error::Http(_))));
    }
}
