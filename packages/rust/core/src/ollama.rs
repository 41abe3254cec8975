//! Chat client for the AI collaborator.
//!
//! [`ChatClient`] is the seam the enrichment gateway talks through;
//! [`OllamaClient`] speaks the Ollama HTTP API (`POST /api/chat` without
//! streaming, `GET /api/tags` for the model list).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use taxwatch_shared::{EnrichmentConfig, Result, TaxwatchError};

/// Sampling options for one chat call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    pub top_p: f32,
    /// Upper bound on generated tokens.
    #[serde(rename = "num_predict")]
    pub max_tokens: u32,
}

/// A text-in, text-out language model.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Model identifier, for logs and status output.
    fn model(&self) -> &str;

    /// Send a single user prompt and return the assistant reply.
    async fn chat(&self, prompt: &str, options: ChatOptions) -> Result<String>;

    /// Models installed on the service.
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Fails with `EnrichmentUnavailable` when the service cannot be reached.
    async fn check_available(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    stream: bool,
    options: ChatOptions,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

// ---------------------------------------------------------------------------
// OllamaClient
// ---------------------------------------------------------------------------

/// HTTP client for an Ollama-compatible service.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: Url,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            TaxwatchError::config(format!("enrichment base_url '{}': {e}", config.base_url))
        })?;
        // Endpoints join relative to the base, so a proxy prefix needs a trailing slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TaxwatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| TaxwatchError::config(format!("bad endpoint {path}: {e}")))
    }
}

fn unavailable(url: &Url, e: impl std::fmt::Display) -> TaxwatchError {
    TaxwatchError::EnrichmentUnavailable(format!("{url}: {e}"))
}

#[async_trait]
impl ChatClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, prompt_chars = prompt.chars().count()))]
    async fn chat(&self, prompt: &str, options: ChatOptions) -> Result<String> {
        let url = self.endpoint("api/chat")?;
        let request = ChatRequest {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options,
        };

        let response = self
            .client
            .post(url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(&url, format!("HTTP {status}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| unavailable(&url, format!("invalid chat response: {e}")))?;
        debug!(reply_chars = body.message.content.chars().count(), "chat completed");
        Ok(body.message.content.trim().to_string())
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let url = self.endpoint("api/tags")?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unavailable(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unavailable(&url, format!("HTTP {status}")));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| unavailable(&url, format!("invalid tags response: {e}")))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(base_url: &str) -> OllamaClient {
        OllamaClient::new(&EnrichmentConfig {
            base_url: base_url.into(),
            model: "llama3".into(),
            timeout: Duration::from_secs(5),
            max_text_chars: 12_000,
        })
        .unwrap()
    }

    const OPTIONS: ChatOptions = ChatOptions {
        temperature: 0.3,
        top_p: 0.9,
        max_tokens: 500,
    };

    #[tokio::test]
    async fn chat_posts_non_streaming_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3",
                "stream": false,
                "messages": [{ "role": "user", "content": "Resume esto" }],
                "options": { "num_predict": 500 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": { "role": "assistant", "content": "  Un resumen.  " },
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = client_for(&server.uri()).chat("Resume esto", OPTIONS).await.unwrap();
        assert_eq!(reply, "Un resumen.");
    }

    #[tokio::test]
    async fn server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server.uri()).chat("x", OPTIONS).await.unwrap_err();
        assert!(matches!(err, TaxwatchError::EnrichmentUnavailable(_)));
    }

    #[tokio::test]
    async fn tags_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{ "name": "llama3:latest" }, { "name": "mistral:7b" }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server.uri());
        assert_eq!(
            client.list_models().await.unwrap(),
            vec!["llama3:latest", "mistral:7b"]
        );
        assert!(client.check_available().await.is_ok());
    }

    #[tokio::test]
    async fn base_url_path_prefix_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ollama/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": { "role": "assistant", "content": "detrás del proxy" }
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ollama/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{ "name": "llama3:latest" }]
            })))
            .expect(2)
            .mount(&server)
            .await;

        let bare = client_for(&format!("{}/ollama", server.uri()));
        assert_eq!(bare.chat("x", OPTIONS).await.unwrap(), "detrás del proxy");
        assert_eq!(bare.list_models().await.unwrap(), vec!["llama3:latest"]);

        let slashed = client_for(&format!("{}/ollama/", server.uri()));
        assert_eq!(slashed.list_models().await.unwrap(), vec!["llama3:latest"]);
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = client_for(&format!("http://127.0.0.1:{port}"));
        let err = client.check_available().await.unwrap_err();
        assert!(matches!(err, TaxwatchError::EnrichmentUnavailable(_)));
    }
}
