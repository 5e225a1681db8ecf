//! OpenAI-compatible HTTP clients: embeddings and chat completions.
//!
//! Both retry 429/5xx and transport failures with capped exponential backoff;
//! every request is bounded by the client timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lexidb_core::config::{retry_backoff, EmbeddingSettings, GenerationSettings};
use lexidb_core::error::{Error, Result};
use lexidb_core::traits::{Embedder, Generator};
use lexidb_core::types::ChatMessage;

fn build_client(api_key: Option<String>, timeout: Duration) -> std::result::Result<Client, String> {
    let api_key = api_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| "missing OpenAI API key".to_string())?;
    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth).map_err(|_| "invalid OpenAI API key".to_string())?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| format!("failed to build OpenAI HTTP client: {e}"))
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

/// POST `body` to `endpoint` and decode the JSON reply, retrying transient failures.
async fn post_json<B, R>(client: &Client, endpoint: &str, body: &B, max_retries: usize) -> std::result::Result<R, String>
where
    B: Serialize + Sync,
    R: serde::de::DeserializeOwned + Send,
{
    let mut attempt = 0usize;
    loop {
        match client.post(endpoint).json(body).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return resp.json::<R>().await.map_err(|e| format!("failed to parse response: {e}"));
                }
                let text = resp.text().await.unwrap_or_else(|_| "<body unavailable>".to_string());
                if should_retry(status) && attempt + 1 < max_retries {
                    attempt += 1;
                    warn!(%status, attempt, "OpenAI request failed, retrying");
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    continue;
                }
                return Err(format!("request failed ({status}): {text}"));
            }
            Err(err) => {
                if is_retryable_error(&err) && attempt + 1 < max_retries {
                    attempt += 1;
                    warn!(error = %err, attempt, "OpenAI transport error, retrying");
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    continue;
                }
                return Err(err.to_string());
            }
        }
    }
}

pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
    id: String,
}

impl OpenAiEmbedder {
    pub fn new(settings: &EmbeddingSettings) -> Result<Self> {
        if settings.model.trim().is_empty() { return Err(Error::Config("missing embedding model name".into())); }
        let client = build_client(settings.api_key(), settings.timeout()).map_err(Error::Config)?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            max_retries: settings.max_retries.max(1),
            id: format!("openai:{}", settings.model),
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn id(&self) -> &str { &self.id }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        // newlines degrade embedding quality for this endpoint
        let input = texts.iter().map(|t| t.replace('\n', " ")).collect();
        let request = EmbeddingRequest { model: &self.model, input, dimensions: self.dimensions };
        let mut parsed: EmbeddingResponse =
            post_json(&self.client, &self.endpoint, &request, self.max_retries).await.map_err(Error::EmbeddingService)?;
        parsed.data.sort_by_key(|d| d.index);
        if parsed.data.len() != texts.len() {
            return Err(Error::EmbeddingService(format!("returned {} embeddings for {} inputs", parsed.data.len(), texts.len())));
        }
        debug!(count = texts.len(), "embedded batch");
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

pub struct OpenAiChat {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_retries: usize,
}

impl OpenAiChat {
    pub fn new(settings: &GenerationSettings, model: &str) -> Result<Self> {
        if model.trim().is_empty() { return Err(Error::Config("missing chat model name".into())); }
        let client = build_client(settings.api_key(), settings.timeout()).map_err(Error::Config)?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: model.to_string(),
            temperature: settings.temperature,
            max_retries: settings.max_retries.max(1),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Generator for OpenAiChat {
    async fn complete(&self, system: &str, messages: &[ChatMessage]) -> Result<String> {
        let mut wire = Vec::with_capacity(messages.len() + 1);
        wire.push(WireMessage { role: "system", content: system });
        wire.extend(messages.iter().map(|m| WireMessage { role: &m.role, content: &m.content }));
        let request = ChatRequest { model: &self.model, temperature: self.temperature, messages: wire };
        let parsed: ChatResponse =
            post_json(&self.client, &self.endpoint, &request, self.max_retries).await.map_err(Error::GenerationService)?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| Error::GenerationService("response has no message content".into()))
    }
}
