//! Gemini embedding and generation backends over the REST API.
//!
//! This module is only available when the `gemini` feature is enabled.
//! The API key is sent in the `x-goog-api-key` header and never appears in
//! URLs or error messages; the `from_env` constructors read it from
//! `GOOGLE_API_KEY`.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::config::{EmbeddingSettings, GenerationSettings};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, ServiceErrorKind};
use crate::llm::{GenerationRequest, LanguageModel};

/// The default Google Gemini API base URL.
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

const PROVIDER: &str = "gemini";

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Embedding task type sent with each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            Self::RetrievalDocument => "RETRIEVAL_DOCUMENT",
            Self::RetrievalQuery => "RETRIEVAL_QUERY",
        }
    }
}

fn api_key_from_env() -> Result<String> {
    std::env::var(API_KEY_ENV)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| RagError::Configuration(format!("environment variable {API_KEY_ENV} is not set")))
}

/// An HTTP client that authenticates every request with `api_key`.
fn http_client(api_key: &str) -> Result<Client> {
    let mut key = HeaderValue::from_str(api_key)
        .map_err(|_| RagError::Configuration("Gemini API key is not a valid header value".to_string()))?;
    key.set_sensitive(true);
    let headers = HeaderMap::from_iter([(HeaderName::from_static(API_KEY_HEADER), key)]);

    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .default_headers(headers)
        .build()
        .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e.without_url())))
}

/// Classify a transport error.
fn send_error_kind(e: &reqwest::Error) -> ServiceErrorKind {
    if e.is_timeout() {
        ServiceErrorKind::Timeout
    } else if e.is_connect() {
        ServiceErrorKind::Unavailable
    } else {
        ServiceErrorKind::Other
    }
}

/// POST `body` to `url` and return the decoded JSON, classifying failures
/// with `to_error`.
async fn post_json(
    client: &Client,
    url: &str,
    body: &Value,
    to_error: fn(ServiceErrorKind, String) -> RagError,
) -> Result<Value> {
    let response = client
        .post(url)
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| {
            let kind = send_error_kind(&e);
            to_error(kind, format!("request to Gemini API failed: {}", e.without_url()))
        })?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| {
            to_error(ServiceErrorKind::Other, format!("failed to read response body: {}", e.without_url()))
        })?;

    if !status.is_success() {
        return Err(to_error(
            ServiceErrorKind::from_status(status.as_u16()),
            format!("HTTP {status} from Gemini API: {text}"),
        ));
    }
    serde_json::from_str(&text)
        .map_err(|e| to_error(ServiceErrorKind::Other, format!("invalid JSON in response: {e}")))
}

fn embedding_error(kind: ServiceErrorKind, message: String) -> RagError {
    RagError::embedding(PROVIDER, kind, message)
}

fn generation_error(kind: ServiceErrorKind, message: String) -> RagError {
    RagError::generation(PROVIDER, kind, message)
}

/// An [`EmbeddingProvider`] backed by the Gemini `batchEmbedContents` API.
///
/// Documents are embedded with task type `RETRIEVAL_DOCUMENT` and queries
/// with `RETRIEVAL_QUERY`.
///
/// # Example
///
/// ```rust,ignore
/// use ragkit::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::new(api_key, "text-embedding-004", 768)?;
/// let vectors = provider.embed_batch(&["hello world"]).await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `model` producing `dimensions`-long vectors.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, dimensions: usize) -> Result<Self> {
        let api_key: String = api_key.into();
        Ok(Self {
            client: http_client(&api_key)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            dimensions,
        })
    }

    /// Create a provider from embedding settings, reading the key from
    /// `GOOGLE_API_KEY`.
    pub fn from_env(settings: &EmbeddingSettings) -> Result<Self> {
        Self::new(api_key_from_env()?, settings.model.clone(), settings.dimensions)
    }

    /// Point the provider at a different API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(&self, texts: &[&str], task: TaskType) -> Value {
        let model = format!("models/{}", self.model);
        let requests: Vec<Value> = texts
            .iter()
            .map(|text| {
                json!({
                    "model": model,
                    "content": { "parts": [{ "text": text }] },
                    "taskType": task.as_str(),
                    "outputDimensionality": self.dimensions,
                })
            })
            .collect();
        json!({ "requests": requests })
    }

    async fn embed_with_task(&self, texts: &[&str], task: TaskType) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(provider = PROVIDER, model = %self.model, batch_size = texts.len(), task = task.as_str(), "embedding batch");

        let url = format!("{}/models/{}:batchEmbedContents", self.base_url, self.model);
        let body = self.request_body(texts, task);
        let response = post_json(&self.client, &url, &body, embedding_error)
            .await
            .inspect_err(|e| error!(provider = PROVIDER, error = %e, "batch embedding request failed"))?;
        parse_embeddings(&response)
    }
}

fn parse_embeddings(response: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = response["embeddings"].as_array().ok_or_else(|| {
        embedding_error(ServiceErrorKind::Other, "response has no 'embeddings' array".to_string())
    })?;
    embeddings
        .iter()
        .map(|embedding| {
            embedding["values"]
                .as_array()
                .map(|values| values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect::<Vec<f32>>())
                .ok_or_else(|| {
                    embedding_error(ServiceErrorKind::Other, "embedding has no 'values'".to_string())
                })
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_with_task(texts, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(&[text], TaskType::RetrievalQuery).await?.into_iter().next().ok_or_else(
            || embedding_error(ServiceErrorKind::Other, "empty embedding response".to_string()),
        )
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// A [`LanguageModel`] backed by the Gemini `generateContent` API.
pub struct GeminiModel {
    client: Client,
    base_url: String,
    model: String,
}

impl GeminiModel {
    /// Create a client for `model`.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key: String = api_key.into();
        Ok(Self {
            client: http_client(&api_key)?,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
        })
    }

    /// Create a client from generation settings, reading the key from
    /// `GOOGLE_API_KEY`.
    pub fn from_env(settings: &GenerationSettings) -> Result<Self> {
        Self::new(api_key_from_env()?, settings.model.clone())
    }

    /// Point the client at a different API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

fn generation_body(request: &GenerationRequest) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": {
            "temperature": request.temperature,
            "maxOutputTokens": request.max_output_tokens,
        },
    })
}

fn parse_generation(response: &Value) -> Result<String> {
    let candidate = response["candidates"].as_array().and_then(|c| c.first()).ok_or_else(|| {
        let reason = response["promptFeedback"]["blockReason"].as_str().unwrap_or("no candidates");
        generation_error(ServiceErrorKind::InvalidInput, format!("no answer generated: {reason}"))
    })?;

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| parts.iter().filter_map(|p| p["text"].as_str()).collect())
        .unwrap_or_default();
    if text.is_empty() {
        let reason = candidate["finishReason"].as_str().unwrap_or("empty response");
        return Err(generation_error(ServiceErrorKind::Other, format!("no text in candidate: {reason}")));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(provider = PROVIDER, model = %self.model, prompt_len = request.prompt.len(), "sending generation request");

        let response = post_json(&self.client, &url, &generation_body(&request), generation_error)
            .await
            .inspect_err(|e| error!(provider = PROVIDER, error = %e, "generation request failed"))?;
        parse_generation(&response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
