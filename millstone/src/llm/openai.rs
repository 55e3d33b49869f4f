//! OpenAI-compatible chat and embeddings client.
//!
//! Works against api.openai.com or any compatible gateway via
//! `OPENAI_BASE_URL`. One struct serves both traits; each call takes a
//! token from the shared bucket before touching the network, and maps HTTP
//! failures onto the retriable/fatal taxonomy (retry loops live with the
//! callers).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::CorpusError;
use crate::llm::{ChatModel, EmbeddingModel, TokenBucket};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: 1536,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.embedding_dimensions = dims;
        self
    }
}

pub struct OpenAiClient {
    http: Client,
    config: OpenAiConfig,
    limiter: Arc<TokenBucket>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig, limiter: Arc<TokenBucket>) -> Result<Self, CorpusError> {
        if config.api_key.is_empty() {
            return Err(CorpusError::InvalidInput(
                "OPENAI_API_KEY is required".into(),
            ));
        }
        let http = Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| CorpusError::Upstream(format!("http client: {e}")))?;
        Ok(Self {
            http,
            config,
            limiter,
        })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CorpusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let message = format!("openai {status}: {body}");
        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => CorpusError::RateLimited {
                message,
                retry_after,
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CorpusError::InvalidInput(message),
            s if s.is_server_error() => CorpusError::Upstream(message),
            _ => CorpusError::InvalidInput(message),
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
    ) -> Result<String, CorpusError> {
        self.limiter.acquire().await;
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens,
            temperature: 0.0,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| crate::error::classify_http("openai", e))?;
        let response = Self::check_status(response).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CorpusError::Upstream(format!("openai response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CorpusError::Upstream("openai returned no content".into()))
    }

    fn name(&self) -> &str {
        &self.config.chat_model
    }
}

#[async_trait]
impl EmbeddingModel for OpenAiClient {
    async fn embed(&self, input: &str) -> Result<Vec<f32>, CorpusError> {
        self.limiter.acquire().await;
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input,
            dimensions: self.config.embedding_dimensions,
        };

        let response = self
            .http
            .post(format!("{}/embeddings", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| crate::error::classify_http("openai", e))?;
        let response = Self::check_status(response).await?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CorpusError::Upstream(format!("openai response body: {e}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CorpusError::EmbeddingFailed("openai returned no embedding".into()))
    }

    fn dimensions(&self) -> usize {
        self.config.embedding_dimensions
    }
}
