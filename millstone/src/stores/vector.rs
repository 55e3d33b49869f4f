//! Qdrant REST adapter: one point per chunk, cosine metric.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CorpusError, classify_http};
use crate::llm::EmbeddingModel;
use crate::model::{Document, EnrichedChunk, HitSource, SearchHit, SearchQuery};
use crate::stores::ContentStore;

const STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct VectorStoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub dimensions: usize,
}

impl VectorStoreConfig {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>, dimensions: usize) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            collection: collection.into(),
            dimensions,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

pub struct VectorStore {
    http: Client,
    config: VectorStoreConfig,
    /// Query-side embedder so the uniform `search(text)` contract holds.
    embedder: Arc<dyn EmbeddingModel>,
    collection_ready: AtomicBool,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: serde_json::Value,
}

impl VectorStore {
    pub fn new(
        config: VectorStoreConfig,
        embedder: Arc<dyn EmbeddingModel>,
    ) -> Result<Self, CorpusError> {
        let http = Client::builder()
            .timeout(STORE_TIMEOUT)
            .build()
            .map_err(|e| CorpusError::Upstream(format!("http client: {e}")))?;
        Ok(Self {
            http,
            config,
            embedder,
            collection_ready: AtomicBool::new(false),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{path}", self.config.base_url));
        if let Some(key) = &self.config.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CorpusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("qdrant {status}: {body}");
        Err(match status {
            StatusCode::NOT_FOUND => CorpusError::NotFound(message),
            StatusCode::TOO_MANY_REQUESTS => CorpusError::RateLimited {
                message,
                retry_after: None,
            },
            s if s.is_server_error() => CorpusError::Upstream(message),
            _ => CorpusError::InvalidInput(message),
        })
    }

    /// Create the collection on first use: `{size, distance: Cosine}`.
    #[instrument(skip(self), err)]
    pub async fn ensure_collection(&self) -> Result<(), CorpusError> {
        if self.collection_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let path = format!("/collections/{}", self.config.collection);
        let exists = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| classify_http("qdrant", e))?;
        if exists.status() == StatusCode::NOT_FOUND {
            let body = json!({
                "vectors": { "size": self.config.dimensions, "distance": "Cosine" }
            });
            let created = self
                .request(reqwest::Method::PUT, &path)
                .json(&body)
                .send()
                .await
                .map_err(|e| classify_http("qdrant", e))?;
            // A concurrent writer may have won the race; conflict is fine.
            if created.status() != StatusCode::CONFLICT {
                Self::check(created).await?;
            }
        } else {
            Self::check(exists).await?;
        }
        self.collection_ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Raw vector search for callers that already hold a query embedding.
    #[instrument(skip(self, vector), err)]
    pub async fn search_points(
        &self,
        vector: &[f32],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<SearchHit>, CorpusError> {
        let path = format!("/collections/{}/points/search", self.config.collection);
        let mut body = json!({
            "vector": vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(threshold) = score_threshold {
            body["score_threshold"] = json!(threshold);
        }
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_http("qdrant", e))?;
        let response = Self::check(response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CorpusError::Upstream(format!("qdrant response body: {e}")))?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|point| {
                let chunk_id = point.id.as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                let document_id = point
                    .payload
                    .get("document_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                Some(SearchHit {
                    chunk_id,
                    document_id,
                    score: point.score,
                    text: String::new(),
                    source: HitSource::Vector,
                    metadata: point.payload,
                })
            })
            .collect())
    }
}

#[async_trait]
impl ContentStore for VectorStore {
    /// No document-level record in the vector store; points are per chunk.
    async fn upsert_document(&self, _document: &Document) -> Result<(), CorpusError> {
        self.ensure_collection().await
    }

    #[instrument(
        skip(self, chunk),
        fields(document_id = %chunk.chunk.document_id, chunk_index = chunk.chunk.index),
        err
    )]
    async fn upsert_chunk(&self, chunk: &EnrichedChunk) -> Result<(), CorpusError> {
        let Some(vector) = &chunk.embedding else {
            return Err(CorpusError::EmbeddingFailed(
                "chunk has no embedding to upsert".into(),
            ));
        };
        if vector.len() != self.config.dimensions {
            return Err(CorpusError::EmbeddingFailed(format!(
                "vector has {} dimensions, collection expects {}",
                vector.len(),
                self.config.dimensions
            )));
        }
        self.ensure_collection().await?;

        let path = format!("/collections/{}/points", self.config.collection);
        let body = json!({
            "points": [{
                "id": chunk.chunk.id,
                "vector": vector,
                "payload": chunk.vector_payload(),
            }]
        });
        let response = self
            .request(reqwest::Method::PUT, &path)
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_http("qdrant", e))?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_document(&self, document_id: Uuid) -> Result<u64, CorpusError> {
        let path = format!("/collections/{}/points/delete", self.config.collection);
        let body = json!({
            "filter": {
                "must": [{ "key": "document_id", "match": { "value": document_id } }]
            }
        });
        let response = self
            .request(reqwest::Method::POST, &path)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_http("qdrant", e))?;
        Self::check(response).await?;
        // Qdrant does not report how many points matched the filter.
        Ok(0)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, CorpusError> {
        let vector = self.embedder.embed(&query.query).await?;
        self.search_points(&vector, query.limit, query.threshold)
            .await
    }
}
