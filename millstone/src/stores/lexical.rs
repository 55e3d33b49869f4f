//! BM25 service adapter: one index per document.
//!
//! The service speaks a small REST dialect: `POST /index/{name}` to index
//! chunks, `POST /search` to query, `DELETE /index/{name}` to drop, and
//! `GET /health`. Index names derive from the document title/url via
//! [`super::sanitize_index_name`]; `upsert_document` registers the mapping
//! (and resets the index, since indexing is overwriting per document) so
//! later chunk writes know where to land.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::error::{CorpusError, classify_http};
use crate::model::{Document, EnrichedChunk, HitSource, SearchHit, SearchQuery};
use crate::stores::{ContentStore, sanitize_index_name};

const STORE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LexicalStore {
    http: Client,
    base_url: String,
    /// document id → index name, registered by `upsert_document`.
    indexes: RwLock<HashMap<Uuid, String>>,
}

#[derive(Deserialize)]
struct LexicalHit {
    id: String,
    score: f32,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<LexicalHit>,
}

impl LexicalStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CorpusError> {
        let http = Client::builder()
            .timeout(STORE_TIMEOUT)
            .build()
            .map_err(|e| CorpusError::Upstream(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            indexes: RwLock::new(HashMap::new()),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, CorpusError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = format!("bm25 {status}: {body}");
        Err(match status {
            StatusCode::NOT_FOUND => CorpusError::NotFound(message),
            s if s.is_server_error() => CorpusError::Upstream(message),
            _ => CorpusError::InvalidInput(message),
        })
    }

    pub fn index_name_for(&self, document: &Document) -> String {
        let key = document
            .source_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(&document.title);
        sanitize_index_name(key)
    }

    fn registered_index(&self, document_id: Uuid) -> Option<String> {
        self.indexes.read().get(&document_id).cloned()
    }

    /// Service liveness; the hybrid retriever falls back when this fails.
    pub async fn health(&self) -> bool {
        match self.http.get(format!("{}/health", self.base_url)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Drop an index; absent is fine.
    #[instrument(skip(self), err)]
    pub async fn delete_index(&self, name: &str) -> Result<(), CorpusError> {
        let response = self
            .http
            .delete(format!("{}/index/{name}", self.base_url))
            .send()
            .await
            .map_err(|e| classify_http("bm25", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }
}

#[async_trait]
impl ContentStore for LexicalStore {
    /// Register the document's index name and reset the index so a re-run
    /// overwrites rather than appends.
    #[instrument(skip(self, document), fields(document_id = %document.id), err)]
    async fn upsert_document(&self, document: &Document) -> Result<(), CorpusError> {
        let name = self.index_name_for(document);
        self.delete_index(&name).await?;
        self.indexes.write().insert(document.id, name);
        Ok(())
    }

    #[instrument(
        skip(self, chunk),
        fields(document_id = %chunk.chunk.document_id, chunk_index = chunk.chunk.index),
        err
    )]
    async fn upsert_chunk(&self, chunk: &EnrichedChunk) -> Result<(), CorpusError> {
        let Some(name) = self.registered_index(chunk.chunk.document_id) else {
            return Err(CorpusError::InvalidInput(format!(
                "no lexical index registered for document {}",
                chunk.chunk.document_id
            )));
        };
        let body = json!({
            "chunks": [{
                "id": chunk.chunk.id,
                "text": chunk.chunk.text,
                "metadata": {
                    "document_id": chunk.chunk.document_id,
                    "chunk_index": chunk.chunk.index,
                    "section_title": chunk.chunk.section_title,
                    "url": chunk.source_url,
                },
            }],
            "options": { "overwrite": false },
        });
        let response = self
            .http
            .post(format!("{}/index/{name}", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_http("bm25", e))?;
        Self::check(response).await.map(|_| ())
    }

    #[instrument(skip(self), err)]
    async fn delete_document(&self, document_id: Uuid) -> Result<u64, CorpusError> {
        let removed = self.indexes.write().remove(&document_id);
        if let Some(name) = removed {
            self.delete_index(&name).await?;
        }
        Ok(0)
    }

    #[instrument(skip(self, query), fields(q = %query.query), err)]
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, CorpusError> {
        let body = json!({
            "query": query.query,
            "limit": query.limit,
            "threshold": query.threshold,
        });
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_http("bm25", e))?;
        let response = Self::check(response).await?;
        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CorpusError::Upstream(format!("bm25 response body: {e}")))?;

        Ok(parsed
            .results
            .into_iter()
            .filter_map(|hit| {
                let chunk_id = Uuid::parse_str(&hit.id).ok()?;
                let document_id = hit
                    .metadata
                    .get("document_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| Uuid::parse_str(s).ok());
                Some(SearchHit {
                    chunk_id,
                    document_id,
                    score: hit.score,
                    text: hit.text.unwrap_or_default(),
                    source: HitSource::Lexical,
                    metadata: hit.metadata,
                })
            })
            .collect())
    }
}
