//! Hybrid retrieval: fuse vector-similarity and lexical hits.
//!
//! Read-only; independent of the ingestion path. Vector and lexical
//! backends are queried concurrently with a 2× overfetch, fused with
//! reciprocal-rank fusion, deduped, and truncated. When one backend
//! fails the other's results are returned with `degraded = true`; the
//! relational tsvector search stands in for the lexical service when it
//! is down.

pub mod fusion;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CorpusError;
use crate::model::{SearchHit, SearchQuery};
use crate::stores::ContentStore;

pub use fusion::reciprocal_rank_fusion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    Hybrid,
    Vector,
    Bm25,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub hits: Vec<SearchHit>,
    /// One of the hybrid backends was unavailable.
    pub degraded: bool,
}

pub struct HybridRetriever {
    vector: Arc<dyn ContentStore>,
    lexical: Arc<dyn ContentStore>,
    /// Lexical baseline when the BM25 service is unreachable.
    relational: Arc<dyn ContentStore>,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn ContentStore>,
        lexical: Arc<dyn ContentStore>,
        relational: Arc<dyn ContentStore>,
    ) -> Self {
        Self {
            vector,
            lexical,
            relational,
        }
    }

    /// Serve one query. `threshold` applies as the vector similarity floor.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        threshold: Option<f32>,
        mode: SearchMode,
    ) -> Result<RetrievalResult, CorpusError> {
        if query.trim().is_empty() {
            return Err(CorpusError::InvalidInput("empty query".into()));
        }
        let k = k.clamp(1, 100);

        let mut vector_query = SearchQuery::new(query, k * 2);
        vector_query.threshold = threshold;
        let lexical_query = SearchQuery::new(query, k * 2);

        match mode {
            SearchMode::Vector => {
                let mut hits = self.vector.search(&vector_query).await?;
                hits.truncate(k);
                Ok(RetrievalResult {
                    hits,
                    degraded: false,
                })
            }
            SearchMode::Bm25 => {
                let (hits, degraded) = self.lexical_with_fallback(&lexical_query).await?;
                let mut hits = hits;
                hits.truncate(k);
                Ok(RetrievalResult { hits, degraded })
            }
            SearchMode::Hybrid => {
                let (vector_result, lexical_result) = tokio::join!(
                    self.vector.search(&vector_query),
                    self.lexical_with_fallback(&lexical_query),
                );

                match (vector_result, lexical_result) {
                    (Ok(vector_hits), Ok((lexical_hits, lexical_degraded))) => {
                        let hits = reciprocal_rank_fusion(vec![vector_hits, lexical_hits], k);
                        Ok(RetrievalResult {
                            hits,
                            degraded: lexical_degraded,
                        })
                    }
                    (Ok(mut vector_hits), Err(err)) => {
                        tracing::warn!(
                            target: "millstone::retrieve",
                            error = %err,
                            "lexical side failed; serving vector-only results"
                        );
                        vector_hits.truncate(k);
                        Ok(RetrievalResult {
                            hits: vector_hits,
                            degraded: true,
                        })
                    }
                    (Err(err), Ok((mut lexical_hits, _))) => {
                        tracing::warn!(
                            target: "millstone::retrieve",
                            error = %err,
                            "vector side failed; serving lexical-only results"
                        );
                        lexical_hits.truncate(k);
                        Ok(RetrievalResult {
                            hits: lexical_hits,
                            degraded: true,
                        })
                    }
                    (Err(vector_err), Err(lexical_err)) => Err(CorpusError::Upstream(format!(
                        "both retrieval backends failed: vector: {vector_err}; lexical: {lexical_err}"
                    ))),
                }
            }
        }
    }

    /// BM25 service first, relational tsvector as the stand-in. The
    /// boolean reports whether the fallback was used.
    async fn lexical_with_fallback(
        &self,
        query: &SearchQuery,
    ) -> Result<(Vec<SearchHit>, bool), CorpusError> {
        match self.lexical.search(query).await {
            Ok(hits) => Ok((hits, false)),
            Err(err) => {
                tracing::debug!(
                    target: "millstone::retrieve",
                    error = %err,
                    "bm25 service unavailable, using relational full-text search"
                );
                let hits = self.relational.search(query).await?;
                Ok((hits, true))
            }
        }
    }
}
