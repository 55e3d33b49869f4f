//! Storage backends behind one contract.
//!
//! Three adapters implement [`ContentStore`]:
//!
//! - [`relational::RelationalStore`] — Postgres rows for documents and
//!   chunks, idempotent upserts, tsvector full-text search. The mandatory
//!   store: a chunk counts as stored only once this write lands.
//! - [`vector::VectorStore`] — one point per chunk in a Qdrant collection,
//!   cosine metric, created on first write.
//! - [`lexical::LexicalStore`] — an external BM25 service holding one
//!   index per document.
//!
//! [`fanout::StoreFanout`] drives the triple write with the
//! partial-failure policy; [`crate::retrieve`] consumes the adapters
//! read-side.

pub mod fanout;
pub mod lexical;
pub mod relational;
pub mod vector;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CorpusError;
use crate::model::{Document, EnrichedChunk, SearchHit, SearchQuery};

pub use fanout::{ChunkWrite, FanoutTotals, StoreFanout};
pub use lexical::LexicalStore;
pub use relational::{DocumentPage, DocumentQuery, PageInfo, RelationalStore, SortOrder};
pub use vector::VectorStore;

/// Uniform async contract over the three storage backends.
///
/// All writes are idempotent upserts keyed by document/chunk id, so a
/// partial first attempt followed by a full retry converges.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Create or refresh the document-level record.
    async fn upsert_document(&self, document: &Document) -> Result<(), CorpusError>;

    /// Write one enriched chunk.
    async fn upsert_chunk(&self, chunk: &EnrichedChunk) -> Result<(), CorpusError>;

    /// Remove a document and everything derived from it. Returns how many
    /// records were removed where the backend can tell.
    async fn delete_document(&self, document_id: Uuid) -> Result<u64, CorpusError>;

    /// Rank-ordered search over stored chunks.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, CorpusError>;
}

/// Collapse an arbitrary title/filename/url into a safe index key:
/// lowercase alphanumerics with single dashes, bounded length.
pub fn sanitize_index_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(64));
    let mut last_dash = true;
    for c in raw.chars() {
        if out.len() >= 64 {
            break;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_matches('-').to_string();
    if trimmed.is_empty() {
        "doc".to_string()
    } else {
        trimmed
    }
}
