//! # Millstone: corpus layer for the ingestion pipeline
//!
//! Millstone turns raw document text into enriched, embedded, searchable
//! chunks. It owns the document/chunk data model, the intelligent chunker,
//! the LLM enrichment stage, the three storage adapters behind one
//! contract, and the hybrid retriever.
//!
//! ```text
//! Cleaned text ──► chunker ──► Vec<Chunk>
//!                               │
//!                               ▼
//!                  enrich (analyze / contextualize / embed)
//!                               │
//!                               ▼
//!                  stores::StoreFanout ──┬─► RelationalStore (Postgres)
//!                                        ├─► VectorStore (Qdrant REST)
//!                                        └─► LexicalStore (BM25 service)
//!
//! Query ──► retrieve::HybridRetriever ──► fused SearchHits
//! ```
//!
//! The concurrency substrate that drives this crate (job queue, sessions,
//! workers, orchestrator, progress streaming) lives in the `millrace`
//! crate. Millstone itself holds no global mutable state beyond the shared
//! LLM rate limiter handed to its clients.

pub mod chunker;
pub mod enrich;
pub mod error;
pub mod llm;
pub mod model;
pub mod retrieve;
pub mod stores;

pub use chunker::{Chunker, ChunkerOptions, ChunkingOutcome};
pub use enrich::{EnrichOptions, Enricher};
pub use error::CorpusError;
pub use model::{
    BoundaryType, Chunk, ChunkAnalysis, ChunkStatus, ChunkingMethod, Document, DocumentKind,
    DocumentStatus, EmbeddingStatus, EnrichedChunk, KeyEntities, SearchHit, SearchQuery,
};
pub use retrieve::{HybridRetriever, RetrievalResult, SearchMode};
pub use stores::{ContentStore, StoreFanout};
