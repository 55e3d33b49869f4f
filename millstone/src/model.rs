//! Shared data model for documents, chunks, and enrichment.
//!
//! These types cross every seam in the system: the chunker emits [`Chunk`]s,
//! the enricher decorates them into [`EnrichedChunk`]s, the storage adapters
//! persist them, and the retriever returns [`SearchHit`] projections.
//! Everything serializes `snake_case` so the wire shapes match the relational
//! columns and the vector-store payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a document moving through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Queued,
    Fetching,
    Chunking,
    Enriching,
    Storing,
    Completed,
    Failed,
    Cancelled,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Queued => "queued",
            DocumentStatus::Fetching => "fetching",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Enriching => "enriching",
            DocumentStatus::Storing => "storing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "queued" => DocumentStatus::Queued,
            "fetching" => DocumentStatus::Fetching,
            "chunking" => DocumentStatus::Chunking,
            "enriching" => DocumentStatus::Enriching,
            "storing" => DocumentStatus::Storing,
            "completed" => DocumentStatus::Completed,
            "failed" => DocumentStatus::Failed,
            "cancelled" => DocumentStatus::Cancelled,
            _ => return None,
        })
    }

    /// Terminal states accept no further pipeline transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentStatus::Completed | DocumentStatus::Failed | DocumentStatus::Cancelled
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOrigin {
    Url,
    FileUpload,
}

/// Heuristic document classification driving strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    AcademicPaper,
    BookOrManual,
    Documentation,
    LegalDocument,
    GeneralArticle,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::AcademicPaper => "academic_paper",
            DocumentKind::BookOrManual => "book_or_manual",
            DocumentKind::Documentation => "documentation",
            DocumentKind::LegalDocument => "legal_document",
            DocumentKind::GeneralArticle => "general_article",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "academic_paper" => DocumentKind::AcademicPaper,
            "book_or_manual" => DocumentKind::BookOrManual,
            "documentation" => DocumentKind::Documentation,
            "legal_document" => DocumentKind::LegalDocument,
            "general_article" => DocumentKind::GeneralArticle,
            _ => return None,
        })
    }
}

/// A logical source item; parent of chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_url: Option<String>,
    pub title: String,
    pub origin: UploadOrigin,
    pub document_type: Option<DocumentKind>,
    pub status: DocumentStatus,
    pub total_chunks: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Fresh document record at the start of an ingestion.
    pub fn new(title: impl Into<String>, source_url: Option<String>, origin: UploadOrigin) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_url,
            title: title.into(),
            origin,
            document_type: None,
            status: DocumentStatus::Queued,
            total_chunks: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: DocumentStatus) -> Self {
        self.status = status;
        self.updated_at = Utc::now();
        self
    }
}

/// Strategy that produced a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingMethod {
    Fixed,
    Semantic,
    Structural,
    Hierarchical,
}

impl ChunkingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkingMethod::Fixed => "fixed",
            ChunkingMethod::Semantic => "semantic",
            ChunkingMethod::Structural => "structural",
            ChunkingMethod::Hierarchical => "hierarchical",
        }
    }
}

/// Boundary that terminated a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    Paragraph,
    Sentence,
    Header,
    Section,
    SizeLimit,
}

impl BoundaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BoundaryType::Paragraph => "paragraph",
            BoundaryType::Sentence => "sentence",
            BoundaryType::Header => "header",
            BoundaryType::Section => "section",
            BoundaryType::SizeLimit => "size_limit",
        }
    }
}

/// Per-chunk processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Analyzed,
    Embedded,
    Stored,
    Failed,
    Cancelled,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Pending => "pending",
            ChunkStatus::Analyzed => "analyzed",
            ChunkStatus::Embedded => "embedded",
            ChunkStatus::Stored => "stored",
            ChunkStatus::Failed => "failed",
            ChunkStatus::Cancelled => "cancelled",
        }
    }
}

/// Outcome of the embedding sub-stage, tracked separately from the chunk
/// status so a relational-only chunk can still finish `stored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    Pending,
    Completed,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Completed => "completed",
            EmbeddingStatus::Failed => "failed",
        }
    }
}

/// A contiguous span of a document's cleaned text.
///
/// Invariants: `start < end <= cleaned_len`, `index` dense per document
/// starting at 0. Overlap with the previous chunk is permitted and recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub method: ChunkingMethod,
    pub boundary: Option<BoundaryType>,
    pub section_title: Option<String>,
    pub section_level: Option<u8>,
    /// Effective target size the chunker was running with.
    pub target_size: usize,
    pub overlap: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Named-entity buckets extracted by the analysis prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntities {
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub organizations: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Article,
    Blog,
    Academic,
    News,
    Reference,
    #[default]
    Other,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Article => "article",
            ContentType::Blog => "blog",
            ContentType::Academic => "academic",
            ContentType::News => "news",
            ContentType::Reference => "reference",
            ContentType::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "article" => ContentType::Article,
            "blog" => ContentType::Blog,
            "academic" => ContentType::Academic,
            "news" => ContentType::News,
            "reference" => ContentType::Reference,
            "other" => ContentType::Other,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
}

impl TechnicalLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TechnicalLevel::Beginner => "beginner",
            TechnicalLevel::Intermediate => "intermediate",
            TechnicalLevel::Advanced => "advanced",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "beginner" => TechnicalLevel::Beginner,
            "intermediate" => TechnicalLevel::Intermediate,
            "advanced" => TechnicalLevel::Advanced,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
    Mixed,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Mixed => "mixed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            "neutral" => Sentiment::Neutral,
            "mixed" => Sentiment::Mixed,
            _ => return None,
        })
    }
}

/// Structured analysis attached to a chunk by the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default)]
    pub technical_level: TechnicalLevel,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub main_topics: Vec<String>,
    #[serde(default)]
    pub key_entities: KeyEntities,
}

/// A chunk with its enrichment attached, ready for the storage fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedChunk {
    pub chunk: Chunk,
    pub analysis: Option<ChunkAnalysis>,
    /// 1–2 sentences situating the chunk within its document, when the
    /// contextualize call succeeded.
    pub contextual_summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub uses_contextual_embedding: bool,
    pub status: ChunkStatus,
    pub embedding_status: EmbeddingStatus,
    /// Parent document's source URL, carried for store payloads.
    pub source_url: Option<String>,
}

impl EnrichedChunk {
    pub fn pending(chunk: Chunk) -> Self {
        Self {
            chunk,
            analysis: None,
            contextual_summary: None,
            embedding: None,
            uses_contextual_embedding: false,
            status: ChunkStatus::Pending,
            embedding_status: EmbeddingStatus::Pending,
            source_url: None,
        }
    }

    /// Vector-store payload: analysis projection plus linkage fields.
    pub fn vector_payload(&self) -> serde_json::Value {
        let source_url = self.source_url.as_deref();
        let analysis = self.analysis.clone().unwrap_or_default();
        serde_json::json!({
            "document_id": self.chunk.document_id,
            "chunk_index": self.chunk.index,
            "url": source_url,
            "title": analysis.title,
            "summary": analysis.summary,
            "category": analysis.category,
            "content_type": analysis.content_type,
            "technical_level": analysis.technical_level,
            "sentiment": analysis.sentiment,
            "tags": analysis.tags,
            "key_concepts": analysis.key_concepts,
            "main_topics": analysis.main_topics,
            "uses_contextual_embedding": self.uses_contextual_embedding,
        })
    }
}

/// Which backend produced a search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Vector,
    Lexical,
    Relational,
}

/// Query against any of the storage backends.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub limit: usize,
    pub threshold: Option<f32>,
    /// Restrict to one document's chunks when set.
    pub document_id: Option<Uuid>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            threshold: None,
            document_id: None,
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// One retrieved chunk, as returned by a backend or the fused retriever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub document_id: Option<Uuid>,
    pub score: f32,
    pub text: String,
    pub source: HitSource,
    #[serde(default)]
    pub metadata: serde_json::Value,
}
