//! Intelligent document segmentation.
//!
//! The chunker cleans raw text, classifies the document, picks a strategy,
//! applies adaptive sizing, and emits span-tracked [`Chunk`]s with dense
//! indices. Strategies:
//!
//! - *semantic* — greedy accumulation over paragraph/sentence boundaries
//! - *structural* — header-delimited sections, windowed internally
//! - *hierarchical* — section tree by header level, leaves windowed
//! - *fixed* — boundary-respecting windows over the whole text

pub mod boundary;
pub mod classify;
pub mod clean;
mod hierarchical;
mod semantic;
pub mod sizing;
mod structural;

use uuid::Uuid;

use crate::error::CorpusError;
use crate::model::{BoundaryType, Chunk, ChunkingMethod, DocumentKind};

pub use sizing::EffectiveSizing;

/// Hard bounds on the configurable chunk size, in characters.
pub const MIN_CHUNK_SIZE: usize = 200;
pub const MAX_CHUNK_SIZE: usize = 8000;

/// A strategy-produced span before materialization into a [`Chunk`].
#[derive(Debug, Clone)]
pub(crate) struct RawChunk {
    pub start: usize,
    pub end: usize,
    pub boundary: Option<BoundaryType>,
    pub section_title: Option<String>,
    pub section_level: Option<u8>,
}

impl RawChunk {
    pub(crate) fn plain(start: usize, end: usize, boundary: Option<BoundaryType>) -> Self {
        Self {
            start,
            end,
            boundary,
            section_title: None,
            section_level: None,
        }
    }
}

/// Caller-supplied chunking options; merged per request at the boundary.
#[derive(Debug, Clone)]
pub struct ChunkerOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub enable_adaptive: bool,
    pub enable_intelligent: bool,
    /// Skip classification when the caller already knows the type.
    pub document_type: Option<DocumentKind>,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            overlap: 200,
            enable_adaptive: true,
            enable_intelligent: true,
            document_type: None,
        }
    }
}

/// Result of one chunking run.
#[derive(Debug, Clone)]
pub struct ChunkingOutcome {
    pub document_kind: DocumentKind,
    pub method: ChunkingMethod,
    pub sizing: EffectiveSizing,
    pub cleaned: String,
    pub chunks: Vec<Chunk>,
}

impl ChunkingOutcome {
    pub fn total_chunks(&self) -> usize {
        self.chunks.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Chunker {
    options: ChunkerOptions,
}

impl Chunker {
    pub fn new(options: ChunkerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ChunkerOptions {
        &self.options
    }

    /// Segment `raw_text` into chunks owned by `document_id`.
    ///
    /// Fails with `InvalidInput` when the size/overlap configuration is out
    /// of bounds or the document is empty after cleaning. A structurally
    /// valid document that yields no content (header-only, say) returns an
    /// outcome with zero chunks; the caller decides what that means.
    pub fn chunk(&self, raw_text: &str, document_id: Uuid) -> Result<ChunkingOutcome, CorpusError> {
        let opts = &self.options;
        if opts.chunk_size < MIN_CHUNK_SIZE || opts.chunk_size > MAX_CHUNK_SIZE {
            return Err(CorpusError::InvalidInput(format!(
                "chunk size {} outside [{MIN_CHUNK_SIZE}, {MAX_CHUNK_SIZE}]",
                opts.chunk_size
            )));
        }
        if opts.overlap >= opts.chunk_size {
            return Err(CorpusError::InvalidInput(format!(
                "overlap {} must be smaller than chunk size {}",
                opts.overlap, opts.chunk_size
            )));
        }

        let cleaned = clean::clean_text(raw_text, opts.enable_intelligent);
        if cleaned.is_empty() {
            return Err(CorpusError::InvalidInput("document is empty".into()));
        }

        let document_kind = opts
            .document_type
            .unwrap_or_else(|| classify::classify(&cleaned));
        let method = if opts.enable_intelligent {
            classify::strategy_for(document_kind)
        } else {
            ChunkingMethod::Fixed
        };

        let base = EffectiveSizing::new(opts.chunk_size, opts.overlap);
        let sizing = if opts.enable_adaptive {
            sizing::adaptive_sizing(
                base,
                cleaned.len(),
                document_kind,
                classify::has_code_blocks(&cleaned),
                sizing::mean_sentence_len(&cleaned),
            )
        } else {
            base
        };

        let raws = match method {
            ChunkingMethod::Semantic => semantic::chunk_semantic(&cleaned, sizing),
            ChunkingMethod::Structural => structural::chunk_structural(&cleaned, sizing),
            ChunkingMethod::Hierarchical => hierarchical::chunk_hierarchical(&cleaned, sizing),
            ChunkingMethod::Fixed => {
                let boundaries = boundary::collect_boundaries(&cleaned);
                boundary::fixed_windows(
                    &cleaned,
                    0,
                    cleaned.len(),
                    sizing.size,
                    sizing.overlap,
                    &boundaries,
                )
                .into_iter()
                .map(|(start, end, kind)| RawChunk::plain(start, end, Some(kind)))
                .collect()
            }
        };

        let chunks = materialize(raws, &cleaned, document_id, method, sizing);
        tracing::debug!(
            target: "millstone::chunker",
            document_id = %document_id,
            kind = document_kind.as_str(),
            method = method.as_str(),
            size = sizing.size,
            overlap = sizing.overlap,
            chunks = chunks.len(),
            "chunking complete"
        );

        Ok(ChunkingOutcome {
            document_kind,
            method,
            sizing,
            cleaned,
            chunks,
        })
    }
}

/// Turn raw spans into chunks: drop empties, keep indices dense.
fn materialize(
    raws: Vec<RawChunk>,
    cleaned: &str,
    document_id: Uuid,
    method: ChunkingMethod,
    sizing: EffectiveSizing,
) -> Vec<Chunk> {
    let mut chunks = Vec::with_capacity(raws.len());
    for raw in raws {
        debug_assert!(raw.start < raw.end && raw.end <= cleaned.len());
        let text = &cleaned[raw.start..raw.end];
        if text.trim().is_empty() {
            continue;
        }
        chunks.push(Chunk {
            id: Uuid::new_v4(),
            document_id,
            index: chunks.len(),
            start: raw.start,
            end: raw.end,
            text: text.to_string(),
            method,
            boundary: raw.boundary,
            section_title: raw.section_title,
            section_level: raw.section_level,
            target_size: sizing.size,
            overlap: sizing.overlap,
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        Chunker::new(ChunkerOptions {
            chunk_size: size,
            overlap,
            ..Default::default()
        })
    }

    #[test]
    fn overlap_equal_to_size_is_invalid() {
        let err = chunker(200, 200)
            .chunk("some text", Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, CorpusError::InvalidInput(_)));
    }

    #[test]
    fn size_out_of_bounds_is_invalid() {
        for size in [100, 9000] {
            let err = chunker(size, 50)
                .chunk("some text", Uuid::new_v4())
                .unwrap_err();
            assert!(matches!(err, CorpusError::InvalidInput(_)), "size {size}");
        }
    }

    #[test]
    fn empty_document_is_invalid() {
        let err = chunker(2000, 200)
            .chunk("  \n\n  ", Uuid::new_v4())
            .unwrap_err();
        assert!(matches!(err, CorpusError::InvalidInput(_)));
    }

    #[test]
    fn spans_and_indices_hold_their_invariants() {
        let text = "A sentence of prose. ".repeat(100);
        let outcome = chunker(400, 40).chunk(&text, Uuid::new_v4()).unwrap();
        assert!(!outcome.chunks.is_empty());
        for (i, chunk) in outcome.chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.start < chunk.end);
            assert!(chunk.end <= outcome.cleaned.len());
            assert_eq!(chunk.text, &outcome.cleaned[chunk.start..chunk.end]);
        }
    }

    #[test]
    fn exact_size_document_is_one_chunk() {
        let text = "a".repeat(500);
        let outcome = Chunker::new(ChunkerOptions {
            chunk_size: 500,
            overlap: 50,
            enable_adaptive: false,
            ..Default::default()
        })
        .chunk(&text, Uuid::new_v4())
        .unwrap();
        assert_eq!(outcome.chunks.len(), 1);
        assert_eq!(
            (outcome.chunks[0].start, outcome.chunks[0].end),
            (0, text.len())
        );
    }

    #[test]
    fn header_only_document_yields_zero_chunks() {
        let outcome = chunker(2000, 200)
            .chunk("# Just A Header", Uuid::new_v4())
            .unwrap();
        assert_eq!(outcome.method, ChunkingMethod::Structural);
        assert_eq!(outcome.total_chunks(), 0);
    }

    #[test]
    fn intelligent_disabled_uses_fixed_windows() {
        let text = "Words and words. ".repeat(100);
        let outcome = Chunker::new(ChunkerOptions {
            chunk_size: 300,
            overlap: 30,
            enable_intelligent: false,
            enable_adaptive: false,
            ..Default::default()
        })
        .chunk(&text, Uuid::new_v4())
        .unwrap();
        assert_eq!(outcome.method, ChunkingMethod::Fixed);
        assert!(outcome.chunks.len() > 1);
    }

    #[test]
    fn adaptive_sizing_flows_into_chunks() {
        // 600 KB of academic-looking text: effective size 3600, overlap 300.
        let body = "The study considers a hypothesis about measured effects. ".repeat(11_000);
        let text = format!("Abstract\n\n{body}\n\nReferences\n\n[1] Earlier work.");
        assert!(text.len() > 500_000);
        let outcome = chunker(2000, 200).chunk(&text, Uuid::new_v4()).unwrap();
        assert_eq!(outcome.document_kind, DocumentKind::AcademicPaper);
        assert_eq!(outcome.sizing, EffectiveSizing::new(3600, 300));
        assert!(outcome.sizing.size >= 3000);
        assert!(outcome.chunks.iter().all(|c| c.target_size == 3600));
    }
}
