//! Heuristic document classification and strategy selection.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ChunkingMethod, DocumentKind};

static NUMBERED_SECTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+\.\s+[A-Z]").unwrap());
static MARKDOWN_HEADER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+").unwrap());

/// Classify a document from its cleaned text.
///
/// Heuristics are case-insensitive keyword checks, evaluated in priority
/// order; the numbered-section pattern runs against the original casing
/// because it keys on a capitalized heading word.
pub fn classify(text: &str) -> DocumentKind {
    let lowered = text.to_lowercase();

    if lowered.contains("abstract") && lowered.contains("references") {
        return DocumentKind::AcademicPaper;
    }
    if lowered.contains("chapter") || NUMBERED_SECTION.is_match(text) {
        return DocumentKind::BookOrManual;
    }
    if has_code_blocks(text) || MARKDOWN_HEADER.is_match(text) {
        return DocumentKind::Documentation;
    }
    if lowered.contains("whereas") || lowered.contains("hereby") {
        return DocumentKind::LegalDocument;
    }
    DocumentKind::GeneralArticle
}

/// Chunking strategy for a classified document.
pub fn strategy_for(kind: DocumentKind) -> ChunkingMethod {
    match kind {
        DocumentKind::AcademicPaper => ChunkingMethod::Semantic,
        DocumentKind::Documentation => ChunkingMethod::Structural,
        DocumentKind::BookOrManual => ChunkingMethod::Hierarchical,
        DocumentKind::LegalDocument => ChunkingMethod::Structural,
        DocumentKind::GeneralArticle => ChunkingMethod::Semantic,
    }
}

pub fn has_code_blocks(text: &str) -> bool {
    text.contains("```")
}
