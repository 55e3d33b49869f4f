//! Contextual summaries: situate a chunk within its document.
//!
//! This stage is best-effort. Any failure degrades to a plain-text
//! embedding rather than failing the chunk.

use crate::chunker::boundary::floor_char_boundary;
use crate::llm::ChatModel;

/// Characters of the document start shown to the model as context.
pub const DOCUMENT_PREVIEW_CHARS: usize = 8000;
const CONTEXT_MAX_TOKENS: u32 = 100;

const CONTEXT_SYSTEM_PROMPT: &str = "Given the start of a document and one chunk from it, \
write 1-2 short sentences situating the chunk within the overall document. \
Reply with the sentences only.";

/// Trim a document preview to the configured window on a char boundary.
pub fn preview_of(document_text: &str) -> &str {
    let end = floor_char_boundary(document_text, DOCUMENT_PREVIEW_CHARS.min(document_text.len()));
    &document_text[..end]
}

/// Ask for a situating summary; `None` on any failure or empty reply.
pub async fn contextualize(
    chat: &dyn ChatModel,
    document_preview: &str,
    chunk_text: &str,
) -> Option<String> {
    let user = format!("Document start:\n{document_preview}\n\nChunk:\n{chunk_text}");
    match chat
        .complete(CONTEXT_SYSTEM_PROMPT, &user, CONTEXT_MAX_TOKENS)
        .await
    {
        Ok(summary) => {
            let trimmed = summary.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Err(err) => {
            tracing::debug!(
                target: "millstone::enrich",
                error = %err,
                "contextual summary unavailable, embedding chunk text alone"
            );
            None
        }
    }
}
