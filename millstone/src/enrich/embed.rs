//! Embedding input construction and vector verification.

use crate::chunker::boundary::floor_char_boundary;
use crate::error::CorpusError;
use crate::llm::{EmbeddingModel, RetryPolicy, with_retries};

/// Maximum characters handed to the embedding model.
pub const EMBED_WINDOW_CHARS: usize = 8192;

/// Build the embedding input: `context ⊕ "\n\n" ⊕ chunk_text` when a
/// contextual summary exists, the chunk text alone otherwise. The boolean
/// records which path was taken. The result is deterministic for given
/// inputs — the pre-model string is byte-identical across runs.
pub fn build_embed_input(context: Option<&str>, chunk_text: &str) -> (String, bool) {
    match context {
        Some(ctx) if !ctx.is_empty() => {
            let combined = format!("{ctx}\n\n{chunk_text}");
            (truncate_to_window(&combined, EMBED_WINDOW_CHARS), true)
        }
        _ => (truncate_to_window(chunk_text, EMBED_WINDOW_CHARS), false),
    }
}

/// Truncate to `window` characters preserving word boundaries: cut at the
/// last space if it falls in the final 20 % of the window, hard cut
/// otherwise, and mark the truncation with `...`.
pub fn truncate_to_window(input: &str, window: usize) -> String {
    if input.len() <= window {
        return input.to_string();
    }
    let hard_cut = floor_char_boundary(input, window);
    let head = &input[..hard_cut];
    let cut = match head.rfind(' ') {
        Some(space) if space >= window * 4 / 5 => space,
        _ => hard_cut,
    };
    format!("{}...", &input[..cut])
}

/// Every stored vector must have the configured dimensionality and finite
/// entries.
pub fn verify_vector(vector: &[f32], dimensions: usize) -> Result<(), CorpusError> {
    if vector.len() != dimensions {
        return Err(CorpusError::EmbeddingFailed(format!(
            "expected {dimensions} dimensions, got {}",
            vector.len()
        )));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(CorpusError::EmbeddingFailed(format!(
            "non-finite value at dimension {pos}"
        )));
    }
    Ok(())
}

/// Embed prepared input with retries and verify the result.
pub async fn embed_input(
    model: &dyn EmbeddingModel,
    policy: RetryPolicy,
    input: &str,
) -> Result<Vec<f32>, CorpusError> {
    let vector = with_retries(policy, || model.embed(input)).await?;
    verify_vector(&vector, model.dimensions())?;
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_prepended_with_separator() {
        let (input, contextual) = build_embed_input(Some("ctx"), "body");
        assert_eq!(input, "ctx\n\nbody");
        assert!(contextual);
    }

    #[test]
    fn missing_or_empty_context_embeds_text_alone() {
        assert_eq!(build_embed_input(None, "body"), ("body".into(), false));
        assert_eq!(build_embed_input(Some(""), "body"), ("body".into(), false));
    }

    #[test]
    fn truncation_prefers_a_late_space() {
        let input = format!("{} tail words here", "a".repeat(95));
        let out = truncate_to_window(&input, 100);
        assert!(out.ends_with("..."));
        // Cut at the space at byte 95 (inside the final 20%).
        assert_eq!(out.len(), 95 + 3);
    }

    #[test]
    fn truncation_hard_cuts_without_a_late_space() {
        let input = "b".repeat(300);
        let out = truncate_to_window(&input, 100);
        assert_eq!(out.len(), 103);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn short_input_is_untouched() {
        assert_eq!(truncate_to_window("short", 100), "short");
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = build_embed_input(Some("context"), &"word ".repeat(5000));
        let b = build_embed_input(Some("context"), &"word ".repeat(5000));
        assert_eq!(a, b);
    }

    #[test]
    fn vector_verification() {
        assert!(verify_vector(&[0.1, 0.2], 2).is_ok());
        assert!(verify_vector(&[0.1], 2).is_err());
        assert!(verify_vector(&[0.1, f32::NAN], 2).is_err());
        assert!(verify_vector(&[0.1, f32::INFINITY], 2).is_err());
    }
}
