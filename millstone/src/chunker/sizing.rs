//! Adaptive target-size selection.
//!
//! The configured chunk size is a starting point; very large or very small
//! documents, dense academic prose, and code-heavy content all shift the
//! effective window before any boundary work happens.

use crate::model::DocumentKind;

/// The size/overlap pair the boundary algorithms actually run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveSizing {
    pub size: usize,
    pub overlap: usize,
}

impl EffectiveSizing {
    pub fn new(size: usize, overlap: usize) -> Self {
        Self { size, overlap }
    }
}

/// Apply the adaptive sizing rules in order: content-length tier, document
/// type floor, code-block multiplier, sentence-length adjustment.
pub fn adaptive_sizing(
    base: EffectiveSizing,
    content_len: usize,
    kind: DocumentKind,
    has_code_blocks: bool,
    mean_sentence_len: f64,
) -> EffectiveSizing {
    let mut size = base.size as f64;
    let mut overlap = base.overlap as f64;

    if content_len > 500_000 {
        size = (size * 1.8).clamp(3000.0, 4000.0);
        overlap = (overlap * 1.5).min(400.0);
    } else if content_len > 100_000 {
        size = (size * 1.3).clamp(2500.0, 3000.0);
    } else if content_len < 10_000 {
        size = (size * 0.8).max(1000.0);
    }

    if matches!(
        kind,
        DocumentKind::AcademicPaper | DocumentKind::BookOrManual
    ) {
        size = size.max(3000.0);
    }

    if has_code_blocks {
        size = (size * 1.3).min(4000.0);
        overlap = (overlap * 1.5).min(500.0);
    }

    if mean_sentence_len > 100.0 {
        size *= 1.2;
    } else if mean_sentence_len < 50.0 {
        size = (size * 0.9).max(1200.0);
    }

    EffectiveSizing {
        size: size.round() as usize,
        overlap: overlap.round() as usize,
    }
}

/// Mean sentence length in characters over a bounded sample of the text.
pub fn mean_sentence_len(text: &str) -> f64 {
    // A 64 KB sample is representative enough; scanning megabytes of text
    // for a single scalar is wasted work.
    let sample_end = crate::chunker::boundary::floor_char_boundary(text, text.len().min(65_536));
    let sample = &text[..sample_end];

    let mut lengths = Vec::new();
    let mut start = 0usize;
    let bytes = sample.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let at_end = i + 1 >= bytes.len();
            if at_end || bytes[i + 1].is_ascii_whitespace() {
                if i > start {
                    lengths.push(i + 1 - start);
                }
                start = i + 1;
            }
        }
    }
    if start < sample.len() && sample[start..].trim().len() > 20 {
        lengths.push(sample.len() - start);
    }

    if lengths.is_empty() {
        // No terminators at all; treat the text as one long "sentence" so
        // the dense-prose multiplier kicks in for genuinely unbroken text.
        return sample.len() as f64;
    }
    lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEUTRAL_SENTENCE_LEN: f64 = 75.0;

    #[test]
    fn large_academic_paper_scales_up() {
        let effective = adaptive_sizing(
            EffectiveSizing::new(2000, 200),
            600_000,
            DocumentKind::AcademicPaper,
            false,
            NEUTRAL_SENTENCE_LEN,
        );
        assert_eq!(effective, EffectiveSizing::new(3600, 300));
    }

    #[test]
    fn midsize_document_tier() {
        let effective = adaptive_sizing(
            EffectiveSizing::new(2000, 200),
            150_000,
            DocumentKind::GeneralArticle,
            false,
            NEUTRAL_SENTENCE_LEN,
        );
        assert_eq!(effective, EffectiveSizing::new(2600, 200));
    }

    #[test]
    fn tiny_document_shrinks_with_floor() {
        let effective = adaptive_sizing(
            EffectiveSizing::new(1200, 100),
            5_000,
            DocumentKind::GeneralArticle,
            false,
            NEUTRAL_SENTENCE_LEN,
        );
        assert_eq!(effective.size, 1000);
    }

    #[test]
    fn code_blocks_widen_the_window() {
        let effective = adaptive_sizing(
            EffectiveSizing::new(2000, 200),
            50_000,
            DocumentKind::Documentation,
            true,
            NEUTRAL_SENTENCE_LEN,
        );
        assert_eq!(effective, EffectiveSizing::new(2600, 300));
    }

    #[test]
    fn code_multiplier_is_capped() {
        let effective = adaptive_sizing(
            EffectiveSizing::new(3500, 400),
            50_000,
            DocumentKind::GeneralArticle,
            true,
            NEUTRAL_SENTENCE_LEN,
        );
        assert_eq!(effective, EffectiveSizing::new(4000, 500));
    }

    #[test]
    fn sentence_length_adjustments() {
        let long = adaptive_sizing(
            EffectiveSizing::new(2000, 200),
            50_000,
            DocumentKind::GeneralArticle,
            false,
            140.0,
        );
        assert_eq!(long.size, 2400);

        let short = adaptive_sizing(
            EffectiveSizing::new(2000, 200),
            50_000,
            DocumentKind::GeneralArticle,
            false,
            30.0,
        );
        assert_eq!(short.size, 1800);
    }

    #[test]
    fn short_sentence_floor() {
        let effective = adaptive_sizing(
            EffectiveSizing::new(1300, 100),
            50_000,
            DocumentKind::GeneralArticle,
            false,
            30.0,
        );
        assert_eq!(effective.size, 1200);
    }

    #[test]
    fn mean_sentence_len_on_regular_prose() {
        let text = "Short one. Another short one. A third sentence here.";
        let mean = mean_sentence_len(text);
        assert!(mean > 5.0 && mean < 30.0, "unexpected mean {mean}");
    }
}
