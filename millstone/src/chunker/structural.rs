//! Structural strategy: split at headers, window within sections.
//!
//! Used for documentation and legal text, where explicit structure markers
//! (markdown headers, ALL-CAPS clause headings) outrank prose boundaries.
//! Code fences are kept intact by masking boundaries that fall inside them.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::BoundaryType;

use super::RawChunk;
use super::boundary::{Boundary, collect_boundaries, fixed_windows};
use super::sizing::EffectiveSizing;

static STRUCTURAL_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(?:#{1,6}\s+\S.*|[A-Z][A-Z\s]+:?)$").unwrap());

#[derive(Debug)]
struct Section {
    title: Option<String>,
    level: Option<u8>,
    content_start: usize,
    content_end: usize,
}

fn header_title_and_level(line: &str) -> (String, u8) {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if hashes > 0 {
        (line[hashes..].trim().to_string(), hashes as u8)
    } else {
        (line.trim_end_matches(':').trim().to_string(), 1)
    }
}

fn sections(text: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut headers: Vec<(usize, usize)> = STRUCTURAL_HEADER
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let first_header = headers.first().map(|(s, _)| *s).unwrap_or(text.len());
    if first_header > 0 {
        sections.push(Section {
            title: None,
            level: None,
            content_start: 0,
            content_end: first_header,
        });
    }

    headers.push((text.len(), text.len()));
    for pair in headers.windows(2) {
        let (start, end) = pair[0];
        let next_start = pair[1].0;
        if end == text.len() {
            break;
        }
        let (title, level) = header_title_and_level(&text[start..end]);
        sections.push(Section {
            title: Some(title),
            level: Some(level),
            content_start: (end + 1).min(next_start),
            content_end: next_start,
        });
    }
    sections
}

/// Byte ranges covered by fenced code blocks. An unclosed fence runs to the
/// end of the text.
fn code_fence_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut open: Option<usize> = None;
    let mut search = 0usize;
    while let Some(rel) = text[search..].find("```") {
        let pos = search + rel;
        match open.take() {
            None => open = Some(pos),
            Some(start) => ranges.push((start, pos + 3)),
        }
        search = pos + 3;
    }
    if let Some(start) = open {
        ranges.push((start, text.len()));
    }
    ranges
}

fn outside_fences(boundaries: Vec<Boundary>, fences: &[(usize, usize)]) -> Vec<Boundary> {
    boundaries
        .into_iter()
        .filter(|b| !fences.iter().any(|(s, e)| b.pos > *s && b.pos < *e))
        .collect()
}

pub(super) fn chunk_structural(text: &str, sizing: EffectiveSizing) -> Vec<RawChunk> {
    let EffectiveSizing { size, overlap } = sizing;
    let fences = code_fence_ranges(text);
    let boundaries = outside_fences(collect_boundaries(text), &fences);

    let mut out = Vec::new();
    for section in sections(text) {
        let span = section.content_end.saturating_sub(section.content_start);
        if span == 0 || text[section.content_start..section.content_end].trim().is_empty() {
            continue;
        }
        if span <= size {
            out.push(RawChunk {
                start: section.content_start,
                end: section.content_end,
                boundary: Some(if section.title.is_some() {
                    BoundaryType::Header
                } else {
                    BoundaryType::Section
                }),
                section_title: section.title.clone(),
                section_level: section.level,
            });
        } else {
            for (start, end, kind) in fixed_windows(
                text,
                section.content_start,
                section.content_end,
                size,
                overlap,
                &boundaries,
            ) {
                out.push(RawChunk {
                    start,
                    end,
                    boundary: Some(kind),
                    section_title: section.title.clone(),
                    section_level: section.level,
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_split_on_markdown_headers() {
        let text = "# Intro\nWelcome text here.\n\n# Usage\nRun the tool.";
        let chunks = chunk_structural(text, EffectiveSizing::new(500, 50));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_title.as_deref(), Some("Intro"));
        assert_eq!(chunks[1].section_title.as_deref(), Some("Usage"));
        assert_eq!(chunks[1].section_level, Some(1));
    }

    #[test]
    fn all_caps_headings_are_sections() {
        let text = "DEFINITIONS:\nA term means a thing.\n\nOBLIGATIONS:\nThe party shall comply.";
        let chunks = chunk_structural(text, EffectiveSizing::new(500, 50));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_title.as_deref(), Some("DEFINITIONS"));
    }

    #[test]
    fn header_only_document_emits_nothing() {
        let chunks = chunk_structural("# Lonely Header", EffectiveSizing::new(500, 50));
        assert!(chunks.is_empty());
    }

    #[test]
    fn preamble_before_first_header_is_kept() {
        let text = "Lead-in paragraph.\n\n# First\nBody.";
        let chunks = chunk_structural(text, EffectiveSizing::new(500, 50));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].section_title.is_none());
    }

    #[test]
    fn large_sections_are_windowed_with_title_carried() {
        let body = "A sentence of filler. ".repeat(40);
        let text = format!("# Big\n{body}");
        let chunks = chunk_structural(&text, EffectiveSizing::new(200, 20));
        assert!(chunks.len() > 1);
        assert!(
            chunks
                .iter()
                .all(|c| c.section_title.as_deref() == Some("Big"))
        );
    }

    #[test]
    fn fence_interior_boundaries_are_masked() {
        let code = format!("```\nfirst line. second line.\n{}```", "let x = 1;\n".repeat(5));
        let text = format!("# Code\nIntro line. {code} Trailing prose here.");
        let fences = code_fence_ranges(&text);
        assert_eq!(fences.len(), 1);
        let (fs, fe) = fences[0];
        let masked = outside_fences(collect_boundaries(&text), &fences);
        assert!(
            masked.iter().all(|b| b.pos <= fs || b.pos >= fe),
            "sentence ends inside the fence must not be cut candidates"
        );
    }
}
