//! Hierarchical strategy: chapters → sections → windows.
//!
//! Books and manuals get a section tree built from header levels; compact
//! sections become single chunks carrying their title, oversized ones are
//! windowed internally.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::BoundaryType;

use super::RawChunk;
use super::boundary::{collect_boundaries, fixed_windows};
use super::sizing::EffectiveSizing;

static MD_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(#{1,6})\s+(\S.*)$").unwrap());
static CHAPTER_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)^(?:chapter|part)\s+\S.*$").unwrap());

#[derive(Debug)]
struct Node {
    title: Option<String>,
    level: u8,
    header_start: usize,
    content_start: usize,
    /// Exclusive end of everything this node owns, children included.
    end: usize,
    children: Vec<Node>,
}

fn headers(text: &str) -> Vec<(usize, usize, u8, String)> {
    let mut found: Vec<(usize, usize, u8, String)> = MD_HEADER
        .captures_iter(text)
        .map(|cap| {
            let whole = cap.get(0).unwrap();
            let level = cap.get(1).unwrap().len() as u8;
            let title = cap.get(2).unwrap().as_str().trim().to_string();
            (whole.start(), whole.end(), level, title)
        })
        .collect();

    for m in CHAPTER_HEADER.find_iter(text) {
        // Markdown-styled chapter lines are already captured above.
        if !found.iter().any(|(s, ..)| *s == m.start()) {
            found.push((m.start(), m.end(), 1, m.as_str().trim().to_string()));
        }
    }
    found.sort_by_key(|(s, ..)| *s);
    found
}

fn build_tree(text: &str) -> Vec<Node> {
    let headers = headers(text);
    let mut roots: Vec<Node> = Vec::new();
    let mut stack: Vec<Node> = Vec::new();

    let close = |node: &mut Node, end: usize| {
        if node.end == usize::MAX {
            node.end = end;
        }
    };

    for (start, header_end, level, title) in headers {
        while let Some(top) = stack.last() {
            if top.level >= level {
                let mut done = stack.pop().unwrap();
                close(&mut done, start);
                for child in &mut done.children {
                    close(child, start);
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(done),
                    None => roots.push(done),
                }
            } else {
                break;
            }
        }
        stack.push(Node {
            title: Some(title),
            level,
            header_start: start,
            content_start: (header_end + 1).min(text.len()),
            end: usize::MAX,
            children: Vec::new(),
        });
    }
    while let Some(mut done) = stack.pop() {
        close(&mut done, text.len());
        for child in &mut done.children {
            close(child, text.len());
        }
        match stack.last_mut() {
            Some(parent) => parent.children.push(done),
            None => roots.push(done),
        }
    }
    roots
}

fn emit(
    node: &Node,
    text: &str,
    sizing: EffectiveSizing,
    boundaries: &[super::boundary::Boundary],
    out: &mut Vec<RawChunk>,
) {
    let span = node.end.saturating_sub(node.content_start);
    if span == 0 || text[node.content_start..node.end].trim().is_empty() {
        return;
    }

    if span <= 2 * sizing.size {
        out.push(RawChunk {
            start: node.content_start,
            end: node.end,
            boundary: Some(BoundaryType::Section),
            section_title: node.title.clone(),
            section_level: Some(node.level),
        });
        return;
    }

    let intro_end = node
        .children
        .first()
        .map(|c| c.header_start)
        .unwrap_or(node.end);
    if intro_end > node.content_start
        && !text[node.content_start..intro_end].trim().is_empty()
    {
        for (start, end, kind) in fixed_windows(
            text,
            node.content_start,
            intro_end,
            sizing.size,
            sizing.overlap,
            boundaries,
        ) {
            out.push(RawChunk {
                start,
                end,
                boundary: Some(kind),
                section_title: node.title.clone(),
                section_level: Some(node.level),
            });
        }
    }
    for child in &node.children {
        emit(child, text, sizing, boundaries, out);
    }
}

pub(super) fn chunk_hierarchical(text: &str, sizing: EffectiveSizing) -> Vec<RawChunk> {
    let boundaries = collect_boundaries(text);
    let roots = build_tree(text);
    let mut out = Vec::new();

    // Preamble ahead of the first chapter.
    let preamble_end = roots.first().map(|n| n.header_start).unwrap_or(text.len());
    if preamble_end > 0 && !text[..preamble_end].trim().is_empty() {
        for (start, end, kind) in
            fixed_windows(text, 0, preamble_end, sizing.size, sizing.overlap, &boundaries)
        {
            out.push(RawChunk::plain(start, end, Some(kind)));
        }
    }

    for node in &roots {
        emit(node, text, sizing, &boundaries, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_sections_become_single_chunks() {
        let text = "# Chapter One\nShort body text.\n\n# Chapter Two\nAnother short body.";
        let chunks = chunk_hierarchical(text, EffectiveSizing::new(500, 50));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].section_title.as_deref(), Some("Chapter One"));
        assert_eq!(chunks[0].section_level, Some(1));
        assert_eq!(chunks[0].boundary, Some(BoundaryType::Section));
    }

    #[test]
    fn nested_sections_descend_when_parent_is_large() {
        let body = "Filler sentence for volume. ".repeat(30);
        let text = format!("# Book\n{body}\n## Part A\nTiny part.\n## Part B\nOther tiny part.");
        let chunks = chunk_hierarchical(&text, EffectiveSizing::new(300, 30));
        let titles: Vec<Option<&str>> =
            chunks.iter().map(|c| c.section_title.as_deref()).collect();
        assert!(titles.contains(&Some("Part A")));
        assert!(titles.contains(&Some("Part B")));
        assert!(titles.contains(&Some("Book")), "intro text keeps the parent title");
    }

    #[test]
    fn chapter_lines_without_markdown_are_headers() {
        let text = "Chapter 1 The Beginning\nIt was a dark night.\n\nChapter 2 The Middle\nThings happened.";
        let chunks = chunk_hierarchical(text, EffectiveSizing::new(500, 50));
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].section_title.as_deref(),
            Some("Chapter 1 The Beginning")
        );
    }

    #[test]
    fn preamble_without_headers_is_windowed() {
        let text = "Plain text with no headers at all. Just prose.";
        let chunks = chunk_hierarchical(text, EffectiveSizing::new(500, 50));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].section_title.is_none());
    }
}
