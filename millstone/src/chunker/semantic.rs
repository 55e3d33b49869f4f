//! Semantic strategy: greedy accumulation of paragraph/sentence segments.

use crate::model::BoundaryType;

use super::RawChunk;
use super::boundary::{
    fixed_windows, floor_char_boundary, paragraph_boundaries, sentence_boundaries,
};
use super::sizing::EffectiveSizing;

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    end: usize,
    kind: BoundaryType,
}

/// Tile the text into paragraph segments; paragraphs wider than the target
/// size are re-tiled into sentence segments so accumulation stays fine
/// grained.
fn segments(text: &str, size: usize) -> Vec<Segment> {
    let mut para_cuts: Vec<usize> = paragraph_boundaries(text).iter().map(|b| b.pos).collect();
    para_cuts.push(text.len());

    let mut out = Vec::new();
    let mut start = 0usize;
    for cut in para_cuts {
        if cut <= start {
            continue;
        }
        if cut - start <= size {
            out.push(Segment {
                start,
                end: cut,
                kind: BoundaryType::Paragraph,
            });
        } else {
            let para = &text[start..cut];
            let mut sub_start = start;
            for b in sentence_boundaries(para) {
                let pos = start + b.pos;
                if pos > sub_start {
                    out.push(Segment {
                        start: sub_start,
                        end: pos,
                        kind: BoundaryType::Sentence,
                    });
                    sub_start = pos;
                }
            }
            if sub_start < cut {
                out.push(Segment {
                    start: sub_start,
                    end: cut,
                    kind: BoundaryType::Paragraph,
                });
            } else if let Some(last) = out.last_mut() {
                // Paragraph ended exactly on a sentence end; credit the
                // stronger boundary.
                last.kind = BoundaryType::Paragraph;
            }
        }
        start = cut;
    }
    out
}

/// Greedily accumulate segments into chunks, closing at the boundary that
/// would otherwise be crossed and carrying `overlap` bytes into the next
/// chunk.
pub(super) fn chunk_semantic(text: &str, sizing: EffectiveSizing) -> Vec<RawChunk> {
    let EffectiveSizing { size, overlap } = sizing;
    let mut chunks: Vec<RawChunk> = Vec::new();

    let mut cur_start = 0usize;
    let mut cur_end = 0usize;
    let mut last_kind: Option<BoundaryType> = None;

    for seg in segments(text, size) {
        let seg_len = seg.end - seg.start;

        if seg_len > size {
            // A single unbreakable segment; flush what we have and hard-split it.
            if cur_end > cur_start {
                chunks.push(RawChunk::plain(cur_start, cur_end, last_kind));
            }
            for (start, end, kind) in fixed_windows(text, seg.start, seg.end, size, overlap, &[]) {
                chunks.push(RawChunk::plain(start, end, Some(kind)));
            }
            cur_start = seg.end;
            cur_end = seg.end;
            last_kind = None;
            continue;
        }

        if seg.end - cur_start > size && cur_end > cur_start {
            chunks.push(RawChunk::plain(cur_start, cur_end, last_kind));
            let carried = cur_end.saturating_sub(overlap).max(cur_start + 1);
            cur_start = floor_char_boundary(text, carried);
        }
        cur_end = seg.end;
        last_kind = Some(seg.kind);
    }

    if cur_end > cur_start {
        // Final chunk runs to end-of-document rather than a boundary.
        chunks.push(RawChunk::plain(cur_start, cur_end, None));
    }

    chunks
}
