//! Reciprocal-rank fusion over ranked hit lists.

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::SearchHit;

/// RRF constant; dampens the contribution of deep ranks.
pub const RRF_K: f32 = 60.0;

/// Fuse ranked lists: `score = Σ 1/(60 + rank)` per chunk across lists,
/// deduped by chunk id, best fused score first, truncated to `limit`.
/// The surviving hit keeps the richest representation seen (text wins
/// over empty payload-only hits).
pub fn reciprocal_rank_fusion(lists: Vec<Vec<SearchHit>>, limit: usize) -> Vec<SearchHit> {
    let mut fused: HashMap<Uuid, (f32, SearchHit)> = HashMap::new();

    for list in lists {
        for (rank, hit) in list.into_iter().enumerate() {
            let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
            match fused.get_mut(&hit.chunk_id) {
                Some((score, kept)) => {
                    *score += contribution;
                    if kept.text.is_empty() && !hit.text.is_empty() {
                        let fused_score = *score;
                        *kept = hit;
                        kept.score = fused_score;
                    }
                }
                None => {
                    fused.insert(hit.chunk_id, (contribution, hit));
                }
            }
        }
    }

    let mut merged: Vec<SearchHit> = fused
        .into_values()
        .map(|(score, mut hit)| {
            hit.score = score;
            hit
        })
        .collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.chunk_id.cmp(&b.chunk_id)));
    merged.truncate(limit);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HitSource;

    fn hit(id: Uuid, source: HitSource, text: &str) -> SearchHit {
        SearchHit {
            chunk_id: id,
            document_id: None,
            score: 0.9,
            text: text.to_string(),
            source,
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn shared_hits_outrank_single_list_hits() {
        let shared = Uuid::new_v4();
        let vector_only = Uuid::new_v4();
        let lexical_only = Uuid::new_v4();

        let fused = reciprocal_rank_fusion(
            vec![
                vec![hit(vector_only, HitSource::Vector, ""), hit(shared, HitSource::Vector, "")],
                vec![hit(shared, HitSource::Lexical, "body"), hit(lexical_only, HitSource::Lexical, "x")],
            ],
            10,
        );

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].chunk_id, shared);
        let expected = 1.0 / 62.0 + 1.0 / 61.0;
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn dedupe_keeps_the_hit_with_text() {
        let id = Uuid::new_v4();
        let fused = reciprocal_rank_fusion(
            vec![
                vec![hit(id, HitSource::Vector, "")],
                vec![hit(id, HitSource::Lexical, "full text")],
            ],
            10,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].text, "full text");
    }

    #[test]
    fn truncates_to_limit() {
        let list: Vec<SearchHit> = (0..8)
            .map(|_| hit(Uuid::new_v4(), HitSource::Vector, ""))
            .collect();
        let fused = reciprocal_rank_fusion(vec![list], 3);
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(reciprocal_rank_fusion(vec![vec![], vec![]], 5).is_empty());
    }
}
