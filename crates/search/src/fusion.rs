//! Reciprocal Rank Fusion of vector and keyword rankings
//!
//! RRF needs no score normalization and is robust to the very
//! different score distributions of cosine similarity and BM25: each
//! document accumulates `1/(k + rank)` over the lists it appears in.

use pgrag_common::types::SearchResult;

/// Standard RRF constant
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Fuse two ranked lists into one, truncated to `top_n`
///
/// Documents are keyed by their non-empty id, falling back to content.
/// Rank is 1-indexed and authoritative; ties keep first-seen order
/// (vector list first).
pub fn reciprocal_rank_fusion(
    vector_results: Vec<SearchResult>,
    keyword_results: Vec<SearchResult>,
    k: f32,
    top_n: usize,
) -> Vec<SearchResult> {
    let mut order: Vec<(SearchResult, f32)> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for list in [vector_results, keyword_results] {
        for (rank, result) in list.into_iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f32);
            let key = result.key().to_string();
            match index.get(&key) {
                Some(&i) => order[i].1 += contribution,
                None => {
                    index.insert(key, order.len());
                    order.push((result, contribution));
                }
            }
        }
    }

    let mut fused: Vec<SearchResult> = order
        .into_iter()
        .map(|(mut result, score)| {
            result.score = score;
            result
        })
        .collect();

    // Stable sort keeps first-seen order among equal scores
    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(top_n);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: Option<&str>, content: &str, score: f32) -> SearchResult {
        SearchResult {
            id: id.map(String::from),
            content: content.into(),
            score,
        }
    }

    #[test]
    fn documents_in_both_lists_outrank_singletons() {
        let vector = vec![
            result(Some("a"), "alpha", 0.9),
            result(Some("b"), "beta", 0.8),
            result(Some("c"), "gamma", 0.7),
        ];
        let keyword = vec![
            result(Some("b"), "beta", 12.0),
            result(Some("d"), "delta", 8.0),
        ];

        let fused = reciprocal_rank_fusion(vector, keyword, DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].id.as_deref(), Some("b"));
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn identical_lists_double_every_score() {
        let list = vec![result(Some("a"), "alpha", 0.9), result(Some("b"), "beta", 0.8)];
        let fused = reciprocal_rank_fusion(list.clone(), list, DEFAULT_RRF_K, 10);

        assert_eq!(fused[0].id.as_deref(), Some("a"));
        let expected = 2.0 * (1.0 / (DEFAULT_RRF_K + 1.0));
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn rank_is_authoritative_not_input_score() {
        // Input scores are scrambled; only position matters
        let vector = vec![result(Some("a"), "alpha", 0.1), result(Some("b"), "beta", 99.0)];
        let keyword = vec![];
        let fused = reciprocal_rank_fusion(vector, keyword, DEFAULT_RRF_K, 10);
        assert_eq!(fused[0].id.as_deref(), Some("a"));
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn keys_fall_back_to_content_without_id() {
        let vector = vec![result(None, "shared text", 0.9)];
        let keyword = vec![result(None, "shared text", 5.0)];
        let fused = reciprocal_rank_fusion(vector, keyword, DEFAULT_RRF_K, 10);
        assert_eq!(fused.len(), 1);
        let expected = 2.0 / (DEFAULT_RRF_K + 1.0);
        assert!((fused[0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn truncates_to_top_n() {
        let vector: Vec<SearchResult> = (0..5)
            .map(|i| result(Some(&i.to_string()), "doc", 1.0 - i as f32 * 0.1))
            .collect();
        let fused = reciprocal_rank_fusion(vector, vec![], DEFAULT_RRF_K, 3);
        assert_eq!(fused.len(), 3);
    }
}
