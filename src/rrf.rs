//! Reciprocal Rank Fusion.
//!
//! Combines two independently ranked lists (dense nearest-neighbor hits and
//! BM25 hits) into one ranking using only rank position, not the
//! underlying scores — the two lists are not on comparable scales.

use std::collections::HashMap;

use crate::config::RrfConfig;

/// Fuse `dense` and `sparse` ranked lists of `chunk_id`s into one, summing
/// `1 / (k + r)` contributions (1-based rank `r`) for every chunk
/// appearing in either list. Ties broken by ascending `chunk_id`. Returns
/// at most `top_k` entries.
pub fn fuse(dense: &[u64], sparse: &[u64], config: &RrfConfig, top_k: usize) -> Vec<(u64, f64)> {
    let mut scores: HashMap<u64, f64> = HashMap::new();
    for (rank, &chunk_id) in dense.iter().enumerate() {
        *scores.entry(chunk_id).or_insert(0.0) += 1.0 / (config.k + (rank as f64 + 1.0));
    }
    for (rank, &chunk_id) in sparse.iter().enumerate() {
        *scores.entry(chunk_id).or_insert(0.0) += 1.0 / (config.k + (rank as f64 + 1.0));
    }

    let mut fused: Vec<(u64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused.truncate(top_k);
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_matches_hand_computed_scores() {
        // dense = [A,B,C,D], sparse = [C,A,E,F], k=60, top_k=4
        let dense = [1u64, 2, 3, 4]; // A B C D
        let sparse = [3u64, 1, 5, 6]; // C A E F
        let cfg = RrfConfig { k: 60.0 };
        let fused = fuse(&dense, &sparse, &cfg, 4);

        let a = 1.0 / 61.0 + 1.0 / 62.0;
        let c = 1.0 / 63.0 + 1.0 / 61.0;
        let b = 1.0 / 62.0;
        let d = 1.0 / 63.0;

        assert_eq!(fused.len(), 4);
        assert_eq!(fused[0].0, 1); // A
        assert!((fused[0].1 - a).abs() < 1e-9);
        assert_eq!(fused[1].0, 3); // C
        assert!((fused[1].1 - c).abs() < 1e-9);
        assert_eq!(fused[2].0, 2); // B
        assert!((fused[2].1 - b).abs() < 1e-9);
        assert_eq!(fused[3].0, 4); // D
        assert!((fused[3].1 - d).abs() < 1e-9);
    }

    #[test]
    fn disjoint_lists_contribute_independently() {
        let dense = [1u64, 2, 3];
        let sparse = [4u64, 5, 6];
        let cfg = RrfConfig { k: 60.0 };
        let fused = fuse(&dense, &sparse, &cfg, 10);
        assert_eq!(fused.len(), 6);
        for (rank, &chunk_id) in dense.iter().enumerate() {
            let score = fused.iter().find(|(id, _)| *id == chunk_id).unwrap().1;
            assert!((score - 1.0 / (60.0 + rank as f64 + 1.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn truncates_to_top_k() {
        let dense = [1u64, 2, 3, 4, 5];
        let sparse: [u64; 0] = [];
        let cfg = RrfConfig { k: 60.0 };
        let fused = fuse(&dense, &sparse, &cfg, 2);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].0, 1);
        assert_eq!(fused[1].0, 2);
    }

    #[test]
    fn empty_lists_yield_empty_fusion() {
        let cfg = RrfConfig { k: 60.0 };
        let fused = fuse(&[], &[], &cfg, 10);
        assert!(fused.is_empty());
    }

    #[test]
    fn ties_break_by_ascending_chunk_id() {
        let dense = [5u64, 2];
        let sparse = [2u64, 5];
        let cfg = RrfConfig { k: 60.0 };
        let fused = fuse(&dense, &sparse, &cfg, 10);
        // Both accumulate identical score (rank1+rank2 symmetric); tie -> ascending id.
        assert_eq!(fused[0].0, 2);
        assert_eq!(fused[1].0, 5);
    }
}
