//! Weighted reciprocal rank fusion.
//!
//! `score(d) = Σ wᵢ / (k + rankᵢ(d))` with 1-based ranks. A document absent
//! from a list contributes nothing for that list. The fused list is ordered
//! by score descending, ties broken by canonical id ascending, so identical
//! inputs always produce the same order.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use strata_core::CanonicalId;

/// Per-channel weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
}

/// A fused result before hydration.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedItem {
    pub canonical_id: CanonicalId,
    pub score: f64,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// Sort key of a fused item, as carried in a search cursor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionKey {
    #[serde(rename = "s")]
    pub score: f64,
    pub id: CanonicalId,
}

impl FusedItem {
    pub fn key(&self) -> FusionKey {
        FusionKey {
            score: self.score,
            id: self.canonical_id,
        }
    }
}

/// Fused ordering: score descending, then id ascending.
pub fn compare(a: &FusionKey, b: &FusionKey) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Contribution of a 1-based `rank` under damping constant `k`.
pub fn rrf_contribution(rank: usize, k: f64) -> f64 {
    1.0 / (k + rank as f64)
}

/// Fuse two ranked id lists. Each list must already be in rank order.
pub fn fuse(
    lexical: &[CanonicalId],
    vector: &[CanonicalId],
    weights: FusionWeights,
    k: f64,
) -> Vec<FusedItem> {
    let mut fused: HashMap<CanonicalId, FusedItem> = HashMap::new();

    for (i, id) in lexical.iter().enumerate() {
        let rank = i + 1;
        let item = fused.entry(*id).or_insert_with(|| empty(*id));
        if item.lexical_rank.is_none() {
            item.lexical_rank = Some(rank);
            item.score += weights.lexical * rrf_contribution(rank, k);
        }
    }
    for (i, id) in vector.iter().enumerate() {
        let rank = i + 1;
        let item = fused.entry(*id).or_insert_with(|| empty(*id));
        if item.vector_rank.is_none() {
            item.vector_rank = Some(rank);
            item.score += weights.vector * rrf_contribution(rank, k);
        }
    }

    let mut items: Vec<FusedItem> = fused.into_values().collect();
    items.sort_by(|a, b| compare(&a.key(), &b.key()));
    items
}

fn empty(canonical_id: CanonicalId) -> FusedItem {
    FusedItem {
        canonical_id,
        score: 0.0,
        lexical_rank: None,
        vector_rank: None,
    }
}

/// Index of the item with exactly this key, by binary search.
pub fn locate(items: &[FusedItem], key: &FusionKey) -> Option<usize> {
    items
        .binary_search_by(|item| compare(&item.key(), key))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn id(n: u128) -> CanonicalId {
        CanonicalId(Uuid::from_u128(n))
    }

    const DEFAULT: FusionWeights = FusionWeights {
        lexical: 0.4,
        vector: 0.6,
    };

    #[test]
    fn scores_follow_weighted_rrf() {
        let fused = fuse(&[id(1), id(2)], &[id(2), id(3)], DEFAULT, 60.0);
        let by_id: HashMap<CanonicalId, &FusedItem> =
            fused.iter().map(|f| (f.canonical_id, f)).collect();

        let both = by_id[&id(2)];
        let expected = 0.4 / 62.0 + 0.6 / 61.0;
        assert!((both.score - expected).abs() < 1e-12);
        assert_eq!(both.lexical_rank, Some(2));
        assert_eq!(both.vector_rank, Some(1));

        assert!((by_id[&id(1)].score - 0.4 / 61.0).abs() < 1e-12);
        assert!((by_id[&id(3)].score - 0.6 / 62.0).abs() < 1e-12);
        assert_eq!(fused[0].canonical_id, id(2));
    }

    #[test]
    fn ties_break_by_id_ascending() {
        let equal = FusionWeights {
            lexical: 0.5,
            vector: 0.5,
        };
        let fused = fuse(&[id(9)], &[id(4)], equal, 60.0);
        let order: Vec<CanonicalId> = fused.iter().map(|f| f.canonical_id).collect();
        assert_eq!(order, vec![id(4), id(9)]);
    }

    #[test]
    fn empty_lists_fuse_to_nothing() {
        assert!(fuse(&[], &[], DEFAULT, 60.0).is_empty());
        let single = fuse(&[id(1), id(2)], &[], DEFAULT, 60.0);
        assert_eq!(single.len(), 2);
        assert!(single.iter().all(|f| f.vector_rank.is_none()));
    }

    #[test]
    fn locate_finds_exact_keys_only() {
        let fused = fuse(&[id(1), id(2), id(3)], &[id(3), id(4)], DEFAULT, 60.0);
        for (i, item) in fused.iter().enumerate() {
            assert_eq!(locate(&fused, &item.key()), Some(i));
        }
        let stale = FusionKey {
            score: 0.5,
            id: id(1),
        };
        assert_eq!(locate(&fused, &stale), None);
    }
}
