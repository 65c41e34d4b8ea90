//! Permutation helpers
//!
//! Reorderings are kept as ordered maps from original position to new
//! position. Maps "with bubbles" may contain gaps and negative entries
//! (pipelined instructions pulled into the previous iteration); ranking
//! them yields a proper permutation of `0..n`.

use std::collections::{BTreeMap, BTreeSet};

/// A permutation of `0..n`, keyed by original position
pub type Permutation = BTreeMap<usize, usize>;

/// Check that `perm` is a bijection on `0..n`
pub fn is_permutation(perm: &Permutation, n: usize) -> bool {
    if perm.len() != n {
        return false;
    }
    let keys_ok = perm.keys().copied().eq(0..n);
    let mut values: Vec<usize> = perm.values().copied().collect();
    values.sort_unstable();
    keys_ok && values.into_iter().eq(0..n)
}

/// The identity permutation on `0..n`
pub fn identity(n: usize) -> Permutation {
    (0..n).map(|i| (i, i)).collect()
}

/// Invert a permutation
pub fn invert(perm: &Permutation) -> Permutation {
    perm.iter().map(|(&k, &v)| (v, k)).collect()
}

/// Replace every value by its rank among all values
///
/// Ties are broken by key, so the result is always a permutation of `0..len`.
pub fn rank(values: &BTreeMap<usize, i64>) -> Permutation {
    let mut sorted: Vec<(usize, i64)> = values.iter().map(|(&k, &v)| (k, v)).collect();
    sorted.sort_by_key(|&(k, v)| (v, k));
    sorted
        .into_iter()
        .enumerate()
        .map(|(rank, (k, _))| (k, rank))
        .collect()
}

/// [`rank`], or `None` if two keys share a value
pub fn strict_rank(values: &BTreeMap<usize, i64>) -> Option<Permutation> {
    let distinct: BTreeSet<i64> = values.values().copied().collect();
    (distinct.len() == values.len()).then(|| rank(values))
}

/// Reinterpret ranked positions as a permutation candidate
///
/// Returns `None` if any position is negative.
pub fn to_positions(values: &BTreeMap<usize, i64>) -> Option<Permutation> {
    values
        .iter()
        .map(|(&k, &v)| usize::try_from(v).ok().map(|v| (k, v)))
        .collect()
}

/// All pairs `i < j` whose relative order the permutation reverses
///
/// Yields `(i, j, perm[i], perm[j])`.
pub fn iter_swaps(perm: &Permutation) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
    perm.iter().flat_map(move |(&i, &pi)| {
        perm.range(i + 1..)
            .filter(move |&(_, &pj)| pj < pi)
            .map(move |(&j, &pj)| (i, j, pi, pj))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_rank_with_gaps_and_negatives() {
        let values: BTreeMap<usize, i64> = [(0, 7), (1, -2), (2, 3)].into_iter().collect();
        let ranked = rank(&values);
        assert_eq!(ranked, [(0, 2), (1, 0), (2, 1)].into_iter().collect());
        assert!(is_permutation(&ranked, 3));
    }

    #[test]
    fn test_iter_swaps() {
        // 0 -> 2, 1 -> 0, 2 -> 1: instruction 0 moved behind both others
        let perm: Permutation = [(0, 2), (1, 0), (2, 1)].into_iter().collect();
        let swaps: Vec<_> = iter_swaps(&perm).collect();
        assert_eq!(swaps, vec![(0, 1, 2, 0), (0, 2, 2, 1)]);
    }

    #[test]
    fn test_not_a_permutation() {
        let perm: Permutation = [(0, 1), (1, 1)].into_iter().collect();
        assert!(!is_permutation(&perm, 2));
        assert!(is_permutation(&identity(4), 4));
    }

    #[test]
    fn test_strict_rank_rejects_shared_slots() {
        let shared: BTreeMap<usize, i64> = [(0, 3), (1, 3)].into_iter().collect();
        assert_eq!(strict_rank(&shared), None);
        let gaps: BTreeMap<usize, i64> = [(0, 5), (1, -1)].into_iter().collect();
        assert_eq!(strict_rank(&gaps), Some([(0, 1), (1, 0)].into_iter().collect()));
    }

    #[test]
    fn test_to_positions_rejects_negative() {
        let values: BTreeMap<usize, i64> = [(0, 1), (1, -1)].into_iter().collect();
        assert_eq!(to_positions(&values), None);
        let values: BTreeMap<usize, i64> = [(0, 1), (1, 0)].into_iter().collect();
        assert_eq!(to_positions(&values), Some([(0, 1), (1, 0)].into_iter().collect()));
    }

    proptest! {
        #[test]
        fn prop_rank_is_permutation(values in proptest::collection::vec(-50i64..50, 0..20)) {
            let map: BTreeMap<usize, i64> = values.into_iter().enumerate().collect();
            let ranked = rank(&map);
            prop_assert!(is_permutation(&ranked, map.len()));
            let inv = invert(&ranked);
            for (k, v) in &ranked {
                prop_assert_eq!(inv[v], *k);
            }
        }
    }
}
