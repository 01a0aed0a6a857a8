//! Enumerates the probe combinations a sample could have been spiked with.
//!
//! A sample is defined by *which* probes were added, so the enumeration uses
//! combinations (no repeats, order irrelevant) rather than permutations. The
//! output order follows the panel order and is fully deterministic.

use crate::types::ProbeCombination;
use itertools::Itertools;

/// Every `n`-probe subset of `probes`, in lexicographic order of panel position.
pub fn spike_in_combinations(probes: &[String], n: usize) -> Vec<ProbeCombination> {
    probes
        .iter()
        .combinations(n)
        .map(ProbeCombination::new)
        .collect()
}

/// The number of `n`-probe subsets of `m` probes, C(m, n).
///
/// Returns `None` only if the count does not fit in a `u64`.
pub fn combination_count(m: usize, n: usize) -> Option<u64> {
    if n > m {
        return Some(0);
    }
    let k = n.min(m - n) as u128;
    let m = m as u128;
    // Each partial quotient is itself a binomial coefficient, so the division is exact.
    // A product that overflows u128 implies the next coefficient already exceeds u64.
    let count = (0..k).try_fold(1u128, |acc, i| {
        acc.checked_mul(m - i).map(|product| product / (i + 1))
    })?;
    u64::try_from(count).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn probes(m: usize) -> Vec<String> {
        (1..=m).map(|i| format!("P{i}")).collect()
    }

    #[test]
    fn ten_probes_give_one_hundred_twenty_trios() {
        let trios = spike_in_combinations(&probes(10), 3);
        assert_eq!(trios.len(), 120);
        assert_eq!(combination_count(10, 3), Some(120));
    }

    #[test]
    fn enumeration_matches_binomial_for_small_panels() {
        for m in 1..=9 {
            for n in 1..=m {
                let combos = spike_in_combinations(&probes(m), n);
                assert_eq!(Some(combos.len() as u64), combination_count(m, n), "C({m}, {n})");
                assert!(combos.iter().all(|c| c.len() == n));
                let distinct: HashSet<&ProbeCombination> = combos.iter().collect();
                assert_eq!(distinct.len(), combos.len(), "duplicate set in C({m}, {n})");
            }
        }
    }

    #[test]
    fn oversized_trio_yields_nothing() {
        assert!(spike_in_combinations(&probes(2), 3).is_empty());
        assert_eq!(combination_count(2, 3), Some(0));
    }

    #[test]
    fn enumeration_is_deterministic() {
        let first = spike_in_combinations(&probes(6), 3);
        let second = spike_in_combinations(&probes(6), 3);
        assert_eq!(first, second);
        assert_eq!(first[0], ProbeCombination::new(["P1", "P2", "P3"]));
    }

    #[test]
    fn large_counts_do_not_overflow() {
        assert_eq!(combination_count(60, 30), Some(118_264_581_564_861_424));
        assert_eq!(combination_count(64, 32), Some(1_832_624_140_942_590_534));
        assert_eq!(combination_count(68, 34), None);
    }
}
