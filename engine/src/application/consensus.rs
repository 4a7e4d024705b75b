// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Majority-vote consensus across agents.
//!
//! Ties are broken by the ordering of the decision type, so the same votes
//! always produce the same decision.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult<D: Ord> {
    /// `None` only when no votes were cast
    pub decision: Option<D>,
    pub majority_count: usize,
    pub total_votes: usize,
    /// `1 - majority_count / total_votes`
    pub dissension_level: f64,
    pub tally: BTreeMap<D, usize>,
}

/// One vote per agent. Agents voting twice keep their last vote.
pub fn majority_vote<A, D>(votes: impl IntoIterator<Item = (A, D)>) -> ConsensusResult<D>
where
    A: Ord,
    D: Ord + Clone,
{
    let ballots: BTreeMap<A, D> = votes.into_iter().collect();
    let mut tally: BTreeMap<D, usize> = BTreeMap::new();
    for decision in ballots.into_values() {
        *tally.entry(decision).or_default() += 1;
    }
    let total_votes: usize = tally.values().sum();

    // First maximum in key order wins ties
    let mut winner: Option<(&D, usize)> = None;
    for (decision, count) in &tally {
        if winner.is_none_or(|(_, best)| *count > best) {
            winner = Some((decision, *count));
        }
    }

    let (decision, majority_count) = match winner {
        Some((d, c)) => (Some(d.clone()), c),
        None => (None, 0),
    };
    ConsensusResult {
        decision,
        majority_count,
        total_votes,
        dissension_level: if total_votes == 0 {
            0.0
        } else {
            1.0 - majority_count as f64 / total_votes as f64
        },
        tally,
    }
}

/// Weighted variant: each vote carries a non-negative weight. Returns the
/// decision with the highest total weight and its share of all weight.
pub fn weighted_vote<D>(votes: impl IntoIterator<Item = (D, f64)>) -> Option<(D, f64)>
where
    D: Ord + Clone,
{
    let mut totals: BTreeMap<D, f64> = BTreeMap::new();
    for (decision, weight) in votes {
        if weight.is_finite() && weight > 0.0 {
            *totals.entry(decision).or_default() += weight;
        }
    }
    let sum: f64 = totals.values().sum();
    let mut best: Option<(&D, f64)> = None;
    for (decision, weight) in &totals {
        if best.is_none_or(|(_, w)| *weight > w) {
            best = Some((decision, *weight));
        }
    }
    best.map(|(d, w)| (d.clone(), w / sum))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_majority_and_dissension() {
        let result = majority_vote([
            ("agent-1", "bid"),
            ("agent-2", "bid"),
            ("agent-3", "no_bid"),
            ("agent-4", "bid"),
        ]);
        assert_eq!(result.decision, Some("bid"));
        assert_eq!(result.majority_count, 3);
        assert_eq!(result.total_votes, 4);
        assert!((result.dissension_level - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_ties_break_lexicographically() {
        let result = majority_vote([("b", "zeta"), ("a", "alpha")]);
        assert_eq!(result.decision, Some("alpha"));
        assert!((result.dissension_level - 0.5).abs() < 1e-12);

        let reversed = majority_vote([("a", "alpha"), ("b", "zeta")]);
        assert_eq!(reversed.decision, result.decision);
    }

    #[test]
    fn test_repeat_voter_counts_once() {
        let result = majority_vote([("a", 1), ("a", 2), ("b", 2)]);
        assert_eq!(result.total_votes, 2);
        assert_eq!(result.decision, Some(2));
        assert_eq!(result.dissension_level, 0.0);
    }

    #[test]
    fn test_empty_vote() {
        let result = majority_vote(Vec::<(String, String)>::new());
        assert_eq!(result.decision, None);
        assert_eq!(result.dissension_level, 0.0);
    }

    #[test]
    fn test_weighted_vote() {
        let (decision, share) = weighted_vote([("a", 0.2), ("b", 0.5), ("a", 0.1), ("c", -1.0)]).unwrap();
        assert_eq!(decision, "b");
        assert!((share - 0.5 / 0.8).abs() < 1e-12);
        assert!(weighted_vote(Vec::<(String, f64)>::new()).is_none());
    }
}
