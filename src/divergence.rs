//! Null-aware divergence scoring between pitch-class vector tables.
//!
//! The score between two aligned rows is the sum of absolute differences
//! across all columns. A table row that is undefined or zero everywhere is
//! treated as "no data" and scores `None` instead of a large positive
//! number; a genuinely silent encoding would otherwise read as maximal
//! divergence.

use std::collections::BTreeMap;

use crate::pcv::{reconcile, PcvTable};

/// Summed absolute difference between two equal-length rows.
fn row_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum()
}

/// Per-piece divergence between two tables. Shapes are reconciled first;
/// a piece whose row is null on *either* side scores `None`.
pub fn score_tables(a: &PcvTable, b: &PcvTable) -> BTreeMap<u32, Option<f64>> {
    let (a, b) = reconcile(a, b);
    a.pieces()
        .map(|piece| {
            let score = if a.is_null_row(piece) || b.is_null_row(piece) {
                None
            } else {
                Some(row_error(a.row(piece).unwrap(), b.row(piece).unwrap()))
            };
            (piece, score)
        })
        .collect()
}

/// Score one known vector against every row of a table (broadcast mode,
/// used for nearest-match search). Only the table's null rows are
/// suppressed — a single known probe vector is never itself "no data".
/// The probe must already share the table's column layout.
pub fn broadcast_scores(probe: &[f64], table: &PcvTable) -> BTreeMap<u32, Option<f64>> {
    debug_assert_eq!(probe.len(), table.width());
    table
        .pieces()
        .map(|piece| {
            let score = if table.is_null_row(piece) {
                None
            } else {
                Some(row_error(probe, table.row(piece).unwrap()))
            };
            (piece, score)
        })
        .collect()
}

/// Candidate ids attaining the minimum broadcast score, in ascending id
/// order, together with that minimum. Empty when no candidate produced a
/// defined score.
pub fn best_matches(probe: &[f64], table: &PcvTable) -> Vec<(u32, f64)> {
    let scores = broadcast_scores(probe, table);
    let min = scores
        .values()
        .filter_map(|s| *s)
        .fold(f64::INFINITY, f64::min);
    if min.is_infinite() {
        return Vec::new();
    }
    scores
        .into_iter()
        .filter_map(|(piece, s)| s.filter(|s| *s == min).map(|s| (piece, s)))
        .collect()
}

/// How many pieces of a dataset pair agree within `acceptable_error`, how
/// many diverge, and how many could not be scored at all.
#[derive(Debug, Default, PartialEq)]
pub struct DivergenceCounts {
    pub matching: usize,
    pub diverging: usize,
    pub unscored: usize,
}

pub fn count_diverging(
    scores: &BTreeMap<u32, Option<f64>>,
    acceptable_error: f64,
) -> DivergenceCounts {
    let mut counts = DivergenceCounts::default();
    for score in scores.values() {
        match score {
            Some(s) if *s > acceptable_error => counts.diverging += 1,
            Some(_) => counts.matching += 1,
            None => counts.unscored += 1,
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcv::PcvTable;

    #[test]
    fn test_score_symmetry() {
        let a = PcvTable::from_sparse(&[
            (1, vec![("C", 1.0), ("E", 2.0)]),
            (2, vec![("C", 0.5), ("G", 1.5)]),
        ]);
        let b = PcvTable::from_sparse(&[
            (1, vec![("C", 2.0), ("E", 1.0)]),
            (2, vec![("G", 1.5), ("A", 0.25)]),
        ]);
        assert_eq!(score_tables(&a, &b), score_tables(&b, &a));
    }

    #[test]
    fn test_null_row_suppression() {
        let a = PcvTable::from_sparse(&[(1, vec![("C", 0.0), ("E", 0.0)])]);
        let b = PcvTable::from_sparse(&[(1, vec![("C", 4.0), ("E", 4.0)])]);
        let scores = score_tables(&a, &b);
        assert_eq!(scores[&1], None);
    }

    #[test]
    fn test_reconcile_then_score_scenario() {
        // A = {1: {C:1, E:1}}, B = {1: {C:1, E:1}, 2: {C:2}}:
        // piece 1 scores 0.0, piece 2 is undefined on A's side.
        let a = PcvTable::from_sparse(&[(1, vec![("C", 1.0), ("E", 1.0)])]);
        let b = PcvTable::from_sparse(&[
            (1, vec![("C", 1.0), ("E", 1.0)]),
            (2, vec![("C", 2.0)]),
        ]);
        let scores = score_tables(&a, &b);
        assert_eq!(scores[&1], Some(0.0));
        assert_eq!(scores[&2], None);
    }

    #[test]
    fn test_broadcast_has_no_probe_suppression() {
        let table = PcvTable::from_sparse(&[
            (1, vec![("C", 1.0)]),
            (2, vec![("C", 3.0)]),
        ]);
        // An all-zero probe is a known vector, not missing data.
        let scores = broadcast_scores(&[0.0], &table);
        assert_eq!(scores[&1], Some(1.0));
        assert_eq!(scores[&2], Some(3.0));
    }

    #[test]
    fn test_best_matches_ties_ascending() {
        let mut table = PcvTable::new(vec!["C".to_string()]);
        table.push_row(2, vec![1.0]);
        table.push_row(5, vec![1.0]);
        table.push_row(9, vec![1.0]);
        table.push_row(3, vec![7.0]);
        table.push_missing(4);

        let best = best_matches(&[1.0], &table);
        assert_eq!(best, vec![(2, 0.0), (5, 0.0), (9, 0.0)]);
    }

    #[test]
    fn test_best_matches_empty_when_all_null() {
        let mut table = PcvTable::new(vec!["C".to_string()]);
        table.push_missing(1);
        table.push_row(2, vec![0.0]);
        assert!(best_matches(&[1.0], &table).is_empty());
    }
}
