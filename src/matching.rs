//! Cross-dataset match resolution.
//!
//! For every piece of a reference dataset, find its zero-or-low-divergence
//! counterpart in a candidate dataset and classify the result. A piece whose
//! own candidate row scores exactly zero is accepted outright; otherwise the
//! nearest-match search runs over all candidates and ties are surfaced for
//! human scrutiny.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::divergence::{best_matches, score_tables};
use crate::pcv::{reconcile, PcvTable};

#[derive(Error, Debug)]
pub enum MatchError {
    /// The tie set must contain at least the piece itself; an empty set
    /// means the candidate table could not score anything at all.
    #[error("no candidate produced a score for piece {0}; self-comparison must yield its own minimum")]
    ZeroCandidates(u32),
}

/// Per-piece classification. The four cases are disjoint; only the fields
/// relevant to each case are carried.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Unique zero-divergence match (identity or accepted rematch).
    Matched { candidate: u32, score: f64 },
    /// Unique best match with nonzero divergence; resolvable but needs review.
    Tentative { candidate: u32, score: f64 },
    /// Multiple candidates tied for best; ids ascending.
    Ambiguous { candidates: Vec<u32>, score: f64 },
    /// Reference row undefined; no match attempted.
    Unmatchable,
}

impl MatchOutcome {
    /// Structural test distinguishing single-candidate results from tied
    /// tuples — ambiguity is a shape property, not a score property.
    pub fn is_single_candidate(&self) -> bool {
        matches!(self, Self::Matched { .. } | Self::Tentative { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Matched { score, .. }
            | Self::Tentative { score, .. }
            | Self::Ambiguous { score, .. } => Some(*score),
            Self::Unmatchable => None,
        }
    }

    pub fn candidates(&self) -> &[u32] {
        match self {
            Self::Matched { candidate, .. } | Self::Tentative { candidate, .. } => {
                std::slice::from_ref(candidate)
            }
            Self::Ambiguous { candidates, .. } => candidates,
            Self::Unmatchable => &[],
        }
    }
}

/// One piece's match result against a candidate dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub piece: u32,
    /// Reference dataset's filename for the piece, when known.
    pub reference_file: Option<String>,
    pub outcome: MatchOutcome,
}

/// Match every reference piece against the candidate dataset.
///
/// With `auto_rematch` off, a piece that perfectly matches *other* pieces
/// but not its own id comes back `Ambiguous`/`Tentative` for further
/// scrutiny. With `auto_rematch` on, the first perfect match (lowest
/// candidate id) is accepted as `Matched` even under a different id.
pub fn match_datasets(
    reference: &PcvTable,
    candidate: &PcvTable,
    reference_files: &BTreeMap<u32, Option<String>>,
    auto_rematch: bool,
) -> Result<Vec<MatchResult>, MatchError> {
    let (reference, candidate) = reconcile(reference, candidate);
    let pairwise = score_tables(&reference, &candidate);

    let mut results = Vec::with_capacity(reference.len());
    for piece in reference.pieces() {
        let row = match reference.row(piece) {
            Some(row) => row,
            None => {
                results.push(MatchResult {
                    piece,
                    reference_file: None,
                    outcome: MatchOutcome::Unmatchable,
                });
                continue;
            }
        };
        let reference_file = reference_files.get(&piece).cloned().flatten();

        // Self-match takes priority over any other zero-score candidate:
        // when the piece's own counterpart already agrees exactly, the
        // search stops here.
        if pairwise.get(&piece) == Some(&Some(0.0)) {
            results.push(MatchResult {
                piece,
                reference_file,
                outcome: MatchOutcome::Matched {
                    candidate: piece,
                    score: 0.0,
                },
            });
            continue;
        }

        let best = best_matches(row, &candidate);
        if best.is_empty() {
            return Err(MatchError::ZeroCandidates(piece));
        }
        let score = best[0].1;
        let ids: Vec<u32> = best.iter().map(|(id, _)| *id).collect();

        let outcome = if auto_rematch && score == 0.0 {
            // Deterministic tie break: ids come back ascending, take the
            // lowest.
            log::info!(
                "piece {piece} automatically rematched with candidate {}{}",
                ids[0],
                if ids.len() > 1 {
                    format!(" (first of {ids:?})")
                } else {
                    String::new()
                }
            );
            MatchOutcome::Matched {
                candidate: ids[0],
                score,
            }
        } else if ids.len() == 1 {
            if score == 0.0 {
                MatchOutcome::Matched {
                    candidate: ids[0],
                    score,
                }
            } else {
                MatchOutcome::Tentative {
                    candidate: ids[0],
                    score,
                }
            }
        } else {
            MatchOutcome::Ambiguous {
                candidates: ids,
                score,
            }
        };

        results.push(MatchResult {
            piece,
            reference_file,
            outcome,
        });
    }
    Ok(results)
}

/// Pieces that matched within `acceptable_error` under a single candidate id.
pub fn unequivocal(results: &[MatchResult], acceptable_error: f64) -> Vec<&MatchResult> {
    results
        .iter()
        .filter(|r| {
            r.outcome.is_single_candidate()
                && r.outcome.score().is_some_and(|s| s <= acceptable_error)
        })
        .collect()
}

/// Pieces whose best match still diverges by more than `acceptable_error`.
pub fn tentative(results: &[MatchResult], acceptable_error: f64) -> Vec<&MatchResult> {
    results
        .iter()
        .filter(|r| r.outcome.score().is_some_and(|s| s > acceptable_error))
        .collect()
}

/// Pieces recorded with a tuple of tied candidate ids.
pub fn ambiguous(results: &[MatchResult]) -> Vec<&MatchResult> {
    results
        .iter()
        .filter(|r| matches!(r.outcome, MatchOutcome::Ambiguous { .. }))
        .collect()
}

/// Pieces absent from the reference dataset.
pub fn unmatchable(results: &[MatchResult]) -> Vec<&MatchResult> {
    results
        .iter()
        .filter(|r| r.outcome == MatchOutcome::Unmatchable)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pcv::PcvTable;

    fn no_files() -> BTreeMap<u32, Option<String>> {
        BTreeMap::new()
    }

    #[test]
    fn test_identity_match() {
        let a = PcvTable::from_sparse(&[(1, vec![("C", 1.0)]), (2, vec![("E", 2.0)])]);
        let results = match_datasets(&a, &a.clone(), &no_files(), false).unwrap();
        for r in &results {
            assert_eq!(
                r.outcome,
                MatchOutcome::Matched {
                    candidate: r.piece,
                    score: 0.0
                }
            );
        }
    }

    #[test]
    fn test_self_match_priority_over_duplicate() {
        // Candidate 1 and 7 have identical content; reference 1 must match
        // candidate 1, not the duplicate, and without ambiguity.
        let reference = PcvTable::from_sparse(&[(1, vec![("C", 1.0)])]);
        let candidate =
            PcvTable::from_sparse(&[(1, vec![("C", 1.0)]), (7, vec![("C", 1.0)])]);
        let results = match_datasets(&reference, &candidate, &no_files(), false).unwrap();

        let r1 = results.iter().find(|r| r.piece == 1).unwrap();
        assert_eq!(
            r1.outcome,
            MatchOutcome::Matched {
                candidate: 1,
                score: 0.0
            }
        );
    }

    #[test]
    fn test_offset_duplicates_are_ambiguous_without_rematch() {
        // Reference 1's content lives at candidates 2, 5 and 9 but not at 1.
        let reference = PcvTable::from_sparse(&[(1, vec![("C", 1.0)])]);
        let candidate = PcvTable::from_sparse(&[
            (1, vec![("C", 9.0)]),
            (2, vec![("C", 1.0)]),
            (5, vec![("C", 1.0)]),
            (9, vec![("C", 1.0)]),
        ]);
        let results = match_datasets(&reference, &candidate, &no_files(), false).unwrap();
        let r1 = results.iter().find(|r| r.piece == 1).unwrap();
        assert_eq!(
            r1.outcome,
            MatchOutcome::Ambiguous {
                candidates: vec![2, 5, 9],
                score: 0.0
            }
        );
        assert!(!r1.outcome.is_single_candidate());
    }

    #[test]
    fn test_auto_rematch_takes_lowest_id() {
        let reference = PcvTable::from_sparse(&[(1, vec![("C", 1.0)])]);
        let candidate = PcvTable::from_sparse(&[
            (1, vec![("C", 9.0)]),
            (2, vec![("C", 1.0)]),
            (5, vec![("C", 1.0)]),
            (9, vec![("C", 1.0)]),
        ]);
        let results = match_datasets(&reference, &candidate, &no_files(), true).unwrap();
        let r1 = results.iter().find(|r| r.piece == 1).unwrap();
        assert_eq!(
            r1.outcome,
            MatchOutcome::Matched {
                candidate: 2,
                score: 0.0
            }
        );
    }

    #[test]
    fn test_tentative_single_best() {
        let reference = PcvTable::from_sparse(&[(1, vec![("C", 1.0)])]);
        let candidate =
            PcvTable::from_sparse(&[(1, vec![("C", 1.5)]), (2, vec![("C", 4.0)])]);
        let results = match_datasets(&reference, &candidate, &no_files(), false).unwrap();
        let r1 = results.iter().find(|r| r.piece == 1).unwrap();
        assert_eq!(
            r1.outcome,
            MatchOutcome::Tentative {
                candidate: 1,
                score: 0.5
            }
        );
    }

    #[test]
    fn test_unmatchable_reference_row() {
        let mut reference = PcvTable::new(vec!["C".to_string()]);
        reference.push_missing(1);
        reference.push_row(2, vec![1.0]);
        let candidate = PcvTable::from_sparse(&[(2, vec![("C", 1.0)])]);
        let results = match_datasets(&reference, &candidate, &no_files(), false).unwrap();

        let r1 = results.iter().find(|r| r.piece == 1).unwrap();
        assert_eq!(r1.outcome, MatchOutcome::Unmatchable);
        assert_eq!(unmatchable(&results).len(), 1);
    }

    #[test]
    fn test_zero_candidates_is_fatal() {
        let reference = PcvTable::from_sparse(&[(1, vec![("C", 1.0)])]);
        let mut candidate = PcvTable::new(vec!["C".to_string()]);
        candidate.push_missing(1);
        match match_datasets(&reference, &candidate, &no_files(), false) {
            Err(MatchError::ZeroCandidates(1)) => {}
            other => panic!("expected ZeroCandidates, got {other:?}"),
        }
    }

    #[test]
    fn test_filters() {
        let reference = PcvTable::from_sparse(&[
            (1, vec![("C", 1.0)]),
            (2, vec![("C", 2.0)]),
        ]);
        let candidate = PcvTable::from_sparse(&[
            (1, vec![("C", 1.0)]),
            (2, vec![("C", 2.5)]),
        ]);
        let results = match_datasets(&reference, &candidate, &no_files(), false).unwrap();
        assert_eq!(unequivocal(&results, 0.0).len(), 1);
        assert_eq!(tentative(&results, 0.0).len(), 1);
        assert!(ambiguous(&results).is_empty());
    }
}
