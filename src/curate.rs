//! Ground-truth curation.
//!
//! Automated matching resolves most of the corpus; the rest — transcription
//! divergences, pieces absent from one dataset, duplicate settings — needs a
//! musicological judgment call. Those calls live in a hand-maintained TOML
//! override table that is loaded read-only, diffed and reviewed like any
//! other versioned data, and validated against the current match results so
//! stale overrides cannot silently clobber the resolution.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::matching::{MatchOutcome, MatchResult};
use crate::metadata::Dataset;
use crate::pcv::PcvTable;
use crate::{canonical_range, PIECE_COUNT};

#[derive(Error, Debug)]
pub enum CurateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("override table parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("override key {0:?} is not a piece index in 1..={max}", max = PIECE_COUNT)]
    BadPieceKey(String),
    #[error("override for piece {0} names no source dataset")]
    EmptySources(u32),
    #[error("overrides clobber already-resolved pieces {0:?}; the table is stale")]
    OverrideConflict(Vec<u32>),
    #[error("curation left pieces unresolved: {0:?}")]
    Unresolved(Vec<u32>),
    #[error("piece {piece} resolved to {dataset} but that dataset has no row for it")]
    MissingSourceRow { piece: u32, dataset: Dataset },
}

/// One hand-authored judgment: which dataset(s) to trust for a piece, with
/// the musicological reason on record.
#[derive(Debug, Clone, Deserialize)]
pub struct OverrideEntry {
    /// Trusted source tags, preferred first.
    pub sources: Vec<Dataset>,
    #[serde(default)]
    pub note: String,
}

/// The manually curated override table, piece index → judgment.
#[derive(Debug, Clone, Default)]
pub struct OverrideTable {
    entries: BTreeMap<u32, OverrideEntry>,
}

#[derive(Deserialize)]
struct OverrideFile {
    #[serde(default)]
    overrides: BTreeMap<String, OverrideEntry>,
}

impl OverrideTable {
    pub fn load(path: &Path) -> Result<Self, CurateError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CurateError> {
        let file: OverrideFile = toml::from_str(content)?;
        let mut entries = BTreeMap::new();
        for (key, entry) in file.overrides {
            let piece: u32 = key
                .parse()
                .ok()
                .filter(|p| (1..=PIECE_COUNT).contains(p))
                .ok_or_else(|| CurateError::BadPieceKey(key.clone()))?;
            if entry.sources.is_empty() {
                return Err(CurateError::EmptySources(piece));
            }
            entries.insert(piece, entry);
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u32, &OverrideEntry)> {
        self.entries.iter().map(|(p, e)| (*p, e))
    }
}

/// The complete per-piece source resolution: every canonical index mapped to
/// exactly one dataset tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    sources: BTreeMap<u32, Dataset>,
}

impl Resolution {
    pub fn source(&self, piece: u32) -> Option<Dataset> {
        self.sources.get(&piece).copied()
    }

    pub fn sources(&self) -> impl Iterator<Item = (u32, Dataset)> + '_ {
        self.sources.iter().map(|(p, d)| (*p, *d))
    }

    /// How many pieces resolved to each dataset.
    pub fn counts(&self) -> BTreeMap<Dataset, usize> {
        let mut counts = BTreeMap::new();
        for source in self.sources.values() {
            *counts.entry(*source).or_insert(0usize) += 1;
        }
        counts
    }
}

/// Resolve every piece to one source dataset.
///
/// Pieces with a zero-divergence match default to the candidate dataset;
/// everything else — tentative, ambiguous, unmatchable — must be covered by
/// the override table. Two corpus-level invariants are enforced: an override
/// may never hit an already-resolved piece (that means the table is stale
/// relative to the current data or metric), and after all overrides no piece
/// may remain unresolved.
pub fn curate(
    results: &[MatchResult],
    overrides: &OverrideTable,
    default_source: Dataset,
) -> Result<Resolution, CurateError> {
    let mut working: BTreeMap<u32, Option<Dataset>> =
        canonical_range().map(|piece| (piece, None)).collect();

    for result in results {
        if let MatchOutcome::Matched { .. } = result.outcome {
            if let Some(slot) = working.get_mut(&result.piece) {
                *slot = Some(default_source);
            }
        }
    }

    let conflicts: Vec<u32> = overrides
        .entries()
        .filter(|(piece, _)| working.get(piece).map(|s| s.is_some()).unwrap_or(false))
        .map(|(piece, _)| piece)
        .collect();
    if !conflicts.is_empty() {
        return Err(CurateError::OverrideConflict(conflicts));
    }

    for (piece, entry) in overrides.entries() {
        if let Some(slot) = working.get_mut(&piece) {
            *slot = Some(entry.sources[0]);
        }
    }

    let unresolved: Vec<u32> = working
        .iter()
        .filter(|(_, source)| source.is_none())
        .map(|(piece, _)| *piece)
        .collect();
    if !unresolved.is_empty() {
        return Err(CurateError::Unresolved(unresolved));
    }

    Ok(Resolution {
        sources: working
            .into_iter()
            .map(|(piece, source)| (piece, source.unwrap()))
            .collect(),
    })
}

/// Assemble the authoritative PCV table by picking, for each piece, the row
/// from whichever dataset its resolution names. All source tables must
/// already be on the canonical index.
pub fn build_ground_truth(
    resolution: &Resolution,
    tables: &BTreeMap<Dataset, PcvTable>,
) -> Result<PcvTable, CurateError> {
    // Union column set across all contributing tables, donor order first.
    let mut columns: Vec<String> = Vec::new();
    for table in tables.values() {
        for col in table.columns() {
            if !columns.contains(col) {
                columns.push(col.clone());
            }
        }
    }

    let mut result = PcvTable::new(columns.clone());
    for (piece, source) in resolution.sources() {
        let table = tables
            .get(&source)
            .ok_or(CurateError::MissingSourceRow { piece, dataset: source })?;
        let row = table
            .row(piece)
            .ok_or(CurateError::MissingSourceRow { piece, dataset: source })?;
        let values = columns
            .iter()
            .map(|col| {
                table
                    .columns()
                    .iter()
                    .position(|c| c == col)
                    .map(|i| row[i])
                    .unwrap_or(0.0)
            })
            .collect();
        result.push_row(piece, values);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::match_datasets;

    fn full_corpus_tables() -> (PcvTable, PcvTable) {
        // Candidate agrees with the reference everywhere except piece 17,
        // and piece 150 is missing from the reference side.
        let mut reference = PcvTable::new(vec!["C".to_string()]);
        let mut candidate = PcvTable::new(vec!["C".to_string()]);
        for piece in canonical_range() {
            candidate.push_row(piece, vec![piece as f64]);
            if piece == 150 {
                reference.push_missing(piece);
            } else if piece == 17 {
                reference.push_row(piece, vec![piece as f64 + 0.5]);
            } else {
                reference.push_row(piece, vec![piece as f64]);
            }
        }
        (reference, candidate)
    }

    fn overrides(entries: &[(u32, Dataset)]) -> OverrideTable {
        let mut toml = String::from("[overrides]\n");
        for (piece, source) in entries {
            toml.push_str(&format!(
                "{piece} = {{ sources = [\"{}\"], note = \"reviewed\" }}\n",
                source.label()
            ));
        }
        OverrideTable::parse(&toml).unwrap()
    }

    #[test]
    fn test_curator_completeness_and_determinism() {
        let (reference, candidate) = full_corpus_tables();
        let results =
            match_datasets(&reference, &candidate, &BTreeMap::new(), false).unwrap();

        let table = overrides(&[(17, Dataset::Krn), (150, Dataset::Krn)]);
        let resolution = curate(&results, &table, Dataset::Krn).unwrap();

        for piece in canonical_range() {
            assert!(resolution.source(piece).is_some(), "piece {piece} unresolved");
        }
        assert_eq!(resolution.counts()[&Dataset::Krn], PIECE_COUNT as usize);

        // Re-running reproduces the identical resolution.
        let again = curate(&results, &table, Dataset::Krn).unwrap();
        assert_eq!(resolution, again);
    }

    #[test]
    fn test_override_conflict_is_fatal() {
        let (reference, candidate) = full_corpus_tables();
        let results =
            match_datasets(&reference, &candidate, &BTreeMap::new(), false).unwrap();

        // Piece 1 already resolves by default; an override for it means the
        // table is stale.
        let table = overrides(&[(1, Dataset::Cap), (17, Dataset::Krn), (150, Dataset::Krn)]);
        match curate(&results, &table, Dataset::Krn) {
            Err(CurateError::OverrideConflict(pieces)) => assert_eq!(pieces, vec![1]),
            other => panic!("expected OverrideConflict, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_residue_is_fatal() {
        let (reference, candidate) = full_corpus_tables();
        let results =
            match_datasets(&reference, &candidate, &BTreeMap::new(), false).unwrap();

        let table = overrides(&[(17, Dataset::Krn)]); // 150 left uncovered
        match curate(&results, &table, Dataset::Krn) {
            Err(CurateError::Unresolved(pieces)) => assert_eq!(pieces, vec![150]),
            other => panic!("expected Unresolved, got {other:?}"),
        }
    }

    #[test]
    fn test_ground_truth_selects_per_source() {
        let krn = PcvTable::from_sparse(&[(1, vec![("C", 1.0)]), (2, vec![("C", 9.0)])]);
        let cap = PcvTable::from_sparse(&[(1, vec![("C", 5.0)]), (2, vec![("C", 2.0)])]);
        let mut tables = BTreeMap::new();
        tables.insert(Dataset::Krn, krn);
        tables.insert(Dataset::Cap, cap);

        let resolution = Resolution {
            sources: [(1u32, Dataset::Krn), (2u32, Dataset::Cap)].into_iter().collect(),
        };
        let truth = build_ground_truth(&resolution, &tables).unwrap();
        assert_eq!(truth.row(1), Some(&[1.0][..]));
        assert_eq!(truth.row(2), Some(&[2.0][..]));
    }

    #[test]
    fn test_ground_truth_missing_source_row_is_fatal() {
        let krn = PcvTable::from_sparse(&[(1, vec![("C", 1.0)])]);
        let mut tables = BTreeMap::new();
        tables.insert(Dataset::Krn, krn);

        let resolution = Resolution {
            sources: [(1u32, Dataset::Krn), (2u32, Dataset::Krn)].into_iter().collect(),
        };
        match build_ground_truth(&resolution, &tables) {
            Err(CurateError::MissingSourceRow { piece: 2, .. }) => {}
            other => panic!("expected MissingSourceRow, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_override_key() {
        let toml = "[overrides]\n999 = { sources = [\"krn\"] }\n";
        match OverrideTable::parse(toml) {
            Err(CurateError::BadPieceKey(key)) => assert_eq!(key, "999"),
            other => panic!("expected BadPieceKey, got {other:?}"),
        }
    }
}
