//! Numbering alignment between the legacy CPE/Breitkopf indices and the
//! canonical Riemenschneider indices.
//!
//! The Breitkopf princeps edition assigned number 283 to two different
//! chorales; once the second occurrence ("283bis") is corrected to 284,
//! every legacy number from 284 on sits one position behind the canonical
//! numbering. Canonical indices up to 283 still need a per-piece lookup
//! because the duplicate permuted a handful of entries.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::pcv::PcvTable;
use crate::{canonical_range, PIECE_COUNT, SHIFT_BOUNDARY};

#[derive(Error, Debug)]
pub enum ReindexError {
    #[error("correction table does not cover canonical index {0}")]
    CoverageGap(u32),
    #[error("correction table maps canonical index {canonical} to legacy index {legacy}, outside 1..={max}", max = PIECE_COUNT)]
    LegacyOutOfRange { canonical: u32, legacy: u32 },
}

/// Corrects a raw legacy number as found in dataset filenames: the duplicate
/// "283bis" becomes 284, and every raw number from 284 on shifts up by one.
/// Plain 283 and everything below it pass through unchanged.
pub fn corrected_cpe_number(number: u32, bis: bool) -> u32 {
    if number == 283 && bis {
        284
    } else if number >= SHIFT_BOUNDARY {
        number + 1
    } else {
        number
    }
}

/// Lookup table mapping each canonical index below the discontinuity to the
/// legacy index whose row it should take. Canonical indices at or above
/// [`SHIFT_BOUNDARY`] always pass through unchanged, so the table only
/// carries entries for 1..=283.
///
/// Reindexing is idempotent only under the identity table; re-applying a
/// non-identity correction to already-canonical data permutes it a second
/// time. Callers must track which numbering their data carries.
#[derive(Debug, Clone)]
pub struct CorrectionTable {
    legacy_for: BTreeMap<u32, u32>,
}

impl CorrectionTable {
    /// The identity correction: every canonical index takes its own row.
    pub fn identity() -> Self {
        Self {
            legacy_for: (1..SHIFT_BOUNDARY).map(|i| (i, i)).collect(),
        }
    }

    /// Build from the CPE column of the metadata table. Entries at or above
    /// the discontinuity are ignored; they are covered by the pass-through.
    pub fn from_cpe_column(cpe: &BTreeMap<u32, u32>) -> Self {
        Self {
            legacy_for: cpe
                .iter()
                .filter(|(canonical, _)| **canonical < SHIFT_BOUNDARY)
                .map(|(canonical, legacy)| (*canonical, *legacy))
                .collect(),
        }
    }

    /// Number of canonical indices whose legacy counterpart differs.
    pub fn permuted_count(&self) -> usize {
        self.legacy_for.iter().filter(|(c, l)| c != l).count()
    }

    fn legacy_index(&self, canonical: u32) -> Result<u32, ReindexError> {
        let legacy = *self
            .legacy_for
            .get(&canonical)
            .ok_or(ReindexError::CoverageGap(canonical))?;
        if legacy == 0 || legacy > PIECE_COUNT {
            return Err(ReindexError::LegacyOutOfRange { canonical, legacy });
        }
        Ok(legacy)
    }

    /// Reindex a per-piece series from legacy numbering onto the canonical
    /// range. The output covers every canonical index; pieces absent from
    /// the input come out as `None` rather than being invented.
    pub fn reindex_series<T: Clone>(
        &self,
        rows: &BTreeMap<u32, T>,
    ) -> Result<BTreeMap<u32, Option<T>>, ReindexError> {
        let mut result = BTreeMap::new();
        for canonical in canonical_range() {
            let source = if canonical < SHIFT_BOUNDARY {
                self.legacy_index(canonical)?
            } else {
                canonical
            };
            result.insert(canonical, rows.get(&source).cloned());
        }
        Ok(result)
    }

    /// Reindex a whole PCV table from legacy numbering onto the canonical
    /// range. Missing pieces become undefined rows.
    pub fn reindex_table(&self, table: &PcvTable) -> Result<PcvTable, ReindexError> {
        let present: BTreeMap<u32, Vec<f64>> = table
            .pieces()
            .filter_map(|p| table.row(p).map(|r| (p, r.to_vec())))
            .collect();
        let reindexed = self.reindex_series(&present)?;

        let mut result = PcvTable::new(table.columns().to_vec());
        for (piece, row) in reindexed {
            match row {
                Some(values) => result.push_row(piece, values),
                None => result.push_missing(piece),
            }
        }
        Ok(result)
    }
}
