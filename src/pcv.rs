//! Pitch-class vector tables.
//!
//! A PCV table has one row per piece (canonical or legacy index) and one
//! column per tonal pitch class; cells hold summed note durations in quarter
//! beats. A piece absent from a dataset is an *undefined* row (`None`), which
//! is a different thing from a row of zeros: zero duration means the pitch
//! class never sounds, an undefined row means we have no data at all.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error in {path} line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("row for piece {piece} has {got} values, table has {expected} columns")]
    WidthMismatch {
        piece: u32,
        expected: usize,
        got: usize,
    },
}

/// One dataset's pitch-class vectors, one row per piece.
#[derive(Debug, Clone, PartialEq)]
pub struct PcvTable {
    columns: Vec<String>,
    rows: BTreeMap<u32, Option<Vec<f64>>>,
}

impl PcvTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: BTreeMap::new(),
        }
    }

    /// Build a table from per-piece sparse pitch-class → duration listings.
    /// The column set is the union of all labels, zero-filled where a piece
    /// never sounds a pitch class.
    pub fn from_sparse(entries: &[(u32, Vec<(&str, f64)>)]) -> Self {
        let mut labels: BTreeSet<&str> = BTreeSet::new();
        for (_, pcv) in entries {
            labels.extend(pcv.iter().map(|(label, _)| *label));
        }
        let columns: Vec<String> = labels.iter().map(|l| l.to_string()).collect();

        let mut table = Self::new(columns);
        for (piece, pcv) in entries {
            let mut row = vec![0.0; table.columns.len()];
            for (label, duration) in pcv {
                let col = table.columns.iter().position(|c| c == label).unwrap();
                row[col] += duration;
            }
            table.push_row(*piece, row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Piece indices in ascending order, including undefined rows.
    pub fn pieces(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    /// A piece's row, or `None` when the piece is absent or undefined.
    pub fn row(&self, piece: u32) -> Option<&[f64]> {
        self.rows.get(&piece).and_then(|r| r.as_deref())
    }

    pub fn contains(&self, piece: u32) -> bool {
        self.rows.contains_key(&piece)
    }

    pub fn push_row(&mut self, piece: u32, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.columns.len());
        self.rows.insert(piece, Some(values));
    }

    pub fn push_missing(&mut self, piece: u32) {
        self.rows.insert(piece, None);
    }

    /// True when the row carries no usable data: absent, undefined, or zero
    /// across every column. An all-zero row cannot be distinguished from a
    /// truncated transcription, so scoring treats it as "no data".
    pub fn is_null_row(&self, piece: u32) -> bool {
        match self.rows.get(&piece) {
            None | Some(None) => true,
            Some(Some(values)) => values.iter().all(|v| *v == 0.0 || v.is_nan()),
        }
    }

    /// Load a PCV table from a TSV file: first column is the piece index,
    /// remaining header fields are pitch-class labels. Only a fully blank
    /// value row marks the piece as undefined; a blank cell inside an
    /// otherwise populated row reads as 0.0, i.e. the pitch class is
    /// absent. Undefinedness is tracked per row, not per cell.
    pub fn load_tsv(path: &Path) -> Result<Self, TableError> {
        let content = fs::read_to_string(path)?;
        let display = path.display().to_string();
        let mut lines = content.lines().enumerate();

        let (_, header) = lines.next().ok_or_else(|| TableError::Parse {
            path: display.clone(),
            line: 1,
            message: "empty file".to_string(),
        })?;
        let columns: Vec<String> = header.split('\t').skip(1).map(|c| c.to_string()).collect();
        let mut table = Self::new(columns);

        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let piece_field = fields.next().unwrap_or("");
            let piece: u32 = piece_field.trim().parse().map_err(|_| TableError::Parse {
                path: display.clone(),
                line: idx + 1,
                message: format!("bad piece index {piece_field:?}"),
            })?;

            let cells: Vec<&str> = fields.collect();
            if cells.iter().all(|c| c.trim().is_empty()) {
                table.push_missing(piece);
                continue;
            }
            if cells.len() != table.columns.len() {
                return Err(TableError::WidthMismatch {
                    piece,
                    expected: table.columns.len(),
                    got: cells.len(),
                });
            }
            let mut values = Vec::with_capacity(cells.len());
            for cell in &cells {
                let trimmed = cell.trim();
                if trimmed.is_empty() {
                    values.push(0.0);
                    continue;
                }
                let v: f64 = trimmed.parse().map_err(|_| TableError::Parse {
                    path: display.clone(),
                    line: idx + 1,
                    message: format!("bad duration {trimmed:?}"),
                })?;
                values.push(v);
            }
            table.push_row(piece, values);
        }
        Ok(table)
    }

    /// Discover per-dataset PCV tables under a directory. Returns
    /// (dataset name, path) pairs for every `.tsv` file found.
    pub fn discover(dir: &Path) -> Vec<(String, PathBuf)> {
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tsv") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push((stem.to_string(), path.to_path_buf()));
            }
        }
        found.sort();
        found
    }
}

/// Equalize two tables to the same row set and column set.
///
/// Rows are unioned with absent rows becoming undefined — row alignment
/// never invents values. Columns are unioned with absent columns filled
/// with 0.0, since a pitch class absent from a transcription genuinely
/// contributes zero duration. Column order follows the wider table, with
/// the narrower table's extra columns appended in their own order; row and
/// column donors are picked independently. Results come back in the
/// original (a, b) call order.
pub fn reconcile(a: &PcvTable, b: &PcvTable) -> (PcvTable, PcvTable) {
    // Column union, wider table first.
    let (donor, other) = if a.width() >= b.width() { (a, b) } else { (b, a) };
    let mut columns = donor.columns.clone();
    for col in &other.columns {
        if !columns.contains(col) {
            columns.push(col.clone());
        }
    }

    // Row union; BTreeMap keeps the index sorted either way.
    let pieces: BTreeSet<u32> = a.pieces().chain(b.pieces()).collect();

    let widen = |table: &PcvTable| -> PcvTable {
        let mapping: Vec<Option<usize>> = columns
            .iter()
            .map(|c| table.columns.iter().position(|tc| tc == c))
            .collect();
        let mut result = PcvTable::new(columns.clone());
        for &piece in &pieces {
            match table.row(piece) {
                Some(row) => {
                    let values = mapping
                        .iter()
                        .map(|m| m.map(|i| row[i]).unwrap_or(0.0))
                        .collect();
                    result.push_row(piece, values);
                }
                None => result.push_missing(piece),
            }
        }
        result
    };

    (widen(a), widen(b))
}
