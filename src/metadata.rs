//! Canonical metadata table keyed by Riemenschneider index.
//!
//! Assembled upstream from the chorale table scrape, the kern index and the
//! engraving-corpus file listing; this crate only consumes the prepared TSV
//! and serves filename series and the CPE correction column to the pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reindex::{CorrectionTable, ReindexError};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("metadata table is missing column {0:?}")]
    MissingColumn(&'static str),
    #[error("parse error in metadata line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Source dataset tags. `Krn` carries the canonical numbering natively;
/// `Cap` and `Xml` arrive in corrected CPE numbering and need the
/// Riemenschneider alignment before any cross-dataset comparison.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// craigsapp kern transcriptions
    Krn,
    /// score-engraving corpus (DCML capella/MuseScore files)
    Cap,
    /// MusicXML analysis corpus
    Xml,
    /// curated ground-truth selection
    GroundTruth,
}

impl Dataset {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Krn => "krn",
            Self::Cap => "cap",
            Self::Xml => "xml",
            Self::GroundTruth => "groundtruth",
        }
    }

    /// The metadata column holding this dataset's per-piece filename. The
    /// ground truth has no files of its own; its pieces are identified by
    /// the kern title.
    pub fn filename_column(&self) -> &'static str {
        match self {
            Self::Krn => "krn_file",
            Self::Cap => "cap_file",
            Self::Xml => "xml_file",
            Self::GroundTruth => "title",
        }
    }

    /// Whether this dataset's native numbering is corrected CPE and must be
    /// reindexed onto the canonical range.
    pub fn needs_alignment(&self) -> bool {
        matches!(self, Self::Cap | Self::Xml)
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One chorale's cross-reference record.
#[derive(Debug, Clone, Default)]
pub struct PieceRecord {
    pub cpe: Option<u32>,
    pub bwv: Option<String>,
    pub title: Option<String>,
    pub krn_file: Option<String>,
    pub cap_file: Option<String>,
    pub xml_file: Option<String>,
}

/// The canonical metadata table, one record per Riemenschneider index.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    records: BTreeMap<u32, PieceRecord>,
}

impl Metadata {
    /// Load the prepared metadata TSV. Expected columns: `piece`, `cpe`,
    /// `bwv`, `title`, `krn_file`, `cap_file`, `xml_file`; blank cells mean
    /// the piece is absent from that dataset.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let content = fs::read_to_string(path)?;
        let mut lines = content.lines().enumerate();

        let (_, header) = lines.next().ok_or(MetadataError::Parse {
            line: 1,
            message: "empty file".to_string(),
        })?;
        let names: Vec<&str> = header.split('\t').map(|c| c.trim()).collect();
        let col = |name: &'static str| -> Result<usize, MetadataError> {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or(MetadataError::MissingColumn(name))
        };
        let piece_col = col("piece")?;
        let cpe_col = col("cpe")?;
        let bwv_col = col("bwv")?;
        let title_col = col("title")?;
        let krn_col = col("krn_file")?;
        let cap_col = col("cap_file")?;
        let xml_col = col("xml_file")?;

        let mut records = BTreeMap::new();
        for (idx, line) in lines {
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            let cell = |i: usize| -> Option<String> {
                fields
                    .get(i)
                    .map(|f| f.trim())
                    .filter(|f| !f.is_empty())
                    .map(|f| f.to_string())
            };
            let piece: u32 = cell(piece_col)
                .and_then(|p| p.parse().ok())
                .ok_or(MetadataError::Parse {
                    line: idx + 1,
                    message: "bad piece index".to_string(),
                })?;
            let cpe = match cell(cpe_col) {
                Some(c) => Some(c.parse().map_err(|_| MetadataError::Parse {
                    line: idx + 1,
                    message: format!("bad cpe number {c:?}"),
                })?),
                None => None,
            };
            records.insert(
                piece,
                PieceRecord {
                    cpe,
                    bwv: cell(bwv_col),
                    title: cell(title_col),
                    krn_file: cell(krn_col),
                    cap_file: cell(cap_col),
                    xml_file: cell(xml_col),
                },
            );
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = (u32, &PieceRecord)> {
        self.records.iter().map(|(p, r)| (*p, r))
    }

    /// Per-piece filenames for one dataset, pieces without a file omitted.
    pub fn filenames(&self, dataset: Dataset) -> BTreeMap<u32, String> {
        self.records
            .iter()
            .filter_map(|(piece, record)| {
                let name = match dataset {
                    Dataset::Krn => &record.krn_file,
                    Dataset::Cap => &record.cap_file,
                    Dataset::Xml => &record.xml_file,
                    Dataset::GroundTruth => &record.title,
                };
                name.clone().map(|n| (*piece, n))
            })
            .collect()
    }

    /// The CPE column: canonical index → legacy index.
    pub fn cpe_column(&self) -> BTreeMap<u32, u32> {
        self.records
            .iter()
            .filter_map(|(piece, record)| record.cpe.map(|c| (*piece, c)))
            .collect()
    }

    /// The legacy→canonical correction table derived from the CPE column.
    pub fn correction_table(&self) -> CorrectionTable {
        CorrectionTable::from_cpe_column(&self.cpe_column())
    }

    /// Filenames for one dataset on the canonical index, reindexing
    /// CPE-numbered datasets through the correction table.
    pub fn aligned_filenames(
        &self,
        dataset: Dataset,
        correction: &CorrectionTable,
    ) -> Result<BTreeMap<u32, Option<String>>, ReindexError> {
        let names = self.filenames(dataset);
        if dataset.needs_alignment() {
            correction.reindex_series(&names)
        } else {
            Ok(crate::canonical_range()
                .map(|piece| (piece, names.get(&piece).cloned()))
                .collect())
        }
    }
}
