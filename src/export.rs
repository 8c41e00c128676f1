//! Flat tabular exports. Everything the pipeline produces goes out as TSV
//! keyed by the canonical piece index; downstream consumers join on that
//! column.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::curate::Resolution;
use crate::matching::{MatchOutcome, MatchResult};
use crate::measures::ComparisonSummary;
use crate::metadata::{Dataset, Metadata};
use crate::pcv::PcvTable;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn write_file(path: &Path, content: &str) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    log::info!("stored {}", path.display());
    Ok(())
}

fn fmt_duration(v: f64) -> String {
    // Durations are quarter-beat sums; trim the float noise but keep
    // fractional beats exact enough to diff.
    if v == v.trunc() {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

/// One dataset's PCV collection: piece index × pitch class.
pub fn write_pcv_table(path: &Path, table: &PcvTable) -> Result<(), ExportError> {
    let mut out = String::from("piece");
    for col in table.columns() {
        let _ = write!(out, "\t{col}");
    }
    out.push('\n');
    for piece in table.pieces() {
        let _ = write!(out, "{piece}");
        match table.row(piece) {
            Some(row) => {
                for v in row {
                    let _ = write!(out, "\t{}", fmt_duration(*v));
                }
            }
            None => {
                for _ in table.columns() {
                    out.push('\t');
                }
            }
        }
        out.push('\n');
    }
    write_file(path, &out)
}

/// The curated ground-truth collection with its per-piece source tag.
pub fn write_ground_truth(
    path: &Path,
    table: &PcvTable,
    resolution: &Resolution,
) -> Result<(), ExportError> {
    let mut out = String::from("piece\tsource_dataset");
    for col in table.columns() {
        let _ = write!(out, "\t{col}");
    }
    out.push('\n');
    for piece in table.pieces() {
        let source = resolution
            .source(piece)
            .map(|d| d.label())
            .unwrap_or_default();
        let _ = write!(out, "{piece}\t{source}");
        if let Some(row) = table.row(piece) {
            for v in row {
                let _ = write!(out, "\t{}", fmt_duration(*v));
            }
        }
        out.push('\n');
    }
    write_file(path, &out)
}

/// Canonical cross-reference table: every dataset's filename per piece.
pub fn write_metadata(path: &Path, metadata: &Metadata) -> Result<(), ExportError> {
    let mut out = String::from("piece\tcpe\tbwv\ttitle\tkrn_file\tcap_file\txml_file\n");
    for (piece, record) in metadata.records() {
        let cpe = record.cpe.map(|c| c.to_string()).unwrap_or_default();
        let _ = writeln!(
            out,
            "{piece}\t{cpe}\t{}\t{}\t{}\t{}\t{}",
            record.bwv.as_deref().unwrap_or(""),
            record.title.as_deref().unwrap_or(""),
            record.krn_file.as_deref().unwrap_or(""),
            record.cap_file.as_deref().unwrap_or(""),
            record.xml_file.as_deref().unwrap_or(""),
        );
    }
    write_file(path, &out)
}

/// Aligned per-dataset filenames on the canonical index.
pub fn write_aligned_files(
    path: &Path,
    columns: &[(Dataset, BTreeMap<u32, Option<String>>)],
) -> Result<(), ExportError> {
    let mut out = String::from("piece");
    for (dataset, _) in columns {
        let _ = write!(out, "\t{}", dataset.filename_column());
    }
    out.push('\n');
    for piece in crate::canonical_range() {
        let _ = write!(out, "{piece}");
        for (_, names) in columns {
            let name = names.get(&piece).cloned().flatten().unwrap_or_default();
            let _ = write!(out, "\t{name}");
        }
        out.push('\n');
    }
    write_file(path, &out)
}

/// Per-piece match results for one dataset pair. Tied candidate tuples are
/// comma-joined; unmatchable pieces leave all three columns blank.
pub fn write_match_results(path: &Path, results: &[MatchResult]) -> Result<(), ExportError> {
    let mut out = String::from("piece\tfile_to_be_matched\terror\tids\n");
    for result in results {
        let file = result.reference_file.as_deref().unwrap_or("");
        let (score, ids) = match &result.outcome {
            MatchOutcome::Unmatchable => (String::new(), String::new()),
            outcome => {
                let score = outcome
                    .score()
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                let ids = outcome
                    .candidates()
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                (score, ids)
            }
        };
        let _ = writeln!(out, "{}\t{file}\t{score}\t{ids}", result.piece);
    }
    write_file(path, &out)
}

/// Severity-bucket value counts and normalized frequencies for one
/// measure-map dataset pair.
pub fn write_measure_summary(
    path: &Path,
    pair: &str,
    summary: &ComparisonSummary,
) -> Result<(), ExportError> {
    let frequencies = summary.frequencies();
    let mut out = String::from("pair\tbucket\tcount\tfrequency\n");
    for (bucket, count) in &summary.buckets {
        let _ = writeln!(
            out,
            "{pair}\t{bucket}\t{count}\t{:.4}",
            frequencies.get(bucket).copied().unwrap_or(0.0)
        );
    }
    let _ = writeln!(out, "{pair}\tskipped\t{}\t", summary.skipped);
    write_file(path, &out)
}
