//! Measure-map comparison.
//!
//! A measure map is the ordered sequence of per-measure structural records
//! for one encoded piece. Where PCV divergence measures pitch content,
//! this comparator checks bar-level structure field by field; each field is
//! independently togglable because some (displayed number, name) legitimately
//! differ between encoding conventions without indicating real divergence.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeasureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One measure's structural record, as serialized in `.mm.json` files.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Measure {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(default)]
    pub count: Option<u32>,
    #[serde(default)]
    pub qstamp: Option<f64>,
    #[serde(default)]
    pub number: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub time_signature: Option<String>,
    #[serde(default)]
    pub nominal_length: Option<f64>,
    #[serde(default)]
    pub actual_length: Option<f64>,
    #[serde(default)]
    pub start_repeat: Option<bool>,
    #[serde(default)]
    pub end_repeat: Option<bool>,
    #[serde(default)]
    pub next: Option<Vec<i32>>,
}

/// An ordered measure map for one piece.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeasureMap {
    pub measures: Vec<Measure>,
}

impl MeasureMap {
    pub fn from_json_file(path: &Path) -> Result<Self, MeasureError> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }
}

/// Which measure attributes participate in a comparison. By default
/// identity tags and display names are ignored and everything structural
/// is checked; curation runs typically also drop `number`, `end_repeat`
/// and `next` via the ignore switches or the config file.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FieldFlags {
    pub id: bool,
    pub count: bool,
    pub qstamp: bool,
    pub number: bool,
    pub name: bool,
    pub time_signature: bool,
    pub nominal_length: bool,
    pub actual_length: bool,
    pub start_repeat: bool,
    pub end_repeat: bool,
    pub next: bool,
}

impl FieldFlags {
    /// Apply per-run ignore switches on top of the configured flags.
    /// Switches only ever disable a field; configured values survive
    /// otherwise.
    pub fn apply_ignores(mut self, number: bool, end_repeat: bool, next: bool) -> Self {
        if number {
            self.number = false;
        }
        if end_repeat {
            self.end_repeat = false;
        }
        if next {
            self.next = false;
        }
        self
    }
}

impl Default for FieldFlags {
    fn default() -> Self {
        Self {
            id: false,
            count: true,
            qstamp: true,
            number: true,
            name: false,
            time_signature: true,
            nominal_length: true,
            actual_length: true,
            start_repeat: true,
            end_repeat: true,
            next: true,
        }
    }
}

/// Severity buckets are capped here; anything with this many (or more)
/// mismatching fields, or a different measure count, reports the cap.
pub const SEVERITY_CAP: usize = 5;

fn float_eq(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).abs() < 1e-9,
        (None, None) => true,
        _ => false,
    }
}

/// Names of the enabled fields that mismatch anywhere across the two maps.
/// Assumes equal measure counts; callers handle length mismatch first.
fn mismatching_fields(a: &MeasureMap, b: &MeasureMap, flags: &FieldFlags) -> Vec<&'static str> {
    let mut fields = Vec::new();
    let mut check = |name: &'static str, enabled: bool, differs: bool| {
        if enabled && differs && !fields.contains(&name) {
            fields.push(name);
        }
    };

    for (ma, mb) in a.measures.iter().zip(&b.measures) {
        check("id", flags.id, ma.id != mb.id);
        check("count", flags.count, ma.count != mb.count);
        check("qstamp", flags.qstamp, !float_eq(ma.qstamp, mb.qstamp));
        check("number", flags.number, ma.number != mb.number);
        check("name", flags.name, ma.name != mb.name);
        check(
            "time_signature",
            flags.time_signature,
            ma.time_signature != mb.time_signature,
        );
        check(
            "nominal_length",
            flags.nominal_length,
            !float_eq(ma.nominal_length, mb.nominal_length),
        );
        check(
            "actual_length",
            flags.actual_length,
            !float_eq(ma.actual_length, mb.actual_length),
        );
        check("start_repeat", flags.start_repeat, ma.start_repeat != mb.start_repeat);
        check("end_repeat", flags.end_repeat, ma.end_repeat != mb.end_repeat);
        check("next", flags.next, ma.next != mb.next);
    }
    fields
}

/// Whether two maps agree on every enabled field, measure by measure.
pub fn maps_identical(a: &MeasureMap, b: &MeasureMap, flags: &FieldFlags) -> bool {
    a.len() == b.len() && mismatching_fields(a, b, flags).is_empty()
}

/// Quick diagnosis: a small severity bucket instead of a boolean, for
/// aggregate summaries. 0 = identical; otherwise the number of mismatching
/// fields, capped at [`SEVERITY_CAP`]. A measure-count mismatch is always
/// the cap.
pub fn diagnose(a: &MeasureMap, b: &MeasureMap, flags: &FieldFlags) -> usize {
    if a.len() != b.len() {
        return SEVERITY_CAP;
    }
    mismatching_fields(a, b, flags).len().min(SEVERITY_CAP)
}

/// Load measure maps for every piece of a filename series. A file that is
/// missing or fails to parse is logged and yields `None`; the piece is
/// later skipped rather than failing the batch.
pub fn load_measure_maps(
    dir: &Path,
    filenames: &BTreeMap<u32, Option<String>>,
) -> BTreeMap<u32, Option<MeasureMap>> {
    let mut result = BTreeMap::new();
    for (piece, filename) in filenames {
        let map = filename.as_ref().and_then(|name| {
            let path = dir.join(mm_filename(name));
            match MeasureMap::from_json_file(&path) {
                Ok(map) => Some(map),
                Err(e) => {
                    log::warn!("{} failed with {e}", path.display());
                    None
                }
            }
        });
        result.insert(*piece, map);
    }
    result
}

/// Swap a dataset filename's extension for the measure-map convention.
pub fn mm_filename(name: &str) -> String {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    format!("{stem}.mm.json")
}

/// Per-piece outcome of a map comparison run. `bucket` is `None` when the
/// piece was skipped for a missing map.
#[derive(Debug, Clone, PartialEq)]
pub struct MapComparison {
    pub piece: u32,
    pub bucket: Option<usize>,
}

/// Aggregate severity-bucket summary for one dataset pair. Skipped pieces
/// are excluded from the denominator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonSummary {
    pub buckets: BTreeMap<usize, usize>,
    pub compared: usize,
    pub skipped: usize,
}

impl ComparisonSummary {
    pub fn identical(&self) -> usize {
        self.buckets.get(&0).copied().unwrap_or(0)
    }

    /// Normalized bucket frequencies over the compared pieces.
    pub fn frequencies(&self) -> BTreeMap<usize, f64> {
        if self.compared == 0 {
            return BTreeMap::new();
        }
        self.buckets
            .iter()
            .map(|(bucket, count)| (*bucket, *count as f64 / self.compared as f64))
            .collect()
    }
}

/// Compare two per-piece map collections, piece by piece. Assumes both
/// collections are keyed on the canonical index; pieces missing a map on
/// either side are skipped and reported.
pub fn compare_all(
    preferred: &BTreeMap<u32, Option<MeasureMap>>,
    other: &BTreeMap<u32, Option<MeasureMap>>,
    flags: &FieldFlags,
) -> (Vec<MapComparison>, ComparisonSummary) {
    let pb = ProgressBar::new(preferred.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} pieces")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut comparisons = Vec::with_capacity(preferred.len());
    let mut summary = ComparisonSummary::default();
    for (piece, preferred_map) in preferred {
        pb.inc(1);
        let bucket = match (preferred_map, other.get(piece).and_then(|m| m.as_ref())) {
            (Some(a), Some(b)) => Some(diagnose(a, b, flags)),
            _ => {
                log::warn!("skipped R. {piece}: measure map missing on one side");
                None
            }
        };
        match bucket {
            Some(bucket) => {
                *summary.buckets.entry(bucket).or_insert(0) += 1;
                summary.compared += 1;
            }
            None => summary.skipped += 1,
        }
        comparisons.push(MapComparison {
            piece: *piece,
            bucket,
        });
    }
    pb.finish_and_clear();
    (comparisons, summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(number: i32, qstamp: f64) -> Measure {
        Measure {
            id: None,
            count: Some(number.unsigned_abs()),
            qstamp: Some(qstamp),
            number: Some(number),
            name: Some(format!("{number}")),
            time_signature: Some("4/4".to_string()),
            nominal_length: Some(4.0),
            actual_length: Some(4.0),
            start_repeat: Some(false),
            end_repeat: Some(false),
            next: Some(vec![number + 1]),
        }
    }

    fn map(n: usize) -> MeasureMap {
        MeasureMap {
            measures: (0..n).map(|i| measure(i as i32 + 1, i as f64 * 4.0)).collect(),
        }
    }

    #[test]
    fn test_identical_maps() {
        let a = map(4);
        assert!(maps_identical(&a, &a.clone(), &FieldFlags::default()));
        assert_eq!(diagnose(&a, &a.clone(), &FieldFlags::default()), 0);
    }

    #[test]
    fn test_disabled_fields_do_not_count() {
        let a = map(4);
        let mut b = map(4);
        // Display numbering and names shifted by one, as between anacrusis
        // conventions.
        for m in &mut b.measures {
            m.number = m.number.map(|n| n + 1);
            m.name = m.name.as_ref().map(|n| format!("x{n}"));
        }

        let mut flags = FieldFlags::default();
        flags.number = false;
        // name is off by default
        assert!(maps_identical(&a, &b, &flags));

        // Re-enabling either flag alone makes them differ.
        let mut number_on = flags;
        number_on.number = true;
        assert!(!maps_identical(&a, &b, &number_on));
        assert_eq!(diagnose(&a, &b, &number_on), 1);

        let mut name_on = flags;
        name_on.name = true;
        assert!(!maps_identical(&a, &b, &name_on));
        assert_eq!(diagnose(&a, &b, &name_on), 1);
    }

    #[test]
    fn test_length_mismatch_hits_cap() {
        let a = map(4);
        let b = map(5);
        assert!(!maps_identical(&a, &b, &FieldFlags::default()));
        assert_eq!(diagnose(&a, &b, &FieldFlags::default()), SEVERITY_CAP);
    }

    #[test]
    fn test_severity_counts_distinct_fields() {
        let a = map(4);
        let mut b = map(4);
        b.measures[2].qstamp = Some(99.0);
        b.measures[3].qstamp = Some(7.0);
        b.measures[1].actual_length = Some(3.0);
        // qstamp counts once despite differing in two measures.
        assert_eq!(diagnose(&a, &b, &FieldFlags::default()), 2);
    }

    #[test]
    fn test_apply_ignores_preserves_configured_flags() {
        // A configured `number = true` must survive a run with no ignore
        // switches; each switch only ever turns its field off.
        let configured = FieldFlags {
            number: true,
            ..FieldFlags::default()
        };
        let unchanged = configured.apply_ignores(false, false, false);
        assert!(unchanged.number);
        assert!(unchanged.end_repeat);
        assert!(unchanged.next);

        let trimmed = configured.apply_ignores(true, true, true);
        assert!(!trimmed.number);
        assert!(!trimmed.end_repeat);
        assert!(!trimmed.next);
        // Untouched fields keep their configured values.
        assert!(trimmed.qstamp);
        assert!(!trimmed.id);
    }

    #[test]
    fn test_default_flags_skip_identity_and_name_only() {
        let flags = FieldFlags::default();
        assert!(!flags.id);
        assert!(!flags.name);
        assert!(flags.count && flags.qstamp && flags.number);
        assert!(flags.time_signature && flags.nominal_length && flags.actual_length);
        assert!(flags.start_repeat && flags.end_repeat && flags.next);
    }

    #[test]
    fn test_mm_filename() {
        assert_eq!(mm_filename("chor001.krn"), "chor001.mm.json");
        assert_eq!(mm_filename("chor001"), "chor001.mm.json");
    }

    #[test]
    fn test_compare_all_skips_missing() {
        let mut preferred = BTreeMap::new();
        let mut other = BTreeMap::new();
        preferred.insert(1, Some(map(4)));
        preferred.insert(2, None);
        preferred.insert(3, Some(map(4)));
        other.insert(1, Some(map(4)));
        other.insert(2, Some(map(4)));
        other.insert(3, Some(map(5)));

        let (comparisons, summary) = compare_all(&preferred, &other, &FieldFlags::default());
        assert_eq!(comparisons.len(), 3);
        assert_eq!(summary.compared, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.identical(), 1);
        assert_eq!(summary.frequencies()[&0], 0.5);
        assert_eq!(summary.frequencies()[&SEVERITY_CAP], 0.5);
    }

    #[test]
    fn test_from_json_file() {
        let dir = std::env::temp_dir().join("choralign-test-mm");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("chor001.mm.json");
        fs::write(
            &path,
            r#"{"measures": [{"ID": "m1", "count": 1, "qstamp": 0.0, "number": 1,
                "time_signature": "3/4", "nominal_length": 3.0, "actual_length": 1.0,
                "start_repeat": false, "end_repeat": false, "next": [2]}]}"#,
        )
        .unwrap();

        let map = MeasureMap::from_json_file(&path).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.measures[0].id.as_deref(), Some("m1"));
        assert_eq!(map.measures[0].actual_length, Some(1.0));

        fs::remove_file(&path).ok();
    }
}
