pub mod config;
pub mod curate;
pub mod divergence;
pub mod export;
pub mod matching;
pub mod measures;
pub mod metadata;
pub mod pcv;
pub mod reindex;

/// Number of chorales in the Riemenschneider edition.
pub const PIECE_COUNT: u32 = 371;

/// First canonical index past the CPE numbering discontinuity. Legacy
/// indices at or above this point sit one position behind the canonical
/// numbering because of the historical "283bis" duplicate.
pub const SHIFT_BOUNDARY: u32 = 284;

/// Application name for XDG paths
pub const APP_NAME: &str = "choralign";

/// The full canonical index range 1..=371.
pub fn canonical_range() -> impl Iterator<Item = u32> {
    1..=PIECE_COUNT
}
