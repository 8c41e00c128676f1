use anyhow::{Context, Result};
use choralign::curate::{self, OverrideTable};
use choralign::{divergence, export};
use choralign::matching::{self, MatchOutcome, MatchResult};
use choralign::measures;
use choralign::metadata::{Dataset, Metadata};
use choralign::pcv::{reconcile, PcvTable};
use choralign::reindex::CorrectionTable;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "choralign",
    version,
    about = "Reconcile the 371 Bach chorales across datasets"
)]
struct Cli {
    /// Directory holding the input tables (metadata TSV, pcvs/, measure maps)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Directory for tabular exports (defaults to the current directory)
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the canonical cross-reference tables (metadata + aligned filenames)
    Align,

    /// Match one dataset's pieces against another and classify the results
    Compare {
        /// Reference dataset (its pieces drive the search)
        #[arg(value_enum)]
        reference: Dataset,

        /// Candidate dataset searched for counterparts
        #[arg(value_enum)]
        candidate: Dataset,

        /// Accept the first perfect match even under a different id
        #[arg(long)]
        auto_rematch: bool,

        /// Divergence up to this value still counts as agreement
        #[arg(long)]
        acceptable_error: Option<f64>,
    },

    /// Resolve every piece to one source dataset and export the ground truth
    Curate {
        /// Override table (TOML); defaults to <data-dir>/overrides.toml
        #[arg(long)]
        overrides: Option<PathBuf>,
    },

    /// Compare measure maps between two per-piece directories
    Measures {
        /// Directory with the preferred side's .mm.json files
        preferred: PathBuf,

        /// Directory with the other side's .mm.json files
        other: PathBuf,

        /// Dataset whose filenames key the maps
        #[arg(long, value_enum, default_value = "krn")]
        dataset: Dataset,

        /// Label for the exported summary (e.g. "krn-musicxml")
        #[arg(long, default_value = "pair")]
        label: String,

        /// Skip displayed measure numbers
        #[arg(long)]
        ignore_number: bool,

        /// Skip end-repeat flags (differ between repeat conventions)
        #[arg(long)]
        ignore_end_repeat: bool,

        /// Skip successor links
        #[arg(long)]
        ignore_next: bool,
    },

    /// Show two pieces' pitch-class vectors side by side
    Inspect {
        /// Reference dataset and piece, e.g. "cap:293"
        a: String,

        /// Candidate dataset and piece, e.g. "krn:293"
        b: String,
    },

    /// List discovered PCV tables with their dimensions
    Datasets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = choralign::config::AppConfig::load();

    // Resolve directories: CLI > config > current dir
    let data_dir = cli
        .data_dir
        .or(config.data_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    let out_dir = cli
        .out_dir
        .or(config.out_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));
    log::info!("Data: {} | Out: {}", data_dir.display(), out_dir.display());

    match cli.command {
        Commands::Align => {
            let metadata = load_metadata(&data_dir)?;
            let correction = metadata.correction_table();
            println!(
                "{} differences between Riemenschneider and original CPE numbering.",
                correction.permuted_count()
            );

            export::write_metadata(&out_dir.join("riemenschneider.tsv"), &metadata)
                .context("Metadata export failed")?;

            let mut columns = Vec::new();
            for dataset in [Dataset::Krn, Dataset::Cap, Dataset::Xml] {
                let names = metadata
                    .aligned_filenames(dataset, &correction)
                    .with_context(|| format!("Aligning {dataset} filenames failed"))?;
                columns.push((dataset, names));
            }
            export::write_aligned_files(&out_dir.join("aligned_files.tsv"), &columns)
                .context("Aligned-files export failed")?;
            println!(
                "Alignment complete: {} pieces cross-referenced",
                metadata.len()
            );
        }

        Commands::Compare {
            reference,
            candidate,
            auto_rematch,
            acceptable_error,
        } => {
            let acceptable = acceptable_error.unwrap_or(config.acceptable_error);
            let metadata = load_metadata(&data_dir)?;
            let correction = metadata.correction_table();

            let ref_table = load_pcv_dataset(reference, &data_dir, &out_dir, &correction)?;
            let cand_table = load_pcv_dataset(candidate, &data_dir, &out_dir, &correction)?;
            let ref_files = metadata.aligned_filenames(reference, &correction)?;
            let cand_files = metadata.aligned_filenames(candidate, &correction)?;

            // Keep the canonical-numbered collections around for downstream
            // consumers; krn and the ground truth are already canonical.
            for (dataset, table) in [(reference, &ref_table), (candidate, &cand_table)] {
                if dataset.needs_alignment() {
                    let path = out_dir.join(format!("pcvs_{dataset}_aligned.tsv"));
                    export::write_pcv_table(&path, table).context("PCV export failed")?;
                }
            }

            print_title(
                &format!("Comparing datasets {reference} and {candidate}"),
                '=',
                true,
            );
            let scores = divergence::score_tables(&ref_table, &cand_table);
            let counts = divergence::count_diverging(&scores, acceptable);
            println!(
                "Pairwise: {} pieces agree, {} diverge, {} unscored.",
                counts.matching, counts.diverging, counts.unscored
            );
            let results =
                matching::match_datasets(&ref_table, &cand_table, &ref_files, auto_rematch)
                    .context("Matching failed")?;
            print_match_report(&results, &cand_files, reference, candidate, acceptable);

            let path = out_dir.join(format!("matches_{reference}_{candidate}.tsv"));
            export::write_match_results(&path, &results).context("Match export failed")?;
        }

        Commands::Curate { overrides } => {
            let metadata = load_metadata(&data_dir)?;
            let correction = metadata.correction_table();

            // Reference: the engraving corpus aligned to canonical numbering;
            // candidate: the kern corpus, which carries it natively.
            let cap = load_pcv_dataset(Dataset::Cap, &data_dir, &out_dir, &correction)?;
            let krn = load_pcv_dataset(Dataset::Krn, &data_dir, &out_dir, &correction)?;
            let cap_files = metadata.aligned_filenames(Dataset::Cap, &correction)?;

            let results = matching::match_datasets(&cap, &krn, &cap_files, false)
                .context("Matching failed")?;

            let overrides_path = overrides
                .or(config.overrides_file.clone())
                .unwrap_or_else(|| data_dir.join("overrides.toml"));
            let table = OverrideTable::load(&overrides_path).with_context(|| {
                format!("Failed to load override table {}", overrides_path.display())
            })?;
            log::info!("{} overrides loaded", table.len());

            let resolution =
                curate::curate(&results, &table, Dataset::Krn).context("Curation failed")?;

            let mut tables = BTreeMap::new();
            tables.insert(Dataset::Krn, krn);
            tables.insert(Dataset::Cap, cap);
            let truth =
                curate::build_ground_truth(&resolution, &tables).context("Curation failed")?;

            export::write_pcv_table(&out_dir.join("groundtruth_pcvs.tsv"), &truth)
                .context("Ground-truth export failed")?;
            export::write_ground_truth(
                &out_dir.join("groundtruth_sources.tsv"),
                &truth,
                &resolution,
            )
            .context("Ground-truth export failed")?;

            let counts = resolution.counts();
            println!(
                "Curation complete: {} pieces resolved — {}",
                truth.len(),
                counts
                    .iter()
                    .map(|(dataset, n)| format!("{n} from {dataset}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Commands::Measures {
            preferred,
            other,
            dataset,
            label,
            ignore_number,
            ignore_end_repeat,
            ignore_next,
        } => {
            let metadata = load_metadata(&data_dir)?;
            let correction = metadata.correction_table();
            let filenames = metadata.aligned_filenames(dataset, &correction)?;

            let flags = config
                .measure_flags
                .apply_ignores(ignore_number, ignore_end_repeat, ignore_next);

            let preferred_maps = measures::load_measure_maps(&preferred, &filenames);
            let other_maps = measures::load_measure_maps(&other, &filenames);
            let (comparisons, summary) =
                measures::compare_all(&preferred_maps, &other_maps, &flags);

            for comparison in &comparisons {
                match comparison.bucket {
                    Some(0) => log::debug!("R. {} OK.", comparison.piece),
                    Some(bucket) => {
                        println!("Mismatch for R. {} (severity {bucket})", comparison.piece)
                    }
                    None => println!("Skipped R. {}", comparison.piece),
                }
            }
            println!(
                "Measure maps: {} compared, {} identical, {} skipped",
                summary.compared,
                summary.identical(),
                summary.skipped
            );

            let path = out_dir.join(format!("measure_summary_{label}.tsv"));
            export::write_measure_summary(&path, &label, &summary)
                .context("Summary export failed")?;
        }

        Commands::Inspect { a, b } => {
            let metadata = load_metadata(&data_dir)?;
            let correction = metadata.correction_table();

            let (a_dataset, a_piece) = parse_piece_ref(&a)?;
            let (b_dataset, b_piece) = parse_piece_ref(&b)?;
            let a_table = load_pcv_dataset(a_dataset, &data_dir, &out_dir, &correction)?;
            let b_table = load_pcv_dataset(b_dataset, &data_dir, &out_dir, &correction)?;
            print_pcv_pair(&a_table, a_dataset, a_piece, &b_table, b_dataset, b_piece)?;
        }

        Commands::Datasets => {
            let dir = data_dir.join("pcvs");
            let found = PcvTable::discover(&dir);
            if found.is_empty() {
                println!("No PCV tables under {}.", dir.display());
                return Ok(());
            }
            println!("{:<16} {:>6} {:>8}", "Dataset", "Pieces", "Classes");
            println!("{}", "-".repeat(32));
            for (name, path) in found {
                let table = PcvTable::load_tsv(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                println!("{:<16} {:>6} {:>8}", name, table.len(), table.width());
            }
        }
    }

    Ok(())
}

fn load_metadata(data_dir: &Path) -> Result<Metadata> {
    let path = data_dir.join("riemenschneider.tsv");
    Metadata::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Load one dataset's PCV table, reindexed onto the canonical numbering
/// where the dataset needs it. The ground truth is read back from a
/// previous `curate` export.
fn load_pcv_dataset(
    dataset: Dataset,
    data_dir: &Path,
    out_dir: &Path,
    correction: &CorrectionTable,
) -> Result<PcvTable> {
    let path = match dataset {
        Dataset::GroundTruth => out_dir.join("groundtruth_pcvs.tsv"),
        _ => data_dir.join("pcvs").join(format!("{dataset}.tsv")),
    };
    let table =
        PcvTable::load_tsv(&path).with_context(|| format!("Failed to load {}", path.display()))?;
    if dataset.needs_alignment() {
        correction
            .reindex_table(&table)
            .with_context(|| format!("Reindexing {dataset} failed"))
    } else {
        Ok(table)
    }
}

fn parse_piece_ref(arg: &str) -> Result<(Dataset, u32)> {
    let (name, number) = arg
        .split_once(':')
        .with_context(|| format!("Expected dataset:piece, got {arg:?}"))?;
    let dataset = match name {
        "krn" => Dataset::Krn,
        "cap" => Dataset::Cap,
        "xml" => Dataset::Xml,
        "groundtruth" => Dataset::GroundTruth,
        other => anyhow::bail!("Unknown dataset {other:?}"),
    };
    let piece: u32 = number
        .parse()
        .with_context(|| format!("Bad piece index {number:?}"))?;
    Ok((dataset, piece))
}

/// Framed section title, matching the curation notebooks' output style.
fn print_title(title: &str, frame_symbol: char, main_title: bool) {
    let frame = frame_symbol.to_string().repeat(title.chars().count());
    if main_title {
        println!("\n{frame}\n{title}\n{frame}\n");
    } else {
        println!("\n{title}\n{frame}");
    }
}

/// Narrate every piece that did not match cleanly, then the totals.
fn print_match_report(
    results: &[MatchResult],
    candidate_files: &BTreeMap<u32, Option<String>>,
    reference: Dataset,
    candidate: Dataset,
    acceptable_error: f64,
) {
    let candidate_file = |id: u32| -> String {
        candidate_files
            .get(&id)
            .cloned()
            .flatten()
            .unwrap_or_else(|| format!("<{candidate} {id}>"))
    };

    for result in results {
        let reference_file = result.reference_file.as_deref().unwrap_or("?");
        match &result.outcome {
            MatchOutcome::Matched { candidate: id, .. } if *id == result.piece => {}
            MatchOutcome::Matched { candidate: id, .. } => {
                print_title(&format!("{}: {reference_file}", result.piece), '-', false);
                println!(
                    "{reference} {} == {candidate} {id} (rematched)",
                    result.piece
                );
                println!("{reference_file} == {}", candidate_file(*id));
            }
            MatchOutcome::Tentative {
                candidate: id,
                score,
            } => {
                print_title(&format!("{}: {reference_file}", result.piece), '-', false);
                println!(
                    "{reference} {} has most resemblance with {candidate} {id} => absolute difference = {score}",
                    result.piece
                );
                println!("{reference_file} ~ {}", candidate_file(*id));
            }
            MatchOutcome::Ambiguous { candidates, score } => {
                print_title(&format!("{}: {reference_file}", result.piece), '-', false);
                println!(
                    "{reference} {} is tied between {candidate} {candidates:?} => absolute difference = {score}",
                    result.piece
                );
                for id in candidates {
                    println!("  {} ({id})", candidate_file(*id));
                }
            }
            MatchOutcome::Unmatchable => {}
        }
    }

    let matched = matching::unequivocal(results, acceptable_error).len();
    let diverging = matching::tentative(results, acceptable_error).len();
    let ambiguous = matching::ambiguous(results).len();
    let unmatchable = matching::unmatchable(results).len();
    let threshold = if acceptable_error == 0.0 {
        String::new()
    } else {
        format!(" with an acceptable error of up to {acceptable_error}")
    };
    println!();
    println!(
        "{matched} pieces match{threshold}, {diverging} don't ({ambiguous} ambiguous); {unmatchable} absent from {reference}."
    );
}

/// Side-by-side dump of two pieces' PCVs with per-pitch-class differences,
/// for reviewing override decisions.
fn print_pcv_pair(
    a_table: &PcvTable,
    a_dataset: Dataset,
    a_piece: u32,
    b_table: &PcvTable,
    b_dataset: Dataset,
    b_piece: u32,
) -> Result<()> {
    let (a_wide, b_wide) = reconcile(a_table, b_table);
    let a_row = a_wide
        .row(a_piece)
        .with_context(|| format!("{a_dataset} has no data for piece {a_piece}"))?;
    let b_row = b_wide
        .row(b_piece)
        .with_context(|| format!("{b_dataset} has no data for piece {b_piece}"))?;

    let a_label = format!("{a_dataset}_{a_piece}");
    let b_label = format!("{b_dataset}_{b_piece}");
    println!(
        "{:<16} {:>12} {:>12} {:>12}",
        "pitch class", a_label, b_label, "difference"
    );
    println!("{}", "-".repeat(56));
    let mut total = 0.0;
    for (i, col) in a_wide.columns().iter().enumerate() {
        let diff = (a_row[i] - b_row[i]).abs();
        total += diff;
        if a_row[i] == 0.0 && b_row[i] == 0.0 {
            continue;
        }
        println!(
            "{:<16} {:>12.2} {:>12.2} {:>12.2}",
            col, a_row[i], b_row[i], diff
        );
    }
    println!("{}", "-".repeat(56));
    println!("{:<16} {:>38.2}", "absolute error", total);
    Ok(())
}
