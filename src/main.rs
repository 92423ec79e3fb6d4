//! dmmconc - Cross-edition concordance pipeline for De Materia Medica
//!
//! Builds per-edition extracts, the master register and concordance, the
//! Beck/Berendes alignment, citation and IIIF artifacts, and the SQLite
//! database from a single source workbook plus auxiliary files.
//!
//! ## Usage
//!
//! ```bash
//! dmmconc extract-editions --xlsx "Materia Medica.xlsx"
//! dmmconc build-master && dmmconc align-beck-berendes && dmmconc assign-ids
//! dmmconc build-citations && dmmconc build-iiif-map && dmmconc validate-phase1
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dmmconc::{alignment, citations, compare, db, editions, gunther, ids, iiif, master, migrate, validate};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Cross-edition concordance pipeline for De Materia Medica
#[derive(Parser)]
#[command(name = "dmmconc")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract per-edition CSVs from the source workbook
    ExtractEditions {
        /// Input .xlsx path
        #[arg(long, default_value = "Materia Medica.xlsx")]
        xlsx: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data/editions")]
        out_dir: PathBuf,
    },

    /// Build the master register and per-chapter concordance
    BuildMaster {
        /// Input .xlsx path
        #[arg(long, default_value = "Materia Medica.xlsx")]
        xlsx: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,
    },

    /// Build the Beck-Berendes alignment export with inferred spans
    AlignBeckBerendes {
        /// Input .xlsx path
        #[arg(long, default_value = "Materia Medica.xlsx")]
        xlsx: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data/alignments")]
        out_dir: PathBuf,

        /// Seed for the random 50-row samples
        #[arg(long, default_value = "beck-berendes-sample")]
        seed: String,
    },

    /// Assign stable master keys over the concordance
    AssignIds {
        /// Input concordance CSV
        #[arg(long = "in", default_value = "data/master_concordance.csv")]
        in_path: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data")]
        out_dir: PathBuf,

        /// Key prefix
        #[arg(long, default_value = "MMK")]
        prefix: String,

        /// First key number
        #[arg(long, default_value = "1")]
        start: usize,

        /// Flag rows whose lemma similarity falls below this ratio
        #[arg(long, default_value = "0.80")]
        flag_threshold: f64,
    },

    /// Scrape chapter titles and glosses from the Gunther TEI XML
    GuntherChapters {
        /// Input TEI XML path
        #[arg(long)]
        xml: PathBuf,

        /// Write TSV to this path (default: stdout)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Only emit chapters absent from this CSV's gunther_chapter column
        #[arg(long)]
        missing_from: Option<PathBuf>,

        /// TSV of chapter overrides keyed by book and chapter
        #[arg(long)]
        overrides_tsv: Option<PathBuf>,

        /// Keep headings that do not look like ALL-CAPS chapter titles
        #[arg(long)]
        no_title_filter: bool,
    },

    /// Migrate the legacy flat XML database to normalized CSVs
    MigrateXml {
        /// Input XML database
        #[arg(long, default_value = "dioscmatmad_db.xml")]
        xml: PathBuf,

        /// Output data directory
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },

    /// Create the SQLite database from the normalized CSVs
    ImportDb {
        /// Data directory holding the CSVs
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Database path (default: <data-dir>/dmm.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Export database tables back to CSV
    ExportDb {
        /// Table to export (default: all)
        table: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "data")]
        output_dir: PathBuf,

        /// Database path (default: <output-dir>/dmm.db)
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Build canonical citation rows from the revised edition TSVs
    BuildCitations {
        /// Input directory of revised TSVs
        #[arg(long, default_value = "revised_ed")]
        revised_ed_dir: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data/vnext")]
        out_dir: PathBuf,
    },

    /// Map citations onto IIIF canvases and write review queues
    BuildIiifMap {
        /// Input directory for citation artifacts
        #[arg(long, default_value = "data/vnext")]
        in_dir: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data/vnext")]
        out_dir: PathBuf,

        /// Directory of cached IIIF manifests
        #[arg(long, default_value = "data/vnext/iiif/manifests")]
        manifest_dir: PathBuf,
    },

    /// Validate citation and IIIF artifacts, rewriting the review queues
    ValidatePhase1 {
        /// Input directory
        #[arg(long, default_value = "data/vnext")]
        in_dir: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data/vnext")]
        out_dir: PathBuf,
    },

    /// Compare the hand-curated rough mapping against generated alignments
    CompareRough {
        /// Rough TSV mapping
        #[arg(long, default_value = "data/alignments/beck_berendes_rough.tsv")]
        rough: PathBuf,

        /// Generated explicit edges CSV
        #[arg(long, default_value = "data/alignments/beck_berendes_edges.csv")]
        edges: PathBuf,

        /// Generated span edges CSV
        #[arg(long, default_value = "data/alignments/beck_berendes_span_edges.csv")]
        span: PathBuf,

        /// Beck index CSV for DMM reuse detection
        #[arg(long, default_value = "data/editions/beck_index.csv")]
        beck_index: PathBuf,

        /// Output directory
        #[arg(long, default_value = "data/alignments")]
        out_dir: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::ExtractEditions { xlsx, out_dir } => {
            editions::extract_editions(&xlsx, &out_dir)
                .with_context(|| format!("extracting editions from {}", xlsx.display()))?;
        }
        Commands::BuildMaster { xlsx, out_dir } => {
            master::run(&xlsx, &out_dir)
                .with_context(|| format!("building master concordance from {}", xlsx.display()))?;
        }
        Commands::AlignBeckBerendes { xlsx, out_dir, seed } => {
            alignment::run(&xlsx, &out_dir, &seed)
                .with_context(|| format!("building alignment from {}", xlsx.display()))?;
        }
        Commands::AssignIds { in_path, out_dir, prefix, start, flag_threshold } => {
            let opts = ids::IdOptions { prefix, start, flag_threshold };
            ids::run(&in_path, &out_dir, &opts)?;
        }
        Commands::GuntherChapters { xml, out, missing_from, overrides_tsv, no_title_filter } => {
            let opts = gunther::GuntherOptions { missing_from, overrides_tsv, no_title_filter };
            gunther::run(&xml, out.as_deref(), &opts)?;
        }
        Commands::MigrateXml { xml, data_dir } => {
            migrate::run(&xml, &data_dir)?;
        }
        Commands::ImportDb { data_dir, db } => {
            let db_path = db.unwrap_or_else(|| data_dir.join("dmm.db"));
            db::import(&data_dir, &db_path)?;
        }
        Commands::ExportDb { table, output_dir, db } => {
            let db_path = db.unwrap_or_else(|| output_dir.join("dmm.db"));
            db::export(&db_path, &output_dir, table.as_deref())?;
        }
        Commands::BuildCitations { revised_ed_dir, out_dir } => {
            citations::run(&revised_ed_dir, &out_dir)?;
        }
        Commands::BuildIiifMap { in_dir, out_dir, manifest_dir } => {
            iiif::run(&in_dir, &out_dir, &manifest_dir)?;
        }
        Commands::ValidatePhase1 { in_dir, out_dir } => {
            validate::run(&in_dir, &out_dir)?;
        }
        Commands::CompareRough { rough, edges, span, beck_index, out_dir } => {
            compare::run(&rough, &edges, &span, &beck_index, &out_dir)?;
        }
    }

    Ok(())
}
