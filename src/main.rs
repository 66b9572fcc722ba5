use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use modelstore::common::read_json_array_file;
use modelstore::config::ArchiveConfig;
use modelstore::model::SessionlessContext;
use modelstore::object_store::DiskObjectStore;
use modelstore::store::{
    open_archive, unpack_to, ArchiveFormat, ExportContainer,
    ATTRS_FILENAME_COLLECTIONS, ATTRS_FILENAME_DATASETS, ATTRS_FILENAME_HISTORY,
    ATTRS_FILENAME_IMPLICIT_COLLECTION_JOBS, ATTRS_FILENAME_JOBS, ATTRS_FILENAME_LIBRARIES,
    PROVENANCE_SUFFIX, ModelImportStore,
};

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    /// TOML archive configuration
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the archive format and count records per attribute file
    Inspect { path: PathBuf },
    /// Wrap an archive directory into a tar file or bag
    Pack {
        dir: PathBuf,
        output: PathBuf,
        /// Write a bag; zipped when the output ends in .zip
        #[clap(long)]
        bag: bool,
    },
    /// Unwrap a tar, tar.gz or bag archive into a directory
    Unpack { archive: PathBuf, dir: PathBuf },
    /// Import an archive into a throwaway graph and report what it holds
    Verify { path: PathBuf },
}

#[derive(Serialize)]
struct InspectReport {
    format: &'static str,
    history: bool,
    records: IndexMap<String, usize>,
}

fn inspect(path: &Path) -> Result<InspectReport> {
    let archive = open_archive(path)
        .with_context(|| format!("failed to open archive {}", path.display()))?;
    let root = archive.root();
    let provenance = format!("{}{}", ATTRS_FILENAME_DATASETS, PROVENANCE_SUFFIX);
    let mut records = IndexMap::new();
    for name in [
        ATTRS_FILENAME_DATASETS,
        provenance.as_str(),
        ATTRS_FILENAME_COLLECTIONS,
        ATTRS_FILENAME_LIBRARIES,
        ATTRS_FILENAME_JOBS,
        ATTRS_FILENAME_IMPLICIT_COLLECTION_JOBS,
    ] {
        let rows: Vec<Value> = read_json_array_file(&root.join(name))?;
        records.insert(name.to_string(), rows.len());
    }
    Ok(InspectReport {
        format: ArchiveFormat::detect(root).as_str(),
        history: root.join(ATTRS_FILENAME_HISTORY).is_file(),
        records,
    })
}

fn verify(path: &Path, config: &ArchiveConfig) -> Result<()> {
    let archive = open_archive(path)
        .with_context(|| format!("failed to open archive {}", path.display()))?;
    let blobs = tempfile::tempdir()?;
    let mut object_store = DiskObjectStore::new(blobs.path())?;
    let mut context = SessionlessContext::new();
    let options = config.import_options(None, None);
    let summary =
        ModelImportStore::new(&mut context, &mut object_store, archive.root(), options)?
            .perform_import()?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => ArchiveConfig::load(path)?,
        None => ArchiveConfig::default(),
    };
    info!(identifiers_encoded = config.identifiers.secret.is_some(), "loaded configuration");

    match args.command {
        Commands::Inspect { path } => {
            info!("Inspecting archive: {}", path.display());
            let report = inspect(&path)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Pack { dir, output, bag } => {
            let container = ExportContainer::for_output(&output, bag);
            info!("Packing {} as {}", dir.display(), container.as_str());
            container.wrap(&dir, &output)?;
        }
        Commands::Unpack { archive, dir } => {
            info!("Unpacking {} into {}", archive.display(), dir.display());
            unpack_to(&archive, &dir)?;
        }
        Commands::Verify { path } => {
            info!("Verifying archive: {}", path.display());
            verify(&path, &config)?;
        }
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("modelstore={}", log_level)))
        .without_time()
        .init();
}
