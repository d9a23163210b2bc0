//! furnace-normalize: turn extracted JSON into load packages
//!
//! Usage:
//!   # Stage a JSON or NDJSON file as pending input for schema `events`, table `users`
//!   furnace-normalize extract events users users.jsonl
//!
//!   # Normalize everything pending with 4 workers
//!   furnace-normalize --workers 4 run
//!
//!   # List finalized load packages
//!   furnace-normalize packages
//!
//!   # List stored schemas with their versions
//!   furnace-normalize schemas

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use furnace_normalize::logging::{self, LogFormat};
use furnace_normalize::{
    Destination, LoadStorage, LoaderFileFormat, Normalize, NormalizeConfig, NormalizeStorage, SchemaStorage,
    WorkerPool,
};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "furnace-normalize")]
#[command(about = "Normalize extracted JSON into destination-ready load packages", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// JSON config file; flags given here override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Put the normalize, load and schema storages under this directory
    #[arg(long, global = true)]
    storage_root: Option<PathBuf>,

    /// Size of the worker pool
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[arg(long, global = true, value_enum, ignore_case = true)]
    destination: Option<Destination>,

    /// Job file format (default: the destination's preference)
    #[arg(long, global = true, value_enum)]
    format: Option<LoaderFileFormat>,

    /// Type ISO-8601 strings as timestamps
    #[arg(long, global = true)]
    infer_timestamps: bool,

    /// Log level or filter directives; RUST_LOG takes precedence
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, ignore_case = true, default_value = "compact")]
    log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize all pending extracted files
    Run,
    /// Stage a JSON or NDJSON file as pending input
    Extract {
        schema: String,
        table: String,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// List finalized load packages
    Packages,
    /// List stored schemas
    Schemas,
}

fn resolve_config(args: &Args) -> Result<NormalizeConfig> {
    let mut config = match &args.config {
        Some(path) => NormalizeConfig::from_file(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?,
        None => NormalizeConfig::default(),
    };
    if let Some(root) = &args.storage_root {
        config = config.with_storage_root(root);
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(destination) = args.destination {
        config.destination = destination;
    }
    if let Some(format) = args.format {
        config.loader_file_format = Some(format);
    }
    if args.infer_timestamps {
        config.infer_timestamps = true;
    }
    config.validate()?;
    Ok(config)
}

fn run(config: NormalizeConfig) -> Result<()> {
    let pool = WorkerPool::new(config.workers);
    let normalize = Normalize::new(config).context("Failed to open storages")?;
    let report = normalize.run(&pool)?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if let Some((schema, error)) = report.errors().next() {
        bail!("schema {} needs attention: {}", schema, error);
    }
    if !report.all_finalized() {
        bail!("{} files failed to normalize, rerun to retry", report.files_failed());
    }
    Ok(())
}

/// Accepts NDJSON, a single document, or a top-level array of documents
fn extract(config: &NormalizeConfig, schema: &str, table: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let mut items = Vec::new();
    for value in serde_json::Deserializer::from_str(&content).into_iter::<Value>() {
        match value.context("Failed to parse JSON")? {
            Value::Array(documents) => items.extend(documents),
            document => items.push(document),
        }
    }

    let storage = NormalizeStorage::new(&config.normalize_root)?;
    let name = storage.write_extracted_file(schema, table, &items)?;
    println!("{} ({} items)", name, items.len());
    Ok(())
}

fn packages(config: &NormalizeConfig) -> Result<()> {
    let format = config
        .destination
        .capabilities()
        .loader_file_format(config.loader_file_format)?;
    let storage = LoadStorage::new(&config.load_root, format)?;
    for load_id in storage.list_packages()? {
        let schema = storage.load_package_schema(&load_id)?;
        let jobs = storage.list_new_jobs(&load_id)?;
        println!("{}\t{}\tv{}\t{} jobs", load_id, schema.name, schema.version, jobs.len());
    }
    Ok(())
}

fn schemas(config: &NormalizeConfig) -> Result<()> {
    let storage = SchemaStorage::new(&config.schema_root)?;
    for name in storage.list_schemas()? {
        match storage.load(&name) {
            Ok(Some(schema)) => println!("{}\tv{}\t{} tables", name, schema.version, schema.tables.len()),
            Ok(None) => {}
            Err(e) => println!("{}\tunreadable: {}", name, e),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;
    let config = resolve_config(&args)?;

    match &args.command {
        Command::Run => run(config),
        Command::Extract { schema, table, file } => extract(&config, schema, table, file),
        Command::Packages => packages(&config),
        Command::Schemas => schemas(&config),
    }
}
