//! Run configuration and destination capabilities
//!
//! Values resolve once per run: defaults, then an optional JSON file, then CLI
//! flags. The orchestrator only ever sees the resolved, read-only result.

use crate::error::{NormalizeError, Result};
use crate::melt::FlattenConfig;
use crate::storage::insert_values::{AnsiInsertCodec, InsertValuesCodec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Job file format written into load packages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LoaderFileFormat {
    /// One JSON object per line
    Jsonl,
    /// Batched multi-row insertion statements
    #[value(name = "insert_values")]
    InsertValues,
}

impl LoaderFileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            LoaderFileFormat::Jsonl => "jsonl",
            LoaderFileFormat::InsertValues => "insert_values",
        }
    }
}

impl fmt::Display for LoaderFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for LoaderFileFormat {
    type Err = NormalizeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jsonl" => Ok(LoaderFileFormat::Jsonl),
            "insert_values" => Ok(LoaderFileFormat::InsertValues),
            other => Err(NormalizeError::Config(format!("unknown loader file format '{}'", other))),
        }
    }
}

/// What the active destination accepts
#[derive(Clone)]
pub struct DestinationCapabilities {
    pub preferred_loader_file_format: LoaderFileFormat,
    pub supported_loader_file_formats: Vec<LoaderFileFormat>,
    /// Rows per insertion statement before a new statement is started
    pub max_rows_per_insert: usize,
    pub max_identifier_length: Option<usize>,
    pub max_column_identifier_length: Option<usize>,
    pub insert_codec: Arc<dyn InsertValuesCodec>,
}

impl fmt::Debug for DestinationCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationCapabilities")
            .field("preferred_loader_file_format", &self.preferred_loader_file_format)
            .field("supported_loader_file_formats", &self.supported_loader_file_formats)
            .field("max_rows_per_insert", &self.max_rows_per_insert)
            .field("max_identifier_length", &self.max_identifier_length)
            .field("max_column_identifier_length", &self.max_column_identifier_length)
            .finish_non_exhaustive()
    }
}

impl DestinationCapabilities {
    pub fn insert_values() -> Self {
        DestinationCapabilities {
            preferred_loader_file_format: LoaderFileFormat::InsertValues,
            supported_loader_file_formats: vec![LoaderFileFormat::InsertValues],
            max_rows_per_insert: 1000,
            max_identifier_length: Some(63),
            max_column_identifier_length: Some(63),
            insert_codec: Arc::new(AnsiInsertCodec),
        }
    }

    pub fn jsonl() -> Self {
        DestinationCapabilities {
            preferred_loader_file_format: LoaderFileFormat::Jsonl,
            supported_loader_file_formats: vec![LoaderFileFormat::Jsonl],
            max_rows_per_insert: 0,
            max_identifier_length: Some(1024),
            max_column_identifier_length: Some(300),
            insert_codec: Arc::new(AnsiInsertCodec),
        }
    }

    /// The format to write, honoring an explicit override the destination supports
    pub fn loader_file_format(&self, requested: Option<LoaderFileFormat>) -> Result<LoaderFileFormat> {
        match requested {
            None => Ok(self.preferred_loader_file_format),
            Some(format) if self.supported_loader_file_formats.contains(&format) => Ok(format),
            Some(format) => Err(NormalizeError::Config(format!(
                "destination does not accept {} files",
                format
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Postgres,
    Bigquery,
    Duckdb,
}

impl Destination {
    pub fn capabilities(self) -> DestinationCapabilities {
        match self {
            Destination::Postgres => DestinationCapabilities::insert_values(),
            Destination::Bigquery => DestinationCapabilities::jsonl(),
            Destination::Duckdb => DestinationCapabilities {
                supported_loader_file_formats: vec![
                    LoaderFileFormat::InsertValues,
                    LoaderFileFormat::Jsonl,
                ],
                max_identifier_length: None,
                max_column_identifier_length: None,
                ..DestinationCapabilities::insert_values()
            },
        }
    }
}


/// Configuration for a normalize run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Size of the worker pool
    pub workers: usize,

    /// Directory holding extracted files waiting to be normalized
    pub normalize_root: PathBuf,

    /// Directory load packages are written to
    pub load_root: PathBuf,

    /// Directory canonical schemas are persisted in
    pub schema_root: PathBuf,

    pub destination: Destination,

    /// Overrides the destination's preferred format
    pub loader_file_format: Option<LoaderFileFormat>,

    /// Objects and arrays nested deeper than this are stored as `complex`
    pub max_nesting_level: usize,

    /// Type ISO-8601 strings as timestamps
    pub infer_timestamps: bool,

    /// Rows buffered per table before they are written out
    pub buffer_max_items: usize,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            workers: 1,
            normalize_root: PathBuf::from("_storage/normalize"),
            load_root: PathBuf::from("_storage/load"),
            schema_root: PathBuf::from("_storage/schemas"),
            destination: Destination::Postgres,
            loader_file_format: None,
            max_nesting_level: 1000,
            infer_timestamps: false,
            buffer_max_items: 5000,
        }
    }
}

impl NormalizeConfig {
    /// Read a JSON config file. Missing fields keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: NormalizeConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Place all three storages under one directory
    pub fn with_storage_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        let root = root.as_ref();
        self.normalize_root = root.join("normalize");
        self.load_root = root.join("load");
        self.schema_root = root.join("schemas");
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(NormalizeError::Config("workers must be at least 1".into()));
        }
        if self.buffer_max_items == 0 {
            return Err(NormalizeError::Config("buffer_max_items must be at least 1".into()));
        }
        Ok(())
    }

    pub fn flatten_config(&self, caps: &DestinationCapabilities) -> FlattenConfig {
        FlattenConfig {
            max_nesting_level: self.max_nesting_level,
            infer_timestamps: self.infer_timestamps,
            max_table_identifier_length: caps.max_identifier_length,
            max_column_identifier_length: caps.max_column_identifier_length,
        }
    }
}
