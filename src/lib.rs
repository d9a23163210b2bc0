//! # Furnace Normalize - extracted JSON into destination-ready load packages
//!
//! Takes newline-delimited JSON staged by an extraction step, flattens every
//! document into parent and child table rows, keeps an evolving schema per
//! dataset, and writes per-table job files into a load package.
//!
//! ## Modules
//!
//! - **schema**: column types, naming rules, the schema registry and its storage
//! - **melt**: nested documents into linked rows
//! - **storage**: pending input files, load packages, job file writers
//! - **distribute** / **pool**: balanced file groups and the workers that run them
//! - **normalize**: the run itself
//!
//! ## Quick Start
//!
//! ```rust
//! use furnace_normalize::{Normalize, NormalizeConfig, WorkerPool};
//! use serde_json::json;
//!
//! # fn main() -> furnace_normalize::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let normalize = Normalize::new(NormalizeConfig::default().with_storage_root(dir.path()))?;
//!
//! normalize
//!     .normalize_storage()
//!     .write_extracted_file("events", "users", &[json!({"id": 1, "tags": ["a", "b"]})])?;
//!
//! let report = normalize.run(&WorkerPool::new(1))?;
//! assert!(report.all_finalized());
//! // the tags array became a child table with one row per element
//! assert_eq!(report.schemas[0].rows_per_table["users__tags"], 2);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod distribute;
pub mod error;
pub mod logging;
pub mod melt;
pub mod normalize;
pub mod pool;
pub mod schema;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{Destination, DestinationCapabilities, LoaderFileFormat, NormalizeConfig};
pub use distribute::group_worker_files;
pub use error::{NormalizeError, Result};
pub use melt::{FlattenConfig, ItemFlattener, Row, RowsByTable};
pub use normalize::{Normalize, RunReport, SchemaRunReport};
pub use pool::WorkerPool;
pub use schema::{DataType, Schema, SchemaDelta, SchemaStorage, WorkingSchema};
pub use storage::{LoadStorage, NormalizeStorage};

/// Main entry point: normalize everything pending with `config.workers` workers
pub fn normalize_pending(config: NormalizeConfig) -> Result<RunReport> {
    let pool = WorkerPool::new(config.workers);
    Normalize::new(config)?.run(&pool)
}
