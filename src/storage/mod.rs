//! Input and output storages
//!
//! - [`NormalizeStorage`]: extracted files waiting to be normalized
//! - [`LoadStorage`]: load packages and their job files
//! - [`PackageWriter`]: per-worker, per-table job file writers

pub mod insert_values;
pub mod load_storage;
pub mod normalize_storage;
pub mod writer;

pub use insert_values::{AnsiInsertCodec, InsertValuesCodec};
pub use load_storage::{JobFileName, LoadStorage};
pub use normalize_storage::{ExtractedFileName, NormalizeStorage};
pub use writer::{BufferedDataWriter, PackageWriter, TableWriteSummary, WriterOptions};
