//! Schema inference and evolution
//!
//! Column types come from a closed vocabulary ([`DataType`]). Once a column's type
//! is fixed it never changes: conflicting values spawn variant columns instead.

pub mod naming;
pub mod registry;
pub mod storage;
pub mod types;

pub use registry::{ColumnMatch, Schema, SchemaDelta, WorkingSchema};
pub use storage::SchemaStorage;
pub use types::{classify, Column, DataType, Table, TypedValue};

/// Unique id of every emitted row
pub const ID_COLUMN: &str = "_dlt_id";
/// Load id stamped on root rows
pub const LOAD_ID_COLUMN: &str = "_dlt_load_id";
/// `_dlt_id` of the row owning a child row
pub const PARENT_ID_COLUMN: &str = "_dlt_parent_id";
/// Position of a child row in its source array
pub const LIST_IDX_COLUMN: &str = "_dlt_list_idx";
