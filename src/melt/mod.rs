//! Document flattening - nested JSON into parent and child table rows
//!
//! The flattener never mutates shared schema state. It works against a
//! [`WorkingSchema`](crate::schema::WorkingSchema) and every table or column it
//! needs ends up in the returned delta.

pub mod extractor;
pub mod types;

pub use extractor::{ItemFlattener, VALUE_COLUMN};
pub use types::{FlattenConfig, Row, RowsByTable};
