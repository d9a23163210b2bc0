use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::schema::{ID_COLUMN, LIST_IDX_COLUMN, LOAD_ID_COLUMN, PARENT_ID_COLUMN};

/// Rows produced from one document, keyed by table, in emission order per table
pub type RowsByTable = BTreeMap<String, Vec<Row>>;

/// One flattened row - column name to value, nulls omitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(pub Map<String, Value>);

impl Row {
    /// A fresh row with a new unique `_dlt_id`
    pub fn new() -> Self {
        let mut data = Map::new();
        data.insert(
            ID_COLUMN.to_string(),
            Value::String(uuid::Uuid::new_v4().simple().to_string()),
        );
        Row(data)
    }

    pub fn root(load_id: &str) -> Self {
        let mut row = Row::new();
        row.0.insert(LOAD_ID_COLUMN.to_string(), Value::String(load_id.to_string()));
        row
    }

    pub fn child(parent_id: &str, list_idx: usize) -> Self {
        let mut row = Row::new();
        row.0.insert(PARENT_ID_COLUMN.to_string(), Value::String(parent_id.to_string()));
        row.0.insert(LIST_IDX_COLUMN.to_string(), Value::Number(list_idx.into()));
        row
    }

    pub fn id(&self) -> &str {
        self.0.get(ID_COLUMN).and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }
}

/// Settings the flattener needs, resolved from configuration and destination limits
#[derive(Debug, Clone)]
pub struct FlattenConfig {
    /// Objects and arrays nested deeper than this are kept whole as `complex` values
    pub max_nesting_level: usize,

    /// Type ISO-8601 strings as `timestamp` instead of `text`
    pub infer_timestamps: bool,

    pub max_table_identifier_length: Option<usize>,
    pub max_column_identifier_length: Option<usize>,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        FlattenConfig {
            max_nesting_level: 1000,
            infer_timestamps: false,
            max_table_identifier_length: None,
            max_column_identifier_length: None,
        }
    }
}
