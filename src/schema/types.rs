use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

static ISO_DATETIME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").unwrap()
});

/// Marker prefixes used by the extract stage to carry types JSON can't express
pub const DECIMAL_MARKER: char = '\u{F026}';
pub const TIMESTAMP_MARKER: char = '\u{F027}';
pub const BINARY_MARKER: char = '\u{F029}';

/// The portable type vocabulary a column can be inferred as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Text,
    Double,
    Bool,
    Timestamp,
    Bigint,
    Binary,
    Decimal,
    Complex,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::Text => "text",
            DataType::Double => "double",
            DataType::Bool => "bool",
            DataType::Timestamp => "timestamp",
            DataType::Bigint => "bigint",
            DataType::Binary => "binary",
            DataType::Decimal => "decimal",
            DataType::Complex => "complex",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded value together with the type the classifier assigned to it
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub data_type: DataType,
    pub value: Value,
}

impl TypedValue {
    fn new(data_type: DataType, value: Value) -> Self {
        TypedValue { data_type, value }
    }

    /// Convert into a column of `target` type when that loses nothing
    pub fn coerce_to(&self, target: DataType) -> Option<Value> {
        if self.data_type == target {
            return Some(self.value.clone());
        }
        match (self.data_type, target, &self.value) {
            (DataType::Bigint, DataType::Double, Value::Number(n)) => exact_f64(n)
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number),
            (DataType::Bigint | DataType::Double, DataType::Decimal, Value::Number(n)) => {
                Some(Value::String(n.to_string()))
            }
            (DataType::Timestamp, DataType::Text, Value::String(s)) => Some(Value::String(s.clone())),
            _ => None,
        }
    }
}

/// The integer as a double, if the double holds exactly the same number
fn exact_f64(n: &serde_json::Number) -> Option<f64> {
    // i64::MAX and u64::MAX round up to 2^63 and 2^64, where the casts back saturate
    if let Some(i) = n.as_i64() {
        let f = i as f64;
        (f < i64::MAX as f64 && f as i64 == i).then_some(f)
    } else if let Some(u) = n.as_u64() {
        let f = u as f64;
        (f < u64::MAX as f64 && f as u64 == u).then_some(f)
    } else {
        None
    }
}

/// Classify a raw decoded value. Returns `None` for nulls, which carry no type.
pub fn classify(value: &Value, infer_timestamps: bool) -> Option<TypedValue> {
    match value {
        Value::Null => None,
        Value::Bool(_) => Some(TypedValue::new(DataType::Bool, value.clone())),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                Some(TypedValue::new(DataType::Bigint, value.clone()))
            } else {
                Some(TypedValue::new(DataType::Double, value.clone()))
            }
        }
        Value::String(s) => Some(classify_string(s, infer_timestamps)),
        Value::Array(_) | Value::Object(_) => Some(TypedValue::new(DataType::Complex, value.clone())),
    }
}

fn classify_string(s: &str, infer_timestamps: bool) -> TypedValue {
    let mut chars = s.chars();
    let marked = match chars.next() {
        Some(DECIMAL_MARKER) => Some(DataType::Decimal),
        Some(TIMESTAMP_MARKER) => Some(DataType::Timestamp),
        Some(BINARY_MARKER) => Some(DataType::Binary),
        _ => None,
    };
    if let Some(data_type) = marked {
        return TypedValue::new(data_type, Value::String(chars.as_str().to_string()));
    }
    if infer_timestamps && ISO_DATETIME_REGEX.is_match(s) {
        return TypedValue::new(DataType::Timestamp, Value::String(s.to_string()));
    }
    TypedValue::new(DataType::Text, Value::String(s.to_string()))
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A typed column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,

    /// Set on columns spawned by a type conflict on the base column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<DataType>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
}

impl Column {
    /// New data columns are always nullable
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            name: name.into(),
            data_type,
            nullable: true,
            variant: None,
            unique: false,
        }
    }

    pub fn variant(name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            variant: Some(data_type),
            ..Column::new(name, data_type)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A table definition. Child tables reference the table that owns their rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    #[serde(default)]
    pub columns: BTreeMap<String, Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, parent: Option<String>) -> Self {
        Table {
            name: name.into(),
            parent,
            columns: BTreeMap::new(),
        }
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }
}
