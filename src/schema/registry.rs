//! Versioned table and column definitions for one logical dataset
//!
//! A [`Schema`] is the single authority on column types. Workers never touch the
//! canonical instance: they flatten against a [`WorkingSchema`] built from a frozen
//! snapshot and hand back the [`SchemaDelta`] they discovered, which the owner
//! merges one delta at a time.

use crate::error::{NormalizeError, Result};
use crate::schema::naming::variant_column_name;
use crate::schema::types::{Column, DataType, Table, TypedValue};
use crate::schema::{ID_COLUMN, LIST_IDX_COLUMN, LOAD_ID_COLUMN, PARENT_ID_COLUMN};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub version: u64,
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
}

/// Tables and columns discovered while flattening one batch of documents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDelta {
    pub tables: BTreeMap<String, Table>,
}

/// The column a value lands in, and the value converted for that column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMatch {
    pub column: Column,
    pub value: Value,
    /// True when the column did not exist before this lookup
    pub added: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            version: 1,
            tables: BTreeMap::new(),
        }
    }

    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn get_column(&self, table: &str, column: &str) -> Option<&Column> {
        self.tables.get(table).and_then(|t| t.columns.get(column))
    }

    /// Create `name` with its synthetic columns unless it exists. Returns the new table.
    pub fn ensure_table(&mut self, name: &str, parent: Option<&str>) -> Result<Option<Table>> {
        if let Some(existing) = self.tables.get(name) {
            if existing.parent.as_deref() != parent {
                return Err(NormalizeError::ParentMismatch {
                    table: name.to_string(),
                    existing: existing.parent.clone(),
                    proposed: parent.map(str::to_string),
                });
            }
            return Ok(None);
        }
        let table = new_table_with_linkage(name, parent);
        self.tables.insert(name.to_string(), table.clone());
        Ok(Some(table))
    }

    /// Find the column `value` belongs to under `name`, creating it when needed.
    ///
    /// The first type seen for a name is final. A later value that can't be coerced
    /// into it goes to `<name>__v_<type>`, which is created on demand.
    pub fn infer_or_get_column(
        &mut self,
        table: &str,
        name: &str,
        value: &TypedValue,
    ) -> Result<ColumnMatch> {
        if !self.tables.contains_key(table) {
            self.ensure_table(table, None)?;
        }
        let matched = self.resolve_column(table, name, value)?;
        if matched.added {
            if let Some(t) = self.tables.get_mut(table) {
                t.columns.insert(matched.column.name.clone(), matched.column.clone());
            }
        }
        Ok(matched)
    }

    /// Read-only half of [`Schema::infer_or_get_column`]
    pub fn resolve_column(&self, table: &str, name: &str, value: &TypedValue) -> Result<ColumnMatch> {
        let Some(base) = self.get_column(table, name) else {
            return Ok(ColumnMatch {
                column: Column::new(name, value.data_type),
                value: value.value.clone(),
                added: true,
            });
        };

        if let Some(coerced) = value.coerce_to(base.data_type) {
            return Ok(ColumnMatch {
                column: base.clone(),
                value: coerced,
                added: false,
            });
        }

        let variant_name = variant_column_name(name, value.data_type);
        match self.get_column(table, &variant_name) {
            None => Ok(ColumnMatch {
                column: Column::variant(variant_name, value.data_type),
                value: value.value.clone(),
                added: true,
            }),
            Some(variant) if variant.data_type == value.data_type => Ok(ColumnMatch {
                column: variant.clone(),
                value: value.value.clone(),
                added: false,
            }),
            Some(other) => Err(NormalizeError::NamingCollision {
                table: table.to_string(),
                name: variant_name,
                detail: format!(
                    "already holds {} values, cannot store the {} variant of '{}'",
                    other.data_type, value.data_type, name
                ),
            }),
        }
    }

    /// Merge a worker delta. Returns the new version if anything was added.
    ///
    /// The delta is validated as a whole before any change is applied, so a
    /// rejected delta leaves the schema untouched.
    pub fn merge(&mut self, delta: &SchemaDelta) -> Result<Option<u64>> {
        for (name, incoming) in &delta.tables {
            let Some(existing) = self.tables.get(name) else {
                continue;
            };
            if existing.parent != incoming.parent {
                return Err(NormalizeError::ParentMismatch {
                    table: name.clone(),
                    existing: existing.parent.clone(),
                    proposed: incoming.parent.clone(),
                });
            }
            for (column_name, column) in &incoming.columns {
                if let Some(current) = existing.columns.get(column_name) {
                    if current.data_type != column.data_type {
                        return Err(NormalizeError::ColumnTypeChange {
                            table: name.clone(),
                            column: column_name.clone(),
                            existing: current.data_type,
                            proposed: column.data_type,
                        });
                    }
                }
            }
        }

        let mut changed = false;
        for (name, incoming) in &delta.tables {
            match self.tables.get_mut(name) {
                None => {
                    self.tables.insert(name.clone(), incoming.clone());
                    changed = true;
                }
                Some(existing) => {
                    for (column_name, column) in &incoming.columns {
                        if !existing.columns.contains_key(column_name) {
                            existing.columns.insert(column_name.clone(), column.clone());
                            changed = true;
                        }
                    }
                }
            }
        }

        if changed {
            self.version += 1;
            Ok(Some(self.version))
        } else {
            Ok(None)
        }
    }
}

fn new_table_with_linkage(name: &str, parent: Option<&str>) -> Table {
    let mut table = Table::new(name, parent.map(str::to_string));
    let mut linkage = vec![Column::new(ID_COLUMN, DataType::Text).not_null().unique()];
    if parent.is_some() {
        linkage.push(Column::new(PARENT_ID_COLUMN, DataType::Text).not_null());
        linkage.push(Column::new(LIST_IDX_COLUMN, DataType::Bigint).not_null());
    } else {
        linkage.push(Column::new(LOAD_ID_COLUMN, DataType::Text).not_null());
    }
    for column in linkage {
        table.columns.insert(column.name.clone(), column);
    }
    table
}

impl SchemaDelta {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn column_count(&self) -> usize {
        self.tables.values().map(|t| t.columns.len()).sum()
    }

    fn record_table(&mut self, table: Table) {
        self.tables.insert(table.name.clone(), table);
    }

    fn record_column(&mut self, table: &Table, column: Column) {
        self.tables
            .entry(table.name.clone())
            .or_insert_with(|| Table::new(table.name.clone(), table.parent.clone()))
            .columns
            .insert(column.name.clone(), column);
    }
}

/// A worker-private copy of a schema snapshot that records what it adds
#[derive(Debug, Clone)]
pub struct WorkingSchema {
    schema: Schema,
    delta: SchemaDelta,
}

impl WorkingSchema {
    pub fn from_snapshot(snapshot: &Schema) -> Self {
        WorkingSchema {
            schema: snapshot.clone(),
            delta: SchemaDelta::default(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn delta(&self) -> &SchemaDelta {
        &self.delta
    }

    pub fn ensure_table(&mut self, name: &str, parent: Option<&str>) -> Result<()> {
        if let Some(created) = self.schema.ensure_table(name, parent)? {
            self.delta.record_table(created);
        }
        Ok(())
    }

    pub fn infer_or_get_column(&mut self, table: &str, name: &str, value: &TypedValue) -> Result<ColumnMatch> {
        if self.schema.get_table(table).is_none() {
            self.ensure_table(table, None)?;
        }
        let matched = self.schema.infer_or_get_column(table, name, value)?;
        if matched.added {
            if let Some(t) = self.schema.get_table(table) {
                self.delta.record_column(t, matched.column.clone());
            }
        }
        Ok(matched)
    }

    pub fn into_delta(self) -> SchemaDelta {
        self.delta
    }
}
