use crate::error::{NormalizeError, Result};
use crate::melt::types::{FlattenConfig, Row, RowsByTable};
use crate::schema::naming::{check_length, child_table_name, make_path, normalize_identifier};
use crate::schema::{classify, Schema, SchemaDelta, WorkingSchema};
use serde_json::{Map, Value};

/// Column holding the element of an array of scalars
pub const VALUE_COLUMN: &str = "value";

/// Flattens nested documents into parent and child table rows
///
/// Nested objects fold into the enclosing row with `__`-joined column names.
/// Arrays become child tables named `<table>__<path>`, one row per element, linked
/// back through `_dlt_parent_id` and `_dlt_list_idx`.
#[derive(Debug, Clone)]
pub struct ItemFlattener {
    config: FlattenConfig,
}

impl ItemFlattener {
    pub fn new(config: FlattenConfig) -> Self {
        ItemFlattener { config }
    }

    /// Flatten one document against a read-only snapshot
    pub fn flatten(
        &self,
        snapshot: &Schema,
        table_hint: &str,
        load_id: &str,
        document: Value,
    ) -> Result<(RowsByTable, SchemaDelta)> {
        let mut working = WorkingSchema::from_snapshot(snapshot);
        let rows = self.flatten_into(&mut working, table_hint, load_id, document)?;
        Ok((rows, working.into_delta()))
    }

    /// Flatten one document, accumulating schema changes in `schema`
    ///
    /// Workers keep one [`WorkingSchema`] for their whole batch so that a type fixed
    /// by an earlier document also binds the later ones.
    pub fn flatten_into(
        &self,
        schema: &mut WorkingSchema,
        table_hint: &str,
        load_id: &str,
        document: Value,
    ) -> Result<RowsByTable> {
        let mut out = RowsByTable::new();
        let object = match document {
            Value::Object(obj) => obj,
            Value::Null => return Ok(out),
            scalar => {
                let mut wrapped = Map::new();
                wrapped.insert(VALUE_COLUMN.to_string(), scalar);
                wrapped
            }
        };
        if object.is_empty() {
            return Ok(out);
        }

        let table = normalize_identifier(table_hint);
        check_length(&table, self.config.max_table_identifier_length)?;
        schema.ensure_table(&table, None)?;

        let mut row = Row::root(load_id);
        self.flatten_object(schema, &table, &mut row, None, object, 0, &mut out)?;
        out.entry(table).or_default().push(row);
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn flatten_object(
        &self,
        schema: &mut WorkingSchema,
        table: &str,
        row: &mut Row,
        prefix: Option<&str>,
        object: Map<String, Value>,
        depth: usize,
        out: &mut RowsByTable,
    ) -> Result<()> {
        for (key, value) in object.into_iter() {
            let ident = normalize_identifier(&key);
            let path = match prefix {
                Some(p) => make_path(&[p, ident.as_str()]),
                None => ident,
            };
            let expand = depth < self.config.max_nesting_level;

            match value {
                Value::Null => {}
                Value::Object(inner) if expand => {
                    if !inner.is_empty() {
                        self.flatten_object(schema, table, row, Some(&path), inner, depth + 1, out)?;
                    }
                }
                Value::Array(items) if expand => {
                    let parent_id = row.id().to_string();
                    self.flatten_array(schema, table, &parent_id, &path, items, depth + 1, out)?;
                }
                other => self.set_value(schema, table, row, &path, &other)?,
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn flatten_array(
        &self,
        schema: &mut WorkingSchema,
        parent_table: &str,
        parent_id: &str,
        path: &str,
        items: Vec<Value>,
        depth: usize,
        out: &mut RowsByTable,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let child_table = child_table_name(parent_table, path);
        check_length(&child_table, self.config.max_table_identifier_length)?;
        schema.ensure_table(&child_table, Some(parent_table))?;

        for (idx, item) in items.into_iter().enumerate() {
            let mut row = Row::child(parent_id, idx);
            match item {
                Value::Object(obj) => {
                    self.flatten_object(schema, &child_table, &mut row, None, obj, depth, out)?;
                }
                Value::Null => {}
                // nested arrays are stored whole
                other => self.set_value(schema, &child_table, &mut row, VALUE_COLUMN, &other)?,
            }
            out.entry(child_table.clone()).or_default().push(row);
        }
        Ok(())
    }

    fn set_value(
        &self,
        schema: &mut WorkingSchema,
        table: &str,
        row: &mut Row,
        column: &str,
        value: &Value,
    ) -> Result<()> {
        let Some(typed) = classify(value, self.config.infer_timestamps) else {
            return Ok(());
        };
        let matched = schema.infer_or_get_column(table, column, &typed)?;
        check_length(&matched.column.name, self.config.max_column_identifier_length)?;
        if row.contains(&matched.column.name) {
            return Err(NormalizeError::NamingCollision {
                table: table.to_string(),
                name: matched.column.name,
                detail: "is produced by more than one field of the same document".to_string(),
            });
        }
        row.0.insert(matched.column.name, matched.value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, ID_COLUMN, LIST_IDX_COLUMN, LOAD_ID_COLUMN, PARENT_ID_COLUMN};
    use serde_json::json;

    fn flattener() -> ItemFlattener {
        ItemFlattener::new(FlattenConfig::default())
    }

    #[test]
    fn test_nested_object_folds_into_row() {
        let input = json!({
            "id": 1,
            "parse_data": {"intent": {"name": "greet"}}
        });

        let (rows, delta) = flattener().flatten(&Schema::new("event"), "event", "load_1", input).unwrap();

        assert_eq!(rows.len(), 1);
        let row = &rows["event"][0];
        assert_eq!(row.get("parse_data__intent__name").unwrap(), "greet");
        assert_eq!(row.get(LOAD_ID_COLUMN).unwrap(), "load_1");
        assert!(row.contains(ID_COLUMN));
        assert!(delta.tables["event"].columns.contains_key("parse_data__intent__name"));
    }

    #[test]
    fn test_array_creates_linked_child_rows() {
        let input = json!({
            "name": "Alice",
            "items": [{"sku": "a"}, {"sku": "b"}, {"sku": "c"}]
        });

        let (rows, delta) = flattener().flatten(&Schema::new("shop"), "orders", "load_1", input).unwrap();

        let root_id = rows["orders"][0].id().to_string();
        let children = &rows["orders__items"];
        assert_eq!(children.len(), 3);
        for (idx, child) in children.iter().enumerate() {
            assert_eq!(child.get(PARENT_ID_COLUMN).unwrap(), root_id.as_str());
            assert_eq!(child.get(LIST_IDX_COLUMN).unwrap(), idx);
            assert!(!child.contains(LOAD_ID_COLUMN));
        }
        assert_eq!(delta.tables["orders__items"].parent.as_deref(), Some("orders"));
    }

    #[test]
    fn test_array_inside_nested_object_uses_full_path() {
        let input = json!({"parse_data": {"intent_ranking": [{"name": "greet", "confidence": 0.9}]}});

        let (rows, _) = flattener().flatten(&Schema::new("event"), "event", "l", input).unwrap();

        assert!(rows.contains_key("event__parse_data__intent_ranking"));
    }

    #[test]
    fn test_grandchild_links_to_child() {
        let input = json!({"tx": [{"logs": [{"topic": "a"}]}]});

        let (rows, delta) = flattener().flatten(&Schema::new("eth"), "blocks", "l", input).unwrap();

        let child_id = rows["blocks__tx"][0].id().to_string();
        let grandchild = &rows["blocks__tx__logs"][0];
        assert_eq!(grandchild.get(PARENT_ID_COLUMN).unwrap(), child_id.as_str());
        assert_eq!(delta.tables["blocks__tx__logs"].parent.as_deref(), Some("blocks__tx"));
    }

    #[test]
    fn test_scalar_array_and_nested_array() {
        let input = json!({"tags": ["rust", "json"], "matrix": [[1, 2], [3]]});

        let (rows, delta) = flattener().flatten(&Schema::new("s"), "doc", "l", input).unwrap();

        assert_eq!(rows["doc__tags"][1].get(VALUE_COLUMN).unwrap(), "json");
        assert_eq!(rows["doc__matrix"][0].get(VALUE_COLUMN).unwrap(), &json!([1, 2]));
        assert_eq!(
            delta.tables["doc__matrix"].columns[VALUE_COLUMN].data_type,
            DataType::Complex
        );
    }

    #[test]
    fn test_empty_objects_and_nulls_add_nothing() {
        let input = json!({"a": {}, "b": null, "c": [], "d": 1});

        let (rows, delta) = flattener().flatten(&Schema::new("s"), "doc", "l", input).unwrap();

        assert_eq!(rows.len(), 1);
        let columns: Vec<_> = delta.tables["doc"].columns.keys().cloned().collect();
        assert_eq!(columns, vec![ID_COLUMN, LOAD_ID_COLUMN, "d"]);
    }

    #[test]
    fn test_empty_document_produces_no_rows() {
        let (rows, delta) = flattener().flatten(&Schema::new("s"), "doc", "l", json!({})).unwrap();
        assert!(rows.is_empty());
        assert!(delta.is_empty());
    }

    #[test]
    fn test_scalar_document_is_wrapped() {
        let (rows, _) = flattener().flatten(&Schema::new("s"), "doc", "l", json!(42)).unwrap();
        assert_eq!(rows["doc"][0].get(VALUE_COLUMN).unwrap(), 42);
    }

    #[test]
    fn test_literal_separator_is_escaped() {
        let input = json!({"a": {"b": 1}, "a__b": 2});

        let (rows, _) = flattener().flatten(&Schema::new("s"), "doc", "l", input).unwrap();

        let row = &rows["doc"][0];
        assert_eq!(row.get("a__b").unwrap(), 1);
        assert_eq!(row.get("a____b").unwrap(), 2);
    }

    #[test]
    fn test_underscore_field_and_literal_separator_stay_apart() {
        let mut working = WorkingSchema::from_snapshot(&Schema::new("s"));
        let f = flattener();
        let literal = f.flatten_into(&mut working, "doc", "l", json!({"a__b": 1})).unwrap();
        let nested = f.flatten_into(&mut working, "doc", "l", json!({"a": {"_b": "x"}})).unwrap();

        assert!(literal["doc"][0].contains("a____b"));
        assert!(nested["doc"][0].contains("a___b"));
        let doc = working.schema().get_table("doc").unwrap();
        assert_eq!(doc.columns["a____b"].data_type, DataType::Bigint);
        assert_eq!(doc.columns["a___b"].data_type, DataType::Text);
        assert!(!doc.columns.contains_key("a____b__v_text"));
    }

    #[test]
    fn test_reaction_counters_get_distinct_columns() {
        let input = json!({"reactions": {"+1": 1, "-1": 0, "total_count": 1}});

        let (rows, _) = flattener().flatten(&Schema::new("github"), "issues", "l", input).unwrap();

        let row = &rows["issues"][0];
        assert_eq!(row.get("reactions___1").unwrap(), 0);
        assert_eq!(row.get("reactions__x1").unwrap(), 1);
        assert!(!row.contains("reactions__1"));
        assert!(row.contains("reactions__total_count"));
    }

    #[test]
    fn test_conflicting_type_goes_to_variant() {
        let mut working = WorkingSchema::from_snapshot(&Schema::new("s"));
        let f = flattener();
        f.flatten_into(&mut working, "doc", "l", json!({"x": 1})).unwrap();
        let rows = f.flatten_into(&mut working, "doc", "l", json!({"x": "hundred"})).unwrap();

        assert_eq!(rows["doc"][0].get("x__v_text").unwrap(), "hundred");
        assert!(!rows["doc"][0].contains("x"));
        assert_eq!(working.schema().get_column("doc", "x").unwrap().data_type, DataType::Bigint);
    }

    #[test]
    fn test_keys_normalizing_to_same_name_collide() {
        let input = json!({"A": 1, "a": 2});
        let err = flattener().flatten(&Schema::new("s"), "doc", "l", input).unwrap_err();
        assert!(matches!(err, NormalizeError::NamingCollision { .. }));
    }

    #[test]
    fn test_max_nesting_keeps_deep_values_whole() {
        let config = FlattenConfig {
            max_nesting_level: 1,
            ..FlattenConfig::default()
        };
        let input = json!({"a": {"b": {"c": 1}}});

        let (rows, delta) = ItemFlattener::new(config)
            .flatten(&Schema::new("s"), "doc", "l", input)
            .unwrap();

        assert_eq!(rows["doc"][0].get("a__b").unwrap(), &json!({"c": 1}));
        assert_eq!(delta.tables["doc"].columns["a__b"].data_type, DataType::Complex);
    }

    #[test]
    fn test_identifier_limit() {
        let config = FlattenConfig {
            max_column_identifier_length: Some(8),
            ..FlattenConfig::default()
        };
        let input = json!({"a_rather_long_name": 1});
        let err = ItemFlattener::new(config)
            .flatten(&Schema::new("s"), "doc", "l", input)
            .unwrap_err();
        assert!(matches!(err, NormalizeError::IdentifierTooLong { .. }));
    }
}
