//! Batched insertion-statement encoding
//!
//! The statement dialect belongs to the destination, so the writer only talks to
//! an [`InsertValuesCodec`]. [`AnsiInsertCodec`] produces
//!
//! ```text
//! INSERT INTO "table"("a","b")
//! VALUES
//! (1,'x'),
//! (2,NULL);
//! ```

use crate::schema::DataType;
use serde_json::Value;

pub trait InsertValuesCodec: Send + Sync {
    /// Everything before the first row of a statement
    fn statement_header(&self, table: &str, columns: &[String]) -> String;

    /// One row tuple. `values` line up with the header's columns.
    fn encode_row(&self, values: &[Option<&Value>], types: &[DataType]) -> String;

    fn row_separator(&self) -> &str {
        ",\n"
    }

    fn statement_terminator(&self) -> &str {
        ";\n"
    }

    /// A complete statement for `rows`
    fn encode_statement(&self, table: &str, columns: &[String], types: &[DataType], rows: &[Vec<Option<&Value>>]) -> String {
        let mut out = self.statement_header(table, columns);
        let encoded: Vec<String> = rows.iter().map(|r| self.encode_row(r, types)).collect();
        out.push_str(&encoded.join(self.row_separator()));
        out.push_str(self.statement_terminator());
        out
    }
}

/// Double-quoted identifiers, single-quoted literals
#[derive(Debug, Clone, Copy, Default)]
pub struct AnsiInsertCodec;

impl AnsiInsertCodec {
    fn quote_identifier(name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_literal(s: &str) -> String {
        format!("'{}'", s.replace('\'', "''"))
    }

    fn encode_value(value: Option<&Value>, data_type: DataType) -> String {
        match value {
            None | Some(Value::Null) => "NULL".to_string(),
            Some(Value::Bool(b)) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => match data_type {
                DataType::Decimal if is_numeric_literal(s) => s.clone(),
                _ => Self::quote_literal(s),
            },
            Some(complex) => Self::quote_literal(&complex.to_string()),
        }
    }
}

fn is_numeric_literal(s: &str) -> bool {
    !s.is_empty() && s.parse::<f64>().is_ok() && s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'))
}

impl InsertValuesCodec for AnsiInsertCodec {
    fn statement_header(&self, table: &str, columns: &[String]) -> String {
        let columns: Vec<String> = columns.iter().map(|c| Self::quote_identifier(c)).collect();
        format!("INSERT INTO {}({})\nVALUES\n", Self::quote_identifier(table), columns.join(","))
    }

    fn encode_row(&self, values: &[Option<&Value>], types: &[DataType]) -> String {
        let encoded: Vec<String> = values
            .iter()
            .zip(types.iter())
            .map(|(v, t)| Self::encode_value(*v, *t))
            .collect();
        format!("({})", encoded.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_layout() {
        let codec = AnsiInsertCodec;
        let a = json!(1);
        let b = json!("it's");
        let columns = vec!["id".to_string(), "name".to_string()];
        let types = vec![DataType::Bigint, DataType::Text];
        let rows = vec![vec![Some(&a), Some(&b)], vec![Some(&a), None]];

        let statement = codec.encode_statement("users", &columns, &types, &rows);

        assert_eq!(
            statement,
            "INSERT INTO \"users\"(\"id\",\"name\")\nVALUES\n(1,'it''s'),\n(1,NULL);\n"
        );
    }

    #[test]
    fn test_value_literals() {
        let complex = json!({"user_id": "world"});
        assert_eq!(AnsiInsertCodec::encode_value(Some(&json!(true)), DataType::Bool), "TRUE");
        assert_eq!(AnsiInsertCodec::encode_value(Some(&json!("12.50")), DataType::Decimal), "12.50");
        assert_eq!(
            AnsiInsertCodec::encode_value(Some(&json!("1; DROP")), DataType::Decimal),
            "'1; DROP'"
        );
        assert_eq!(
            AnsiInsertCodec::encode_value(Some(&complex), DataType::Complex),
            "'{\"user_id\":\"world\"}'"
        );
    }
}
