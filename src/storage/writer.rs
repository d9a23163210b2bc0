use crate::config::{DestinationCapabilities, LoaderFileFormat};
use crate::error::{NormalizeError, Result};
use crate::melt::{Row, RowsByTable};
use crate::schema::{DataType, Schema, Table};
use crate::storage::insert_values::InsertValuesCodec;
use crate::storage::LoadStorage;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tracing::debug;

/// How a table writer serializes its buffered rows
#[derive(Clone)]
pub struct WriterOptions {
    pub format: LoaderFileFormat,
    pub buffer_max_items: usize,
    pub max_rows_per_insert: usize,
    pub insert_codec: Arc<dyn InsertValuesCodec>,
}

impl WriterOptions {
    pub fn new(format: LoaderFileFormat, caps: &DestinationCapabilities, buffer_max_items: usize) -> Self {
        WriterOptions {
            format,
            buffer_max_items,
            max_rows_per_insert: caps.max_rows_per_insert,
            insert_codec: caps.insert_codec.clone(),
        }
    }
}

/// Append-only writer for one table's job files within one load package
///
/// Rows are buffered and written in batches against the table definition current
/// at flush time. Insertion statements name their columns, so when the table
/// gains columns after rows were written the writer moves on to a new file part
/// instead of touching what is already on disk.
pub struct BufferedDataWriter {
    storage: LoadStorage,
    load_id: String,
    table: String,
    file_id: String,
    options: WriterOptions,
    buffer: Vec<Row>,
    file: Option<BufWriter<File>>,
    file_columns: Vec<String>,
    part: usize,
    files: Vec<String>,
    rows_written: usize,
}

impl BufferedDataWriter {
    pub fn new(storage: LoadStorage, load_id: &str, table: &str, file_id: &str, options: WriterOptions) -> Self {
        BufferedDataWriter {
            storage,
            load_id: load_id.to_string(),
            table: table.to_string(),
            file_id: file_id.to_string(),
            options,
            buffer: Vec::new(),
            file: None,
            file_columns: Vec::new(),
            part: 0,
            files: Vec::new(),
            rows_written: 0,
        }
    }

    pub fn write_rows(&mut self, rows: Vec<Row>, table: &Table) -> Result<()> {
        self.buffer.extend(rows);
        if self.buffer.len() >= self.options.buffer_max_items {
            self.flush(table)?;
        }
        Ok(())
    }

    pub fn flush(&mut self, table: &Table) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(&mut self.buffer);
        match self.options.format {
            LoaderFileFormat::Jsonl => self.write_jsonl(&rows)?,
            LoaderFileFormat::InsertValues => self.write_insert_values(&rows, table)?,
        }
        self.rows_written += rows.len();
        Ok(())
    }

    fn open_part(&mut self) -> Result<()> {
        if let Some(mut previous) = self.file.take() {
            previous.flush()?;
            self.part += 1;
        }
        let name = LoadStorage::build_job_file_name(&self.table, &self.file_id, self.part, self.options.format);
        let path = self.storage.job_file_path(&self.load_id, &name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(job = %name, "opened job file");
        self.files.push(name);
        self.file = Some(BufWriter::new(file));
        Ok(())
    }

    fn write_jsonl(&mut self, rows: &[Row]) -> Result<()> {
        if self.file.is_none() {
            self.open_part()?;
        }
        let Some(writer) = self.file.as_mut() else {
            return Ok(());
        };
        for row in rows {
            serde_json::to_writer(&mut *writer, row)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    fn write_insert_values(&mut self, rows: &[Row], table: &Table) -> Result<()> {
        let columns = table.column_names();
        if self.file.is_none() || self.file_columns != columns {
            self.open_part()?;
            self.file_columns = columns.clone();
        }
        let types: Vec<DataType> = columns
            .iter()
            .map(|c| table.columns.get(c).map(|col| col.data_type).unwrap_or(DataType::Text))
            .collect();
        let batch = match self.options.max_rows_per_insert {
            0 => rows.len(),
            n => n,
        };
        let codec = self.options.insert_codec.clone();
        let Some(writer) = self.file.as_mut() else {
            return Ok(());
        };
        for chunk in rows.chunks(batch) {
            let values: Vec<Vec<Option<&Value>>> = chunk
                .iter()
                .map(|row| columns.iter().map(|c| row.get(c)).collect())
                .collect();
            let statement = codec.encode_statement(&self.table, &columns, &types, &values);
            writer.write_all(statement.as_bytes())?;
        }
        Ok(())
    }

    /// Flush remaining rows and close the current file
    pub fn close(mut self, table: &Table) -> Result<TableWriteSummary> {
        self.flush(table)?;
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(TableWriteSummary {
            files: self.files,
            rows: self.rows_written,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableWriteSummary {
    pub files: Vec<String>,
    pub rows: usize,
}

/// All job files one worker writes into a package, one writer per table
///
/// Every worker gets its own `file_id`, so two workers writing the same table in
/// the same package never share a file.
pub struct PackageWriter {
    storage: LoadStorage,
    load_id: String,
    file_id: String,
    options: WriterOptions,
    writers: HashMap<String, BufferedDataWriter>,
}

impl PackageWriter {
    pub fn new(storage: LoadStorage, load_id: &str, file_id: &str, options: WriterOptions) -> Self {
        PackageWriter {
            storage,
            load_id: load_id.to_string(),
            file_id: file_id.to_string(),
            options,
            writers: HashMap::new(),
        }
    }

    /// The writer for `table`, created on first use
    pub fn open_or_append(&mut self, table: &str) -> &mut BufferedDataWriter {
        self.writers.entry(table.to_string()).or_insert_with(|| {
            BufferedDataWriter::new(
                self.storage.clone(),
                &self.load_id,
                table,
                &self.file_id,
                self.options.clone(),
            )
        })
    }

    /// Route rows to their table writers. Every table must already be in `schema`.
    pub fn write_rows(&mut self, rows: RowsByTable, schema: &Schema) -> Result<()> {
        for (table_name, table_rows) in rows {
            let table = known_table(schema, &table_name)?;
            self.open_or_append(&table_name).write_rows(table_rows, table)?;
        }
        Ok(())
    }

    /// Close every table writer against the final schema
    pub fn close(self, schema: &Schema) -> Result<BTreeMap<String, TableWriteSummary>> {
        let mut summary = BTreeMap::new();
        for (table_name, writer) in self.writers {
            let table = known_table(schema, &table_name)?;
            summary.insert(table_name, writer.close(table)?);
        }
        Ok(summary)
    }
}

fn known_table<'a>(schema: &'a Schema, name: &str) -> Result<&'a Table> {
    schema
        .get_table(name)
        .ok_or_else(|| NormalizeError::UnknownTable(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DestinationCapabilities;
    use crate::schema::{classify, WorkingSchema};
    use serde_json::json;
    use std::fs;

    fn setup(format: LoaderFileFormat, buffer_max_items: usize) -> (tempfile::TempDir, LoadStorage, WriterOptions) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LoadStorage::new(dir.path(), format).unwrap();
        storage.create_temp_load_package("1", "s").unwrap();
        let options = WriterOptions::new(format, &DestinationCapabilities::insert_values(), buffer_max_items);
        (dir, storage, options)
    }

    fn row_with(schema: &mut WorkingSchema, values: serde_json::Value) -> Row {
        let mut row = Row::root("1");
        for (k, v) in values.as_object().unwrap() {
            let m = schema.infer_or_get_column("doc", k, &classify(v, false).unwrap()).unwrap();
            row.0.insert(m.column.name, m.value);
        }
        row
    }

    #[test]
    fn test_jsonl_rows_one_per_line() {
        let (_dir, storage, options) = setup(LoaderFileFormat::Jsonl, 1);
        let mut schema = WorkingSchema::from_snapshot(&Schema::new("s"));
        schema.ensure_table("doc", None).unwrap();
        let rows = vec![row_with(&mut schema, json!({"a": 1})), row_with(&mut schema, json!({"a": 2}))];

        let mut writer = PackageWriter::new(storage.clone(), "1", "w1", options);
        let mut by_table = RowsByTable::new();
        by_table.insert("doc".to_string(), rows);
        writer.write_rows(by_table, schema.schema()).unwrap();
        let summary = writer.close(schema.schema()).unwrap();

        assert_eq!(summary["doc"].rows, 2);
        assert_eq!(summary["doc"].files, vec!["doc.w1.0.jsonl"]);
        let content = fs::read_to_string(storage.job_file_path("1", "doc.w1.0.jsonl")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(serde_json::from_str::<serde_json::Value>(lines[1]).unwrap()["a"], 2);
    }

    #[test]
    fn test_insert_values_batches_statements() {
        let (_dir, storage, mut options) = setup(LoaderFileFormat::InsertValues, 100);
        options.max_rows_per_insert = 2;
        let mut schema = WorkingSchema::from_snapshot(&Schema::new("s"));
        schema.ensure_table("doc", None).unwrap();
        let rows: Vec<Row> = (0..3).map(|i| row_with(&mut schema, json!({"a": i}))).collect();

        let mut writer = PackageWriter::new(storage.clone(), "1", "w1", options);
        let table = schema.schema().get_table("doc").unwrap().clone();
        writer.open_or_append("doc").write_rows(rows, &table).unwrap();
        writer.close(schema.schema()).unwrap();

        let content = fs::read_to_string(storage.job_file_path("1", "doc.w1.0.insert_values")).unwrap();
        assert_eq!(content.matches("INSERT INTO").count(), 2);
        assert!(content.starts_with("INSERT INTO \"doc\"(\"_dlt_id\",\"_dlt_load_id\",\"a\")\nVALUES\n"));
        assert_eq!(content.lines().count(), 7);
    }

    #[test]
    fn test_insert_values_rotates_when_columns_grow() {
        let (_dir, storage, options) = setup(LoaderFileFormat::InsertValues, 1);
        let mut schema = WorkingSchema::from_snapshot(&Schema::new("s"));
        schema.ensure_table("doc", None).unwrap();

        let mut writer = PackageWriter::new(storage.clone(), "1", "w1", options);
        let first = row_with(&mut schema, json!({"a": 1}));
        let table = schema.schema().get_table("doc").unwrap().clone();
        writer.open_or_append("doc").write_rows(vec![first], &table).unwrap();

        let second = row_with(&mut schema, json!({"a": 2, "b": true}));
        let table = schema.schema().get_table("doc").unwrap().clone();
        writer.open_or_append("doc").write_rows(vec![second], &table).unwrap();
        let summary = writer.close(schema.schema()).unwrap();

        assert_eq!(summary["doc"].files, vec!["doc.w1.0.insert_values", "doc.w1.1.insert_values"]);
        let first_file = fs::read_to_string(storage.job_file_path("1", "doc.w1.0.insert_values")).unwrap();
        assert!(!first_file.contains("\"b\""));
    }

    #[test]
    fn test_rows_for_unknown_table_are_an_error() {
        let (_dir, storage, options) = setup(LoaderFileFormat::Jsonl, 1);
        let mut writer = PackageWriter::new(storage.clone(), "1", "w1", options);
        let mut by_table = RowsByTable::new();
        by_table.insert("ghost".to_string(), vec![Row::root("1")]);

        let err = writer.write_rows(by_table, &Schema::new("s")).unwrap_err();
        assert!(matches!(err, NormalizeError::UnknownTable(name) if name == "ghost"));
        assert!(storage.list_temp_jobs("1").unwrap().is_empty());
    }
}
