//! The normalize run: pending extracted files in, finalized load packages out
//!
//! Per schema: load the canonical schema, split the schema's files into balanced
//! groups, flatten each group on a pool worker against a frozen snapshot, then
//! merge the returned deltas one at a time on this thread. The package is
//! finalized only when every group of the schema succeeded.

use crate::config::{DestinationCapabilities, LoaderFileFormat, NormalizeConfig};
use crate::distribute::group_worker_files;
use crate::error::{NormalizeError, Result};
use crate::melt::ItemFlattener;
use crate::pool::WorkerPool;
use crate::schema::{Schema, SchemaDelta, SchemaStorage, WorkingSchema};
use crate::storage::{LoadStorage, NormalizeStorage, PackageWriter, TableWriteSummary, WriterOptions};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{debug, error, info, warn};

/// One unit of pool work: whole files, never split
#[derive(Debug, Clone)]
pub struct WorkerTask {
    /// Suffix for every job file this task writes
    pub file_id: String,
    pub files: Vec<String>,
}

/// What a worker hands back after writing its job files
#[derive(Debug)]
pub struct GroupResult {
    pub file_id: String,
    pub files: Vec<String>,
    pub delta: SchemaDelta,
    pub items: usize,
    pub rejected_records: usize,
    pub tables: BTreeMap<String, TableWriteSummary>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaRunReport {
    pub schema_name: String,
    pub load_id: String,
    pub finalized: bool,
    pub schema_version: u64,
    pub files_succeeded: usize,
    /// Files left pending for the next run
    pub files_failed: Vec<String>,
    /// Files whose group hit an error a rerun cannot fix
    pub files_fatal: Vec<String>,
    /// First fatal error for the schema, including one that aborted it
    pub error: Option<String>,
    pub items: usize,
    pub rejected_records: usize,
    pub rows_per_table: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub schemas: Vec<SchemaRunReport>,
}

impl RunReport {
    pub fn all_finalized(&self) -> bool {
        self.schemas.iter().all(|s| s.finalized)
    }

    pub fn files_failed(&self) -> usize {
        self.schemas.iter().map(|s| s.files_failed.len()).sum()
    }

    /// `(schema, error)` for every schema that hit a fatal error
    pub fn errors(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schemas
            .iter()
            .filter_map(|s| s.error.as_deref().map(|e| (s.schema_name.as_str(), e)))
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaRunReport> {
        self.schemas.iter().find(|s| s.schema_name == name)
    }
}

pub struct Normalize {
    config: NormalizeConfig,
    capabilities: DestinationCapabilities,
    normalize_storage: NormalizeStorage,
    load_storage: LoadStorage,
    schema_storage: SchemaStorage,
    flattener: ItemFlattener,
}

impl Normalize {
    pub fn new(config: NormalizeConfig) -> Result<Self> {
        let capabilities = config.destination.capabilities();
        Self::with_capabilities(config, capabilities)
    }

    /// Use explicitly supplied destination capabilities instead of the configured destination's
    pub fn with_capabilities(config: NormalizeConfig, capabilities: DestinationCapabilities) -> Result<Self> {
        config.validate()?;
        let format = capabilities.loader_file_format(config.loader_file_format)?;
        let normalize_storage = NormalizeStorage::new(&config.normalize_root)?;
        let load_storage = LoadStorage::new(&config.load_root, format)?;
        let schema_storage = SchemaStorage::new(&config.schema_root)?;
        let flattener = ItemFlattener::new(config.flatten_config(&capabilities));
        Ok(Normalize {
            config,
            capabilities,
            normalize_storage,
            load_storage,
            schema_storage,
            flattener,
        })
    }

    pub fn config(&self) -> &NormalizeConfig {
        &self.config
    }

    pub fn loader_file_format(&self) -> LoaderFileFormat {
        self.load_storage.loader_file_format()
    }

    pub fn normalize_storage(&self) -> &NormalizeStorage {
        &self.normalize_storage
    }

    pub fn load_storage(&self) -> &LoadStorage {
        &self.load_storage
    }

    pub fn schema_storage(&self) -> &SchemaStorage {
        &self.schema_storage
    }

    pub fn load_or_create_schema(&self, name: &str) -> Result<Schema> {
        self.schema_storage.load_or_create(name)
    }

    /// Normalize everything pending, schema by schema
    ///
    /// One schema failing does not stop the others; its error is in its report.
    pub fn run(&self, pool: &WorkerPool) -> Result<RunReport> {
        let files = self.normalize_storage.list_files_to_normalize_sorted()?;
        let mut report = RunReport::default();
        if files.is_empty() {
            info!("no files to normalize");
            return Ok(report);
        }
        for (schema_name, schema_files) in NormalizeStorage::group_by_schema(&files)? {
            match self.spool_files(pool, &schema_name, schema_files) {
                Ok(schema_report) => report.schemas.push(schema_report),
                Err(e) => {
                    error!(schema = %schema_name, error = %e, "normalizing schema failed");
                    report.schemas.push(SchemaRunReport {
                        schema_name,
                        error: Some(e.to_string()),
                        ..SchemaRunReport::default()
                    });
                }
            }
        }
        info!(
            schemas = report.schemas.len(),
            files_failed = report.files_failed(),
            "normalize run complete"
        );
        Ok(report)
    }

    /// Normalize one schema's files into its load package
    ///
    /// A package left open by an earlier partial failure is resumed rather than
    /// started over, since the files of its successful groups are already consumed.
    pub fn spool_files(&self, pool: &WorkerPool, schema_name: &str, files: Vec<String>) -> Result<SchemaRunReport> {
        let mut schema = self.load_or_create_schema(schema_name)?;
        let initial_version = schema.version;

        let load_id = match self.load_storage.find_temp_load_package(schema_name)? {
            Some(load_id) => {
                info!(schema = schema_name, load_id = %load_id, "resuming unfinished load package");
                load_id
            }
            None => {
                let load_id = self.load_storage.new_load_id();
                self.load_storage.create_temp_load_package(&load_id, schema_name)?;
                load_id
            }
        };

        let tasks: Vec<WorkerTask> = group_worker_files(&files, pool.size())
            .into_iter()
            .map(|files| WorkerTask {
                file_id: uuid::Uuid::new_v4().simple().to_string(),
                files,
            })
            .collect();
        info!(
            schema = schema_name,
            load_id = %load_id,
            files = files.len(),
            groups = tasks.len(),
            format = %self.loader_file_format(),
            "normalizing schema"
        );

        let mut report = SchemaRunReport {
            schema_name: schema_name.to_string(),
            load_id: load_id.clone(),
            ..SchemaRunReport::default()
        };
        let mut consumed: Vec<String> = Vec::new();
        let mut storage_error: Option<NormalizeError> = None;

        let snapshot = schema.clone();
        let task_files: Vec<WorkerTask> = tasks.clone();
        pool.run(
            tasks,
            |_, task| self.map_group(&snapshot, &load_id, task),
            |idx, outcome| {
                let task = &task_files[idx];
                let failure = match outcome {
                    Ok(result) => match schema.merge(&result.delta) {
                        Ok(bumped) => {
                            if let Some(version) = bumped {
                                debug!(schema = schema_name, version, "schema updated");
                            }
                            report.items += result.items;
                            report.rejected_records += result.rejected_records;
                            for (table, summary) in &result.tables {
                                *report.rows_per_table.entry(table.clone()).or_default() += summary.rows;
                            }
                            None
                        }
                        Err(e) => Some(e),
                    },
                    Err(e) => Some(e),
                };

                let Some(e) = failure else {
                    report.files_succeeded += task.files.len();
                    consumed.extend(task.files.iter().cloned());
                    return;
                };
                if is_fatal_for(&e, &snapshot) {
                    error!(schema = schema_name, file_id = %task.file_id, error = %e, "worker group failed, not retryable");
                    report.files_fatal.extend(task.files.iter().cloned());
                    report.error.get_or_insert_with(|| e.to_string());
                } else {
                    warn!(schema = schema_name, file_id = %task.file_id, files = task.files.len(), error = %e, "worker group failed");
                    report.files_failed.extend(task.files.iter().cloned());
                }
                if let Err(e) = self.load_storage.delete_temp_jobs(&load_id, &task.file_id) {
                    storage_error.get_or_insert(e);
                }
            },
        );
        if let Some(e) = storage_error {
            return Err(e);
        }

        // rows already on disk reference the merged columns, so the schema is saved
        // before their input files are consumed
        if schema.version != initial_version {
            self.schema_storage.save(&schema)?;
        }
        self.normalize_storage.consume(&consumed)?;
        report.schema_version = schema.version;

        if report.files_failed.is_empty() && report.files_fatal.is_empty() {
            self.load_storage.commit_temp_load_package(&load_id, &schema)?;
            report.finalized = true;
        } else if !report.files_fatal.is_empty() {
            error!(
                schema = schema_name,
                load_id = %load_id,
                files = report.files_fatal.len(),
                "load package left open, input needs fixing before it can be finalized"
            );
        } else {
            warn!(
                schema = schema_name,
                load_id = %load_id,
                failed = report.files_failed.len(),
                "load package left open, failed files will be retried"
            );
        }
        Ok(report)
    }

    /// Flatten and write every file of one group. Runs on a pool worker.
    pub fn map_group(&self, snapshot: &Schema, load_id: &str, task: WorkerTask) -> Result<GroupResult> {
        let mut working = WorkingSchema::from_snapshot(snapshot);
        let options = WriterOptions::new(self.loader_file_format(), &self.capabilities, self.config.buffer_max_items);
        let mut writer = PackageWriter::new(self.load_storage.clone(), load_id, &task.file_id, options);
        let mut items = 0;
        let mut rejected_records = 0;

        for file in &task.files {
            let parsed = NormalizeStorage::parse_normalize_file_name(file)?;
            let reader = BufReader::new(File::open(self.normalize_storage.file_path(file))?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let document = match parse_document(line) {
                    Ok(document) => document,
                    Err(e) => {
                        warn!(file = %file, line = line_no + 1, error = %e, "rejecting malformed record");
                        rejected_records += 1;
                        continue;
                    }
                };
                let documents = match document {
                    Value::Array(documents) => documents,
                    other => vec![other],
                };
                for document in documents {
                    let rows = self
                        .flattener
                        .flatten_into(&mut working, &parsed.table_name, load_id, document)?;
                    writer.write_rows(rows, working.schema())?;
                    items += 1;
                }
            }
            debug!(file = %file, file_id = %task.file_id, "file normalized");
        }

        let tables = writer.close(working.schema())?;
        Ok(GroupResult {
            file_id: task.file_id,
            files: task.files,
            delta: working.into_delta(),
            items,
            rejected_records,
            tables,
        })
    }
}

/// Whether rerunning the group could never succeed
///
/// A type change on a column the worker did not see in its snapshot comes from a
/// concurrent group introducing the same column first. Rerun against the merged
/// schema, the group takes the variant route instead.
fn is_fatal_for(error: &NormalizeError, snapshot: &Schema) -> bool {
    match error {
        NormalizeError::ColumnTypeChange { table, column, .. } => snapshot.get_column(table, column).is_some(),
        other => other.is_fatal(),
    }
}

fn parse_document(line: String) -> std::result::Result<Value, simd_json::Error> {
    let mut bytes = line.into_bytes();
    simd_json::serde::from_slice(&mut bytes)
}
