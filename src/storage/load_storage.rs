//! Load package directories
//!
//! ```text
//! <root>/normalizing/<load_id>/         open package, being written
//!     schema_name
//!     new_jobs/<table>.<file_id>.<part>.<ext>
//! <root>/normalized/<load_id>/          finalized, ready for loading
//!     schema.json
//!     new_jobs/...
//! ```
//!
//! A package moves from `normalizing` to `normalized` with a single rename.

use crate::config::LoaderFileFormat;
use crate::error::{NormalizeError, Result};
use crate::schema::Schema;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NORMALIZING_FOLDER: &str = "normalizing";
const NORMALIZED_FOLDER: &str = "normalized";
const NEW_JOBS_FOLDER: &str = "new_jobs";
const SCHEMA_FILE: &str = "schema.json";
const SCHEMA_NAME_FILE: &str = "schema_name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFileName {
    pub table_name: String,
    /// Unique per writer, so concurrent workers never share a file
    pub file_id: String,
    /// Counts up when a writer rotates to a new file
    pub part: usize,
    pub format: LoaderFileFormat,
}

#[derive(Debug, Clone)]
pub struct LoadStorage {
    root: PathBuf,
    loader_file_format: LoaderFileFormat,
}

impl LoadStorage {
    pub fn new<P: AsRef<Path>>(root: P, loader_file_format: LoaderFileFormat) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(NORMALIZING_FOLDER))?;
        fs::create_dir_all(root.join(NORMALIZED_FOLDER))?;
        Ok(LoadStorage {
            root,
            loader_file_format,
        })
    }

    pub fn loader_file_format(&self) -> LoaderFileFormat {
        self.loader_file_format
    }

    pub fn temp_package_path(&self, load_id: &str) -> PathBuf {
        self.root.join(NORMALIZING_FOLDER).join(load_id)
    }

    pub fn package_path(&self, load_id: &str) -> PathBuf {
        self.root.join(NORMALIZED_FOLDER).join(load_id)
    }

    fn package_exists(&self, load_id: &str) -> bool {
        self.temp_package_path(load_id).exists() || self.package_path(load_id).exists()
    }

    /// A load id not used by any package: `<unix seconds>.<microseconds>`
    pub fn new_load_id(&self) -> String {
        let mut micros = chrono::Utc::now().timestamp_micros();
        loop {
            let load_id = format!("{}.{:06}", micros / 1_000_000, micros % 1_000_000);
            if !self.package_exists(&load_id) {
                return load_id;
            }
            micros += 1;
        }
    }

    pub fn create_temp_load_package(&self, load_id: &str, schema_name: &str) -> Result<()> {
        if self.package_exists(load_id) {
            return Err(NormalizeError::PackageExists(load_id.to_string()));
        }
        let path = self.temp_package_path(load_id);
        fs::create_dir_all(path.join(NEW_JOBS_FOLDER))?;
        fs::write(path.join(SCHEMA_NAME_FILE), schema_name)?;
        debug!(load_id, schema = schema_name, "created load package");
        Ok(())
    }

    /// An open package left over from an earlier, partially failed run
    pub fn find_temp_load_package(&self, schema_name: &str) -> Result<Option<String>> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.root.join(NORMALIZING_FOLDER))? {
            let entry = entry?;
            let marker = entry.path().join(SCHEMA_NAME_FILE);
            if marker.exists() && fs::read_to_string(&marker)?.trim() == schema_name {
                if let Some(load_id) = entry.file_name().to_str() {
                    found.push(load_id.to_string());
                }
            }
        }
        found.sort();
        Ok(found.into_iter().next())
    }

    pub fn build_job_file_name(table_name: &str, file_id: &str, part: usize, format: LoaderFileFormat) -> String {
        format!("{}.{}.{}.{}", table_name, file_id, part, format.extension())
    }

    pub fn parse_job_file_name(name: &str) -> Result<JobFileName> {
        let invalid = || NormalizeError::InvalidFileName {
            name: name.to_string(),
            reason: "expected <table>.<file_id>.<part>.<format>".to_string(),
        };
        let parts: Vec<&str> = name.split('.').collect();
        match parts.as_slice() {
            [table, file_id, part, ext] if !table.is_empty() && !file_id.is_empty() => Ok(JobFileName {
                table_name: table.to_string(),
                file_id: file_id.to_string(),
                part: part.parse().map_err(|_| invalid())?,
                format: ext.parse().map_err(|_| invalid())?,
            }),
            _ => Err(invalid()),
        }
    }

    pub fn job_file_path(&self, load_id: &str, file_name: &str) -> PathBuf {
        self.temp_package_path(load_id).join(NEW_JOBS_FOLDER).join(file_name)
    }

    fn list_jobs_in(dir: &Path) -> Result<Vec<String>> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(dir)? {
            if let Some(name) = entry?.file_name().to_str() {
                if Self::parse_job_file_name(name).is_ok() {
                    jobs.push(name.to_string());
                }
            }
        }
        jobs.sort();
        Ok(jobs)
    }

    pub fn list_temp_jobs(&self, load_id: &str) -> Result<Vec<String>> {
        Self::list_jobs_in(&self.temp_package_path(load_id).join(NEW_JOBS_FOLDER))
    }

    /// Drop every job file a given writer produced in an open package
    pub fn delete_temp_jobs(&self, load_id: &str, file_id: &str) -> Result<usize> {
        let mut deleted = 0;
        for job in self.list_temp_jobs(load_id)? {
            if Self::parse_job_file_name(&job)?.file_id == file_id {
                fs::remove_file(self.job_file_path(load_id, &job))?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Store the frozen schema the package's rows conform to, then mark it ready
    pub fn commit_temp_load_package(&self, load_id: &str, schema: &Schema) -> Result<PathBuf> {
        let temp = self.temp_package_path(load_id);
        if !temp.exists() {
            return Err(NormalizeError::PackageNotFound(load_id.to_string()));
        }
        fs::write(temp.join(SCHEMA_FILE), serde_json::to_string_pretty(schema)?)?;
        let target = self.package_path(load_id);
        fs::rename(&temp, &target)?;
        info!(load_id, schema = %schema.name, version = schema.version, "load package ready");
        Ok(target)
    }

    /// Finalized load ids in order
    pub fn list_packages(&self) -> Result<Vec<String>> {
        let mut packages = Vec::new();
        for entry in fs::read_dir(self.root.join(NORMALIZED_FOLDER))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    packages.push(name.to_string());
                }
            }
        }
        packages.sort();
        Ok(packages)
    }

    pub fn is_package_finalized(&self, load_id: &str) -> bool {
        self.package_path(load_id).join(SCHEMA_FILE).exists()
    }

    pub fn list_new_jobs(&self, load_id: &str) -> Result<Vec<String>> {
        let path = self.package_path(load_id);
        if !path.exists() {
            return Err(NormalizeError::PackageNotFound(load_id.to_string()));
        }
        Self::list_jobs_in(&path.join(NEW_JOBS_FOLDER))
    }

    pub fn new_job_path(&self, load_id: &str, file_name: &str) -> PathBuf {
        self.package_path(load_id).join(NEW_JOBS_FOLDER).join(file_name)
    }

    pub fn load_package_schema(&self, load_id: &str) -> Result<Schema> {
        let path = self.package_path(load_id).join(SCHEMA_FILE);
        if !path.exists() {
            return Err(NormalizeError::PackageNotFound(load_id.to_string()));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, LoadStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LoadStorage::new(dir.path(), LoaderFileFormat::Jsonl).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_job_file_name_roundtrip() {
        let name = LoadStorage::build_job_file_name("event__items", "w1", 2, LoaderFileFormat::InsertValues);
        assert_eq!(name, "event__items.w1.2.insert_values");
        let parsed = LoadStorage::parse_job_file_name(&name).unwrap();
        assert_eq!(parsed.table_name, "event__items");
        assert_eq!(parsed.file_id, "w1");
        assert_eq!(parsed.part, 2);
        assert_eq!(parsed.format, LoaderFileFormat::InsertValues);
        assert!(LoadStorage::parse_job_file_name("event.w1.0.csv").is_err());
        assert!(LoadStorage::parse_job_file_name("event.w1.jsonl").is_err());
    }

    #[test]
    fn test_package_lifecycle() {
        let (_dir, storage) = storage();
        let load_id = storage.new_load_id();
        storage.create_temp_load_package(&load_id, "event").unwrap();
        assert!(storage.list_packages().unwrap().is_empty());
        assert_eq!(storage.find_temp_load_package("event").unwrap(), Some(load_id.clone()));
        assert_eq!(storage.find_temp_load_package("other").unwrap(), None);

        let job = LoadStorage::build_job_file_name("event", "w1", 0, LoaderFileFormat::Jsonl);
        fs::write(storage.job_file_path(&load_id, &job), "{}\n").unwrap();

        storage.commit_temp_load_package(&load_id, &Schema::new("event")).unwrap();
        assert_eq!(storage.list_packages().unwrap(), vec![load_id.clone()]);
        assert!(storage.is_package_finalized(&load_id));
        assert_eq!(storage.list_new_jobs(&load_id).unwrap(), vec![job]);
        assert_eq!(storage.load_package_schema(&load_id).unwrap().name, "event");
        assert_eq!(storage.find_temp_load_package("event").unwrap(), None);
    }

    #[test]
    fn test_duplicate_package_rejected() {
        let (_dir, storage) = storage();
        storage.create_temp_load_package("1", "event").unwrap();
        assert!(matches!(
            storage.create_temp_load_package("1", "event"),
            Err(NormalizeError::PackageExists(_))
        ));
        assert_ne!(storage.new_load_id(), "1");
    }

    #[test]
    fn test_delete_jobs_of_one_writer() {
        let (_dir, storage) = storage();
        storage.create_temp_load_package("1", "event").unwrap();
        for file_id in ["a", "b"] {
            let job = LoadStorage::build_job_file_name("event", file_id, 0, LoaderFileFormat::Jsonl);
            fs::write(storage.job_file_path("1", &job), "").unwrap();
        }
        assert_eq!(storage.delete_temp_jobs("1", "a").unwrap(), 1);
        assert_eq!(storage.list_temp_jobs("1").unwrap(), vec!["event.b.0.jsonl"]);
    }
}
