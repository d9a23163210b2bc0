use crate::error::{NormalizeError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTRACTED_FOLDER: &str = "extracted";
const EXTRACTED_EXTENSION: &str = "jsonl";

/// The three parts encoded in an extracted file name `<schema>.<table>.<file_id>.jsonl`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFileName {
    pub schema_name: String,
    pub table_name: String,
    pub file_id: String,
}

/// Extracted files waiting to be normalized
#[derive(Debug, Clone)]
pub struct NormalizeStorage {
    extracted: PathBuf,
}

impl NormalizeStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let extracted = root.as_ref().join(EXTRACTED_FOLDER);
        fs::create_dir_all(&extracted)?;
        Ok(NormalizeStorage { extracted })
    }

    pub fn build_file_name(schema_name: &str, table_name: &str, file_id: &str) -> Result<String> {
        for (what, part) in [("schema", schema_name), ("table", table_name)] {
            if part.is_empty() || part.contains('.') {
                return Err(NormalizeError::InvalidFileName {
                    name: part.to_string(),
                    reason: format!("{} name must be non-empty and contain no '.'", what),
                });
            }
        }
        Ok(format!("{}.{}.{}.{}", schema_name, table_name, file_id, EXTRACTED_EXTENSION))
    }

    pub fn parse_normalize_file_name(name: &str) -> Result<ExtractedFileName> {
        let invalid = |reason: &str| NormalizeError::InvalidFileName {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        let stem = name
            .strip_suffix(&format!(".{}", EXTRACTED_EXTENSION))
            .ok_or_else(|| invalid("expected a .jsonl file"))?;
        let mut parts = stem.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(schema), Some(table), Some(file_id))
                if !schema.is_empty() && !table.is_empty() && !file_id.is_empty() =>
            {
                Ok(ExtractedFileName {
                    schema_name: schema.to_string(),
                    table_name: table.to_string(),
                    file_id: file_id.to_string(),
                })
            }
            _ => Err(invalid("expected <schema>.<table>.<file_id>.jsonl")),
        }
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.extracted.join(name)
    }

    /// Pending file names in lexicographic order
    pub fn list_files_to_normalize_sorted(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.extracted)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if Self::parse_normalize_file_name(name).is_ok() {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Split a sorted listing by schema name, keeping each schema's files sorted
    pub fn group_by_schema(files: &[String]) -> Result<Vec<(String, Vec<String>)>> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for file in files {
            let parsed = Self::parse_normalize_file_name(file)?;
            groups.entry(parsed.schema_name).or_default().push(file.clone());
        }
        Ok(groups.into_iter().collect())
    }

    /// Stage `items` as one pending file, one document per line
    ///
    /// The file is written under a temporary name and renamed, so listings never
    /// see it half written.
    pub fn write_extracted_file(&self, schema_name: &str, table_name: &str, items: &[Value]) -> Result<String> {
        let file_id = uuid::Uuid::new_v4().simple().to_string();
        let name = Self::build_file_name(schema_name, table_name, &file_id)?;
        let tmp = self.extracted.join(format!("{}.tmp", name));
        {
            let mut writer = BufWriter::new(fs::File::create(&tmp)?);
            for item in items {
                serde_json::to_writer(&mut writer, item)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, self.file_path(&name))?;
        debug!(file = %name, items = items.len(), "staged extracted file");
        Ok(name)
    }

    /// Remove files whose rows are safely in a load package
    pub fn consume(&self, files: &[String]) -> Result<()> {
        for file in files {
            fs::remove_file(self.file_path(file))?;
        }
        Ok(())
    }
}
