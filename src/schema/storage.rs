use crate::error::Result;
use crate::schema::Schema;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const SCHEMA_FILE_SUFFIX: &str = ".schema.json";

/// Persists canonical schemas as `<root>/<name>.schema.json`
#[derive(Debug, Clone)]
pub struct SchemaStorage {
    root: PathBuf,
}

impl SchemaStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(SchemaStorage {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn schema_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}{}", name, SCHEMA_FILE_SUFFIX))
    }

    pub fn load(&self, name: &str) -> Result<Option<Schema>> {
        let path = self.schema_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn load_or_create(&self, name: &str) -> Result<Schema> {
        match self.load(name)? {
            Some(schema) => Ok(schema),
            None => {
                debug!(schema = name, "creating new schema");
                Ok(Schema::new(name))
            }
        }
    }

    /// Write through a temp file so a crash never leaves a truncated schema
    pub fn save(&self, schema: &Schema) -> Result<PathBuf> {
        let path = self.schema_path(&schema.name);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(schema)?)?;
        fs::rename(&tmp, &path)?;
        debug!(schema = %schema.name, version = schema.version, "saved schema");
        Ok(path)
    }

    pub fn list_schemas(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let file_name = entry?.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(SCHEMA_FILE_SUFFIX)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
