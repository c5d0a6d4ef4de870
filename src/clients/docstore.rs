//! Embedded JSON document store.
//!
//! Documents live in named tables inside a single JSON file laid out as
//! `{"<table>": {"<id>": {...}}}`, with ids assigned from 1 per table.
//! Every write is persisted immediately through a temp file and rename.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};

/// Maximum database file size (64MB).
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Document identifier within a table.
pub type DocId = u64;

/// A JSON object.
pub type Document = Map<String, Value>;

type Table = BTreeMap<DocId, Document>;

/// Document store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocStoreSettings {
    /// Database file.
    pub path: PathBuf,
    /// Table selected by the demo.
    pub table: String,
}

impl Default for DocStoreSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("app_db.json"),
            table: "queries".to_string(),
        }
    }
}

/// A JSON-file document database.
#[derive(Debug)]
pub struct DocStore {
    path: PathBuf,
    tables: BTreeMap<String, Table>,
    current: Option<String>,
}

impl DocStore {
    /// Opens the store at `path`, creating an empty one if missing.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn open(path: &Path) -> Result<Self> {
        let tables = if path.exists() {
            let size = fs::metadata(path)?.len();
            if size > MAX_FILE_SIZE {
                return Err(Error::InvalidInput(format!(
                    "database file too large: {} bytes",
                    size
                )));
            }
            let content = fs::read_to_string(path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                parse_tables(&content)?
            }
        } else {
            BTreeMap::new()
        };

        debug!(
            "Opened document store {} with {} table(s)",
            path.display(),
            tables.len()
        );
        Ok(Self {
            path: path.to_path_buf(),
            tables,
            current: None,
        })
    }

    /// Selects the table used by subsequent operations.
    pub fn use_table(&mut self, name: &str) {
        debug!("Selecting current table {}", name);
        self.current = Some(name.to_string());
    }

    /// Names of the tables holding at least one document.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn selected(&self) -> Result<&str> {
        self.current.as_deref().ok_or_else(|| {
            Error::InvalidInput(
                "No table selected. Use use_table() to select a table.".to_string(),
            )
        })
    }

    /// Inserts a document into the selected table and returns its id.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if no table is selected, or an I/O
    /// error if the store cannot be written.
    pub fn insert(&mut self, document: Document) -> Result<DocId> {
        let name = self.selected()?.to_string();
        debug!("Inserting new record in table {}", name);

        let created = !self.tables.contains_key(&name);
        let table = self.tables.entry(name.clone()).or_default();
        let id = table.keys().next_back().map_or(1, |last| last + 1);
        table.insert(id, document);

        if let Err(e) = self.persist() {
            if created {
                self.tables.remove(&name);
            } else if let Some(table) = self.tables.get_mut(&name) {
                table.remove(&id);
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Merges `fields` into every document whose `field` equals `value`.
    ///
    /// Returns the ids of the updated documents.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if no table is selected, or an I/O
    /// error if the store cannot be written.
    pub fn update_where(&mut self, field: &str, value: &Value, fields: &Document) -> Result<Vec<DocId>> {
        let name = self.selected()?.to_string();
        debug!("Updating records in {} where {} == {}", name, field, value);

        let mut previous = Vec::new();
        if let Some(table) = self.tables.get_mut(&name) {
            for (id, doc) in table.iter_mut() {
                if doc.get(field) == Some(value) {
                    previous.push((*id, doc.clone()));
                    for (k, v) in fields {
                        doc.insert(k.clone(), v.clone());
                    }
                }
            }
        }

        if !previous.is_empty() {
            if let Err(e) = self.persist() {
                if let Some(table) = self.tables.get_mut(&name) {
                    for (id, doc) in previous {
                        table.insert(id, doc);
                    }
                }
                return Err(e);
            }
        }
        Ok(previous.into_iter().map(|(id, _)| id).collect())
    }

    /// Returns a document by id.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if no table is selected.
    pub fn get(&self, id: DocId) -> Result<Option<&Document>> {
        let name = self.selected()?;
        Ok(self.tables.get(name).and_then(|t| t.get(&id)))
    }

    /// Returns every document in the selected table, in id order.
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] if no table is selected.
    pub fn all(&self) -> Result<Vec<(DocId, &Document)>> {
        let name = self.selected()?;
        Ok(self
            .tables
            .get(name)
            .map(|t| t.iter().map(|(id, doc)| (*id, doc)).collect())
            .unwrap_or_default())
    }

    /// Removes a table and all its documents.
    ///
    /// Returns true if the table existed.
    ///
    /// # Errors
    /// Returns error if the store cannot be written.
    pub fn drop_table(&mut self, name: &str) -> Result<bool> {
        debug!("Dropping table: {}", name);
        let Some(removed) = self.tables.remove(name) else {
            if self.current.as_deref() == Some(name) {
                self.current = None;
            }
            return Ok(false);
        };
        if let Err(e) = self.persist() {
            self.tables.insert(name.to_string(), removed);
            return Err(e);
        }
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }
        Ok(true)
    }

    /// Flushes the store and closes it.
    ///
    /// # Errors
    /// Returns error if the final write fails.
    pub fn close(self) -> Result<()> {
        debug!("Closing document store {}", self.path.display());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string(&render_tables(&self.tables))?;
        let temp_path = self.path.with_extension("tmp");
        let written = write_file(&temp_path, content.as_bytes())
            .and_then(|()| fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        Ok(())
    }
}

fn write_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content)?;
    file.flush()
}

/// Parses the on-disk layout, where ids are JSON object keys.
fn parse_tables(content: &str) -> Result<BTreeMap<String, Table>> {
    let raw: BTreeMap<String, BTreeMap<String, Document>> = serde_json::from_str(content)?;
    let mut tables = BTreeMap::new();
    for (name, docs) in raw {
        let mut table = Table::new();
        for (id, doc) in docs {
            let id: DocId = id.parse().map_err(|_| {
                Error::InvalidInput(format!("invalid document id {:?} in table {}", id, name))
            })?;
            table.insert(id, doc);
        }
        tables.insert(name, table);
    }
    Ok(tables)
}

fn render_tables(tables: &BTreeMap<String, Table>) -> Value {
    let mut root = Map::new();
    for (name, table) in tables {
        let docs: Map<String, Value> = table
            .iter()
            .map(|(id, doc)| (id.to_string(), Value::Object(doc.clone())))
            .collect();
        root.insert(name.clone(), Value::Object(docs));
    }
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_requires_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DocStore::open(&dir.path().join("db.json")).unwrap();

        let err = store.insert(doc(json!({"id": 1}))).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
        assert!(store.all().is_err());
    }

    #[test]
    fn test_insert_assigns_sequential_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DocStore::open(&dir.path().join("db.json")).unwrap();
        store.use_table("queries");

        assert_eq!(store.insert(doc(json!({"id": "a"}))).unwrap(), 1);
        assert_eq!(store.insert(doc(json!({"id": "b"}))).unwrap(), 2);
        assert_eq!(store.all().unwrap().len(), 2);
    }

    #[test]
    fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let mut store = DocStore::open(&path).unwrap();
        store.use_table("t");
        store.insert(doc(json!({"k": "v"}))).unwrap();

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"t": {"1": {"k": "v"}}}));
    }

    #[test]
    fn test_drop_selected_table_clears_selection() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DocStore::open(&dir.path().join("db.json")).unwrap();
        store.use_table("t");
        store.insert(doc(json!({"k": 1}))).unwrap();

        assert!(store.drop_table("t").unwrap());
        assert!(!store.drop_table("t").unwrap());
        assert!(store.get(1).is_err());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, r#"{"t": {"one": {}}}"#).unwrap();

        let err = DocStore::open(&path).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
    }

    fn block_path(path: &Path) {
        fs::create_dir_all(path.join("occupied")).unwrap();
    }

    #[test]
    fn test_failed_insert_is_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let mut store = DocStore::open(&path).unwrap();
        store.use_table("t");

        block_path(&path);
        let err = store.insert(doc(json!({"n": "failed"}))).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert!(!path.with_extension("tmp").exists());
        assert!(store.all().unwrap().is_empty());
        assert!(store.tables().is_empty());

        fs::remove_dir_all(&path).unwrap();
        assert_eq!(store.insert(doc(json!({"n": "ok"}))).unwrap(), 1);

        let on_disk: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"t": {"1": {"n": "ok"}}}));
    }

    #[test]
    fn test_failed_update_restores_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let mut store = DocStore::open(&path).unwrap();
        store.use_table("t");
        store.insert(doc(json!({"id": "a", "state": "new"}))).unwrap();

        fs::remove_file(&path).unwrap();
        block_path(&path);
        let fields = doc(json!({"state": "done"}));
        assert!(store.update_where("id", &json!("a"), &fields).is_err());
        assert_eq!(store.get(1).unwrap().unwrap()["state"], json!("new"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_failed_drop_keeps_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let mut store = DocStore::open(&path).unwrap();
        store.use_table("t");
        store.insert(doc(json!({"k": 1}))).unwrap();

        fs::remove_file(&path).unwrap();
        block_path(&path);
        assert!(store.drop_table("t").is_err());
        assert_eq!(store.all().unwrap().len(), 1);
    }
}
