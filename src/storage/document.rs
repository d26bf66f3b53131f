//! Flat-file JSON storage.
//!
//! Tasks and templates live in two separate files, each a single object with
//! one top-level collection:
//!
//! ```json
//! {
//!   "tasks": {
//!     "<task-id>": { "id": "<task-id>", "title": "...", ... }
//!   }
//! }
//! ```
//!
//! Loads are tolerant: any read or parse failure is logged and yields an empty
//! collection. Records missing fields decode with defaults, and fields this
//! version does not know about are dropped on the next save.

use crate::codec::{self, Entity};
use crate::error::{Error, Result};
use crate::tasks::models::{Task, TaskMap, TaskTemplate, TemplateMap};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::Storage;

/// Default tasks file name.
pub const TASKS_FILENAME: &str = "tasks.json";
/// Default templates file name.
pub const TEMPLATES_FILENAME: &str = "templates.json";

/// JSON document store.
#[derive(Debug, Clone)]
pub struct JsonStorage {
    tasks_path: PathBuf,
    templates_path: PathBuf,
}

impl JsonStorage {
    /// Create a store backed by the given files.
    ///
    /// Missing files are created holding an empty collection.
    ///
    /// # Errors
    ///
    /// Returns an error if a missing file cannot be created.
    pub fn new(tasks_path: impl AsRef<Path>, templates_path: impl AsRef<Path>) -> Result<Self> {
        let store = Self {
            tasks_path: tasks_path.as_ref().to_path_buf(),
            templates_path: templates_path.as_ref().to_path_buf(),
        };
        ensure_file::<Task>(&store.tasks_path)?;
        ensure_file::<TaskTemplate>(&store.templates_path)?;
        Ok(store)
    }

    /// Create a store using the default file names inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if a missing file cannot be created.
    pub fn in_dir(dir: &Path) -> Result<Self> {
        Self::new(dir.join(TASKS_FILENAME), dir.join(TEMPLATES_FILENAME))
    }

    /// Path of the tasks file.
    #[must_use]
    pub fn tasks_path(&self) -> &Path {
        &self.tasks_path
    }

    /// Path of the templates file.
    #[must_use]
    pub fn templates_path(&self) -> &Path {
        &self.templates_path
    }
}

impl Storage for JsonStorage {
    fn load_tasks(&self) -> Result<TaskMap> {
        Ok(load_or_empty(&self.tasks_path))
    }

    fn save_tasks(&mut self, tasks: &TaskMap) -> Result<()> {
        save_logged(&self.tasks_path, tasks)
    }

    fn load_templates(&self) -> Result<TemplateMap> {
        Ok(load_or_empty(&self.templates_path))
    }

    fn save_templates(&mut self, templates: &TemplateMap) -> Result<()> {
        save_logged(&self.templates_path, templates)
    }

    fn enforces_unique_template_names(&self) -> bool {
        false
    }
}

/// Write an empty collection document if `path` does not exist yet.
fn ensure_file<E: Entity>(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut doc = Map::new();
    doc.insert(E::COLLECTION.to_string(), Value::Object(Map::new()));
    std::fs::write(path, serde_json::to_string(&Value::Object(doc))?)?;
    tracing::info!(path = %path.display(), collection = E::COLLECTION, "Initialized empty collection");
    Ok(())
}

fn load_or_empty<E: Entity>(path: &Path) -> BTreeMap<String, E> {
    match read_collection(path) {
        Ok(items) => {
            tracing::debug!(path = %path.display(), count = items.len(), "Loaded {}", E::COLLECTION);
            items
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Error loading {}", E::COLLECTION);
            BTreeMap::new()
        }
    }
}

fn read_collection<E: Entity>(path: &Path) -> Result<BTreeMap<String, E>> {
    let content = std::fs::read_to_string(path)?;
    let doc: Value = serde_json::from_str(&content)?;

    let Some(collection) = doc.get(E::COLLECTION) else {
        return Ok(BTreeMap::new());
    };
    let Value::Object(entries) = collection else {
        return Err(not_an_object(E::COLLECTION));
    };

    entries
        .iter()
        .map(|(key, value)| -> Result<(String, E)> {
            match value {
                Value::Object(record) => {
                    Ok((key.clone(), codec::decode_keyed(key, record.clone())?))
                }
                _ => Err(not_an_object(key)),
            }
        })
        .collect()
}

fn not_an_object(what: &str) -> Error {
    <serde_json::Error as serde::de::Error>::custom(format!("'{what}' is not a JSON object"))
        .into()
}

fn save_logged<E: Entity>(path: &Path, items: &BTreeMap<String, E>) -> Result<()> {
    write_collection(path, items)
        .inspect(|()| {
            tracing::debug!(path = %path.display(), count = items.len(), "Saved {}", E::COLLECTION);
        })
        .inspect_err(|e| {
            tracing::warn!(path = %path.display(), error = %e, "Error saving {}", E::COLLECTION);
        })
}

/// Serialize the whole collection and swap it into place.
///
/// The document is written to a sibling temp file and renamed over the
/// target, so a failed save leaves the previous file intact.
fn write_collection<E: Entity>(path: &Path, items: &BTreeMap<String, E>) -> Result<()> {
    let mut records = Map::new();
    for (key, item) in items {
        records.insert(key.clone(), Value::Object(codec::encode(item)?));
    }
    let mut doc = Map::new();
    doc.insert(E::COLLECTION.to_string(), Value::Object(records));
    let content = serde_json::to_string_pretty(&Value::Object(doc))?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, content)?;
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}
