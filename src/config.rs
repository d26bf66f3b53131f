//! Storage configuration.
//!
//! This module handles the optional `tasktrack.yaml` file that chooses the
//! storage backend and where its files live. Without a config file the JSON
//! backend is used with its default file names in the base directory.

use crate::error::Result;
use crate::storage::{
    JsonStorage, SqliteStorage, Storage, DATABASE_FILENAME, TASKS_FILENAME, TEMPLATES_FILENAME,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file path relative to the base directory.
pub const CONFIG_FILE_PATH: &str = "tasktrack.yaml";

/// The base directory name for per-user data.
const DATA_DIR_NAME: &str = ".tasktrack";

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Flat JSON documents.
    #[default]
    Json,
    /// Normalized `SQLite` database.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Which backend to open.
    #[serde(default)]
    pub backend: Backend,

    /// Directory holding the data files. Relative paths are resolved against
    /// the base directory; `None` means the base directory itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Tasks file name for the JSON backend.
    #[serde(default = "default_tasks_file")]
    pub tasks_file: String,

    /// Templates file name for the JSON backend.
    #[serde(default = "default_templates_file")]
    pub templates_file: String,

    /// Database file name for the `SQLite` backend.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_tasks_file() -> String {
    TASKS_FILENAME.to_string()
}

fn default_templates_file() -> String {
    TEMPLATES_FILENAME.to_string()
}

fn default_database_file() -> String {
    DATABASE_FILENAME.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            data_dir: None,
            tasks_file: default_tasks_file(),
            templates_file: default_templates_file(),
            database_file: default_database_file(),
        }
    }
}

impl StorageConfig {
    /// Load config from a base directory, returning None if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_from(base_dir: &Path) -> Result<Option<Self>> {
        let config_path = Self::config_path(base_dir);
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(Some(config))
    }

    /// Load config from a base directory, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load_or_default(base_dir: &Path) -> Result<Self> {
        Ok(Self::load_from(base_dir)?.unwrap_or_default())
    }

    /// Save config to a base directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to(&self, base_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(base_dir)?;
        let content = serde_yaml::to_string(self)?;
        std::fs::write(Self::config_path(base_dir), content)?;
        Ok(())
    }

    /// Get the config file path for a base directory.
    pub fn config_path(base_dir: &Path) -> PathBuf {
        base_dir.join(CONFIG_FILE_PATH)
    }

    /// Directory the data files live in.
    #[must_use]
    pub fn resolve_data_dir(&self, base_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base_dir.join(dir),
            None => base_dir.to_path_buf(),
        }
    }

    /// Open the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized.
    pub fn open(&self, base_dir: &Path) -> Result<Box<dyn Storage>> {
        let dir = self.resolve_data_dir(base_dir);
        tracing::debug!(backend = ?self.backend, dir = %dir.display(), "Opening storage");
        Ok(match self.backend {
            Backend::Json => Box::new(JsonStorage::new(
                dir.join(&self.tasks_file),
                dir.join(&self.templates_file),
            )?),
            Backend::Sqlite => Box::new(SqliteStorage::open(dir.join(&self.database_file))?),
        })
    }
}

/// Get the per-user data directory.
///
/// Returns `~/.tasktrack/` or `None` if the home directory cannot be
/// determined.
#[must_use]
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DATA_DIR_NAME))
}

/// Open storage for `base_dir` using its config file, or the defaults.
///
/// # Errors
///
/// Returns an error if the config cannot be parsed or the backend cannot be
/// initialized.
pub fn open_storage(base_dir: &Path) -> Result<Box<dyn Storage>> {
    StorageConfig::load_or_default(base_dir)?.open(base_dir)
}
