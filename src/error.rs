//! Error types for `tasktrack`.

/// Errors that can occur while loading, saving, or manipulating tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON parsing error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error occurred.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A CSV writing error occurred.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A `SQLite` database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Two templates share a name in a backend that requires unique names.
    #[error("Template name already in use: {name}")]
    TemplateNameConflict {
        /// The duplicated template name.
        name: String,
    },

    /// A timestamp could not be parsed as ISO 8601.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A priority string was not one of the known levels.
    #[error("Invalid priority: '{0}' (must be one of: low, medium, high, urgent)")]
    InvalidPriority(String),

    /// A recurrence type string was not one of the known patterns.
    #[error("Invalid recurrence type: '{0}' (must be one of: daily, weekly, monthly, yearly)")]
    InvalidRecurrence(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
