//! # `tasktrack`
//!
//! A personal task tracking engine whose tasks and templates persist through
//! interchangeable storage backends: flat JSON documents or a normalized
//! `SQLite` database.

pub mod codec;
pub mod config;
pub mod error;
pub mod storage;
pub mod tasks;
pub mod timestamp;

pub use config::{open_storage, Backend, StorageConfig};
pub use error::{Error, Result};
pub use storage::{JsonStorage, SqliteStorage, Storage};
pub use tasks::{Priority, Task, TaskManager, TaskTemplate, TimeEntry};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
