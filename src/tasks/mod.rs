//! Task tracking.
//!
//! This module provides:
//! - Tasks with priority, due dates, reminders, categories, and tags
//! - Recurring tasks that spawn a successor on completion
//! - Dependencies between tasks (missing ids count as unsatisfied)
//! - Time tracking entries
//! - Templates for creating tasks quickly
//!
//! # Example
//!
//! ```no_run
//! use tasktrack::storage::SqliteStorage;
//! use tasktrack::tasks::{Priority, RecurrenceType, TaskManager};
//!
//! let storage = SqliteStorage::open("/tmp/tasks.db").unwrap();
//! let mut manager = TaskManager::new(storage).unwrap();
//!
//! let id = manager.create_task("Water plants", "", Priority::Low).id.clone();
//! manager.set_due_date(&id, "2026-06-01T09:00:00", Some(60));
//! manager.make_recurring(&id, RecurrenceType::Weekly, 1);
//!
//! // Completing a recurring task queues the next one.
//! manager.complete_task(&id);
//! ```

pub mod manager;
pub mod models;

pub use manager::{SearchField, Statistics, TaskFilter, TaskManager, TaskUpdate};
pub use models::{
    new_id, Priority, RecurrenceType, Task, TaskMap, TaskTemplate, TemplateMap, TimeEntry,
    STATUS_COMPLETED, STATUS_PENDING,
};
