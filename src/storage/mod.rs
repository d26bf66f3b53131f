//! Persistence backends for tasks and templates.
//!
//! Both backends implement [`Storage`], which is all the business layer sees.
//! Every save replaces the whole persisted collection with the given mapping;
//! there are no partial updates and no query pushdown.
//!
//! The backends differ in two places:
//! - [`JsonStorage`] never fails a load. Unreadable or malformed files are
//!   logged and read as empty. [`SqliteStorage`] propagates load errors.
//! - Only [`SqliteStorage`] rejects two templates with the same name; see
//!   [`Storage::enforces_unique_template_names`].

mod document;
mod relational;

pub use document::{JsonStorage, TASKS_FILENAME, TEMPLATES_FILENAME};
pub use relational::{SqliteStorage, DATABASE_FILENAME};

use crate::error::Result;
use crate::tasks::models::{TaskMap, TemplateMap};

/// Whole-collection persistence for tasks and templates.
pub trait Storage {
    /// Load every persisted task, keyed by id.
    ///
    /// # Errors
    ///
    /// Backend-specific; the document store never returns an error here.
    fn load_tasks(&self) -> Result<TaskMap>;

    /// Replace all persisted tasks with `tasks`.
    ///
    /// On failure the previously persisted tasks are left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement could not be written.
    fn save_tasks(&mut self, tasks: &TaskMap) -> Result<()>;

    /// Load every persisted template, keyed by id.
    ///
    /// # Errors
    ///
    /// Backend-specific; the document store never returns an error here.
    fn load_templates(&self) -> Result<TemplateMap>;

    /// Replace all persisted templates with `templates`.
    ///
    /// # Errors
    ///
    /// Returns an error if the replacement could not be written, including a
    /// duplicate template name in backends that enforce unique names.
    fn save_templates(&mut self, templates: &TemplateMap) -> Result<()>;

    /// Whether saving two templates with the same name is rejected.
    fn enforces_unique_template_names(&self) -> bool;
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn load_tasks(&self) -> Result<TaskMap> {
        (**self).load_tasks()
    }

    fn save_tasks(&mut self, tasks: &TaskMap) -> Result<()> {
        (**self).save_tasks(tasks)
    }

    fn load_templates(&self) -> Result<TemplateMap> {
        (**self).load_templates()
    }

    fn save_templates(&mut self, templates: &TemplateMap) -> Result<()> {
        (**self).save_templates(templates)
    }

    fn enforces_unique_template_names(&self) -> bool {
        (**self).enforces_unique_template_names()
    }
}
