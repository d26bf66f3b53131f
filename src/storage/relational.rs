//! Normalized `SQLite` storage.
//!
//! Each entity gets a parent table, and every repeated attribute gets a child
//! table keyed by the parent id with `ON DELETE CASCADE`. Saves delete every
//! row and reinsert the full collection inside one transaction; loads rebuild
//! flat records from the parent row and its children and decode them through
//! the shared codec.
//!
//! `task_dependencies.depends_on_id` is plain text with no foreign key, so a
//! dependency on a task outside the saved collection still round-trips. Only
//! its `task_id` cascades.
//!
//! Booleans are stored as 0/1 and timestamps as ISO 8601 text.

use crate::codec::{self, Record};
use crate::error::{Error, Result};
use crate::tasks::models::{Task, TaskMap, TaskTemplate, TemplateMap};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, ErrorCode, Transaction};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::Storage;

/// Default database file name.
pub const DATABASE_FILENAME: &str = "tasks.db";

const TASK_COLUMNS: &str = "id, title, description, priority, status, created_at, updated_at, \
     due_date, completed_at, is_recurring, recurrence_type, recurrence_interval, \
     last_recurrence, estimated_minutes, is_template, template_name, \
     reminder_before_minutes, last_reminded";

const TEMPLATE_COLUMNS: &str =
    "id, name, title, description, priority, estimated_minutes, reminder_before_minutes";

const TIME_ENTRY_COLUMNS: &str = "id, start_time, end_time, duration_minutes, notes";

/// `SQLite`-backed store holding one connection for its lifetime.
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Connection,
    db_path: Option<PathBuf>,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::with_connection(conn, Some(db_path))
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        let store = Self { conn, db_path };
        store.init_schema()?;
        Ok(store)
    }

    /// Get the database path, or `None` for an in-memory database.
    #[must_use]
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Borrow the underlying connection.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` refuses to close the connection.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::Database(e))
    }

    /// Create every table if it does not already exist.
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT,
                status TEXT,
                created_at TEXT,
                updated_at TEXT,
                due_date TEXT,
                completed_at TEXT,
                is_recurring INTEGER,
                recurrence_type TEXT,
                recurrence_interval INTEGER,
                last_recurrence TEXT,
                estimated_minutes INTEGER,
                is_template INTEGER,
                template_name TEXT,
                reminder_before_minutes INTEGER,
                last_reminded TEXT
            );

            CREATE TABLE IF NOT EXISTS task_categories (
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                category TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_tags (
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                tag TEXT NOT NULL
            );

            -- depends_on_id may name a task that no longer exists
            CREATE TABLE IF NOT EXISTS task_dependencies (
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                depends_on_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS time_entries (
                id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                start_time TEXT,
                end_time TEXT,
                duration_minutes REAL,
                notes TEXT
            );

            CREATE TABLE IF NOT EXISTS templates (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                title TEXT,
                description TEXT,
                priority TEXT,
                estimated_minutes INTEGER,
                reminder_before_minutes INTEGER
            );

            CREATE TABLE IF NOT EXISTS template_categories (
                template_id TEXT NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
                category TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS template_tags (
                template_id TEXT NOT NULL REFERENCES templates(id) ON DELETE CASCADE,
                tag TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_task_categories_task_id ON task_categories(task_id);
            CREATE INDEX IF NOT EXISTS idx_task_tags_task_id ON task_tags(task_id);
            CREATE INDEX IF NOT EXISTS idx_task_dependencies_task_id ON task_dependencies(task_id);
            CREATE INDEX IF NOT EXISTS idx_time_entries_task_id ON time_entries(task_id);
            CREATE INDEX IF NOT EXISTS idx_template_categories_template_id
                ON template_categories(template_id);
            CREATE INDEX IF NOT EXISTS idx_template_tags_template_id ON template_tags(template_id);
            ",
        )?;
        tracing::info!(db = ?self.db_path, "Task schema ready");
        Ok(())
    }

    /// Run `write` inside a transaction, rolling back explicitly on failure.
    fn replace_all<F>(&mut self, what: &str, write: F) -> Result<()>
    where
        F: FnOnce(&Transaction<'_>) -> Result<()>,
    {
        let tx = self.conn.transaction()?;
        match write(&tx) {
            Ok(()) => {
                tx.commit()?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Error saving {what}, rolling back");
                if let Err(rollback) = tx.rollback() {
                    tracing::warn!(error = %rollback, "Rollback of {what} failed");
                }
                Err(e)
            }
        }
    }

    fn load_strings(&self, sql: &str, parent_id: &str) -> Result<Vec<Value>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let values = stmt
            .query_map(params![parent_id], |row| row.get::<_, String>(0))?
            .map(|v| v.map(Value::String))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(values)
    }

    fn load_records(&self, sql: &str, parent_id: Option<&str>) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let to_record = |row: &rusqlite::Row<'_>| row_to_record(row, &columns);
        let records = match parent_id {
            Some(id) => stmt.query_map(params![id], to_record)?.collect::<rusqlite::Result<_>>(),
            None => stmt.query_map([], to_record)?.collect::<rusqlite::Result<_>>(),
        }?;
        Ok(records)
    }
}

/// Copy a row into a record, leaving NULL columns out so they decode to
/// their defaults.
fn row_to_record(row: &rusqlite::Row<'_>, columns: &[String]) -> rusqlite::Result<Record> {
    let mut record = Record::new();
    for (i, name) in columns.iter().enumerate() {
        let value = match row.get_ref(i)? {
            ValueRef::Null | ValueRef::Blob(_) => continue,
            ValueRef::Integer(n) => Value::from(n),
            ValueRef::Real(f) => Value::from(f),
            ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        };
        record.insert(name.clone(), value);
    }
    Ok(record)
}

/// Turn a 0/1 column back into a JSON boolean.
fn coerce_bool(record: &mut Record, field: &str) {
    let flag = match record.get(field) {
        Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        _ => return,
    };
    record.insert(field.to_string(), Value::Bool(flag));
}

/// Map a UNIQUE violation on `templates.name` to a typed error.
fn template_insert_error(e: rusqlite::Error, name: &str) -> Error {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation
                && err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Error::TemplateNameConflict { name: name.to_string() }
        }
        _ => Error::Database(e),
    }
}

fn clear_tasks(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        "DELETE FROM task_categories;
         DELETE FROM task_tags;
         DELETE FROM task_dependencies;
         DELETE FROM time_entries;
         DELETE FROM tasks;",
    )?;
    Ok(())
}

fn insert_task_rows(tx: &Transaction<'_>, tasks: &TaskMap) -> Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO tasks ({TASK_COLUMNS})
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
    ))?;
    for task in tasks.values() {
        stmt.execute(params![
            task.id,
            task.title,
            task.description,
            task.priority.as_str(),
            task.status,
            task.created_at,
            task.updated_at,
            task.due_date,
            task.completed_at,
            i32::from(task.is_recurring),
            task.recurrence_type.map(|r| r.as_str()),
            task.recurrence_interval,
            task.last_recurrence,
            task.estimated_minutes,
            i32::from(task.is_template),
            task.template_name,
            task.reminder_before_minutes,
            task.last_reminded,
        ])?;
    }
    Ok(())
}

fn insert_task_children(tx: &Transaction<'_>, task: &Task) -> Result<()> {
    let mut categories = tx.prepare_cached("INSERT INTO task_categories VALUES (?1, ?2)")?;
    for category in &task.categories {
        categories.execute(params![task.id, category])?;
    }

    let mut tags = tx.prepare_cached("INSERT INTO task_tags VALUES (?1, ?2)")?;
    for tag in &task.tags {
        tags.execute(params![task.id, tag])?;
    }

    let mut deps = tx.prepare_cached("INSERT INTO task_dependencies VALUES (?1, ?2)")?;
    for dep in &task.depends_on {
        deps.execute(params![task.id, dep])?;
    }

    let mut entries = tx.prepare_cached(&format!(
        "INSERT INTO time_entries (task_id, {TIME_ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
    ))?;
    for entry in &task.time_entries {
        entries.execute(params![
            task.id,
            entry.id,
            entry.start_time,
            entry.end_time,
            entry.duration_minutes,
            entry.notes,
        ])?;
    }
    Ok(())
}

fn clear_templates(tx: &Transaction<'_>) -> Result<()> {
    tx.execute_batch(
        "DELETE FROM template_categories;
         DELETE FROM template_tags;
         DELETE FROM templates;",
    )?;
    Ok(())
}

fn insert_templates(tx: &Transaction<'_>, templates: &TemplateMap) -> Result<()> {
    let mut stmt = tx.prepare(&format!(
        "INSERT INTO templates ({TEMPLATE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    ))?;
    for template in templates.values() {
        stmt.execute(params![
            template.id,
            template.name,
            template.title,
            template.description,
            template.priority.as_str(),
            template.estimated_minutes,
            template.reminder_before_minutes,
        ])
        .map_err(|e| template_insert_error(e, &template.name))?;
    }

    for template in templates.values() {
        insert_template_children(tx, template)?;
    }
    Ok(())
}

fn insert_template_children(tx: &Transaction<'_>, template: &TaskTemplate) -> Result<()> {
    let mut categories = tx.prepare_cached("INSERT INTO template_categories VALUES (?1, ?2)")?;
    for category in &template.categories {
        categories.execute(params![template.id, category])?;
    }

    let mut tags = tx.prepare_cached("INSERT INTO template_tags VALUES (?1, ?2)")?;
    for tag in &template.tags {
        tags.execute(params![template.id, tag])?;
    }
    Ok(())
}

impl Storage for SqliteStorage {
    fn load_tasks(&self) -> Result<TaskMap> {
        let rows =
            self.load_records(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY rowid"), None)?;

        let mut tasks = TaskMap::new();
        for mut record in rows {
            let Some(Value::String(id)) = record.get("id").cloned() else {
                continue;
            };

            let categories = self.load_strings(
                "SELECT category FROM task_categories WHERE task_id = ?1 ORDER BY rowid",
                &id,
            )?;
            let tags =
                self.load_strings("SELECT tag FROM task_tags WHERE task_id = ?1 ORDER BY rowid", &id)?;
            let depends_on = self.load_strings(
                "SELECT depends_on_id FROM task_dependencies WHERE task_id = ?1 ORDER BY rowid",
                &id,
            )?;
            let time_entries = self.load_records(
                &format!(
                    "SELECT {TIME_ENTRY_COLUMNS} FROM time_entries WHERE task_id = ?1 ORDER BY rowid"
                ),
                Some(&id),
            )?;

            record.insert("categories".to_string(), Value::Array(categories));
            record.insert("tags".to_string(), Value::Array(tags));
            record.insert("depends_on".to_string(), Value::Array(depends_on));
            record.insert("blocked_by".to_string(), Value::Array(Vec::new()));
            record.insert(
                "time_entries".to_string(),
                Value::Array(time_entries.into_iter().map(Value::Object).collect()),
            );
            coerce_bool(&mut record, "is_recurring");
            coerce_bool(&mut record, "is_template");

            tasks.insert(id, codec::decode(record)?);
        }

        tracing::debug!(count = tasks.len(), "Loaded tasks");
        Ok(tasks)
    }

    fn save_tasks(&mut self, tasks: &TaskMap) -> Result<()> {
        self.replace_all("tasks", |tx| {
            clear_tasks(tx)?;
            insert_task_rows(tx, tasks)?;
            for task in tasks.values() {
                insert_task_children(tx, task)?;
            }
            Ok(())
        })?;
        tracing::debug!(count = tasks.len(), "Saved tasks");
        Ok(())
    }

    fn load_templates(&self) -> Result<TemplateMap> {
        let rows = self.load_records(
            &format!("SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY rowid"),
            None,
        )?;

        let mut templates = TemplateMap::new();
        for mut record in rows {
            let Some(Value::String(id)) = record.get("id").cloned() else {
                continue;
            };

            let categories = self.load_strings(
                "SELECT category FROM template_categories WHERE template_id = ?1 ORDER BY rowid",
                &id,
            )?;
            let tags = self.load_strings(
                "SELECT tag FROM template_tags WHERE template_id = ?1 ORDER BY rowid",
                &id,
            )?;
            record.insert("categories".to_string(), Value::Array(categories));
            record.insert("tags".to_string(), Value::Array(tags));

            templates.insert(id, codec::decode(record)?);
        }

        tracing::debug!(count = templates.len(), "Loaded templates");
        Ok(templates)
    }

    fn save_templates(&mut self, templates: &TemplateMap) -> Result<()> {
        self.replace_all("templates", |tx| {
            clear_templates(tx)?;
            insert_templates(tx, templates)
        })?;
        tracing::debug!(count = templates.len(), "Saved templates");
        Ok(())
    }

    fn enforces_unique_template_names(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::models::{Priority, RecurrenceType, TimeEntry};
    use tempfile::TempDir;

    fn count(store: &SqliteStorage, sql: &str, id: &str) -> i64 {
        store.connection().query_row(sql, params![id], |row| row.get(0)).unwrap()
    }

    fn sample_task() -> Task {
        let mut task = Task::new("Migrate database");
        task.description = "Move to the new cluster".to_string();
        task.priority = Priority::Urgent;
        task.categories = vec!["ops".to_string(), "infra".to_string()];
        task.tags = vec!["q3".to_string()];
        task.depends_on = vec!["elsewhere".to_string()];
        task.is_recurring = true;
        task.recurrence_type = Some(RecurrenceType::Monthly);
        task.recurrence_interval = 3;
        task.estimated_minutes = Some(240);
        task.reminder_before_minutes = Some(30);
        let mut done = TimeEntry::start("planning");
        done.end_time = Some("2026-02-01T11:00:00.000000".to_string());
        done.duration_minutes = 12.25;
        task.time_entries = vec![done, TimeEntry::start("doing")];
        task
    }

    fn single(task: &Task) -> TaskMap {
        let mut tasks = TaskMap::new();
        tasks.insert(task.id.clone(), task.clone());
        tasks
    }

    #[test]
    fn test_open_creates_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(DATABASE_FILENAME);
        let store = SqliteStorage::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.db_path(), Some(path.as_path()));
        store.close().unwrap();
    }

    #[test]
    fn test_schema_creation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILENAME);
        let mut store = SqliteStorage::open(&path).unwrap();
        let task = sample_task();
        store.save_tasks(&single(&task)).unwrap();
        store.close().unwrap();

        let store = SqliteStorage::open(&path).unwrap();
        assert_eq!(store.load_tasks().unwrap(), single(&task));
    }

    #[test]
    fn test_round_trip_task() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let task = sample_task();
        store.save_tasks(&single(&task)).unwrap();
        assert_eq!(store.load_tasks().unwrap(), single(&task));
    }

    #[test]
    fn test_dependency_on_unsaved_task_survives() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let mut task = Task::new("Waits on a deleted task");
        task.depends_on = vec!["gone-1".to_string(), "gone-2".to_string()];
        store.save_tasks(&single(&task)).unwrap();
        assert_eq!(store.load_tasks().unwrap()[&task.id].depends_on, task.depends_on);
    }

    #[test]
    fn test_child_order_is_preserved() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let mut task = Task::new("Ordered");
        task.tags = vec!["zeta".to_string(), "alpha".to_string(), "mid".to_string()];
        store.save_tasks(&single(&task)).unwrap();
        let loaded = store.load_tasks().unwrap();
        assert_eq!(loaded[&task.id].tags, task.tags);
    }

    #[test]
    fn test_blocked_by_is_not_persisted() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let mut task = Task::new("Derived");
        task.blocked_by.push("someone".to_string());
        store.save_tasks(&single(&task)).unwrap();
        assert!(store.load_tasks().unwrap()[&task.id].blocked_by.is_empty());
    }

    #[test]
    fn test_booleans_stored_as_integers() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let task = sample_task();
        store.save_tasks(&single(&task)).unwrap();
        let flag: i64 = store
            .connection()
            .query_row("SELECT is_recurring FROM tasks WHERE id = ?1", params![task.id], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(flag, 1);
    }

    #[test]
    fn test_removed_task_leaves_no_children() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let task = sample_task();
        store.save_tasks(&single(&task)).unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM task_categories WHERE task_id = ?1", &task.id), 2);

        store.save_tasks(&TaskMap::new()).unwrap();
        for table in ["task_categories", "task_tags", "task_dependencies", "time_entries"] {
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE task_id = ?1");
            assert_eq!(count(&store, &sql, &task.id), 0, "{table} not cleared");
        }
    }

    #[test]
    fn test_parent_delete_cascades() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let task = sample_task();
        store.save_tasks(&single(&task)).unwrap();

        store.connection().execute("DELETE FROM tasks WHERE id = ?1", params![task.id]).unwrap();
        assert_eq!(count(&store, "SELECT COUNT(*) FROM task_categories WHERE task_id = ?1", &task.id), 0);
        assert_eq!(count(&store, "SELECT COUNT(*) FROM time_entries WHERE task_id = ?1", &task.id), 0);
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let original = sample_task();
        store.save_tasks(&single(&original)).unwrap();

        // Two tasks sharing a time entry id violate the primary key.
        let mut a = Task::new("A");
        let mut b = Task::new("B");
        let entry = TimeEntry::start("shared");
        a.time_entries.push(entry.clone());
        b.time_entries.push(entry);
        let mut broken = TaskMap::new();
        broken.insert(a.id.clone(), a);
        broken.insert(b.id.clone(), b);

        assert!(matches!(store.save_tasks(&broken), Err(Error::Database(_))));
        assert_eq!(store.load_tasks().unwrap(), single(&original));
    }

    #[test]
    fn test_templates_round_trip() {
        let mut store = SqliteStorage::in_memory().unwrap();
        let mut template = TaskTemplate::new("bug", "Fix a bug");
        template.priority = Priority::High;
        template.categories.push("eng".to_string());
        template.tags = vec!["triage".to_string(), "bug".to_string()];
        template.estimated_minutes = Some(60);

        let mut templates = TemplateMap::new();
        templates.insert(template.id.clone(), template);
        store.save_templates(&templates).unwrap();
        assert_eq!(store.load_templates().unwrap(), templates);
    }

    #[test]
    fn test_duplicate_template_name_rejected() {
        let mut store = SqliteStorage::in_memory().unwrap();
        assert!(store.enforces_unique_template_names());

        let kept = TaskTemplate::new("weekly", "Weekly review");
        let mut templates = TemplateMap::new();
        templates.insert(kept.id.clone(), kept);
        store.save_templates(&templates).unwrap();

        let dup = TaskTemplate::new("weekly", "Another weekly review");
        let mut with_dup = templates.clone();
        with_dup.insert(dup.id.clone(), dup);

        let err = store.save_templates(&with_dup).unwrap_err();
        assert!(matches!(err, Error::TemplateNameConflict { ref name } if name == "weekly"));
        assert_eq!(store.load_templates().unwrap(), templates);
    }

    #[test]
    fn test_corrupt_schema_load_fails() {
        let store = SqliteStorage::in_memory().unwrap();
        store.connection().execute_batch("DROP TABLE task_tags;").unwrap();
        assert!(store.load_tasks().unwrap().is_empty());

        store
            .connection()
            .execute("INSERT INTO tasks (id, title) VALUES ('x', 'broken')", [])
            .unwrap();
        assert!(matches!(store.load_tasks(), Err(Error::Database(_))));
    }
}
