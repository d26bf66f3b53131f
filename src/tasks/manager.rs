//! Task operations on top of a [`Storage`] backend.
//!
//! The manager owns the in-memory task and template collections. It loads
//! them once when constructed and writes the full collections back after
//! every mutating call. A failed save is logged and otherwise ignored: the
//! in-memory change stays in place until the next successful save.

use crate::error::Result;
use crate::storage::Storage;
use crate::tasks::models::{
    Priority, RecurrenceType, Task, TaskMap, TaskTemplate, TemplateMap, TimeEntry,
    STATUS_COMPLETED, STATUS_PENDING,
};
use crate::timestamp;
use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Fields that can be updated on a task.
///
/// Outer `None` leaves a field alone; for optional fields `Some(None)` clears it.
#[derive(Debug, Default, Clone)]
pub struct TaskUpdate {
    /// New title (if Some).
    pub title: Option<String>,
    /// New description (if Some).
    pub description: Option<String>,
    /// New priority (if Some).
    pub priority: Option<Priority>,
    /// New status (if Some).
    pub status: Option<String>,
    /// New due date.
    pub due_date: Option<Option<String>>,
    /// Replacement categories.
    pub categories: Option<Vec<String>>,
    /// Replacement tags.
    pub tags: Option<Vec<String>>,
    /// New recurring flag.
    pub is_recurring: Option<bool>,
    /// New recurrence pattern.
    pub recurrence_type: Option<Option<RecurrenceType>>,
    /// New recurrence interval.
    pub recurrence_interval: Option<u32>,
    /// New effort estimate.
    pub estimated_minutes: Option<Option<u32>>,
    /// New reminder lead time.
    pub reminder_before_minutes: Option<Option<u32>>,
}

impl TaskUpdate {
    /// Check if any fields are set for update.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.due_date.is_none()
            && self.categories.is_none()
            && self.tags.is_none()
            && self.is_recurring.is_none()
            && self.recurrence_type.is_none()
            && self.recurrence_interval.is_none()
            && self.estimated_minutes.is_none()
            && self.reminder_before_minutes.is_none()
    }

    fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(status) = &self.status {
            task.status.clone_from(status);
        }
        if let Some(due_date) = &self.due_date {
            task.due_date.clone_from(due_date);
        }
        if let Some(categories) = &self.categories {
            task.categories = dedup(categories);
        }
        if let Some(tags) = &self.tags {
            task.tags = dedup(tags);
        }
        if let Some(is_recurring) = self.is_recurring {
            task.is_recurring = is_recurring;
        }
        if let Some(recurrence_type) = self.recurrence_type {
            task.recurrence_type = recurrence_type;
        }
        if let Some(interval) = self.recurrence_interval {
            task.recurrence_interval = interval.max(1);
        }
        if let Some(estimate) = self.estimated_minutes {
            task.estimated_minutes = estimate;
        }
        if let Some(reminder) = self.reminder_before_minutes {
            task.reminder_before_minutes = reminder;
        }
    }
}

fn dedup(values: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values.iter().filter(|v| seen.insert(v.as_str())).cloned().collect()
}

/// Filter options for listing tasks.
#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    /// Filter by status.
    pub status: Option<String>,
    /// Filter by priority.
    pub priority: Option<Priority>,
    /// Require this category.
    pub category: Option<String>,
    /// Require this tag.
    pub tag: Option<String>,
    /// Require a due date to be present (`true`) or absent (`false`).
    pub has_due_date: Option<bool>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        self.status.as_ref().map_or(true, |s| &task.status == s)
            && self.priority.map_or(true, |p| task.priority == p)
            && self.category.as_ref().map_or(true, |c| task.categories.contains(c))
            && self.tag.as_ref().map_or(true, |t| task.tags.contains(t))
            && self.has_due_date.map_or(true, |want| task.due_date.is_some() == want)
    }
}

/// Task fields that free-text search can look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    /// The title.
    Title,
    /// The description.
    Description,
    /// Any category.
    Categories,
    /// Any tag.
    Tags,
}

impl SearchField {
    fn matches(self, task: &Task, needle: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(needle);
        match self {
            Self::Title => hit(&task.title),
            Self::Description => hit(&task.description),
            Self::Categories => task.categories.iter().any(|c| hit(c)),
            Self::Tags => task.tags.iter().any(|t| hit(t)),
        }
    }
}

/// Summary counts across all tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    /// Number of tasks.
    pub total_tasks: usize,
    /// Tasks with status `completed`.
    pub completed: usize,
    /// Tasks with status `pending`.
    pub pending: usize,
    /// Tasks past their due date.
    pub overdue: usize,
    /// Task count per priority, including zero counts.
    pub priority_counts: BTreeMap<Priority, usize>,
    /// Minutes tracked across all tasks.
    pub total_time_minutes: f64,
    /// Number of distinct categories.
    pub categories: usize,
    /// Number of distinct tags.
    pub tags: usize,
    /// Number of recurring tasks.
    pub recurring_tasks: usize,
}

/// One line of the CSV export.
#[derive(Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    title: &'a str,
    description: &'a str,
    priority: Priority,
    status: &'a str,
    created_at: &'a str,
    updated_at: &'a str,
    due_date: &'a str,
    completed_at: &'a str,
    categories: String,
    tags: String,
    is_recurring: bool,
    recurrence_type: &'static str,
    total_time_minutes: f64,
}

impl<'a> From<&'a Task> for CsvRow<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            id: &task.id,
            title: &task.title,
            description: &task.description,
            priority: task.priority,
            status: &task.status,
            created_at: &task.created_at,
            updated_at: &task.updated_at,
            due_date: task.due_date.as_deref().unwrap_or_default(),
            completed_at: task.completed_at.as_deref().unwrap_or_default(),
            categories: task.categories.join(","),
            tags: task.tags.join(","),
            is_recurring: task.is_recurring,
            recurrence_type: task.recurrence_type.map_or("", |r| r.as_str()),
            total_time_minutes: task.total_time_spent(),
        }
    }
}

#[derive(Serialize)]
struct Export<'a> {
    exported_at: String,
    task_count: usize,
    tasks: Vec<&'a Task>,
}

/// Business operations over a storage backend.
#[derive(Debug)]
pub struct TaskManager<S: Storage> {
    storage: S,
    tasks: TaskMap,
    templates: TemplateMap,
}

impl<S: Storage> TaskManager<S> {
    /// Create a manager and load everything from `storage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load (the JSON backend never
    /// does).
    pub fn new(storage: S) -> Result<Self> {
        let mut manager = Self { storage, tasks: TaskMap::new(), templates: TemplateMap::new() };
        manager.load()?;
        Ok(manager)
    }

    /// Reload tasks and templates from storage, replacing in-memory state.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to load.
    pub fn load(&mut self) -> Result<()> {
        self.tasks = self.storage.load_tasks()?;
        self.templates = self.storage.load_templates()?;
        Ok(())
    }

    /// Write tasks and templates to storage.
    ///
    /// Both collections are attempted even if the first fails.
    ///
    /// # Errors
    ///
    /// Returns the first save error.
    pub fn save(&mut self) -> Result<()> {
        let tasks = self.storage.save_tasks(&self.tasks);
        let templates = self.storage.save_templates(&self.templates);
        tasks.and(templates)
    }

    fn persist(&mut self) {
        if let Err(e) = self.save() {
            tracing::warn!(error = %e, "Failed to persist changes; keeping in-memory state");
        }
    }

    /// The storage backend.
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Consume the manager, returning the storage backend.
    pub fn into_storage(self) -> S {
        self.storage
    }

    /// All tasks, keyed by id.
    pub const fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    // Task CRUD

    /// Create a new task and persist it.
    pub fn create_task(&mut self, title: &str, description: &str, priority: Priority) -> &Task {
        let task = Task { description: description.to_string(), priority, ..Task::new(title) };
        self.insert_task(task)
    }

    /// Add a fully-formed task and persist it.
    pub fn insert_task(&mut self, task: Task) -> &Task {
        let id = task.id.clone();
        tracing::debug!(task_id = %id, "Created task");
        self.tasks.insert(id.clone(), task);
        self.persist();
        &self.tasks[&id]
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Apply `update` to a task and persist it.
    pub fn update_task(&mut self, id: &str, update: &TaskUpdate) -> Option<&Task> {
        let task = self.tasks.get_mut(id)?;
        update.apply(task);
        task.touch();
        self.persist();
        self.tasks.get(id)
    }

    /// Delete a task by ID. Tasks that depend on it keep the dangling id.
    pub fn delete_task(&mut self, id: &str) -> bool {
        if self.tasks.remove(id).is_none() {
            return false;
        }
        self.persist();
        true
    }

    /// Mark a task completed, spawning its successor if it recurs.
    pub fn complete_task(&mut self, id: &str) -> Option<&Task> {
        self.complete_without_saving(id)?;
        self.persist();
        self.tasks.get(id)
    }

    fn complete_without_saving(&mut self, id: &str) -> Option<()> {
        let task = self.tasks.get_mut(id)?;
        task.complete();
        if let Some(next) = task.next_recurrence() {
            tracing::debug!(task_id = %id, next_id = %next.id, "Spawned next occurrence");
            self.tasks.insert(next.id.clone(), next);
        }
        Some(())
    }

    // Priority

    /// Set a task's priority.
    pub fn set_priority(&mut self, id: &str, priority: Priority) -> Option<&Task> {
        self.update_task(id, &TaskUpdate { priority: Some(priority), ..TaskUpdate::default() })
    }

    /// All tasks with the given priority.
    pub fn tasks_by_priority(&self, priority: Priority) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.priority == priority).collect()
    }

    // Due dates and reminders

    /// Set a task's due date and reminder lead time.
    pub fn set_due_date(
        &mut self,
        id: &str,
        due_date: &str,
        reminder_minutes: Option<u32>,
    ) -> Option<&Task> {
        self.update_task(
            id,
            &TaskUpdate {
                due_date: Some(Some(due_date.to_string())),
                reminder_before_minutes: Some(reminder_minutes),
                ..TaskUpdate::default()
            },
        )
    }

    /// All tasks past their due date.
    pub fn overdue_tasks(&self) -> Vec<&Task> {
        let now = timestamp::now_naive();
        self.tasks.values().filter(|t| t.is_overdue_at(now)).collect()
    }

    /// Open tasks due within the next `hours`.
    pub fn tasks_due_soon(&self, hours: i64) -> Vec<&Task> {
        self.tasks_due_soon_at(timestamp::now_naive(), hours)
    }

    /// Open tasks due between `now` and `now + hours`.
    pub fn tasks_due_soon_at(&self, now: NaiveDateTime, hours: i64) -> Vec<&Task> {
        // Past the representable range there is no upper bound; before it, nothing is due.
        let threshold = Duration::try_hours(hours).and_then(|span| now.checked_add_signed(span));
        if threshold.is_none() && hours < 0 {
            return Vec::new();
        }
        self.tasks
            .values()
            .filter(|t| !t.is_completed())
            .filter(|t| {
                t.due_date
                    .as_deref()
                    .and_then(|d| timestamp::parse(d).ok())
                    .is_some_and(|due| now <= due && threshold.map_or(true, |end| due <= end))
            })
            .collect()
    }

    /// Find tasks needing a reminder and stamp them as reminded.
    pub fn check_reminders(&mut self) -> Vec<Task> {
        self.check_reminders_at(timestamp::now_naive())
    }

    /// Find tasks needing a reminder as of `now` and stamp them as reminded.
    pub fn check_reminders_at(&mut self, now: NaiveDateTime) -> Vec<Task> {
        let stamp = timestamp::format(now);
        let mut reminded = Vec::new();
        for task in self.tasks.values_mut().filter(|t| t.needs_reminder_at(now)) {
            task.last_reminded = Some(stamp.clone());
            reminded.push(task.clone());
        }
        if !reminded.is_empty() {
            self.persist();
        }
        reminded
    }

    // Categories and tags

    /// Add a category unless already present.
    pub fn add_category(&mut self, id: &str, category: &str) -> Option<&Task> {
        self.edit_list(id, |t| push_unique(&mut t.categories, category))
    }

    /// Remove a category if present.
    pub fn remove_category(&mut self, id: &str, category: &str) -> Option<&Task> {
        self.edit_list(id, |t| remove_value(&mut t.categories, category))
    }

    /// Add a tag unless already present.
    pub fn add_tag(&mut self, id: &str, tag: &str) -> Option<&Task> {
        self.edit_list(id, |t| push_unique(&mut t.tags, tag))
    }

    /// Remove a tag if present.
    pub fn remove_tag(&mut self, id: &str, tag: &str) -> Option<&Task> {
        self.edit_list(id, |t| remove_value(&mut t.tags, tag))
    }

    /// Run `edit` on a task; touch and persist only if it reports a change.
    fn edit_list(&mut self, id: &str, edit: impl FnOnce(&mut Task) -> bool) -> Option<&Task> {
        let task = self.tasks.get_mut(id)?;
        if edit(task) {
            task.touch();
            self.persist();
        }
        self.tasks.get(id)
    }

    /// Every distinct category, sorted.
    pub fn all_categories(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.tasks.values().flat_map(|t| &t.categories).collect();
        set.into_iter().cloned().collect()
    }

    /// Every distinct tag, sorted.
    pub fn all_tags(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.tasks.values().flat_map(|t| &t.tags).collect();
        set.into_iter().cloned().collect()
    }

    // Recurrence

    /// Make a task recur every `interval` periods.
    pub fn make_recurring(
        &mut self,
        id: &str,
        recurrence_type: RecurrenceType,
        interval: u32,
    ) -> Option<&Task> {
        self.update_task(
            id,
            &TaskUpdate {
                is_recurring: Some(true),
                recurrence_type: Some(Some(recurrence_type)),
                recurrence_interval: Some(interval),
                ..TaskUpdate::default()
            },
        )
    }

    /// All recurring tasks.
    pub fn recurring_tasks(&self) -> Vec<&Task> {
        self.tasks.values().filter(|t| t.is_recurring).collect()
    }

    // Dependencies

    /// Make `id` depend on `depends_on`. Both tasks must exist.
    pub fn add_dependency(&mut self, id: &str, depends_on: &str) -> bool {
        if id == depends_on || !self.tasks.contains_key(depends_on) {
            return false;
        }
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        if push_unique(&mut task.depends_on, depends_on) {
            task.touch();
            self.persist();
        }
        true
    }

    /// Remove a dependency. Returns false if it was not present.
    pub fn remove_dependency(&mut self, id: &str, depends_on: &str) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        if !remove_value(&mut task.depends_on, depends_on) {
            return false;
        }
        task.touch();
        self.persist();
        true
    }

    /// Tasks with at least one unsatisfied dependency.
    pub fn blocked_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| !t.depends_on.is_empty() && !t.can_start(&self.tasks))
            .collect()
    }

    /// The existing tasks that `id` depends on. Missing ids are skipped.
    pub fn task_dependencies(&self, id: &str) -> Vec<&Task> {
        self.tasks
            .get(id)
            .map(|task| task.depends_on.iter().filter_map(|d| self.tasks.get(d)).collect())
            .unwrap_or_default()
    }

    // Time tracking

    /// Start a new time entry on a task.
    pub fn start_time_tracking(&mut self, id: &str, notes: &str) -> Option<TimeEntry> {
        let task = self.tasks.get_mut(id)?;
        let entry = TimeEntry::start(notes);
        task.time_entries.push(entry.clone());
        task.touch();
        self.persist();
        Some(entry)
    }

    /// Stop a running time entry now.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry's start time cannot be parsed.
    pub fn stop_time_tracking(&mut self, id: &str, entry_id: &str) -> Result<Option<TimeEntry>> {
        self.stop_time_tracking_at(id, entry_id, timestamp::now_naive())
    }

    /// Stop a running time entry at `end`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry's start time cannot be parsed.
    pub fn stop_time_tracking_at(
        &mut self,
        id: &str,
        entry_id: &str,
        end: NaiveDateTime,
    ) -> Result<Option<TimeEntry>> {
        let Some(task) = self.tasks.get_mut(id) else {
            return Ok(None);
        };
        let Some(entry) = task.time_entries.iter_mut().find(|e| e.id == entry_id) else {
            return Ok(None);
        };
        entry.stop_at(end)?;
        let stopped = entry.clone();
        task.touch();
        self.persist();
        Ok(Some(stopped))
    }

    /// Running time entries on a task.
    pub fn active_time_entries(&self, id: &str) -> Vec<&TimeEntry> {
        self.tasks.get(id).map(|t| t.active_time_entries().collect()).unwrap_or_default()
    }

    // Templates

    /// Add a template and persist it.
    ///
    /// Name uniqueness is not checked here; backends that enforce it reject
    /// the save instead.
    pub fn create_template(&mut self, template: TaskTemplate) -> &TaskTemplate {
        let id = template.id.clone();
        self.templates.insert(id.clone(), template);
        self.persist();
        &self.templates[&id]
    }

    /// Create a task from the first template named `name`, then apply `overrides`.
    pub fn create_task_from_template(
        &mut self,
        name: &str,
        overrides: &TaskUpdate,
    ) -> Option<&Task> {
        let mut task = self.get_template(name)?.create_task();
        overrides.apply(&mut task);
        Some(self.insert_task(task))
    }

    /// Get the first template with the given name.
    pub fn get_template(&self, name: &str) -> Option<&TaskTemplate> {
        self.templates.values().find(|t| t.name == name)
    }

    /// All templates.
    pub fn list_templates(&self) -> Vec<&TaskTemplate> {
        self.templates.values().collect()
    }

    // Bulk operations

    /// Apply the same update to several tasks, saving once.
    pub fn bulk_update(&mut self, ids: &[&str], update: &TaskUpdate) -> Vec<String> {
        let mut updated = Vec::new();
        for id in ids {
            if let Some(task) = self.tasks.get_mut(*id) {
                update.apply(task);
                task.touch();
                updated.push((*id).to_string());
            }
        }
        if !updated.is_empty() {
            self.persist();
        }
        updated
    }

    /// Complete several tasks, saving once.
    pub fn bulk_complete(&mut self, ids: &[&str]) -> Vec<String> {
        let completed: Vec<String> = ids
            .iter()
            .filter(|id| self.complete_without_saving(id).is_some())
            .map(|id| (*id).to_string())
            .collect();
        if !completed.is_empty() {
            self.persist();
        }
        completed
    }

    /// Delete several tasks, saving once. Returns how many existed.
    pub fn bulk_delete(&mut self, ids: &[&str]) -> usize {
        let removed = ids.iter().filter(|id| self.tasks.remove(**id).is_some()).count();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Add a category to several tasks, saving once.
    pub fn bulk_add_category(&mut self, ids: &[&str], category: &str) -> Vec<String> {
        self.bulk_edit(ids, |t| push_unique(&mut t.categories, category))
    }

    /// Add a tag to several tasks, saving once.
    pub fn bulk_add_tag(&mut self, ids: &[&str], tag: &str) -> Vec<String> {
        self.bulk_edit(ids, |t| push_unique(&mut t.tags, tag))
    }

    fn bulk_edit(&mut self, ids: &[&str], edit: impl Fn(&mut Task) -> bool) -> Vec<String> {
        let mut found = Vec::new();
        let mut changed = false;
        for id in ids {
            if let Some(task) = self.tasks.get_mut(*id) {
                if edit(task) {
                    task.touch();
                    changed = true;
                }
                found.push((*id).to_string());
            }
        }
        if changed {
            self.persist();
        }
        found
    }

    // Search and filtering

    /// Case-insensitive substring search. An empty `fields` list searches
    /// title and description.
    pub fn search_tasks(&self, query: &str, fields: &[SearchField]) -> Vec<&Task> {
        let fields = if fields.is_empty() {
            &[SearchField::Title, SearchField::Description][..]
        } else {
            fields
        };
        let needle = query.to_lowercase();
        self.tasks.values().filter(|t| fields.iter().any(|f| f.matches(t, &needle))).collect()
    }

    /// Tasks matching every criterion set in `filter`.
    pub fn filter_tasks(&self, filter: &TaskFilter) -> Vec<&Task> {
        self.tasks.values().filter(|t| filter.matches(t)).collect()
    }

    // Reporting

    /// Summary counts across all tasks.
    pub fn statistics(&self) -> Statistics {
        let count_status = |status: &str| self.tasks.values().filter(|t| t.status == status).count();
        let priority_counts =
            Priority::ALL.iter().map(|p| (*p, self.tasks_by_priority(*p).len())).collect();

        Statistics {
            total_tasks: self.tasks.len(),
            completed: count_status(STATUS_COMPLETED),
            pending: count_status(STATUS_PENDING),
            overdue: self.overdue_tasks().len(),
            priority_counts,
            total_time_minutes: self.tasks.values().map(Task::total_time_spent).sum(),
            categories: self.all_categories().len(),
            tags: self.all_tags().len(),
            recurring_tasks: self.recurring_tasks().len(),
        }
    }

    /// Write tasks (all of them if `tasks` is `None`) to a JSON export file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn export_to_json(&self, path: &Path, tasks: Option<&[&Task]>) -> Result<()> {
        let tasks: Vec<&Task> = tasks.map_or_else(|| self.tasks.values().collect(), <[_]>::to_vec);
        let export = Export { exported_at: timestamp::now(), task_count: tasks.len(), tasks };
        std::fs::write(path, serde_json::to_string_pretty(&export)?)?;
        Ok(())
    }

    /// Write tasks (all of them if `tasks` is `None`) to a CSV file, one row
    /// per task under a header row. An empty selection writes an empty file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn export_to_csv(&self, path: &Path, tasks: Option<&[&Task]>) -> Result<()> {
        let tasks: Vec<&Task> = tasks.map_or_else(|| self.tasks.values().collect(), <[_]>::to_vec);
        let mut writer = csv::Writer::from_path(path)?;
        for task in &tasks {
            writer.serialize(CsvRow::from(*task))?;
        }
        writer.flush()?;
        tracing::debug!(path = %path.display(), count = tasks.len(), "Exported tasks to CSV");
        Ok(())
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) -> bool {
    if values.iter().any(|v| v == value) {
        return false;
    }
    values.push(value.to_string());
    true
}

fn remove_value(values: &mut Vec<String>, value: &str) -> bool {
    let before = values.len();
    values.retain(|v| v != value);
    values.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::storage::{JsonStorage, SqliteStorage};
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn json_manager() -> (TempDir, TaskManager<JsonStorage>) {
        let dir = TempDir::new().unwrap();
        let manager = TaskManager::new(JsonStorage::in_dir(dir.path()).unwrap()).unwrap();
        (dir, manager)
    }

    fn sqlite_manager() -> TaskManager<SqliteStorage> {
        TaskManager::new(SqliteStorage::in_memory().unwrap()).unwrap()
    }

    fn noon(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 7, day).unwrap().and_hms_opt(12, 0, 0).unwrap()
    }

    /// Storage whose saves always fail.
    struct FailingStorage;

    impl Storage for FailingStorage {
        fn load_tasks(&self) -> Result<TaskMap> {
            Ok(TaskMap::new())
        }

        fn save_tasks(&mut self, _tasks: &TaskMap) -> Result<()> {
            Err(Error::Io(std::io::Error::other("disk full")))
        }

        fn load_templates(&self) -> Result<TemplateMap> {
            Ok(TemplateMap::new())
        }

        fn save_templates(&mut self, _templates: &TemplateMap) -> Result<()> {
            Err(Error::Io(std::io::Error::other("disk full")))
        }

        fn enforces_unique_template_names(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_create_task_persists() {
        let (_dir, mut manager) = json_manager();
        let id = manager.create_task("Buy milk", "2 litres", Priority::Low).id.clone();

        let reloaded = manager.storage().load_tasks().unwrap();
        assert_eq!(reloaded[&id].title, "Buy milk");
        assert_eq!(reloaded[&id].description, "2 litres");
        assert_eq!(reloaded[&id].priority, Priority::Low);
    }

    #[test]
    fn test_failed_save_keeps_memory_state() {
        let mut manager = TaskManager::new(FailingStorage).unwrap();
        let id = manager.create_task("Survives", "", Priority::Medium).id.clone();
        assert!(manager.get_task(&id).is_some());
        assert!(manager.save().is_err());
    }

    #[test]
    fn test_update_task() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Draft", "", Priority::Medium).id.clone();
        let update = TaskUpdate {
            title: Some("Final".to_string()),
            tags: Some(vec!["a".to_string(), "a".to_string(), "b".to_string()]),
            estimated_minutes: Some(Some(25)),
            ..TaskUpdate::default()
        };
        assert!(!update.is_empty());

        let task = manager.update_task(&id, &update).unwrap();
        assert_eq!(task.title, "Final");
        assert_eq!(task.tags, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(task.estimated_minutes, Some(25));
        assert!(manager.update_task("missing", &update).is_none());
        assert!(TaskUpdate::default().is_empty());
    }

    #[test]
    fn test_delete_task_leaves_dangling_dependency() {
        let (_dir, mut manager) = json_manager();
        let a = manager.create_task("A", "", Priority::Medium).id.clone();
        let b = manager.create_task("B", "", Priority::Medium).id.clone();
        assert!(manager.add_dependency(&b, &a));

        assert!(manager.delete_task(&a));
        assert!(!manager.delete_task(&a));
        assert_eq!(manager.get_task(&b).unwrap().depends_on, vec![a]);
        assert_eq!(manager.blocked_tasks().len(), 1);
        assert!(manager.task_dependencies(&b).is_empty());
    }

    #[test]
    fn test_complete_recurring_spawns_successor() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Standup", "", Priority::Medium).id.clone();
        manager.set_due_date(&id, "2026-07-01T09:00:00", None);
        manager.make_recurring(&id, RecurrenceType::Daily, 2);

        let done = manager.complete_task(&id).unwrap();
        assert!(done.is_completed());
        assert_eq!(manager.tasks().len(), 2);

        let next = manager.tasks().values().find(|t| t.id != id).unwrap();
        assert_eq!(next.status, STATUS_PENDING);
        assert_eq!(next.due_date.as_deref(), Some("2026-07-03T09:00:00.000000"));
        assert!(next.time_entries.is_empty());
        assert_eq!(manager.storage().load_tasks().unwrap().len(), 2);
    }

    #[test]
    fn test_complete_plain_task_spawns_nothing() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Once", "", Priority::Medium).id.clone();
        manager.complete_task(&id);
        assert_eq!(manager.tasks().len(), 1);
        assert!(manager.complete_task("missing").is_none());
    }

    #[test]
    fn test_priority_queries() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Fire", "", Priority::Low).id.clone();
        manager.create_task("Docs", "", Priority::Low);
        manager.set_priority(&id, Priority::Urgent);
        assert_eq!(manager.tasks_by_priority(Priority::Urgent).len(), 1);
        assert_eq!(manager.tasks_by_priority(Priority::Low).len(), 1);
    }

    #[test]
    fn test_due_soon_window() {
        let mut manager = sqlite_manager();
        let soon = manager.create_task("Soon", "", Priority::Medium).id.clone();
        let later = manager.create_task("Later", "", Priority::Medium).id.clone();
        manager.set_due_date(&soon, &timestamp::format(noon(1) + Duration::hours(3)), None);
        manager.set_due_date(&later, &timestamp::format(noon(5)), None);

        let due = manager.tasks_due_soon_at(noon(1), 24);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, soon);
    }

    #[test]
    fn test_due_soon_with_huge_window() {
        let mut manager = sqlite_manager();
        let soon = manager.create_task("Soon", "", Priority::Medium).id.clone();
        let later = manager.create_task("Later", "", Priority::Medium).id.clone();
        manager.set_due_date(&soon, &timestamp::format(noon(1) + Duration::hours(3)), None);
        manager.set_due_date(&later, &timestamp::format(noon(5)), None);

        assert_eq!(manager.tasks_due_soon_at(noon(1), i64::MAX / 4000).len(), 2);
        assert_eq!(manager.tasks_due_soon_at(noon(1), i64::MAX).len(), 2);
        assert!(manager.tasks_due_soon_at(noon(1), i64::MIN).is_empty());
    }

    #[test]
    fn test_complete_with_huge_interval_keeps_due_date() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Rare", "", Priority::Medium).id.clone();
        manager.set_due_date(&id, "2026-07-01T09:00:00", None);
        manager.make_recurring(&id, RecurrenceType::Daily, u32::MAX);

        manager.complete_task(&id);
        let next = manager.tasks().values().find(|t| t.id != id).unwrap();
        assert_eq!(next.due_date.as_deref(), Some("2026-07-01T09:00:00"));
    }

    #[test]
    fn test_check_reminders_stamps_and_throttles() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Call bank", "", Priority::High).id.clone();
        manager.set_due_date(&id, &timestamp::format(noon(2) + Duration::hours(1)), Some(120));

        let reminded = manager.check_reminders_at(noon(2));
        assert_eq!(reminded.len(), 1);
        let stored = manager.storage().load_tasks().unwrap();
        assert_eq!(stored[&id].last_reminded, Some(timestamp::format(noon(2))));

        assert!(manager.check_reminders_at(noon(2) + Duration::minutes(30)).is_empty());
    }

    #[test]
    fn test_categories_and_tags_are_unique() {
        let (_dir, mut manager) = json_manager();
        let a = manager.create_task("A", "", Priority::Medium).id.clone();
        let b = manager.create_task("B", "", Priority::Medium).id.clone();

        manager.add_category(&a, "work");
        manager.add_category(&a, "work");
        manager.add_category(&b, "home");
        manager.add_tag(&a, "quick");
        assert_eq!(manager.get_task(&a).unwrap().categories, vec!["work".to_string()]);
        assert_eq!(manager.all_categories(), vec!["home".to_string(), "work".to_string()]);

        manager.remove_category(&a, "work");
        manager.remove_tag(&a, "quick");
        assert!(manager.get_task(&a).unwrap().categories.is_empty());
        assert!(manager.all_tags().is_empty());
        assert!(manager.add_tag("missing", "x").is_none());
    }

    #[test]
    fn test_dependency_rules() {
        let mut manager = sqlite_manager();
        let a = manager.create_task("A", "", Priority::Medium).id.clone();
        let b = manager.create_task("B", "", Priority::Medium).id.clone();

        assert!(!manager.add_dependency(&a, "missing"));
        assert!(!manager.add_dependency(&a, &a));
        assert!(manager.add_dependency(&b, &a));
        assert!(manager.add_dependency(&b, &a));
        assert_eq!(manager.get_task(&b).unwrap().depends_on.len(), 1);
        assert_eq!(manager.blocked_tasks()[0].id, b);
        assert_eq!(manager.task_dependencies(&b)[0].id, a);

        manager.complete_task(&a);
        assert!(manager.blocked_tasks().is_empty());

        assert!(manager.remove_dependency(&b, &a));
        assert!(!manager.remove_dependency(&b, &a));
    }

    #[test]
    fn test_time_tracking() {
        let mut manager = sqlite_manager();
        let id = manager.create_task("Code", "", Priority::Medium).id.clone();
        let entry = manager.start_time_tracking(&id, "morning").unwrap();
        assert_eq!(manager.active_time_entries(&id).len(), 1);

        let start = timestamp::parse(&entry.start_time).unwrap();
        let stopped = manager
            .stop_time_tracking_at(&id, &entry.id, start + Duration::minutes(45))
            .unwrap()
            .unwrap();
        assert!((stopped.duration_minutes - 45.0).abs() < 1e-9);
        assert!(manager.active_time_entries(&id).is_empty());
        assert!(manager.stop_time_tracking(&id, "nope").unwrap().is_none());

        let stored = manager.storage().load_tasks().unwrap();
        assert!((stored[&id].total_time_spent() - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_templates() {
        let (_dir, mut manager) = json_manager();
        let mut template = TaskTemplate::new("bug", "Fix bug");
        template.tags.push("bug".to_string());
        manager.create_template(template);

        let overrides =
            TaskUpdate { title: Some("Fix login bug".to_string()), ..TaskUpdate::default() };
        let task = manager.create_task_from_template("bug", &overrides).unwrap();
        assert_eq!(task.title, "Fix login bug");
        assert_eq!(task.tags, vec!["bug".to_string()]);

        assert!(manager.create_task_from_template("nope", &TaskUpdate::default()).is_none());
        assert_eq!(manager.list_templates().len(), 1);
        assert_eq!(manager.storage().load_templates().unwrap().len(), 1);
    }

    #[test]
    fn test_duplicate_template_names_diverge_by_backend() {
        let (_dir, mut json) = json_manager();
        json.create_template(TaskTemplate::new("dup", "One"));
        json.create_template(TaskTemplate::new("dup", "Two"));
        assert_eq!(json.storage().load_templates().unwrap().len(), 2);

        let mut sqlite = sqlite_manager();
        sqlite.create_template(TaskTemplate::new("dup", "One"));
        sqlite.create_template(TaskTemplate::new("dup", "Two"));
        assert_eq!(sqlite.list_templates().len(), 2);
        assert_eq!(sqlite.storage().load_templates().unwrap().len(), 1);
        assert!(matches!(sqlite.save(), Err(Error::TemplateNameConflict { .. })));
    }

    #[test]
    fn test_bulk_operations() {
        let mut manager = sqlite_manager();
        let a = manager.create_task("A", "", Priority::Low).id.clone();
        let b = manager.create_task("B", "", Priority::Low).id.clone();
        let c = manager.create_task("C", "", Priority::Low).id.clone();

        let update = TaskUpdate { priority: Some(Priority::High), ..TaskUpdate::default() };
        assert_eq!(manager.bulk_update(&[&a, &b, "missing"], &update).len(), 2);
        assert_eq!(manager.tasks_by_priority(Priority::High).len(), 2);

        assert_eq!(manager.bulk_add_category(&[&a, &c], "batch").len(), 2);
        assert_eq!(manager.bulk_add_tag(&[&b], "t").len(), 1);
        let batch = TaskFilter { category: Some("batch".to_string()), ..TaskFilter::default() };
        assert_eq!(manager.filter_tasks(&batch).len(), 2);

        assert_eq!(manager.bulk_complete(&[&a, "missing"]), vec![a.clone()]);
        assert_eq!(manager.bulk_delete(&[&b, &c, "missing"]), 2);
        assert_eq!(manager.storage().load_tasks().unwrap().len(), 1);
    }

    #[test]
    fn test_search_tasks() {
        let mut manager = sqlite_manager();
        manager.create_task("Write Report", "quarterly numbers", Priority::Medium);
        let tagged = manager.create_task("Other", "", Priority::Medium).id.clone();
        manager.add_tag(&tagged, "report-prep");

        assert_eq!(manager.search_tasks("report", &[]).len(), 1);
        assert_eq!(manager.search_tasks("QUARTERLY", &[]).len(), 1);
        assert_eq!(manager.search_tasks("report", &[SearchField::Tags]).len(), 1);
        assert_eq!(
            manager.search_tasks("report", &[SearchField::Title, SearchField::Tags]).len(),
            2
        );
    }

    #[test]
    fn test_filter_tasks() {
        let mut manager = sqlite_manager();
        let a = manager.create_task("A", "", Priority::High).id.clone();
        manager.create_task("B", "", Priority::Low);
        manager.set_due_date(&a, "2030-01-01T00:00:00", None);

        let with_due = TaskFilter { has_due_date: Some(true), ..TaskFilter::default() };
        assert_eq!(manager.filter_tasks(&with_due).len(), 1);
        let without_due = TaskFilter { has_due_date: Some(false), ..TaskFilter::default() };
        assert_eq!(manager.filter_tasks(&without_due).len(), 1);
        let high_pending = TaskFilter {
            status: Some(STATUS_PENDING.to_string()),
            priority: Some(Priority::High),
            ..TaskFilter::default()
        };
        assert_eq!(manager.filter_tasks(&high_pending)[0].id, a);
        assert_eq!(manager.filter_tasks(&TaskFilter::default()).len(), 2);
    }

    #[test]
    fn test_statistics() {
        let mut manager = sqlite_manager();
        let a = manager.create_task("A", "", Priority::Urgent).id.clone();
        let b = manager.create_task("B", "", Priority::Low).id.clone();
        manager.set_due_date(&b, "2000-01-01T00:00:00", None);
        manager.add_category(&a, "x");
        manager.add_tag(&b, "y");
        manager.complete_task(&a);

        let stats = manager.statistics();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.overdue, 1);
        assert_eq!(stats.priority_counts[&Priority::Urgent], 1);
        assert_eq!(stats.priority_counts[&Priority::Medium], 0);
        assert_eq!(stats.categories, 1);
        assert_eq!(stats.tags, 1);
        assert_eq!(stats.recurring_tasks, 0);
    }

    #[test]
    fn test_export_to_json() {
        let (dir, mut manager) = json_manager();
        manager.create_task("A", "", Priority::Medium);
        manager.create_task("B", "", Priority::Medium);
        let path = dir.path().join("export.json");

        manager.export_to_json(&path, None).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["task_count"], 2);
        assert_eq!(doc["tasks"].as_array().unwrap().len(), 2);
        assert!(doc["exported_at"].is_string());

        let first: Vec<&Task> = manager.tasks().values().take(1).collect();
        manager.export_to_json(&path, Some(&first)).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["task_count"], 1);
    }

    #[test]
    fn test_export_to_csv() {
        let (dir, mut manager) = json_manager();
        let id = manager.create_task("Plan, then ship", "", Priority::High).id.clone();
        manager.add_category(&id, "work");
        manager.add_category(&id, "q3");
        manager.add_tag(&id, "release");
        manager.make_recurring(&id, RecurrenceType::Weekly, 1);
        let entry = manager.start_time_tracking(&id, "").unwrap();
        let start = timestamp::parse(&entry.start_time).unwrap();
        manager.stop_time_tracking_at(&id, &entry.id, start + Duration::minutes(30)).unwrap();
        let path = dir.path().join("export.csv");

        manager.export_to_csv(&path, None).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(
            headers,
            [
                "id",
                "title",
                "description",
                "priority",
                "status",
                "created_at",
                "updated_at",
                "due_date",
                "completed_at",
                "categories",
                "tags",
                "is_recurring",
                "recurrence_type",
                "total_time_minutes",
            ]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(&row[0], id);
        assert_eq!(&row[1], "Plan, then ship");
        assert_eq!(&row[3], "high");
        assert_eq!(&row[4], STATUS_PENDING);
        assert_eq!(&row[7], "");
        assert_eq!(&row[9], "work,q3");
        assert_eq!(&row[10], "release");
        assert_eq!(&row[11], "true");
        assert_eq!(&row[12], "weekly");
        assert!((row[13].parse::<f64>().unwrap() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_export_to_csv_empty_selection() {
        let (dir, mut manager) = json_manager();
        manager.create_task("Not exported", "", Priority::Medium);
        let path = dir.path().join("empty.csv");

        manager.export_to_csv(&path, Some(&[])).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_reload_from_storage() {
        let dir = TempDir::new().unwrap();
        let id = {
            let mut manager =
                TaskManager::new(JsonStorage::in_dir(dir.path()).unwrap()).unwrap();
            manager.create_task("Persisted", "", Priority::Medium).id.clone()
        };
        let manager = TaskManager::new(JsonStorage::in_dir(dir.path()).unwrap()).unwrap();
        assert_eq!(manager.get_task(&id).unwrap().title, "Persisted");
    }
}
