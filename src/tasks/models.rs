//! Task model types for the task tracking engine.
//!
//! Every struct here derives `Serialize`/`Deserialize` with `#[serde(default)]`
//! so that a record missing a field decodes to that field's default. The same
//! derives back the entity codec used by both storage backends.

use crate::error::{Error, Result};
use crate::timestamp;
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical status of an open task.
pub const STATUS_PENDING: &str = "pending";
/// Canonical status of a finished task.
pub const STATUS_COMPLETED: &str = "completed";

/// All tasks, keyed by id.
pub type TaskMap = BTreeMap<String, Task>;
/// All templates, keyed by id.
pub type TemplateMap = BTreeMap<String, TaskTemplate>;

/// Generate a fresh opaque identifier.
#[must_use]
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Task priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Low priority.
    Low,
    /// Medium priority (default).
    #[default]
    Medium,
    /// High priority.
    High,
    /// Urgent - drop everything.
    Urgent,
}

impl Priority {
    /// Every priority, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Urgent];

    /// Parse a priority from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid priority.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(Error::InvalidPriority(s.to_string())),
        }
    }

    /// Get the string representation of the priority.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How often a recurring task comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceType {
    /// Every `interval` days.
    Daily,
    /// Every `interval` weeks.
    Weekly,
    /// Every `interval` months, counted as 30 days each.
    Monthly,
    /// Every `interval` years, counted as 365 days each.
    Yearly,
}

impl RecurrenceType {
    /// Parse a recurrence type from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid recurrence type.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(Error::InvalidRecurrence(s.to_string())),
        }
    }

    /// Get the string representation of the recurrence type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Move `from` forward by `interval` periods.
    ///
    /// Returns `None` if the result falls outside the representable range.
    #[must_use]
    pub fn advance(self, from: NaiveDateTime, interval: u32) -> Option<NaiveDateTime> {
        let n = i64::from(interval);
        let step = match self {
            Self::Daily => Duration::try_days(n),
            Self::Weekly => Duration::try_weeks(n),
            Self::Monthly => Duration::try_days(30 * n),
            Self::Yearly => Duration::try_days(365 * n),
        }?;
        from.checked_add_signed(step)
    }
}

impl std::fmt::Display for RecurrenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A span of time spent on a task.
///
/// An entry without an `end_time` is still running; `duration_minutes` is
/// only meaningful once it has been stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeEntry {
    /// Unique identifier.
    pub id: String,
    /// When tracking started.
    pub start_time: String,
    /// When tracking stopped, if it has.
    pub end_time: Option<String>,
    /// Elapsed minutes, 0 until stopped.
    pub duration_minutes: f64,
    /// Free-form notes.
    pub notes: String,
}

impl Default for TimeEntry {
    fn default() -> Self {
        Self {
            id: new_id(),
            start_time: timestamp::now(),
            end_time: None,
            duration_minutes: 0.0,
            notes: String::new(),
        }
    }
}

impl TimeEntry {
    /// Start a new entry now.
    #[must_use]
    pub fn start(notes: impl Into<String>) -> Self {
        Self { notes: notes.into(), ..Self::default() }
    }

    /// Whether the entry is still running.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.end_time.is_none()
    }

    /// Stop the entry at `end`, computing its duration from the start time.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored start time cannot be parsed.
    #[allow(clippy::cast_precision_loss)]
    pub fn stop_at(&mut self, end: NaiveDateTime) -> Result<()> {
        let start = timestamp::parse(&self.start_time)?;
        let elapsed = end - start;
        let seconds = elapsed.num_microseconds().map_or_else(
            || elapsed.num_seconds() as f64,
            |us| us as f64 / 1_000_000.0,
        );
        self.end_time = Some(timestamp::format(end));
        self.duration_minutes = seconds / 60.0;
        Ok(())
    }
}

/// A task in the task tracking engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    /// Unique identifier, fixed at creation.
    pub id: String,
    /// Short title describing the task.
    pub title: String,
    /// Detailed description of the task.
    pub description: String,
    /// Priority level.
    pub priority: Priority,
    /// Current status; `pending` and `completed` are the canonical values.
    pub status: String,
    /// ISO 8601 timestamp when the task was created.
    pub created_at: String,
    /// ISO 8601 timestamp when the task was last updated.
    pub updated_at: String,
    /// When the task is due.
    pub due_date: Option<String>,
    /// When the task was completed.
    pub completed_at: Option<String>,
    /// Categories, without duplicates.
    pub categories: Vec<String>,
    /// Tags, without duplicates.
    pub tags: Vec<String>,
    /// Whether completing this task spawns a successor.
    pub is_recurring: bool,
    /// Recurrence pattern, if recurring.
    pub recurrence_type: Option<RecurrenceType>,
    /// Number of periods between occurrences.
    pub recurrence_interval: u32,
    /// When the last successor was generated from this lineage.
    pub last_recurrence: Option<String>,
    /// Ids of tasks that must complete first, in insertion order.
    pub depends_on: Vec<String>,
    /// Derived reverse of `depends_on`; never persisted by the relational store.
    pub blocked_by: Vec<String>,
    /// Time tracking entries, oldest first.
    pub time_entries: Vec<TimeEntry>,
    /// Estimated effort in minutes.
    pub estimated_minutes: Option<u32>,
    /// Reserved template marker.
    pub is_template: bool,
    /// Reserved template name.
    pub template_name: Option<String>,
    /// How long before the due date to remind.
    pub reminder_before_minutes: Option<u32>,
    /// When the last reminder fired.
    pub last_reminded: Option<String>,
}

impl Default for Task {
    fn default() -> Self {
        let now = timestamp::now();
        Self {
            id: new_id(),
            title: String::new(),
            description: String::new(),
            priority: Priority::Medium,
            status: STATUS_PENDING.to_string(),
            created_at: now.clone(),
            updated_at: now,
            due_date: None,
            completed_at: None,
            categories: Vec::new(),
            tags: Vec::new(),
            is_recurring: false,
            recurrence_type: None,
            recurrence_interval: 1,
            last_recurrence: None,
            depends_on: Vec::new(),
            blocked_by: Vec::new(),
            time_entries: Vec::new(),
            estimated_minutes: None,
            is_template: false,
            template_name: None,
            reminder_before_minutes: None,
            last_reminded: None,
        }
    }
}

impl Task {
    /// Create a pending task with a fresh id and default fields.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Self::default() }
    }

    /// Refresh `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = timestamp::now();
    }

    /// Check if the task is completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }

    /// Mark the task completed now.
    pub fn complete(&mut self) {
        self.status = STATUS_COMPLETED.to_string();
        self.completed_at = Some(timestamp::now());
        self.touch();
    }

    /// Check if the task is past due.
    #[must_use]
    pub fn is_overdue(&self) -> bool {
        self.is_overdue_at(timestamp::now_naive())
    }

    /// Check if the task is past due as of `now`.
    ///
    /// Completed tasks and tasks with an unparseable due date are never overdue.
    #[must_use]
    pub fn is_overdue_at(&self, now: NaiveDateTime) -> bool {
        if self.is_completed() {
            return false;
        }
        self.due().is_some_and(|due| due < now)
    }

    /// Check if a reminder should fire now.
    #[must_use]
    pub fn needs_reminder(&self) -> bool {
        self.needs_reminder_at(timestamp::now_naive())
    }

    /// Check if a reminder should fire as of `now`.
    ///
    /// A reminder is due once `now` reaches `due_date - reminder_before_minutes`,
    /// but never more than once per hour.
    #[must_use]
    pub fn needs_reminder_at(&self, now: NaiveDateTime) -> bool {
        let Some(minutes) = self.reminder_before_minutes.filter(|m| *m > 0) else {
            return false;
        };
        let Some(due) = self.due() else {
            return false;
        };
        if self.is_completed() {
            return false;
        }

        // A window start before the earliest representable time is no bound.
        let window_start = due.checked_sub_signed(Duration::minutes(i64::from(minutes)));
        if window_start.is_some_and(|start| now < start) {
            return false;
        }

        match self.last_reminded.as_deref().map(timestamp::parse) {
            Some(Ok(last)) => now - last >= Duration::hours(1),
            _ => true,
        }
    }

    /// Check whether every dependency is completed.
    ///
    /// A dependency id missing from `all_tasks` counts as not satisfied.
    #[must_use]
    pub fn can_start(&self, all_tasks: &TaskMap) -> bool {
        self.depends_on
            .iter()
            .all(|dep| all_tasks.get(dep).is_some_and(Self::is_completed))
    }

    /// Total minutes recorded across all time entries.
    #[must_use]
    pub fn total_time_spent(&self) -> f64 {
        self.time_entries.iter().map(|e| e.duration_minutes).sum()
    }

    /// Time entries that are still running.
    pub fn active_time_entries(&self) -> impl Iterator<Item = &TimeEntry> {
        self.time_entries.iter().filter(|e| e.is_active())
    }

    /// Build the next instance of a recurring task.
    #[must_use]
    pub fn next_recurrence(&self) -> Option<Self> {
        self.next_recurrence_at(timestamp::now_naive())
    }

    /// Build the next instance of a recurring task as of `now`.
    ///
    /// The successor keeps the task's definition but gets a fresh id, a reset
    /// status, no time entries, and a due date moved forward by the
    /// recurrence interval. Returns `None` for non-recurring tasks.
    #[must_use]
    pub fn next_recurrence_at(&self, now: NaiveDateTime) -> Option<Self> {
        let kind = self.recurrence_type.filter(|_| self.is_recurring)?;
        let now_text = timestamp::format(now);

        let mut next = self.clone();
        next.id = new_id();
        next.status = STATUS_PENDING.to_string();
        next.completed_at = None;
        next.created_at.clone_from(&now_text);
        next.updated_at.clone_from(&now_text);
        next.time_entries.clear();
        // Unparseable or out-of-range due dates carry over unchanged.
        next.due_date = self.due_date.as_deref().map(|text| {
            timestamp::parse(text)
                .ok()
                .and_then(|due| kind.advance(due, self.recurrence_interval))
                .map_or_else(|| text.to_string(), timestamp::format)
        });
        next.last_recurrence = Some(now_text);
        Some(next)
    }

    fn due(&self) -> Option<NaiveDateTime> {
        self.due_date.as_deref().and_then(|d| timestamp::parse(d).ok())
    }
}

/// A reusable blueprint for creating tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskTemplate {
    /// Unique identifier.
    pub id: String,
    /// Lookup name.
    pub name: String,
    /// Title for created tasks.
    pub title: String,
    /// Description for created tasks.
    pub description: String,
    /// Priority for created tasks.
    pub priority: Priority,
    /// Categories for created tasks.
    pub categories: Vec<String>,
    /// Tags for created tasks.
    pub tags: Vec<String>,
    /// Estimated effort for created tasks.
    pub estimated_minutes: Option<u32>,
    /// Reminder lead time for created tasks.
    pub reminder_before_minutes: Option<u32>,
}

impl Default for TaskTemplate {
    fn default() -> Self {
        Self {
            id: new_id(),
            name: String::new(),
            title: String::new(),
            description: String::new(),
            priority: Priority::Medium,
            categories: Vec::new(),
            tags: Vec::new(),
            estimated_minutes: None,
            reminder_before_minutes: None,
        }
    }
}

impl TaskTemplate {
    /// Create a template with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self { name: name.into(), title: title.into(), ..Self::default() }
    }

    /// Create a new task from this template.
    #[must_use]
    pub fn create_task(&self) -> Task {
        Task {
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            categories: self.categories.clone(),
            tags: self.tags.clone(),
            estimated_minutes: self.estimated_minutes,
            reminder_before_minutes: self.reminder_before_minutes,
            ..Task::default()
        }
    }
}
