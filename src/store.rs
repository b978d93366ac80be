use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Entity types ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    InProgress = 1,
    Completed = 2,
    Cancelled = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
    Urgent = 3,
}

impl std::str::FromStr for TaskStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            _ => Err(StoreError::Invalid("unknown status label")),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, StoreError> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(StoreError::Invalid("unknown priority label")),
        }
    }
}

/// A task as the admin console sees it.
///
/// `assignees` is non-empty after any successful create/update — the
/// validation lives in this module, not in the callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: TaskStatus,
    pub priority: Priority,
    pub assignees: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Mutation payloads ─────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: Option<String>,
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: Priority,
    pub assignees: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
}

fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

fn default_priority() -> Priority {
    Priority::Medium
}

impl TaskDraft {
    /// Field-level validation, shared by the console session (before the
    /// request is ever sent) and by the store (before anything mutates).
    pub fn validate(&self) -> Result<(), StoreError> {
        validate_title(&self.title)?;
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        validate_assignees(&self.assignees)?;
        // Due dates in the past are only rejected at creation time.
        if let Some(due) = self.due_date {
            if due.date_naive() < Utc::now().date_naive() {
                return Err(StoreError::Invalid("due date must not be before today"));
            }
        }
        Ok(())
    }
}

/// Partial update. `None` fields are left untouched — there is no way to
/// clear an already-set optional field through a patch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub assignees: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        if let Some(assignees) = &self.assignees {
            validate_assignees(assignees)?;
        }
        Ok(())
    }
}

// ── Commands (console → store) ────────────────────────────────

/// A command is something the console wants to happen. The store
/// validates it, applies it, and returns an Event (or an error).
#[derive(Debug, Clone)]
pub enum Command {
    Create { draft: TaskDraft },
    Update { task_id: Uuid, patch: TaskPatch },
    Delete { task_id: Uuid },
    /// Best effort: unknown ids are skipped, not an error.
    BatchDelete { task_ids: Vec<Uuid> },
    /// Best effort, like BatchDelete.
    BatchSetStatus { task_ids: Vec<Uuid>, status: TaskStatus },
}

// ── Events (store → persistence / callers) ────────────────────

/// What actually happened. Each event carries the revision it was
/// applied at; batch events carry only the ids that really changed.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    TaskCreated {
        revision: u64,
        task: Task,
    },
    TaskUpdated {
        revision: u64,
        task: Task,
    },
    TaskDeleted {
        revision: u64,
        task_id: Uuid,
    },
    TasksDeleted {
        revision: u64,
        task_ids: Vec<Uuid>,
    },
    TasksStatusChanged {
        revision: u64,
        task_ids: Vec<Uuid>,
        status: TaskStatus,
    },
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    TaskNotFound,
    /// Bad field input. The message is user-facing.
    Invalid(&'static str),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::TaskNotFound => write!(f, "task not found"),
            StoreError::Invalid(msg) => write!(f, "{msg}"),
        }
    }
}

const TITLE_MAX_CHARS: usize = 100;
const DESCRIPTION_MAX_CHARS: usize = 1000;

fn validate_title(title: &str) -> Result<(), StoreError> {
    if title.trim().is_empty() {
        return Err(StoreError::Invalid("title must not be empty"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(StoreError::Invalid("title must be at most 100 characters"));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<(), StoreError> {
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        return Err(StoreError::Invalid(
            "description must be at most 1000 characters",
        ));
    }
    Ok(())
}

fn validate_assignees(assignees: &[String]) -> Result<(), StoreError> {
    if assignees.is_empty() {
        return Err(StoreError::Invalid("at least one assignee is required"));
    }
    Ok(())
}

// ── The Store ──────────────────────────────────────────────────

/// The authoritative task collection. Lives in memory. Loaded from the
/// save file on boot. All mutations go through apply() which validates,
/// mutates, and returns an Event for the save-file flush.
///
/// New tasks go to the head of the Vec, so with no explicit ordering the
/// collection reads newest-first.
pub struct Store {
    pub tasks: Vec<Task>,
    pub revision: u64,
}

impl Store {
    pub fn new() -> Self {
        Store {
            tasks: Vec::new(),
            revision: 0,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Apply a command. Returns the resulting Event on success. Failed
    /// commands leave the collection and the revision untouched.
    pub fn apply(&mut self, cmd: Command) -> Result<StoreEvent, StoreError> {
        match cmd {
            Command::Create { draft } => {
                draft.validate()?;

                let now = Utc::now();
                let task = Task {
                    id: Uuid::new_v4(),
                    title: draft.title,
                    description: draft.description,
                    status: draft.status,
                    priority: draft.priority,
                    assignees: draft.assignees,
                    tags: draft.tags,
                    due_date: draft.due_date,
                    created_at: now,
                    updated_at: now,
                };

                self.revision += 1;
                let event = StoreEvent::TaskCreated {
                    revision: self.revision,
                    task: task.clone(),
                };
                self.tasks.insert(0, task);
                Ok(event)
            }

            Command::Update { task_id, patch } => {
                patch.validate()?;

                let task = self
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or(StoreError::TaskNotFound)?;

                if let Some(title) = patch.title {
                    task.title = title;
                }
                if let Some(description) = patch.description {
                    task.description = Some(description);
                }
                if let Some(status) = patch.status {
                    // Any status may move to any other status.
                    task.status = status;
                }
                if let Some(priority) = patch.priority {
                    task.priority = priority;
                }
                if let Some(assignees) = patch.assignees {
                    task.assignees = assignees;
                }
                if let Some(tags) = patch.tags {
                    task.tags = tags;
                }
                if let Some(due_date) = patch.due_date {
                    task.due_date = Some(due_date);
                }

                // Stamped on every successful call, even a value-identical one.
                task.updated_at = Utc::now();

                self.revision += 1;
                Ok(StoreEvent::TaskUpdated {
                    revision: self.revision,
                    task: task.clone(),
                })
            }

            Command::Delete { task_id } => {
                // Strict: deleting an absent (or already-deleted) id fails.
                let idx = self
                    .tasks
                    .iter()
                    .position(|t| t.id == task_id)
                    .ok_or(StoreError::TaskNotFound)?;
                self.tasks.remove(idx);

                self.revision += 1;
                Ok(StoreEvent::TaskDeleted {
                    revision: self.revision,
                    task_id,
                })
            }

            Command::BatchDelete { task_ids } => {
                let mut affected = Vec::new();
                for id in task_ids {
                    if let Some(idx) = self.tasks.iter().position(|t| t.id == id) {
                        self.tasks.remove(idx);
                        affected.push(id);
                    }
                }

                self.revision += 1;
                Ok(StoreEvent::TasksDeleted {
                    revision: self.revision,
                    task_ids: affected,
                })
            }

            Command::BatchSetStatus { task_ids, status } => {
                let now = Utc::now();
                let mut affected = Vec::new();
                for id in task_ids {
                    if affected.contains(&id) {
                        continue; // duplicate id in the request
                    }
                    if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
                        task.status = status;
                        task.updated_at = now;
                        affected.push(id);
                    }
                }

                self.revision += 1;
                Ok(StoreEvent::TasksStatusChanged {
                    revision: self.revision,
                    task_ids: affected,
                    status,
                })
            }
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────
