//! Task model.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::record::{deserialize_some, Entity, EntityKind};
use crate::errors::AppError;

/// A to-do item. Ordered by creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub title: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub completed: bool,
    /// 1 (highest) to 5
    #[serde(default)]
    pub priority: Option<i32>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            notes: None,
            due_date: None,
            completed: false,
            priority: None,
        }
    }
}

/// Partial update for a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub notes: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub due_date: Option<Option<NaiveDate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub priority: Option<Option<i32>>,
}

impl Entity for Task {
    type Patch = TaskPatch;

    const KIND: EntityKind = EntityKind::Task;

    fn apply(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(notes) = &patch.notes {
            self.notes = notes.clone();
        }
        if let Some(due_date) = patch.due_date {
            self.due_date = due_date;
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
    }

    fn to_patch(&self) -> TaskPatch {
        TaskPatch {
            title: Some(self.title.clone()),
            notes: Some(self.notes.clone()),
            due_date: Some(self.due_date),
            completed: Some(self.completed),
            priority: Some(self.priority),
        }
    }

    fn merge_patch(earlier: &mut TaskPatch, later: TaskPatch) {
        earlier.title = later.title.or(earlier.title.take());
        earlier.notes = later.notes.or(earlier.notes.take());
        earlier.due_date = later.due_date.or(earlier.due_date.take());
        earlier.completed = later.completed.or(earlier.completed);
        earlier.priority = later.priority.or(earlier.priority);
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Task title is required".to_string()));
        }
        if let Some(priority) = self.priority {
            if !(1..=5).contains(&priority) {
                return Err(AppError::Validation(format!(
                    "Task priority must be between 1 and 5, got {}",
                    priority
                )));
            }
        }
        Ok(())
    }
}
