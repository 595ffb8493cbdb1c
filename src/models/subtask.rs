//! Sub-task model: the nodes of a decomposed task tree.
//!
//! Tree position (`parent_id`, `depth`, `order`) lives on the record, not here.

use serde::{Deserialize, Serialize};

use super::record::{deserialize_some, Entity, EntityKind};
use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTask {
    /// Task the tree was decomposed from; set on root nodes.
    #[serde(default)]
    pub task_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub estimated_minutes: Option<u32>,
}

impl SubTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            task_id: None,
            title: title.into(),
            completed: false,
            estimated_minutes: None,
        }
    }

    pub fn for_task(task_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::new(title)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskPatch {
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub task_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_minutes: Option<Option<u32>>,
}

impl Entity for SubTask {
    type Patch = SubTaskPatch;

    const KIND: EntityKind = EntityKind::SubTask;

    fn apply(&mut self, patch: &SubTaskPatch) {
        if let Some(task_id) = &patch.task_id {
            self.task_id = task_id.clone();
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(completed) = patch.completed {
            self.completed = completed;
        }
        if let Some(estimate) = patch.estimated_minutes {
            self.estimated_minutes = estimate;
        }
    }

    fn to_patch(&self) -> SubTaskPatch {
        SubTaskPatch {
            task_id: Some(self.task_id.clone()),
            title: Some(self.title.clone()),
            completed: Some(self.completed),
            estimated_minutes: Some(self.estimated_minutes),
        }
    }

    fn merge_patch(earlier: &mut SubTaskPatch, later: SubTaskPatch) {
        earlier.task_id = later.task_id.or(earlier.task_id.take());
        earlier.title = later.title.or(earlier.title.take());
        earlier.completed = later.completed.or(earlier.completed);
        earlier.estimated_minutes = later.estimated_minutes.or(earlier.estimated_minutes);
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Sub-task title is required".to_string()));
        }
        Ok(())
    }
}
