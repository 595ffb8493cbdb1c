//! Routine and routine step models.

use serde::{Deserialize, Serialize};

use super::record::{deserialize_some, Entity, EntityKind};
use crate::errors::AppError;

/// A named, repeatable sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Routine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            active: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutinePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Entity for Routine {
    type Patch = RoutinePatch;

    const KIND: EntityKind = EntityKind::Routine;

    fn apply(&mut self, patch: &RoutinePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
    }

    fn to_patch(&self) -> RoutinePatch {
        RoutinePatch {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            active: Some(self.active),
        }
    }

    fn merge_patch(earlier: &mut RoutinePatch, later: RoutinePatch) {
        earlier.name = later.name.or(earlier.name.take());
        earlier.description = later.description.or(earlier.description.take());
        earlier.active = later.active.or(earlier.active);
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Routine name is required".to_string()));
        }
        Ok(())
    }
}

/// One step of a routine. Steps are ordered by the record's `order` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineStep {
    pub routine_id: String,
    pub title: String,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

impl RoutineStep {
    pub fn new(routine_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            routine_id: routine_id.into(),
            title: title.into(),
            duration_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineStepPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_minutes: Option<Option<u32>>,
}

impl Entity for RoutineStep {
    type Patch = RoutineStepPatch;

    const KIND: EntityKind = EntityKind::RoutineStep;

    fn apply(&mut self, patch: &RoutineStepPatch) {
        if let Some(routine_id) = &patch.routine_id {
            self.routine_id = routine_id.clone();
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(duration) = patch.duration_minutes {
            self.duration_minutes = duration;
        }
    }

    fn to_patch(&self) -> RoutineStepPatch {
        RoutineStepPatch {
            routine_id: Some(self.routine_id.clone()),
            title: Some(self.title.clone()),
            duration_minutes: Some(self.duration_minutes),
        }
    }

    fn merge_patch(earlier: &mut RoutineStepPatch, later: RoutineStepPatch) {
        earlier.routine_id = later.routine_id.or(earlier.routine_id.take());
        earlier.title = later.title.or(earlier.title.take());
        earlier.duration_minutes = later.duration_minutes.or(earlier.duration_minutes);
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.routine_id.is_empty() {
            return Err(AppError::Validation(
                "Routine step must belong to a routine".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(AppError::Validation("Step title is required".to_string()));
        }
        Ok(())
    }
}
