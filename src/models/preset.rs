//! Timer preset model.

use serde::{Deserialize, Serialize};

use super::record::{deserialize_some, Entity, EntityKind};
use crate::errors::AppError;

/// A saved focus-timer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub name: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub break_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub break_minutes: Option<Option<u32>>,
}

impl Entity for Preset {
    type Patch = PresetPatch;

    const KIND: EntityKind = EntityKind::Preset;

    fn apply(&mut self, patch: &PresetPatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(duration) = patch.duration_minutes {
            self.duration_minutes = duration;
        }
        if let Some(break_minutes) = patch.break_minutes {
            self.break_minutes = break_minutes;
        }
    }

    fn to_patch(&self) -> PresetPatch {
        PresetPatch {
            name: Some(self.name.clone()),
            duration_minutes: Some(self.duration_minutes),
            break_minutes: Some(self.break_minutes),
        }
    }

    fn merge_patch(earlier: &mut PresetPatch, later: PresetPatch) {
        earlier.name = later.name.or(earlier.name.take());
        earlier.duration_minutes = later.duration_minutes.or(earlier.duration_minutes);
        earlier.break_minutes = later.break_minutes.or(earlier.break_minutes);
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("Preset name is required".to_string()));
        }
        if self.duration_minutes == 0 {
            return Err(AppError::Validation(
                "Preset duration must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
