//! Brain-dump entry model.

use serde::{Deserialize, Serialize};

use super::record::{Entity, EntityKind};
use crate::errors::AppError;

/// Free-form captured thought, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainDumpEntry {
    pub content: String,
    /// Set once the entry has been turned into tasks.
    #[serde(default)]
    pub processed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrainDumpPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<bool>,
}

impl Entity for BrainDumpEntry {
    type Patch = BrainDumpPatch;

    const KIND: EntityKind = EntityKind::BrainDump;

    fn apply(&mut self, patch: &BrainDumpPatch) {
        if let Some(content) = &patch.content {
            self.content = content.clone();
        }
        if let Some(processed) = patch.processed {
            self.processed = processed;
        }
    }

    fn to_patch(&self) -> BrainDumpPatch {
        BrainDumpPatch {
            content: Some(self.content.clone()),
            processed: Some(self.processed),
        }
    }

    fn merge_patch(earlier: &mut BrainDumpPatch, later: BrainDumpPatch) {
        earlier.content = later.content.or(earlier.content.take());
        earlier.processed = later.processed.or(earlier.processed);
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.content.trim().is_empty() {
            return Err(AppError::Validation(
                "Brain dump content is empty".to_string(),
            ));
        }
        Ok(())
    }
}
