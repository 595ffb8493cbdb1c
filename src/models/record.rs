//! The syncable record shape shared by every entity type.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::AppError;

/// Local lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    New,
    Updated,
    Deleted,
    Synced,
}

/// What a local delete does to a record in a given state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    /// Never left the device; remove the row.
    Purge,
    /// Known remotely; keep the row as a tombstone until the delete propagates.
    SoftDelete,
    /// Already a tombstone.
    Noop,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::New => "new",
            SyncStatus::Updated => "updated",
            SyncStatus::Deleted => "deleted",
            SyncStatus::Synced => "synced",
        }
    }

    /// Status after a local mutation.
    pub fn after_local_edit(self) -> SyncStatus {
        match self {
            SyncStatus::New => SyncStatus::New,
            _ => SyncStatus::Updated,
        }
    }

    pub fn delete_action(self) -> DeleteAction {
        match self {
            SyncStatus::New => DeleteAction::Purge,
            SyncStatus::Deleted => DeleteAction::Noop,
            SyncStatus::Updated | SyncStatus::Synced => DeleteAction::SoftDelete,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncStatus::Synced)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SyncStatus::New),
            "updated" => Ok(SyncStatus::Updated),
            "deleted" => Ok(SyncStatus::Deleted),
            "synced" => Ok(SyncStatus::Synced),
            other => Err(AppError::Database(format!("Unknown sync status '{}'", other))),
        }
    }
}

/// Every entity type stored by the sync core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "tasks")]
    Task,
    #[serde(rename = "routines")]
    Routine,
    #[serde(rename = "routine-steps")]
    RoutineStep,
    #[serde(rename = "presets")]
    Preset,
    #[serde(rename = "brain-dumps")]
    BrainDump,
    #[serde(rename = "subtasks")]
    SubTask,
}

impl EntityKind {
    /// Sync order: referenced kinds come before the kinds pointing at them.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Task,
        EntityKind::Routine,
        EntityKind::Preset,
        EntityKind::BrainDump,
        EntityKind::RoutineStep,
        EntityKind::SubTask,
    ];

    /// Table name, identical in the embedded store and the backend.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Routine => "routines",
            EntityKind::RoutineStep => "routine_steps",
            EntityKind::Preset => "presets",
            EntityKind::BrainDump => "brain_dump_entries",
            EntityKind::SubTask => "subtasks",
        }
    }

    /// URL path segment used by the backend API.
    pub fn path(&self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Routine => "routines",
            EntityKind::RoutineStep => "routine-steps",
            EntityKind::Preset => "presets",
            EntityKind::BrainDump => "brain-dumps",
            EntityKind::SubTask => "subtasks",
        }
    }

    /// SQL ordering clause for listings.
    pub fn order_by(&self) -> &'static str {
        match self {
            EntityKind::Task => "created_at, id",
            EntityKind::Routine | EntityKind::Preset => {
                "json_extract(data, '$.name') COLLATE NOCASE, id"
            }
            EntityKind::RoutineStep => "json_extract(data, '$.routineId'), sort_order, id",
            EntityKind::BrainDump => "created_at DESC, id",
            EntityKind::SubTask => "depth, sort_order, id",
        }
    }

    pub fn is_hierarchical(&self) -> bool {
        matches!(self, EntityKind::SubTask)
    }

    /// Kinds holding a JSON field that points at records of this kind.
    pub fn referenced_by(&self) -> &'static [(EntityKind, &'static str)] {
        match self {
            EntityKind::Task => &[(EntityKind::SubTask, "taskId")],
            EntityKind::Routine => &[(EntityKind::RoutineStep, "routineId")],
            _ => &[],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Payload of one entity type.
///
/// The payload carries only domain fields; identity, ownership, tree position
/// and lifecycle live on [`Record`].
pub trait Entity:
    Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + Unpin + 'static
{
    /// Partial update: every field optional, nullable fields doubly so.
    type Patch: Serialize + DeserializeOwned + Clone + Default + fmt::Debug + Send + Sync + 'static;

    const KIND: EntityKind;

    /// Merge a patch into the payload.
    fn apply(&mut self, patch: &Self::Patch);

    /// A patch that sets every field to the payload's current value.
    fn to_patch(&self) -> Self::Patch;

    /// Fold a later patch into an earlier one, later values winning.
    fn merge_patch(earlier: &mut Self::Patch, later: Self::Patch);

    fn validate(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// A stored record: sync metadata plus the entity payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<E> {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub order: i64,
    /// Device-side id the backend copy was created from. Only set on records
    /// read from the backend; a local row's own id plays that role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub data: E,
}

impl<E: Entity> Record<E> {
    pub fn kind(&self) -> EntityKind {
        E::KIND
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Create DTO: the payload plus an optional tree position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord<E> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(flatten)]
    pub data: E,
}

impl<E> NewRecord<E> {
    pub fn new(data: E) -> Self {
        Self {
            parent_id: None,
            order: None,
            data,
        }
    }

    pub fn child_of(parent_id: impl Into<String>, data: E) -> Self {
        Self {
            parent_id: Some(parent_id.into()),
            order: None,
            data,
        }
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = Some(order);
        self
    }
}

/// Update DTO. `parent_id: Some(None)` moves a node to the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch<P> {
    #[serde(
        default,
        deserialize_with = "deserialize_some",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(flatten)]
    pub fields: P,
}

impl<P: Default> RecordPatch<P> {
    pub fn fields(fields: P) -> Self {
        Self {
            parent_id: None,
            order: None,
            fields,
        }
    }

    pub fn move_to(parent_id: Option<String>) -> Self {
        Self {
            parent_id: Some(parent_id),
            order: None,
            fields: P::default(),
        }
    }
}

impl<P> RecordPatch<P> {
    /// Fold a later patch into this one.
    pub fn merge<E: Entity<Patch = P>>(&mut self, later: RecordPatch<P>) {
        if later.parent_id.is_some() {
            self.parent_id = later.parent_id;
        }
        if later.order.is_some() {
            self.order = later.order;
        }
        E::merge_patch(&mut self.fields, later.fields);
    }
}

/// Distinguishes an absent field from an explicit `null`.
pub fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}
