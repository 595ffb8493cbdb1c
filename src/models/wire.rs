//! Shapes exchanged between the remote adapter and the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::record::{deserialize_some, Entity, NewRecord, Record, SyncStatus};

/// Keys owned by the record envelope; never stored inside the payload.
pub const RESERVED_KEYS: [&str; 10] = [
    "id",
    "ownerId",
    "clientId",
    "createdAt",
    "updatedAt",
    "parentId",
    "depth",
    "order",
    "syncStatus",
    "lastSyncedAt",
];

/// A record as the backend stores and returns it: no lifecycle fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord<D> {
    pub id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(flatten)]
    pub data: D,
}

/// Backend-side record with an untyped payload.
pub type ServerRecord = WireRecord<Map<String, Value>>;

impl<E: Entity> WireRecord<E> {
    /// A record confirmed by the backend is synced as of its `updated_at`.
    pub fn into_synced(self) -> Record<E> {
        Record {
            id: self.id,
            owner_id: self.owner_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            sync_status: SyncStatus::Synced,
            last_synced_at: Some(self.updated_at),
            parent_id: self.parent_id,
            depth: self.depth,
            order: self.order,
            client_id: self.client_id,
            data: self.data,
        }
    }
}

/// Body of `POST /api/{kind}` as sent by the remote adapter.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody<'a, E> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<&'a str>,
    #[serde(flatten)]
    pub record: &'a NewRecord<E>,
}

/// Body of `POST /api/{kind}` as parsed by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    /// Local id of the record; repeated inserts with the same value are idempotent.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Body of `PUT /api/{kind}/{id}` as parsed by the backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecordRequest {
    #[serde(default, deserialize_with = "deserialize_some")]
    pub parent_id: Option<Option<String>>,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Result of `DELETE /api/{kind}/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub id: String,
    /// Rows removed, root included.
    pub removed: u64,
    pub deleted_at: DateTime<Utc>,
}

/// Drop envelope keys from a payload map.
pub fn strip_reserved(mut data: Map<String, Value>) -> Map<String, Value> {
    for key in RESERVED_KEYS {
        data.remove(key);
    }
    data
}
