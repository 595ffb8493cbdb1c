//! Record API endpoints, one set shared by every entity kind.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::OwnerId;
use crate::errors::AppError;
use crate::models::{
    CreateRecordRequest, DeleteOutcome, EntityKind, ServerRecord, UpdateRecordRequest,
};
use crate::AppState;

/// GET /api/{kind} - List the owner's records.
pub async fn list_records(
    State(state): State<AppState>,
    Path(kind): Path<EntityKind>,
    OwnerId(owner_id): OwnerId,
) -> ApiResult<Vec<ServerRecord>> {
    let records = state.repo.list_records(kind, &owner_id).await?;
    success(records)
}

/// GET /api/{kind}/{id} - Get a single record.
pub async fn get_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(EntityKind, String)>,
    OwnerId(owner_id): OwnerId,
) -> ApiResult<ServerRecord> {
    match state.repo.get_record(kind, &id, &owner_id).await? {
        Some(record) => success(record),
        None => Err(AppError::NotFoundOrForbidden(format!(
            "{} {} not found",
            kind, id
        ))),
    }
}

/// POST /api/{kind} - Create a record.
pub async fn create_record(
    State(state): State<AppState>,
    Path(kind): Path<EntityKind>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<CreateRecordRequest>,
) -> ApiResult<ServerRecord> {
    if request.data.is_empty() {
        return Err(AppError::Validation("Record payload is empty".to_string()));
    }

    let record = state.repo.create_record(kind, &owner_id, request).await?;
    tracing::debug!("Created {} {} for {}", kind, record.id, owner_id);
    success(record)
}

/// PUT /api/{kind}/{id} - Update a record.
pub async fn update_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(EntityKind, String)>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<UpdateRecordRequest>,
) -> ApiResult<ServerRecord> {
    let record = state
        .repo
        .update_record(kind, &id, &owner_id, request)
        .await?;
    success(record)
}

/// DELETE /api/{kind}/{id} - Delete a record and, for trees, its subtree.
pub async fn delete_record(
    State(state): State<AppState>,
    Path((kind, id)): Path<(EntityKind, String)>,
    OwnerId(owner_id): OwnerId,
) -> ApiResult<DeleteOutcome> {
    let outcome = state.repo.delete_record(kind, &id, &owner_id).await?;
    success(outcome)
}
