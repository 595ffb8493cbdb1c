//! Backend repository for owner-scoped CRUD on every entity kind.
//!
//! Payloads are stored as JSON; the repository only interprets the envelope
//! (id, owner, tree position, timestamps). Every statement filters by owner.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{begin_write, decode_timestamp, encode_timestamp};
use crate::errors::AppError;
use crate::hierarchy;
use crate::models::{
    strip_reserved, CreateRecordRequest, DeleteOutcome, EntityKind, ServerRecord,
    UpdateRecordRequest,
};

const COLUMNS: &str =
    "id, owner_id, client_id, parent_id, depth, sort_order, created_at, updated_at, data";

/// Database repository for all backend data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all records of a kind for an owner.
    pub async fn list_records(
        &self,
        kind: EntityKind,
        owner_id: &str,
    ) -> Result<Vec<ServerRecord>, AppError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = ? ORDER BY {}",
            COLUMNS,
            kind.table(),
            kind.order_by()
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Get a record by ID within the owner's scope.
    pub async fn get_record(
        &self,
        kind: EntityKind,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<ServerRecord>, AppError> {
        let mut conn = self.pool.acquire().await?;
        fetch_record(&mut conn, kind, id, owner_id).await
    }

    /// Create a record. Timestamps and the canonical id are assigned here.
    pub async fn create_record(
        &self,
        kind: EntityKind,
        owner_id: &str,
        request: CreateRecordRequest,
    ) -> Result<ServerRecord, AppError> {
        let table = kind.table();
        let mut tx = begin_write(&self.pool).await?;

        // A retried insert whose first response was lost.
        if let Some(client_id) = &request.client_id {
            let sql = format!(
                "SELECT {} FROM {} WHERE owner_id = ? AND client_id = ?",
                COLUMNS, table
            );
            let existing = sqlx::query(&sql)
                .bind(owner_id)
                .bind(client_id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = existing {
                tracing::debug!("Replayed insert of {} client id {}", kind, client_id);
                return record_from_row(&row);
            }
        }

        let (parent_id, depth) = match request.parent_id.filter(|_| kind.is_hierarchical()) {
            Some(parent_id) => {
                let parent_depth = fetch_depth(&mut tx, kind, &parent_id, owner_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Validation(format!("Parent {} not found", parent_id))
                    })?;
                (Some(parent_id), hierarchy::child_depth(Some(parent_depth)))
            }
            None => (None, 0),
        };

        let order = match request.order {
            Some(order) => {
                if kind.is_hierarchical() {
                    claim_order(&mut tx, kind, parent_id.as_deref(), order, owner_id, None).await?;
                }
                order
            }
            None => hierarchy::next_order(&mut tx, table, parent_id.as_deref(), owner_id, "").await?,
        };

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let data = strip_reserved(request.data);
        let data_json = serde_json::to_string(&data)?;

        let sql = format!(
            "INSERT INTO {} (id, owner_id, client_id, parent_id, depth, sort_order, created_at, updated_at, data) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            table
        );
        sqlx::query(&sql)
            .bind(&id)
            .bind(owner_id)
            .bind(&request.client_id)
            .bind(&parent_id)
            .bind(depth)
            .bind(order)
            .bind(encode_timestamp(&now))
            .bind(encode_timestamp(&now))
            .bind(&data_json)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ServerRecord {
            id,
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
            parent_id,
            depth,
            order,
            client_id: request.client_id,
            data,
        })
    }

    /// Update a record. Exactly one row must match `(id, owner_id)`.
    pub async fn update_record(
        &self,
        kind: EntityKind,
        id: &str,
        owner_id: &str,
        request: UpdateRecordRequest,
    ) -> Result<ServerRecord, AppError> {
        let table = kind.table();
        let mut tx = begin_write(&self.pool).await?;

        let existing = fetch_record(&mut tx, kind, id, owner_id)
            .await?
            .ok_or_else(|| zero_rows(kind, id))?;

        let mut data = existing.data;
        for (key, value) in strip_reserved(request.data) {
            data.insert(key, value);
        }

        let mut parent_id = existing.parent_id;
        let mut depth = existing.depth;
        let mut reparented = false;
        if let Some(new_parent) = request.parent_id.filter(|_| kind.is_hierarchical()) {
            if new_parent != parent_id {
                depth = match &new_parent {
                    Some(pid) => {
                        if hierarchy::would_cycle(&mut tx, table, id, pid, owner_id).await? {
                            return Err(AppError::Validation(format!(
                                "Cannot move {} under its own subtree",
                                id
                            )));
                        }
                        let parent_depth = fetch_depth(&mut tx, kind, pid, owner_id)
                            .await?
                            .ok_or_else(|| {
                                AppError::Validation(format!("Parent {} not found", pid))
                            })?;
                        hierarchy::child_depth(Some(parent_depth))
                    }
                    None => 0,
                };
                parent_id = new_parent;
                reparented = true;
            }
        }

        let order = match request.order {
            Some(order) => {
                if kind.is_hierarchical() {
                    claim_order(&mut tx, kind, parent_id.as_deref(), order, owner_id, Some(id))
                        .await?;
                }
                order
            }
            None if reparented => {
                hierarchy::next_order(&mut tx, table, parent_id.as_deref(), owner_id, "").await?
            }
            None => existing.order,
        };

        let now = Utc::now();
        let data_json = serde_json::to_string(&data)?;
        let sql = format!(
            "UPDATE {} SET parent_id = ?, depth = ?, sort_order = ?, updated_at = ?, data = ? WHERE id = ? AND owner_id = ?",
            table
        );
        let result = sqlx::query(&sql)
            .bind(&parent_id)
            .bind(depth)
            .bind(order)
            .bind(encode_timestamp(&now))
            .bind(&data_json)
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(zero_rows(kind, id));
        }

        if reparented {
            let touched = hierarchy::recompute_depths(&mut tx, table, id, depth, owner_id).await?;
            tracing::debug!("Reparented {} {}; {} descendant depths rewritten", kind, id, touched);
        }

        tx.commit().await?;

        Ok(ServerRecord {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            created_at: existing.created_at,
            updated_at: now,
            parent_id,
            depth,
            order,
            client_id: existing.client_id,
            data,
        })
    }

    /// Delete a record, removing its subtree first for hierarchical kinds.
    pub async fn delete_record(
        &self,
        kind: EntityKind,
        id: &str,
        owner_id: &str,
    ) -> Result<DeleteOutcome, AppError> {
        let table = kind.table();
        let mut tx = begin_write(&self.pool).await?;

        if fetch_depth(&mut tx, kind, id, owner_id).await?.is_none() {
            return Err(zero_rows(kind, id));
        }

        let delete_sql = format!("DELETE FROM {} WHERE id = ? AND owner_id = ?", table);
        let mut removed = 0;

        if kind.is_hierarchical() {
            let subtree = hierarchy::descendants(&mut tx, table, id, owner_id).await?;
            // Leaves first, so no row ever points at a deleted parent.
            for node in subtree.iter().rev() {
                let result = sqlx::query(&delete_sql)
                    .bind(node)
                    .bind(owner_id)
                    .execute(&mut *tx)
                    .await?;
                removed += result.rows_affected();
            }
        }

        let result = sqlx::query(&delete_sql)
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(zero_rows(kind, id));
        }
        removed += result.rows_affected();

        tx.commit().await?;

        tracing::debug!("Deleted {} {} ({} rows)", kind, id, removed);
        Ok(DeleteOutcome {
            id: id.to_string(),
            removed,
            deleted_at: Utc::now(),
        })
    }
}

/// Hand `order` to the record being written; the latest write wins the slot
/// and a sibling holding it moves to the next free one.
async fn claim_order(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    parent_id: Option<&str>,
    order: i64,
    owner_id: &str,
    except_id: Option<&str>,
) -> Result<(), AppError> {
    let table = kind.table();
    if !hierarchy::order_taken(conn, table, parent_id, order, owner_id, except_id, "").await? {
        return Ok(());
    }

    let free = hierarchy::next_order(conn, table, parent_id, owner_id, "").await?;
    let sql = format!(
        "UPDATE {} SET sort_order = ?, updated_at = ? WHERE parent_id IS ? AND owner_id = ? AND sort_order = ? AND id IS NOT ?",
        table
    );
    let moved = sqlx::query(&sql)
        .bind(free)
        .bind(encode_timestamp(&Utc::now()))
        .bind(parent_id)
        .bind(owner_id)
        .bind(order)
        .bind(except_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    tracing::debug!("{} slot {} claimed; {} sibling(s) moved to {}", kind, order, moved, free);
    Ok(())
}

fn zero_rows(kind: EntityKind, id: &str) -> AppError {
    AppError::ZeroRowsAffected(format!("No {} row matched id {}", kind, id))
}

async fn fetch_record(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &str,
    owner_id: &str,
) -> Result<Option<ServerRecord>, AppError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ? AND owner_id = ?",
        COLUMNS,
        kind.table()
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;

    row.as_ref().map(record_from_row).transpose()
}

async fn fetch_depth(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    id: &str,
    owner_id: &str,
) -> Result<Option<i64>, AppError> {
    let sql = format!(
        "SELECT depth FROM {} WHERE id = ? AND owner_id = ?",
        kind.table()
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|row| row.get("depth")))
}

// Helper functions for row conversion

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ServerRecord, AppError> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let data: String = row.get("data");
    let data: Map<String, Value> = serde_json::from_str(&data)
        .map_err(|e| AppError::Database(format!("Corrupt payload: {}", e)))?;

    Ok(ServerRecord {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
        parent_id: row.get("parent_id"),
        depth: row.get("depth"),
        order: row.get("sort_order"),
        client_id: row.get("client_id"),
        data,
    })
}
