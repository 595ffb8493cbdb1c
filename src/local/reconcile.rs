//! Harvest and reconciliation support on the local store.
//!
//! Each reconciliation runs in its own transaction, so a concurrent user edit
//! to the same row lands either entirely before or entirely after it.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection};

use super::{record_from_row, write_record, LocalStore, COLUMNS};
use crate::db::begin_write;
use crate::errors::AppError;
use crate::models::{Entity, Record, SyncStatus};

/// What reconciliation did to the local row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Row is now `synced` with the server timestamp.
    Synced,
    /// Row was edited during the round trip; it keeps its edits and stays pending.
    StillPending,
    /// Row was a tombstone and has been removed.
    Purged,
}

impl<E: Entity> LocalStore<E> {
    /// Every record awaiting propagation, tombstones included.
    pub async fn get_pending_changes(&self, owner_id: &str) -> Result<Vec<Record<E>>, AppError> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = ? AND sync_status != 'synced' ORDER BY depth, created_at, id",
            COLUMNS,
            Self::table()
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row::<E>).collect()
    }

    /// Fold a confirmed remote round trip into the record.
    ///
    /// Marks the row `synced` with `last_synced_at = updated_at = server_ts`.
    /// With a `new_id` different from `id` the row moves to the new id and
    /// every child and cross-kind reference follows. A tombstone is purged.
    pub async fn reconcile(
        &self,
        id: &str,
        server_ts: DateTime<Utc>,
        new_id: Option<&str>,
    ) -> Result<ReconcileOutcome, AppError> {
        let mut tx = begin_write(&self.pool).await?;
        let outcome = reconcile_in::<E>(&mut tx, id, server_ts, new_id, None).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Like [`LocalStore::reconcile`], guarded by the harvested snapshot.
    ///
    /// If the row changed since `snapshot` was read, the id remap still
    /// happens (the record now exists remotely) but the row keeps its newer
    /// fields and stays `updated`. A row soft-deleted meanwhile stays a
    /// tombstone so the delete still propagates.
    pub async fn reconcile_harvested(
        &self,
        snapshot: &Record<E>,
        server_ts: DateTime<Utc>,
        new_id: Option<&str>,
    ) -> Result<ReconcileOutcome, AppError> {
        let mut tx = begin_write(&self.pool).await?;
        let outcome =
            reconcile_in::<E>(&mut tx, &snapshot.id, server_ts, new_id, Some(snapshot.updated_at))
                .await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Physically remove a row regardless of its state.
    pub async fn hard_delete(&self, id: &str) -> Result<(), AppError> {
        let sql = format!("DELETE FROM {} WHERE id = ?", Self::table());
        sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        tracing::debug!("Purged {} {}", E::KIND, id);
        Ok(())
    }

    /// Store server-confirmed records as `synced` in one transaction.
    ///
    /// Rows with pending local changes are left alone; they win until pushed.
    /// A backend record created from a device row that never learned its
    /// server id takes that row over instead of landing as a second copy.
    /// Ids held by another owner are never touched. Returns the number of
    /// rows written.
    pub async fn bulk_reconcile(&self, records: &[Record<E>]) -> Result<usize, AppError> {
        let table = Self::table();
        let status_sql = format!("SELECT owner_id, sync_status FROM {} WHERE id = ?", table);
        let origin_sql = format!("SELECT {} FROM {} WHERE id = ? AND owner_id = ?", COLUMNS, table);
        let mut tx = begin_write(&self.pool).await?;
        let mut written = 0;

        for record in records {
            if let Some(client_id) = record.client_id.as_deref().filter(|cid| *cid != record.id) {
                let origin = sqlx::query(&origin_sql)
                    .bind(client_id)
                    .bind(&record.owner_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                if let Some(row) = origin {
                    adopt_server_id::<E>(&mut tx, record_from_row(&row)?, &record.id).await?;
                }
            }

            let local = sqlx::query(&status_sql)
                .bind(&record.id)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some(row) = local {
                let owner_id: String = row.get("owner_id");
                if owner_id != record.owner_id {
                    tracing::warn!("Skipping pull of {} {}: id held by another owner", E::KIND, record.id);
                    continue;
                }
                let status: SyncStatus = row.get::<String, _>("sync_status").parse()?;
                if status.is_pending() {
                    tracing::debug!("Skipping pull of {} {}: local changes pending", E::KIND, record.id);
                    continue;
                }
            }

            let confirmed = Record {
                sync_status: SyncStatus::Synced,
                last_synced_at: Some(record.updated_at),
                client_id: None,
                ..record.clone()
            };
            write_record(&mut tx, &confirmed, true).await?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }
}

/// Move a device row the backend already stored onto its server id.
///
/// The row keeps its fields and stays pending; a `new` row becomes `updated`
/// since it exists remotely now.
async fn adopt_server_id<E: Entity>(
    conn: &mut SqliteConnection,
    current: Record<E>,
    server_id: &str,
) -> Result<(), AppError> {
    let mut next = current.clone();
    next.id = server_id.to_string();
    if next.sync_status == SyncStatus::New {
        next.sync_status = SyncStatus::Updated;
    }
    remap_id::<E>(conn, &current, &next).await?;
    tracing::debug!("Adopted server id {} for {} {}", server_id, E::KIND, current.id);
    Ok(())
}

async fn reconcile_in<E: Entity>(
    conn: &mut SqliteConnection,
    id: &str,
    server_ts: DateTime<Utc>,
    new_id: Option<&str>,
    expected_updated_at: Option<DateTime<Utc>>,
) -> Result<ReconcileOutcome, AppError> {
    let table = E::KIND.table();
    let sql = format!("SELECT {} FROM {} WHERE id = ?", COLUMNS, table);
    let current: Record<E> = match sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await? {
        Some(row) => record_from_row(&row)?,
        None => {
            return Err(AppError::NotFoundOrForbidden(format!(
                "{} {} not found for reconciliation",
                E::KIND,
                id
            )))
        }
    };

    let guarded = expected_updated_at.is_some();
    if current.sync_status == SyncStatus::Deleted && !guarded {
        let purge = format!("DELETE FROM {} WHERE id = ?", table);
        sqlx::query(&purge).bind(id).execute(&mut *conn).await?;
        return Ok(ReconcileOutcome::Purged);
    }

    let unchanged = current.sync_status != SyncStatus::Deleted
        && expected_updated_at.map_or(true, |ts| ts == current.updated_at);

    let mut next = current.clone();
    let outcome = if unchanged {
        next.sync_status = SyncStatus::Synced;
        next.updated_at = server_ts;
        next.last_synced_at = Some(server_ts);
        ReconcileOutcome::Synced
    } else {
        if current.sync_status == SyncStatus::New {
            // Exists remotely now, so further changes are updates.
            next.sync_status = SyncStatus::Updated;
        }
        ReconcileOutcome::StillPending
    };

    match new_id.filter(|new_id| *new_id != id) {
        Some(new_id) => {
            next.id = new_id.to_string();
            remap_id::<E>(conn, &current, &next).await?;
            tracing::debug!("Reconciled {} {} as {}", E::KIND, id, new_id);
        }
        None => {
            let update = format!(
                "UPDATE {} SET updated_at = ?, sync_status = ?, last_synced_at = ? WHERE id = ?",
                table
            );
            sqlx::query(&update)
                .bind(crate::db::encode_timestamp(&next.updated_at))
                .bind(next.sync_status.as_str())
                .bind(next.last_synced_at.as_ref().map(crate::db::encode_timestamp))
                .bind(id)
                .execute(&mut *conn)
                .await?;
        }
    }

    Ok(outcome)
}

/// Move a row to a new id and repoint everything that referenced the old one.
async fn remap_id<E: Entity>(
    conn: &mut SqliteConnection,
    old: &Record<E>,
    next: &Record<E>,
) -> Result<(), AppError> {
    let table = E::KIND.table();

    write_record(conn, next, true).await?;

    let children = format!(
        "UPDATE {} SET parent_id = ? WHERE parent_id = ? AND owner_id = ?",
        table
    );
    let moved = sqlx::query(&children)
        .bind(&next.id)
        .bind(&old.id)
        .bind(&old.owner_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let remove = format!("DELETE FROM {} WHERE id = ?", table);
    sqlx::query(&remove).bind(&old.id).execute(&mut *conn).await?;

    // A synced referrer still carries the old id remotely, so it goes back to pending.
    for (kind, field) in E::KIND.referenced_by() {
        let path = format!("$.{}", field);
        let rewrite = format!(
            "UPDATE {} SET data = json_set(data, ?, ?), \
             sync_status = CASE sync_status WHEN 'synced' THEN 'updated' ELSE sync_status END \
             WHERE owner_id = ? AND json_extract(data, ?) = ?",
            kind.table()
        );
        sqlx::query(&rewrite)
            .bind(&path)
            .bind(&next.id)
            .bind(&old.owner_id)
            .bind(&path)
            .bind(&old.id)
            .execute(&mut *conn)
            .await?;
    }

    if moved > 0 {
        tracing::debug!("Repointed {} children of {} {}", moved, E::KIND, old.id);
    }
    Ok(())
}
