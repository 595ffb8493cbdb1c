//! Embedded store adapter: owner-scoped, lifecycle-aware CRUD.
//!
//! This is the only store the UI writes to while offline. Every query filters
//! by owner; an empty owner reads as "nobody" and never widens the scope.

mod reconcile;

pub use reconcile::ReconcileOutcome;

use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::db::{begin_write, decode_timestamp, encode_timestamp};
use crate::errors::AppError;
use crate::hierarchy;
use crate::models::{DeleteAction, Entity, NewRecord, Record, RecordPatch, SyncStatus};
use crate::store::RecordStore;

pub(crate) const COLUMNS: &str =
    "id, owner_id, parent_id, depth, sort_order, created_at, updated_at, sync_status, last_synced_at, data";

/// Extra WHERE clause excluding tombstones.
pub(crate) const LIVE: &str = "AND sync_status != 'deleted'";

/// Local store for one entity kind.
pub struct LocalStore<E> {
    pool: SqlitePool,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for LocalStore<E> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> LocalStore<E> {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            _entity: PhantomData,
        }
    }

    fn table() -> &'static str {
        E::KIND.table()
    }

    /// Live records for the owner. Empty owner yields nothing.
    pub async fn get_all(&self, owner_id: &str) -> Result<Vec<Record<E>>, AppError> {
        if owner_id.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE owner_id = ? {} ORDER BY {}",
            COLUMNS,
            Self::table(),
            LIVE,
            E::KIND.order_by()
        );
        let rows = sqlx::query(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(record_from_row::<E>).collect()
    }

    /// Record by id if the owner matches, in any lifecycle state.
    pub async fn get_by_id(&self, id: &str, owner_id: &str) -> Result<Option<Record<E>>, AppError> {
        if owner_id.is_empty() {
            return Ok(None);
        }
        let mut conn = self.pool.acquire().await?;
        fetch_owned(&mut conn, id, owner_id).await
    }

    /// Insert a new record in state `new`.
    pub async fn add(&self, new: NewRecord<E>, owner_id: &str) -> Result<Record<E>, AppError> {
        require_owner(owner_id)?;
        new.data.validate()?;

        let table = Self::table();
        let mut tx = begin_write(&self.pool).await?;

        let (parent_id, depth) = match new.parent_id.filter(|_| E::KIND.is_hierarchical()) {
            Some(parent_id) => match fetch_live_depth::<E>(&mut tx, &parent_id, owner_id).await? {
                Some(parent_depth) => (Some(parent_id), hierarchy::child_depth(Some(parent_depth))),
                None => {
                    tracing::warn!(
                        "Parent {} of new {} record is missing for this owner; storing as root",
                        parent_id,
                        E::KIND
                    );
                    (None, 0)
                }
            },
            None => (None, 0),
        };

        let order = match new.order {
            Some(order) => {
                ensure_order_free::<E>(&mut tx, parent_id.as_deref(), order, owner_id, None).await?;
                order
            }
            None => hierarchy::next_order(&mut tx, table, parent_id.as_deref(), owner_id, LIVE).await?,
        };

        let now = Utc::now();
        let record = Record {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::New,
            last_synced_at: None,
            parent_id,
            depth,
            order,
            client_id: None,
            data: new.data,
        };
        write_record(&mut tx, &record, false).await?;

        tx.commit().await?;

        tracing::debug!("Added {} {} locally", E::KIND, record.id);
        Ok(record)
    }

    /// Merge a patch into a live record and advance its lifecycle.
    pub async fn update(
        &self,
        id: &str,
        patch: RecordPatch<E::Patch>,
        owner_id: &str,
    ) -> Result<Record<E>, AppError> {
        require_owner(owner_id)?;

        let table = Self::table();
        let mut tx = begin_write(&self.pool).await?;

        let existing = fetch_owned::<E>(&mut tx, id, owner_id)
            .await?
            .filter(|record| record.sync_status != SyncStatus::Deleted)
            .ok_or_else(|| not_found::<E>(id))?;

        let mut record = existing.clone();
        record.data.apply(&patch.fields);
        record.data.validate()?;

        let mut reparented = false;
        if let Some(new_parent) = patch.parent_id.filter(|_| E::KIND.is_hierarchical()) {
            if new_parent != existing.parent_id {
                let (parent_id, depth) = match new_parent {
                    Some(pid) => {
                        if hierarchy::would_cycle(&mut tx, table, id, &pid, owner_id).await? {
                            return Err(AppError::Validation(format!(
                                "Cannot move {} under its own subtree",
                                id
                            )));
                        }
                        match fetch_live_depth::<E>(&mut tx, &pid, owner_id).await? {
                            Some(parent_depth) => {
                                (Some(pid), hierarchy::child_depth(Some(parent_depth)))
                            }
                            None => {
                                tracing::warn!(
                                    "Parent {} for moved {} {} is missing; moving to root",
                                    pid,
                                    E::KIND,
                                    id
                                );
                                (None, 0)
                            }
                        }
                    }
                    None => (None, 0),
                };
                reparented = parent_id != existing.parent_id;
                record.parent_id = parent_id;
                record.depth = depth;
            }
        }

        record.order = match patch.order {
            Some(order) => {
                ensure_order_free::<E>(&mut tx, record.parent_id.as_deref(), order, owner_id, Some(id))
                    .await?;
                order
            }
            None if reparented => {
                hierarchy::next_order(&mut tx, table, record.parent_id.as_deref(), owner_id, LIVE)
                    .await?
            }
            None => existing.order,
        };

        record.updated_at = Utc::now();
        record.sync_status = existing.sync_status.after_local_edit();

        let sql = format!(
            "UPDATE {} SET parent_id = ?, depth = ?, sort_order = ?, updated_at = ?, sync_status = ?, data = ? WHERE id = ? AND owner_id = ?",
            table
        );
        sqlx::query(&sql)
            .bind(&record.parent_id)
            .bind(record.depth)
            .bind(record.order)
            .bind(encode_timestamp(&record.updated_at))
            .bind(record.sync_status.as_str())
            .bind(serde_json::to_string(&record.data)?)
            .bind(id)
            .bind(owner_id)
            .execute(&mut *tx)
            .await?;

        if reparented {
            // Descendant depths are derived data; their lifecycle is untouched.
            hierarchy::recompute_depths(&mut tx, table, id, record.depth, owner_id).await?;
        }

        tx.commit().await?;

        tracing::debug!("Updated {} {} locally ({})", E::KIND, id, record.sync_status);
        Ok(record)
    }

    /// Apply the lifecycle delete rule to the record and, for trees, every
    /// descendant. Deleting a missing or already-deleted record is a no-op.
    pub async fn delete(&self, id: &str, owner_id: &str) -> Result<(), AppError> {
        require_owner(owner_id)?;

        let table = Self::table();
        let mut tx = begin_write(&self.pool).await?;

        if fetch_owned::<E>(&mut tx, id, owner_id).await?.is_none() {
            tracing::debug!("Delete of absent {} {} ignored", E::KIND, id);
            return Ok(());
        }

        let mut nodes = vec![id.to_string()];
        if E::KIND.is_hierarchical() {
            nodes.extend(hierarchy::descendants(&mut tx, table, id, owner_id).await?);
        }

        let now = encode_timestamp(&Utc::now());
        let status_sql = format!(
            "SELECT sync_status FROM {} WHERE id = ? AND owner_id = ?",
            table
        );
        let purge_sql = format!("DELETE FROM {} WHERE id = ? AND owner_id = ?", table);
        let tombstone_sql = format!(
            "UPDATE {} SET sync_status = 'deleted', updated_at = ? WHERE id = ? AND owner_id = ?",
            table
        );

        let (mut purged, mut tombstoned) = (0, 0);
        for node in &nodes {
            let Some(row) = sqlx::query(&status_sql)
                .bind(node)
                .bind(owner_id)
                .fetch_optional(&mut *tx)
                .await?
            else {
                continue;
            };
            let status: SyncStatus = row.get::<String, _>("sync_status").parse()?;

            match status.delete_action() {
                DeleteAction::Purge => {
                    sqlx::query(&purge_sql)
                        .bind(node)
                        .bind(owner_id)
                        .execute(&mut *tx)
                        .await?;
                    purged += 1;
                }
                DeleteAction::SoftDelete => {
                    sqlx::query(&tombstone_sql)
                        .bind(&now)
                        .bind(node)
                        .bind(owner_id)
                        .execute(&mut *tx)
                        .await?;
                    tombstoned += 1;
                }
                DeleteAction::Noop => {}
            }
        }

        tx.commit().await?;

        tracing::debug!(
            "Deleted {} {} locally: {} purged, {} tombstoned",
            E::KIND,
            id,
            purged,
            tombstoned
        );
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> RecordStore<E> for LocalStore<E> {
    async fn get_all(&self, owner_id: &str) -> Result<Vec<Record<E>>, AppError> {
        LocalStore::get_all(self, owner_id).await
    }

    async fn get_by_id(&self, id: &str, owner_id: &str) -> Result<Option<Record<E>>, AppError> {
        LocalStore::get_by_id(self, id, owner_id).await
    }

    async fn add(&self, new: NewRecord<E>, owner_id: &str) -> Result<Record<E>, AppError> {
        LocalStore::add(self, new, owner_id).await
    }

    async fn update(
        &self,
        id: &str,
        patch: RecordPatch<E::Patch>,
        owner_id: &str,
    ) -> Result<Record<E>, AppError> {
        LocalStore::update(self, id, patch, owner_id).await
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<(), AppError> {
        LocalStore::delete(self, id, owner_id).await
    }
}

fn require_owner(owner_id: &str) -> Result<(), AppError> {
    if owner_id.is_empty() {
        return Err(AppError::Unauthenticated(
            "An owner is required to modify records".to_string(),
        ));
    }
    Ok(())
}

fn not_found<E: Entity>(id: &str) -> AppError {
    AppError::NotFoundOrForbidden(format!("{} {} not found", E::KIND, id))
}

async fn ensure_order_free<E: Entity>(
    conn: &mut SqliteConnection,
    parent_id: Option<&str>,
    order: i64,
    owner_id: &str,
    except_id: Option<&str>,
) -> Result<(), AppError> {
    if !E::KIND.is_hierarchical() {
        return Ok(());
    }
    let taken = hierarchy::order_taken(
        conn,
        E::KIND.table(),
        parent_id,
        order,
        owner_id,
        except_id,
        LIVE,
    )
    .await?;
    if taken {
        return Err(AppError::Validation(format!(
            "Order {} is already used by a sibling",
            order
        )));
    }
    Ok(())
}

async fn fetch_live_depth<E: Entity>(
    conn: &mut SqliteConnection,
    id: &str,
    owner_id: &str,
) -> Result<Option<i64>, AppError> {
    let sql = format!(
        "SELECT depth FROM {} WHERE id = ? AND owner_id = ? {}",
        E::KIND.table(),
        LIVE
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|row| row.get("depth")))
}

pub(crate) async fn fetch_owned<E: Entity>(
    conn: &mut SqliteConnection,
    id: &str,
    owner_id: &str,
) -> Result<Option<Record<E>>, AppError> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ? AND owner_id = ?",
        COLUMNS,
        E::KIND.table()
    );
    let row = sqlx::query(&sql)
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(record_from_row::<E>).transpose()
}

/// Insert a full record row; `replace` overwrites an existing row with the same id.
pub(crate) async fn write_record<E: Entity>(
    conn: &mut SqliteConnection,
    record: &Record<E>,
    replace: bool,
) -> Result<(), AppError> {
    let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
    let sql = format!(
        "{} INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        verb,
        E::KIND.table(),
        COLUMNS
    );
    sqlx::query(&sql)
        .bind(&record.id)
        .bind(&record.owner_id)
        .bind(&record.parent_id)
        .bind(record.depth)
        .bind(record.order)
        .bind(encode_timestamp(&record.created_at))
        .bind(encode_timestamp(&record.updated_at))
        .bind(record.sync_status.as_str())
        .bind(record.last_synced_at.as_ref().map(encode_timestamp))
        .bind(serde_json::to_string(&record.data)?)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// Helper functions for row conversion

pub(crate) fn record_from_row<E: Entity>(row: &sqlx::sqlite::SqliteRow) -> Result<Record<E>, AppError> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let last_synced_at: Option<String> = row.get("last_synced_at");
    let status: String = row.get("sync_status");
    let data: String = row.get("data");

    Ok(Record {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        created_at: decode_timestamp(&created_at)?,
        updated_at: decode_timestamp(&updated_at)?,
        sync_status: status.parse()?,
        last_synced_at: last_synced_at.as_deref().map(decode_timestamp).transpose()?,
        parent_id: row.get("parent_id"),
        depth: row.get("depth"),
        order: row.get("sort_order"),
        client_id: None,
        data: serde_json::from_str(&data)
            .map_err(|e| AppError::Database(format!("Corrupt {} payload: {}", E::KIND, e)))?,
    })
}

#[cfg(test)]
mod tests;
