//! Tree maintenance for hierarchical entity kinds.
//!
//! Shared by the embedded store and the backend repository (both SQLite), and
//! by the harvester for ordering batches. Every traversal uses an explicit
//! stack so deep trees cannot exhaust the call stack.

use std::collections::{HashMap, HashSet};

use sqlx::{Row, SqliteConnection};

use crate::models::Record;

/// Depth of a node placed under a parent with the given depth.
pub fn child_depth(parent_depth: Option<i64>) -> i64 {
    parent_depth.map_or(0, |depth| depth + 1)
}

/// Direct children of `parent_id` within one owner scope.
pub(crate) async fn children(
    conn: &mut SqliteConnection,
    table: &str,
    parent_id: &str,
    owner_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let sql = format!(
        "SELECT id FROM {} WHERE parent_id = ? AND owner_id = ? ORDER BY sort_order, id",
        table
    );
    let rows = sqlx::query(&sql)
        .bind(parent_id)
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(|row| row.get("id")).collect())
}

/// All descendants of `root_id` in depth-first pre-order, root excluded.
pub(crate) async fn descendants(
    conn: &mut SqliteConnection,
    table: &str,
    root_id: &str,
    owner_id: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let mut visited: HashSet<String> = HashSet::from([root_id.to_string()]);
    let mut ordered = Vec::new();
    let mut stack = vec![root_id.to_string()];

    while let Some(id) = stack.pop() {
        let kids = children(conn, table, &id, owner_id).await?;
        // Reverse so the first sibling is visited first.
        for kid in kids.into_iter().rev() {
            if visited.insert(kid.clone()) {
                stack.push(kid);
            }
        }
        if id != root_id {
            ordered.push(id);
        }
    }

    Ok(ordered)
}

/// Whether attaching `node_id` under `new_parent_id` would create a cycle.
pub(crate) async fn would_cycle(
    conn: &mut SqliteConnection,
    table: &str,
    node_id: &str,
    new_parent_id: &str,
    owner_id: &str,
) -> Result<bool, sqlx::Error> {
    let sql = format!("SELECT parent_id FROM {} WHERE id = ? AND owner_id = ?", table);
    let mut seen = HashSet::new();
    let mut cursor = Some(new_parent_id.to_string());

    while let Some(current) = cursor {
        if current == node_id {
            return Ok(true);
        }
        if !seen.insert(current.clone()) {
            // Existing corruption; refuse to extend it.
            return Ok(true);
        }
        cursor = sqlx::query(&sql)
            .bind(&current)
            .bind(owner_id)
            .fetch_optional(&mut *conn)
            .await?
            .and_then(|row| row.get::<Option<String>, _>("parent_id"));
    }

    Ok(false)
}

/// Rewrite the depth of every descendant of `root_id` from `root_depth`.
///
/// Returns the number of rows touched. The root's own depth is not written.
pub(crate) async fn recompute_depths(
    conn: &mut SqliteConnection,
    table: &str,
    root_id: &str,
    root_depth: i64,
    owner_id: &str,
) -> Result<u64, sqlx::Error> {
    let update = format!(
        "UPDATE {} SET depth = ? WHERE parent_id = ? AND owner_id = ?",
        table
    );
    let mut touched = 0;
    let mut visited: HashSet<String> = HashSet::from([root_id.to_string()]);
    let mut stack = vec![(root_id.to_string(), root_depth)];

    while let Some((id, depth)) = stack.pop() {
        let result = sqlx::query(&update)
            .bind(depth + 1)
            .bind(&id)
            .bind(owner_id)
            .execute(&mut *conn)
            .await?;
        touched += result.rows_affected();

        for kid in children(conn, table, &id, owner_id).await? {
            if visited.insert(kid.clone()) {
                stack.push((kid, depth + 1));
            }
        }
    }

    Ok(touched)
}

/// Next free sibling slot under `parent_id`.
///
/// `live_filter` is appended to the WHERE clause to exclude tombstones.
pub(crate) async fn next_order(
    conn: &mut SqliteConnection,
    table: &str,
    parent_id: Option<&str>,
    owner_id: &str,
    live_filter: &str,
) -> Result<i64, sqlx::Error> {
    let sql = format!(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) AS next FROM {} WHERE parent_id IS ? AND owner_id = ? {}",
        table, live_filter
    );
    let row = sqlx::query(&sql)
        .bind(parent_id)
        .bind(owner_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.get("next"))
}

/// Whether a live sibling other than `except_id` already holds `order`.
pub(crate) async fn order_taken(
    conn: &mut SqliteConnection,
    table: &str,
    parent_id: Option<&str>,
    order: i64,
    owner_id: &str,
    except_id: Option<&str>,
    live_filter: &str,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "SELECT COUNT(*) AS taken FROM {} WHERE parent_id IS ? AND owner_id = ? AND sort_order = ? AND id IS NOT ? {}",
        table, live_filter
    );
    let row = sqlx::query(&sql)
        .bind(parent_id)
        .bind(owner_id)
        .bind(order)
        .bind(except_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.get::<i64, _>("taken") > 0)
}

/// Split a batch into waves where every record's in-batch parent sits in an
/// earlier wave.
///
/// Records whose parent is outside the batch start in the first wave. Records
/// caught in a parent cycle are emitted last so the caller can report them.
pub fn parents_first<E>(records: Vec<Record<E>>) -> Vec<Vec<Record<E>>> {
    let mut remaining: Vec<Record<E>> = records;
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let pending: HashSet<String> = remaining.iter().map(|r| r.id.clone()).collect();
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|record| {
            record
                .parent_id
                .as_ref()
                .map_or(true, |parent| !pending.contains(parent))
        });

        if ready.is_empty() {
            waves.push(blocked);
            break;
        }
        waves.push(ready);
        remaining = blocked;
    }

    waves
}

/// Group a batch into subtrees: each top-most record together with the ids of
/// its in-batch descendants.
pub fn group_subtrees<E>(records: Vec<Record<E>>) -> Vec<(Record<E>, Vec<String>)> {
    let ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
    let mut kids: HashMap<String, Vec<String>> = HashMap::new();
    for record in &records {
        if let Some(parent) = &record.parent_id {
            if ids.contains(parent) {
                kids.entry(parent.clone()).or_default().push(record.id.clone());
            }
        }
    }

    records
        .into_iter()
        .filter(|record| {
            record
                .parent_id
                .as_ref()
                .map_or(true, |parent| !ids.contains(parent))
        })
        .map(|top| {
            let mut members = Vec::new();
            let mut seen = HashSet::from([top.id.clone()]);
            let mut stack = vec![top.id.clone()];
            while let Some(id) = stack.pop() {
                for kid in kids.get(&id).into_iter().flatten() {
                    if seen.insert(kid.clone()) {
                        members.push(kid.clone());
                        stack.push(kid.clone());
                    }
                }
            }
            (top, members)
        })
        .collect()
}
