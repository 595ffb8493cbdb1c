//! Harvesting pending local changes and replaying them against the backend.
//!
//! A push runs in three phases: deletes, inserts (parents before children),
//! then updates. Deletes go first so a slot freed offline is free remotely
//! before a new sibling claims it. Every record is an independent round trip; a failure leaves
//! that record pending for the next sync and never aborts the batch.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::Config;
use crate::errors::AppError;
use crate::hierarchy;
use crate::local::LocalStore;
use crate::models::{Entity, EntityKind, NewRecord, Record, RecordPatch, SyncStatus};
use crate::selector::{Routed, StorePair, Stores};
use crate::store::RecordStore;

/// Pending local changes of one kind, grouped by lifecycle state.
#[derive(Debug, Clone)]
pub struct Harvest<E> {
    /// Ordered so every parent precedes its children.
    pub created: Vec<Record<E>>,
    pub updated: Vec<Record<E>>,
    pub deleted: Vec<Record<E>>,
}

impl<E> Harvest<E> {
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collect the owner's pending changes.
pub async fn harvest<E: Entity>(
    local: &LocalStore<E>,
    owner_id: &str,
) -> Result<Harvest<E>, AppError> {
    let pending = local.get_pending_changes(owner_id).await?;

    let mut harvest = Harvest {
        created: Vec::new(),
        updated: Vec::new(),
        deleted: Vec::new(),
    };
    for record in pending {
        match record.sync_status {
            SyncStatus::New => harvest.created.push(record),
            SyncStatus::Updated => harvest.updated.push(record),
            SyncStatus::Deleted => harvest.deleted.push(record),
            SyncStatus::Synced => {}
        }
    }
    harvest.created = hierarchy::parents_first(harvest.created)
        .into_iter()
        .flatten()
        .collect();

    Ok(harvest)
}

/// A record that could not be synced this round.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRecord {
    pub id: String,
    pub error: String,
}

/// Outcome of syncing one entity kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub kind: EntityKind,
    pub created: usize,
    pub updated: usize,
    /// Local rows purged after the backend confirmed the delete.
    pub deleted: usize,
    /// Records written locally from the backend copy.
    pub pulled: usize,
    /// Left pending without a round trip (parent not synced, or changed meanwhile).
    pub skipped: usize,
    pub failed: Vec<FailedRecord>,
    /// A harvest or pull that failed as a whole; later kinds still sync.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncReport {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            created: 0,
            updated: 0,
            deleted: 0,
            pulled: 0,
            skipped: 0,
            failed: Vec::new(),
            error: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.skipped == 0 && self.error.is_none()
    }

    fn fail_phase(&mut self, phase: &str, e: AppError) {
        tracing::warn!("{} of {} failed: {}", phase, self.kind, e);
        if self.error.is_none() {
            self.error = Some(format!("{}: {}", phase, e));
        }
    }

    fn record(&mut self, id: String, step: Result<Step, AppError>) {
        match step {
            Ok(Step::Created) => self.created += 1,
            Ok(Step::Updated) => self.updated += 1,
            Ok(Step::Deleted(rows)) => self.deleted += rows,
            Ok(Step::Skipped) => self.skipped += 1,
            Err(e) => {
                tracing::warn!(
                    "Sync of {} {} failed ({}): {}",
                    self.kind,
                    id,
                    if e.is_retryable() { "will retry" } else { "needs attention" },
                    e
                );
                self.failed.push(FailedRecord {
                    id,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// What one round trip achieved.
enum Step {
    Created,
    Updated,
    Deleted(usize),
    Skipped,
}

/// Replays harvested changes with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Synchronizer {
    concurrency: usize,
}

impl Synchronizer {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.sync_concurrency)
    }

    /// Push then pull every kind, referenced kinds first.
    pub async fn sync_all(&self, stores: &Stores, owner_id: &str) -> Result<Vec<SyncReport>, AppError> {
        let mut reports = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let report = match kind {
                EntityKind::Task => self.sync_kind(&stores.tasks, owner_id).await?,
                EntityKind::Routine => self.sync_kind(&stores.routines, owner_id).await?,
                EntityKind::Preset => self.sync_kind(&stores.presets, owner_id).await?,
                EntityKind::BrainDump => self.sync_kind(&stores.brain_dumps, owner_id).await?,
                EntityKind::RoutineStep => self.sync_kind(&stores.routine_steps, owner_id).await?,
                EntityKind::SubTask => self.sync_kind(&stores.subtasks, owner_id).await?,
            };
            reports.push(report);
        }

        let failed: usize = reports.iter().map(|r| r.failed.len()).sum();
        let broken = reports.iter().filter(|r| r.error.is_some()).count();
        tracing::info!(
            "Sync finished for {}: {} failed records, {} kinds incomplete",
            owner_id,
            failed,
            broken
        );
        Ok(reports)
    }

    /// Push pending changes of one kind, then pull the backend copy.
    ///
    /// Only a missing owner is an error; a failed harvest or pull is noted in
    /// the report.
    pub async fn sync_kind<E: Routed>(
        &self,
        pair: &StorePair<E>,
        owner_id: &str,
    ) -> Result<SyncReport, AppError> {
        let mut report = match self.push(&pair.local, pair.remote.as_ref(), owner_id).await {
            Ok(report) => report,
            Err(AppError::Unauthenticated(msg)) => return Err(AppError::Unauthenticated(msg)),
            Err(e) => {
                let mut report = SyncReport::new(E::KIND);
                report.fail_phase("push", e);
                report
            }
        };

        match self.pull(&pair.local, pair.remote.as_ref(), owner_id).await {
            Ok(pulled) => report.pulled = pulled,
            Err(e) => report.fail_phase("pull", e),
        }
        Ok(report)
    }

    /// Cold-start download: store the backend's records locally as synced.
    ///
    /// Rows with unpushed local changes are left as they are.
    pub async fn pull<E: Entity>(
        &self,
        local: &LocalStore<E>,
        remote: &dyn RecordStore<E>,
        owner_id: &str,
    ) -> Result<usize, AppError> {
        let records = remote.get_all(owner_id).await?;
        let written = local.bulk_reconcile(&records).await?;
        tracing::debug!("Pulled {} of {} {} records", written, records.len(), E::KIND);
        Ok(written)
    }

    /// Replay the owner's pending changes of one kind.
    pub async fn push<E: Entity>(
        &self,
        local: &LocalStore<E>,
        remote: &dyn RecordStore<E>,
        owner_id: &str,
    ) -> Result<SyncReport, AppError> {
        if owner_id.is_empty() {
            return Err(AppError::Unauthenticated("Sync requires an owner".to_string()));
        }

        let harvested = harvest(local, owner_id).await?;
        let mut report = SyncReport::new(E::KIND);
        if harvested.is_empty() {
            return Ok(report);
        }
        tracing::debug!(
            "Harvested {} {} changes: {} new, {} updated, {} deleted",
            harvested.len(),
            E::KIND,
            harvested.created.len(),
            harvested.updated.len(),
            harvested.deleted.len()
        );

        let results: Vec<(String, Result<Step, AppError>)> =
            stream::iter(hierarchy::group_subtrees(harvested.deleted))
                .map(|(top, members)| async move {
                    let id = top.id.clone();
                    (id, push_deleted(local, remote, owner_id, &top, &members).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        for (id, step) in results {
            report.record(id, step);
        }

        // Ids of inserts that did not make it; their children wait.
        let mut unsynced: HashSet<String> = HashSet::new();
        for wave in hierarchy::parents_first(harvested.created) {
            let blocked = &unsynced;
            let results: Vec<(String, Result<Step, AppError>)> = stream::iter(wave)
                .map(|snapshot| async move {
                    let id = snapshot.id.clone();
                    (id, push_created(local, remote, owner_id, snapshot, blocked).await)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

            for (id, step) in results {
                if !matches!(step, Ok(Step::Created)) {
                    unsynced.insert(id.clone());
                }
                report.record(id, step);
            }
        }

        let results: Vec<(String, Result<Step, AppError>)> = stream::iter(harvested.updated)
            .map(|snapshot| async move {
                let id = snapshot.id.clone();
                (id, push_updated(local, remote, owner_id, snapshot).await)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        for (id, step) in results {
            report.record(id, step);
        }

        tracing::info!(
            "Pushed {}: {} created, {} updated, {} deleted, {} skipped, {} failed",
            E::KIND,
            report.created,
            report.updated,
            report.deleted,
            report.skipped,
            report.failed.len()
        );
        Ok(report)
    }
}

fn new_record_from<E: Entity>(record: &Record<E>) -> NewRecord<E> {
    NewRecord {
        parent_id: record.parent_id.clone(),
        order: Some(record.order),
        data: record.data.clone(),
    }
}

async fn push_created<E: Entity>(
    local: &LocalStore<E>,
    remote: &dyn RecordStore<E>,
    owner_id: &str,
    snapshot: Record<E>,
    blocked: &HashSet<String>,
) -> Result<Step, AppError> {
    // Re-read: an earlier wave may have rewritten the parent id.
    let Some(current) = local.get_by_id(&snapshot.id, owner_id).await? else {
        return Ok(Step::Skipped);
    };
    if current.sync_status != SyncStatus::New {
        return Ok(Step::Skipped);
    }
    if let Some(parent_id) = &current.parent_id {
        if blocked.contains(parent_id) {
            tracing::debug!("Holding {} {}: parent {} not synced", E::KIND, current.id, parent_id);
            return Ok(Step::Skipped);
        }
    }

    let created = remote
        .add_idempotent(new_record_from(&current), owner_id, &current.id)
        .await?;

    match local
        .reconcile_harvested(&current, created.updated_at, Some(&created.id))
        .await
    {
        Ok(_) => Ok(Step::Created),
        Err(AppError::NotFoundOrForbidden(_)) => {
            // Discarded locally while in flight; do not leave the copy behind.
            tracing::debug!("{} {} vanished during insert; removing {}", E::KIND, current.id, created.id);
            if let Err(e) = remote.delete(&created.id, owner_id).await {
                tracing::warn!("Could not remove orphaned {} {}: {}", E::KIND, created.id, e);
            }
            Ok(Step::Skipped)
        }
        Err(e) => Err(e),
    }
}

async fn push_updated<E: Entity>(
    local: &LocalStore<E>,
    remote: &dyn RecordStore<E>,
    owner_id: &str,
    snapshot: Record<E>,
) -> Result<Step, AppError> {
    let Some(current) = local.get_by_id(&snapshot.id, owner_id).await? else {
        return Ok(Step::Skipped);
    };
    if current.sync_status != SyncStatus::Updated {
        return Ok(Step::Skipped);
    }

    let patch = RecordPatch {
        parent_id: E::KIND
            .is_hierarchical()
            .then(|| current.parent_id.clone()),
        order: Some(current.order),
        fields: current.data.to_patch(),
    };

    let confirmed = match remote.update(&current.id, patch, owner_id).await {
        Ok(record) => record,
        Err(AppError::ZeroRowsAffected(_)) => {
            tracing::warn!(
                "{} {} is gone remotely; re-creating it with the local edits",
                E::KIND,
                current.id
            );
            remote
                .add_idempotent(new_record_from(&current), owner_id, &current.id)
                .await?
        }
        Err(e) => return Err(e),
    };

    local
        .reconcile_harvested(&current, confirmed.updated_at, Some(&confirmed.id))
        .await?;
    Ok(Step::Updated)
}

async fn push_deleted<E: Entity>(
    local: &LocalStore<E>,
    remote: &dyn RecordStore<E>,
    owner_id: &str,
    top: &Record<E>,
    members: &[String],
) -> Result<Step, AppError> {
    match remote.delete(&top.id, owner_id).await {
        Ok(()) => {}
        Err(AppError::ZeroRowsAffected(_)) => {
            tracing::debug!("{} {} was already gone remotely", E::KIND, top.id);
        }
        Err(e) => return Err(e),
    }

    // The backend cascades; the harvested descendants are gone with it.
    local.hard_delete(&top.id).await?;
    for id in members {
        local.hard_delete(id).await?;
    }
    Ok(Step::Deleted(1 + members.len()))
}
