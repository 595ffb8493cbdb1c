use chrono::{Duration, Utc};

use super::*;
use crate::models::{Routine, RoutineStep, SubTask, SubTaskPatch, Task, TaskPatch};
use crate::testing::temp_local_pool as local_pool;

fn rename(title: &str) -> RecordPatch<TaskPatch> {
    RecordPatch::fields(TaskPatch {
        title: Some(title.to_string()),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_record_lifecycle() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let added = tasks.add(NewRecord::new(Task::new("Plan trip")), "alice").await.unwrap();
    assert_eq!(added.sync_status, SyncStatus::New);
    assert_eq!(added.created_at, added.updated_at);
    assert!(added.last_synced_at.is_none());

    // Edits before the first sync keep the record new.
    let edited = tasks.update(&added.id, rename("Plan holiday"), "alice").await.unwrap();
    assert_eq!(edited.sync_status, SyncStatus::New);
    assert!(edited.updated_at >= added.updated_at);

    let server_ts = Utc::now();
    let outcome = tasks.reconcile(&added.id, server_ts, None).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Synced);

    let synced = tasks.get_by_id(&added.id, "alice").await.unwrap().unwrap();
    assert_eq!(synced.sync_status, SyncStatus::Synced);
    assert_eq!(synced.updated_at, server_ts);
    assert_eq!(synced.last_synced_at, Some(server_ts));
    assert_eq!(synced.data.title, "Plan holiday");

    let edited = tasks.update(&added.id, rename("Plan trip"), "alice").await.unwrap();
    assert_eq!(edited.sync_status, SyncStatus::Updated);

    tasks.delete(&added.id, "alice").await.unwrap();
    assert!(tasks.get_all("alice").await.unwrap().is_empty());
    let tombstone = tasks.get_by_id(&added.id, "alice").await.unwrap().unwrap();
    assert_eq!(tombstone.sync_status, SyncStatus::Deleted);

    // Tombstones refuse further edits.
    let err = tasks.update(&added.id, rename("again"), "alice").await.unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(_)));

    let outcome = tasks.reconcile(&added.id, Utc::now(), None).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Purged);
    assert!(tasks.get_by_id(&added.id, "alice").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_of_new_record_purges() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let added = tasks.add(NewRecord::new(Task::new("Scratch")), "alice").await.unwrap();
    tasks.delete(&added.id, "alice").await.unwrap();

    assert!(tasks.get_by_id(&added.id, "alice").await.unwrap().is_none());
    assert!(tasks.get_pending_changes("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_owner_scoping() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let added = tasks.add(NewRecord::new(Task::new("Private")), "alice").await.unwrap();

    assert!(tasks.get_all("bob").await.unwrap().is_empty());
    assert!(tasks.get_by_id(&added.id, "bob").await.unwrap().is_none());
    assert!(tasks.get_all("").await.unwrap().is_empty());
    assert!(tasks.get_by_id(&added.id, "").await.unwrap().is_none());

    let err = tasks.update(&added.id, rename("Mine now"), "bob").await.unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(_)));

    // Someone else's id deletes nothing.
    tasks.delete(&added.id, "bob").await.unwrap();
    let still_there = tasks.get_by_id(&added.id, "alice").await.unwrap().unwrap();
    assert_eq!(still_there.sync_status, SyncStatus::New);
    assert_eq!(still_there.data.title, "Private");

    let err = tasks.add(NewRecord::new(Task::new("Anon")), "").await.unwrap_err();
    assert!(matches!(err, AppError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_invalid_payload_rejected() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let err = tasks.add(NewRecord::new(Task::new("   ")), "alice").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    assert!(tasks.get_all("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_depth_and_sibling_order() {
    let (_dir, pool) = local_pool().await;
    let subtasks = LocalStore::<SubTask>::new(pool);

    let root = subtasks.add(NewRecord::new(SubTask::new("Trip")), "alice").await.unwrap();
    let flights = subtasks
        .add(NewRecord::child_of(&root.id, SubTask::new("Flights")), "alice")
        .await
        .unwrap();
    let hotel = subtasks
        .add(NewRecord::child_of(&root.id, SubTask::new("Hotel")), "alice")
        .await
        .unwrap();
    let seat = subtasks
        .add(NewRecord::child_of(&flights.id, SubTask::new("Pick seat")), "alice")
        .await
        .unwrap();

    assert_eq!(root.depth, 0);
    assert_eq!((flights.depth, flights.order), (1, 0));
    assert_eq!((hotel.depth, hotel.order), (1, 1));
    assert_eq!(seat.depth, 2);

    let err = subtasks
        .add(NewRecord::child_of(&root.id, SubTask::new("Clash")).with_order(1), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let listed: Vec<i64> = subtasks
        .get_all("alice")
        .await
        .unwrap()
        .iter()
        .map(|r| r.depth)
        .collect();
    assert_eq!(listed, vec![0, 1, 1, 2]);
}

#[tokio::test]
async fn test_missing_parent_stored_as_root() {
    let (_dir, pool) = local_pool().await;
    let subtasks = LocalStore::<SubTask>::new(pool);

    let foreign = subtasks.add(NewRecord::new(SubTask::new("Bob's")), "bob").await.unwrap();

    let orphan = subtasks
        .add(NewRecord::child_of("no-such-parent", SubTask::new("Lost")), "alice")
        .await
        .unwrap();
    assert!(orphan.is_root());
    assert_eq!(orphan.depth, 0);

    let cross_owner = subtasks
        .add(NewRecord::child_of(&foreign.id, SubTask::new("Sneaky")), "alice")
        .await
        .unwrap();
    assert!(cross_owner.is_root());
    assert_eq!(cross_owner.depth, 0);
}

#[tokio::test]
async fn test_parent_ignored_for_flat_kinds() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let first = tasks.add(NewRecord::new(Task::new("One")), "alice").await.unwrap();
    let second = tasks
        .add(NewRecord::child_of(&first.id, Task::new("Two")), "alice")
        .await
        .unwrap();
    assert_eq!(second.parent_id, None);
    assert_eq!(second.depth, 0);
}

#[tokio::test]
async fn test_cascade_delete_is_idempotent() {
    let (_dir, pool) = local_pool().await;
    let subtasks = LocalStore::<SubTask>::new(pool);

    let root = subtasks.add(NewRecord::new(SubTask::new("Root")), "alice").await.unwrap();
    let child = subtasks
        .add(NewRecord::child_of(&root.id, SubTask::new("Child")), "alice")
        .await
        .unwrap();
    let grandchild = subtasks
        .add(NewRecord::child_of(&child.id, SubTask::new("Grandchild")), "alice")
        .await
        .unwrap();

    // Root and child are known remotely; the grandchild never left the device.
    subtasks.reconcile(&root.id, Utc::now(), None).await.unwrap();
    subtasks.reconcile(&child.id, Utc::now(), None).await.unwrap();

    subtasks.delete(&root.id, "alice").await.unwrap();

    let root_after = subtasks.get_by_id(&root.id, "alice").await.unwrap().unwrap();
    let child_after = subtasks.get_by_id(&child.id, "alice").await.unwrap().unwrap();
    assert_eq!(root_after.sync_status, SyncStatus::Deleted);
    assert_eq!(child_after.sync_status, SyncStatus::Deleted);
    assert!(subtasks.get_by_id(&grandchild.id, "alice").await.unwrap().is_none());
    assert!(subtasks.get_all("alice").await.unwrap().is_empty());

    subtasks.delete(&root.id, "alice").await.unwrap();
    subtasks.delete("never-existed", "alice").await.unwrap();

    let pending = subtasks.get_pending_changes("alice").await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|r| r.sync_status == SyncStatus::Deleted));
}

#[tokio::test]
async fn test_reparent_recomputes_subtree_depths() {
    let (_dir, pool) = local_pool().await;
    let subtasks = LocalStore::<SubTask>::new(pool);

    let a = subtasks.add(NewRecord::new(SubTask::new("A")), "alice").await.unwrap();
    let b = subtasks.add(NewRecord::new(SubTask::new("B")), "alice").await.unwrap();
    let b1 = subtasks
        .add(NewRecord::child_of(&b.id, SubTask::new("B1")), "alice")
        .await
        .unwrap();
    let b2 = subtasks
        .add(NewRecord::child_of(&b1.id, SubTask::new("B2")), "alice")
        .await
        .unwrap();

    let moved = subtasks
        .update(&b.id, RecordPatch::move_to(Some(a.id.clone())), "alice")
        .await
        .unwrap();
    assert_eq!(moved.parent_id.as_deref(), Some(a.id.as_str()));
    assert_eq!(moved.depth, 1);

    let b1_after = subtasks.get_by_id(&b1.id, "alice").await.unwrap().unwrap();
    let b2_after = subtasks.get_by_id(&b2.id, "alice").await.unwrap().unwrap();
    assert_eq!(b1_after.depth, 2);
    assert_eq!(b2_after.depth, 3);

    let err = subtasks
        .update(&b.id, RecordPatch::move_to(Some(b2.id.clone())), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let back = subtasks
        .update(&b.id, RecordPatch::<SubTaskPatch>::move_to(None), "alice")
        .await
        .unwrap();
    assert_eq!(back.depth, 0);
    let b2_after = subtasks.get_by_id(&b2.id, "alice").await.unwrap().unwrap();
    assert_eq!(b2_after.depth, 2);
}

#[tokio::test]
async fn test_reconcile_remaps_children_and_references() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool.clone());
    let subtasks = LocalStore::<SubTask>::new(pool);

    let task = tasks.add(NewRecord::new(Task::new("Plan trip")), "alice").await.unwrap();
    let root = subtasks
        .add(NewRecord::new(SubTask::for_task(&task.id, "Trip")), "alice")
        .await
        .unwrap();
    let child = subtasks
        .add(NewRecord::child_of(&root.id, SubTask::new("Book flights")), "alice")
        .await
        .unwrap();

    let server_ts = Utc::now();
    tasks.reconcile(&task.id, server_ts, Some("T1")).await.unwrap();
    subtasks.reconcile(&root.id, server_ts, Some("R1")).await.unwrap();

    assert!(tasks.get_by_id(&task.id, "alice").await.unwrap().is_none());
    let task_after = tasks.get_by_id("T1", "alice").await.unwrap().unwrap();
    assert_eq!(task_after.sync_status, SyncStatus::Synced);
    assert_eq!(task_after.created_at, task.created_at);

    let root_after = subtasks.get_by_id("R1", "alice").await.unwrap().unwrap();
    assert_eq!(root_after.data.task_id.as_deref(), Some("T1"));
    assert_eq!(root_after.data.title, "Trip");

    let child_after = subtasks.get_by_id(&child.id, "alice").await.unwrap().unwrap();
    assert_eq!(child_after.parent_id.as_deref(), Some("R1"));
    assert_eq!(child_after.sync_status, SyncStatus::New);

    let err = subtasks.reconcile("missing", server_ts, None).await.unwrap_err();
    assert!(matches!(err, AppError::NotFoundOrForbidden(_)));
}

#[tokio::test]
async fn test_routine_remap_rewrites_steps() {
    let (_dir, pool) = local_pool().await;
    let routines = LocalStore::<Routine>::new(pool.clone());
    let steps = LocalStore::<RoutineStep>::new(pool);

    let routine = routines.add(NewRecord::new(Routine::new("Morning")), "alice").await.unwrap();
    let step = steps
        .add(NewRecord::new(RoutineStep::new(&routine.id, "Stretch")), "alice")
        .await
        .unwrap();

    routines.reconcile(&routine.id, Utc::now(), Some("srv-routine")).await.unwrap();

    let step_after = steps.get_by_id(&step.id, "alice").await.unwrap().unwrap();
    assert_eq!(step_after.data.routine_id, "srv-routine");
}

#[tokio::test]
async fn test_reconcile_harvested_keeps_concurrent_edit() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let snapshot = tasks.add(NewRecord::new(Task::new("Draft")), "alice").await.unwrap();
    // The user edits while the insert is in flight.
    tasks.update(&snapshot.id, rename("Final"), "alice").await.unwrap();

    let outcome = tasks
        .reconcile_harvested(&snapshot, Utc::now(), Some("S1"))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::StillPending);

    let after = tasks.get_by_id("S1", "alice").await.unwrap().unwrap();
    assert_eq!(after.data.title, "Final");
    assert_eq!(after.sync_status, SyncStatus::Updated);
    assert!(after.last_synced_at.is_none());
}

#[tokio::test]
async fn test_reconcile_harvested_keeps_concurrent_delete() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let added = tasks.add(NewRecord::new(Task::new("Keep")), "alice").await.unwrap();
    tasks.reconcile(&added.id, Utc::now(), None).await.unwrap();
    let snapshot = tasks.update(&added.id, rename("Changed"), "alice").await.unwrap();
    tasks.delete(&added.id, "alice").await.unwrap();

    let outcome = tasks
        .reconcile_harvested(&snapshot, Utc::now(), None)
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::StillPending);

    let tombstone = tasks.get_by_id(&added.id, "alice").await.unwrap().unwrap();
    assert_eq!(tombstone.sync_status, SyncStatus::Deleted);
}

#[tokio::test]
async fn test_pending_changes() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let fresh = tasks.add(NewRecord::new(Task::new("Fresh")), "alice").await.unwrap();
    let synced = tasks.add(NewRecord::new(Task::new("Synced")), "alice").await.unwrap();
    let edited = tasks.add(NewRecord::new(Task::new("Edited")), "alice").await.unwrap();
    let removed = tasks.add(NewRecord::new(Task::new("Removed")), "alice").await.unwrap();
    tasks.add(NewRecord::new(Task::new("Bob's")), "bob").await.unwrap();

    for id in [&synced.id, &edited.id, &removed.id] {
        tasks.reconcile(id, Utc::now(), None).await.unwrap();
    }
    tasks.update(&edited.id, rename("Edited twice"), "alice").await.unwrap();
    tasks.delete(&removed.id, "alice").await.unwrap();

    let pending = tasks.get_pending_changes("alice").await.unwrap();
    let mut statuses: Vec<(String, SyncStatus)> =
        pending.into_iter().map(|r| (r.id, r.sync_status)).collect();
    statuses.sort_by(|a, b| a.0.cmp(&b.0));

    let mut expected = vec![
        (fresh.id.clone(), SyncStatus::New),
        (edited.id.clone(), SyncStatus::Updated),
        (removed.id.clone(), SyncStatus::Deleted),
    ];
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(statuses, expected);

    assert!(tasks.get_pending_changes("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_reconcile_skips_pending_rows() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let local_edit = tasks.add(NewRecord::new(Task::new("Mine")), "alice").await.unwrap();

    let server_ts = Utc::now() - Duration::minutes(5);
    let incoming = |id: &str, title: &str| Record {
        id: id.to_string(),
        owner_id: "alice".to_string(),
        created_at: server_ts,
        updated_at: server_ts,
        sync_status: SyncStatus::Synced,
        last_synced_at: None,
        parent_id: None,
        depth: 0,
        order: 0,
        client_id: None,
        data: Task::new(title),
    };

    let written = tasks
        .bulk_reconcile(&[
            incoming("remote-1", "From server"),
            incoming(&local_edit.id, "Server version"),
        ])
        .await
        .unwrap();
    assert_eq!(written, 1);

    let pulled = tasks.get_by_id("remote-1", "alice").await.unwrap().unwrap();
    assert_eq!(pulled.sync_status, SyncStatus::Synced);
    assert_eq!(pulled.last_synced_at, Some(server_ts));

    let kept = tasks.get_by_id(&local_edit.id, "alice").await.unwrap().unwrap();
    assert_eq!(kept.data.title, "Mine");
    assert_eq!(kept.sync_status, SyncStatus::New);

    // A second pull overwrites synced rows with the server copy.
    let written = tasks
        .bulk_reconcile(&[incoming("remote-1", "Renamed on server")])
        .await
        .unwrap();
    assert_eq!(written, 1);
    let pulled = tasks.get_by_id("remote-1", "alice").await.unwrap().unwrap();
    assert_eq!(pulled.data.title, "Renamed on server");
}

#[tokio::test]
async fn test_bulk_reconcile_never_crosses_owners() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let bobs = tasks.add(NewRecord::new(Task::new("Bob's")), "bob").await.unwrap();
    tasks.reconcile(&bobs.id, Utc::now(), None).await.unwrap();

    let now = Utc::now();
    let clash = Record {
        id: bobs.id.clone(),
        owner_id: "alice".to_string(),
        created_at: now,
        updated_at: now,
        sync_status: SyncStatus::Synced,
        last_synced_at: None,
        parent_id: None,
        depth: 0,
        order: 0,
        client_id: None,
        data: Task::new("Alice's"),
    };
    assert_eq!(tasks.bulk_reconcile(&[clash]).await.unwrap(), 0);

    let kept = tasks.get_by_id(&bobs.id, "bob").await.unwrap().unwrap();
    assert_eq!(kept.data.title, "Bob's");
    assert!(tasks.get_all("alice").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bulk_reconcile_adopts_server_id_of_unconfirmed_insert() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool.clone());
    let subtasks = LocalStore::<SubTask>::new(pool);

    // The insert reached the backend but the device never saw the reply.
    let task = tasks.add(NewRecord::new(Task::new("Once")), "alice").await.unwrap();
    let step = subtasks
        .add(NewRecord::new(SubTask::for_task(&task.id, "Step")), "alice")
        .await
        .unwrap();

    let server_ts = Utc::now();
    let server_copy = Record {
        id: "srv-1".to_string(),
        owner_id: "alice".to_string(),
        created_at: server_ts,
        updated_at: server_ts,
        sync_status: SyncStatus::Synced,
        last_synced_at: Some(server_ts),
        parent_id: None,
        depth: 0,
        order: 0,
        client_id: Some(task.id.clone()),
        data: Task::new("Once"),
    };
    assert_eq!(tasks.bulk_reconcile(&[server_copy]).await.unwrap(), 0);

    let visible = tasks.get_all("alice").await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id, "srv-1");
    assert_eq!(visible[0].sync_status, SyncStatus::Updated);
    assert!(tasks.get_by_id(&task.id, "alice").await.unwrap().is_none());

    let step = subtasks.get_by_id(&step.id, "alice").await.unwrap().unwrap();
    assert_eq!(step.data.task_id.as_deref(), Some("srv-1"));
}

#[tokio::test]
async fn test_hard_delete() {
    let (_dir, pool) = local_pool().await;
    let tasks = LocalStore::<Task>::new(pool);

    let added = tasks.add(NewRecord::new(Task::new("Gone")), "alice").await.unwrap();
    tasks.hard_delete(&added.id).await.unwrap();
    assert!(tasks.get_by_id(&added.id, "alice").await.unwrap().is_none());
}
