//! In-memory backend used by unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tempfile::TempDir;

use crate::db::{init_database, StoreRole};
use crate::errors::AppError;
use crate::local::LocalStore;
use crate::models::{Entity, NewRecord, Record, RecordPatch, SubTask, SyncStatus, Task};
use crate::selector::{StorePair, Stores};
use crate::store::RecordStore;

pub(crate) async fn temp_local_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pool = init_database(&temp_dir.path().join("local.sqlite"), StoreRole::Local)
        .await
        .expect("Failed to init DB");
    (temp_dir, pool)
}

/// Stores over a real local pool with in-memory backends; the task and
/// sub-task backends are returned for inspection.
pub(crate) fn memory_stores(
    pool: SqlitePool,
) -> (Stores, Arc<MemoryBackend<Task>>, Arc<MemoryBackend<SubTask>>) {
    fn pair<E: Entity>(pool: &SqlitePool, remote: Arc<MemoryBackend<E>>) -> StorePair<E> {
        StorePair::new(LocalStore::new(pool.clone()), remote)
    }

    let tasks = Arc::new(MemoryBackend::default());
    let subtasks = Arc::new(MemoryBackend::default());
    let stores = Stores {
        tasks: pair(&pool, Arc::clone(&tasks)),
        routines: pair(&pool, Arc::new(MemoryBackend::default())),
        routine_steps: pair(&pool, Arc::new(MemoryBackend::default())),
        presets: pair(&pool, Arc::new(MemoryBackend::default())),
        brain_dumps: pair(&pool, Arc::new(MemoryBackend::default())),
        subtasks: pair(&pool, Arc::clone(&subtasks)),
    };
    (stores, tasks, subtasks)
}

struct Backend<E> {
    records: Vec<Record<E>>,
    client_ids: HashMap<String, String>,
    next_id: usize,
    offline: bool,
    failing_clients: HashSet<String>,
    lost_responses: HashSet<String>,
    calls: Vec<String>,
}

/// Strict backend fake: server ids, client id replay, parent checks.
pub(crate) struct MemoryBackend<E> {
    state: Mutex<Backend<E>>,
}

impl<E> Default for MemoryBackend<E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(Backend {
                records: Vec::new(),
                client_ids: HashMap::new(),
                next_id: 1,
                offline: false,
                failing_clients: HashSet::new(),
                lost_responses: HashSet::new(),
                calls: Vec::new(),
            }),
        }
    }
}

impl<E: Entity> MemoryBackend<E> {
    /// Every later call fails with a transport error while set.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    /// Inserts for this client id fail before reaching storage.
    pub fn fail_client(&self, client_id: &str) {
        self.state.lock().unwrap().failing_clients.insert(client_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().failing_clients.clear();
    }

    /// The next insert for this client id is stored but its response is lost.
    pub fn lose_response(&self, client_id: &str) {
        self.state.lock().unwrap().lost_responses.insert(client_id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn len(&self, owner_id: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.records.iter().filter(|r| r.owner_id == owner_id).count()
    }

    pub fn get(&self, id: &str) -> Option<Record<E>> {
        let state = self.state.lock().unwrap();
        state.records.iter().find(|r| r.id == id).cloned()
    }

    /// Drop a row behind the client's back.
    pub fn remove(&self, id: &str) {
        self.state.lock().unwrap().records.retain(|r| r.id != id);
    }

    fn enter(&self, owner_id: &str, call: String) -> Result<std::sync::MutexGuard<'_, Backend<E>>, AppError> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(AppError::TransportFailure("backend unreachable".to_string()));
        }
        if owner_id.is_empty() {
            return Err(AppError::Configuration("no owner".to_string()));
        }
        state.calls.push(call);
        Ok(state)
    }

    fn insert(
        &self,
        new: NewRecord<E>,
        owner_id: &str,
        client_id: Option<&str>,
    ) -> Result<Record<E>, AppError> {
        let mut state = self.enter(owner_id, format!("add {}", client_id.unwrap_or("-")))?;

        if let Some(client_id) = client_id {
            if state.failing_clients.contains(client_id) {
                return Err(AppError::TransportFailure(format!("insert of {} dropped", client_id)));
            }
            if let Some(existing) = state.client_ids.get(client_id) {
                let existing = existing.clone();
                if let Some(record) = state.records.iter().find(|r| r.id == existing) {
                    return Ok(record.clone());
                }
            }
        }

        let depth = match new.parent_id.as_deref().filter(|_| E::KIND.is_hierarchical()) {
            Some(parent_id) => {
                let parent = state
                    .records
                    .iter()
                    .find(|r| r.id == parent_id && r.owner_id == owner_id)
                    .ok_or_else(|| AppError::Validation(format!("Parent {} not found", parent_id)))?;
                parent.depth + 1
            }
            None => 0,
        };

        let now = Utc::now();
        let record = Record {
            id: format!("srv-{}", state.next_id),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
            sync_status: SyncStatus::Synced,
            last_synced_at: Some(now),
            parent_id: new.parent_id.filter(|_| E::KIND.is_hierarchical()),
            depth,
            order: new.order.unwrap_or_default(),
            client_id: client_id.map(str::to_string),
            data: new.data,
        };
        state.next_id += 1;
        state.records.push(record.clone());

        if let Some(client_id) = client_id {
            state.client_ids.insert(client_id.to_string(), record.id.clone());
            if state.lost_responses.remove(client_id) {
                return Err(AppError::TransportFailure("response lost".to_string()));
            }
        }
        Ok(record)
    }
}

#[async_trait]
impl<E: Entity> RecordStore<E> for MemoryBackend<E> {
    async fn get_all(&self, owner_id: &str) -> Result<Vec<Record<E>>, AppError> {
        let state = self.enter(owner_id, "get_all".to_string())?;
        Ok(state
            .records
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: &str, owner_id: &str) -> Result<Option<Record<E>>, AppError> {
        let state = self.enter(owner_id, format!("get {}", id))?;
        Ok(state
            .records
            .iter()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .cloned())
    }

    async fn add(&self, new: NewRecord<E>, owner_id: &str) -> Result<Record<E>, AppError> {
        self.insert(new, owner_id, None)
    }

    async fn add_idempotent(
        &self,
        new: NewRecord<E>,
        owner_id: &str,
        client_id: &str,
    ) -> Result<Record<E>, AppError> {
        self.insert(new, owner_id, Some(client_id))
    }

    async fn update(
        &self,
        id: &str,
        patch: RecordPatch<E::Patch>,
        owner_id: &str,
    ) -> Result<Record<E>, AppError> {
        let mut state = self.enter(owner_id, format!("update {}", id))?;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id && r.owner_id == owner_id)
            .ok_or_else(|| AppError::ZeroRowsAffected(format!("No row matched id {}", id)))?;

        record.data.apply(&patch.fields);
        if let Some(parent_id) = patch.parent_id.filter(|_| E::KIND.is_hierarchical()) {
            record.parent_id = parent_id;
        }
        if let Some(order) = patch.order {
            record.order = order;
        }
        record.updated_at = Utc::now();
        record.last_synced_at = Some(record.updated_at);
        Ok(record.clone())
    }

    async fn delete(&self, id: &str, owner_id: &str) -> Result<(), AppError> {
        let mut state = self.enter(owner_id, format!("delete {}", id))?;
        if !state.records.iter().any(|r| r.id == id && r.owner_id == owner_id) {
            return Err(AppError::ZeroRowsAffected(format!("No row matched id {}", id)));
        }

        let mut doomed = HashSet::from([id.to_string()]);
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            for record in &state.records {
                if record.parent_id.as_deref() == Some(current.as_str()) && doomed.insert(record.id.clone()) {
                    stack.push(record.id.clone());
                }
            }
        }
        state.records.retain(|r| !doomed.contains(&r.id));
        Ok(())
    }
}
