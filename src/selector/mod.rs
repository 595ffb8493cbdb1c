//! Per-call routing between the embedded store and the backend.
//!
//! A [`StoreSelector`] is a snapshot: connectivity and identity are fixed at
//! construction. When either changes the caller builds a new selector with
//! [`StoreSelector::with_context`]; nothing is mutated in place.

mod debounce;

pub use debounce::DebouncedEditor;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{init_database, StoreRole};
use crate::errors::AppError;
use crate::local::LocalStore;
use crate::models::{
    BrainDumpEntry, Entity, NewRecord, Preset, Record, RecordPatch, Routine, RoutineStep, SubTask,
    Task,
};
use crate::remote::RemoteClient;
use crate::store::RecordStore;
use crate::sync::{SyncReport, Synchronizer};

/// Connectivity and identity as seen by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncContext {
    pub is_online: bool,
    pub owner_id: Option<String>,
}

impl SyncContext {
    pub fn new(is_online: bool, owner_id: Option<String>) -> Self {
        Self { is_online, owner_id }
    }

    /// Owner id, treating an empty string as signed out.
    pub fn owner(&self) -> Option<&str> {
        self.owner_id.as_deref().filter(|owner| !owner.is_empty())
    }
}

/// Which adapter serves calls under a given context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Local,
    Remote,
}

/// The two adapters for one entity kind.
pub struct StorePair<E: Entity> {
    pub local: LocalStore<E>,
    pub remote: Arc<dyn RecordStore<E>>,
}

impl<E: Entity> StorePair<E> {
    pub fn new(local: LocalStore<E>, remote: Arc<dyn RecordStore<E>>) -> Self {
        Self { local, remote }
    }
}

/// Adapter pairs for every entity kind, assembled once at startup.
pub struct Stores {
    pub tasks: StorePair<Task>,
    pub routines: StorePair<Routine>,
    pub routine_steps: StorePair<RoutineStep>,
    pub presets: StorePair<Preset>,
    pub brain_dumps: StorePair<BrainDumpEntry>,
    pub subtasks: StorePair<SubTask>,
}

impl Stores {
    /// Wire every kind to one local pool and one backend client.
    pub fn new(pool: SqlitePool, remote: &RemoteClient) -> Self {
        fn pair<E: Entity>(pool: &SqlitePool, remote: &RemoteClient) -> StorePair<E> {
            StorePair::new(LocalStore::new(pool.clone()), Arc::new(remote.store::<E>()))
        }

        Self {
            tasks: pair(&pool, remote),
            routines: pair(&pool, remote),
            routine_steps: pair(&pool, remote),
            presets: pair(&pool, remote),
            brain_dumps: pair(&pool, remote),
            subtasks: pair(&pool, remote),
        }
    }

    /// Open the embedded store and the backend client named by `config`.
    pub async fn open(config: &Config) -> Result<Self, AppError> {
        let pool = init_database(&config.local_db_path, StoreRole::Local).await?;
        let remote = RemoteClient::from_config(config)?;
        tracing::info!("Local store opened at {:?}", config.local_db_path);
        Ok(Self::new(pool, &remote))
    }

    pub fn pair<E: Routed>(&self) -> &StorePair<E> {
        E::pair(self)
    }
}

/// Entity kinds the selector can route.
pub trait Routed: Entity {
    fn pair(stores: &Stores) -> &StorePair<Self>;
}

macro_rules! routed {
    ($($entity:ty => $field:ident),* $(,)?) => {
        $(
            impl Routed for $entity {
                fn pair(stores: &Stores) -> &StorePair<Self> {
                    &stores.$field
                }
            }
        )*
    };
}

routed! {
    Task => tasks,
    Routine => routines,
    RoutineStep => routine_steps,
    Preset => presets,
    BrainDumpEntry => brain_dumps,
    SubTask => subtasks,
}

/// Routes each call to exactly one adapter.
#[derive(Clone)]
pub struct StoreSelector {
    context: SyncContext,
    stores: Arc<Stores>,
}

impl StoreSelector {
    pub fn new(context: SyncContext, stores: Arc<Stores>) -> Self {
        Self { context, stores }
    }

    /// A selector for a new context over the same stores.
    pub fn with_context(&self, context: SyncContext) -> Self {
        Self::new(context, Arc::clone(&self.stores))
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn target(&self) -> Target {
        match (self.context.is_online, self.context.owner()) {
            (true, Some(_)) => Target::Remote,
            _ => Target::Local,
        }
    }

    fn store<E: Routed>(&self) -> &dyn RecordStore<E> {
        let pair = self.stores.pair::<E>();
        match self.target() {
            Target::Remote => pair.remote.as_ref(),
            Target::Local => &pair.local,
        }
    }

    fn require_owner(&self) -> Result<&str, AppError> {
        self.context
            .owner()
            .ok_or_else(|| AppError::Unauthenticated("Sign in to change records".to_string()))
    }

    pub async fn get_all<E: Routed>(&self) -> Result<Vec<Record<E>>, AppError> {
        match self.context.owner() {
            Some(owner) => self.store::<E>().get_all(owner).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn get_by_id<E: Routed>(&self, id: &str) -> Result<Option<Record<E>>, AppError> {
        match self.context.owner() {
            Some(owner) => self.store::<E>().get_by_id(id, owner).await,
            None => Ok(None),
        }
    }

    pub async fn add<E: Routed>(&self, new: NewRecord<E>) -> Result<Record<E>, AppError> {
        let owner = self.require_owner()?;
        self.store::<E>().add(new, owner).await
    }

    pub async fn update<E: Routed>(
        &self,
        id: &str,
        patch: RecordPatch<E::Patch>,
    ) -> Result<Record<E>, AppError> {
        let owner = self.require_owner()?;
        self.store::<E>().update(id, patch, owner).await
    }

    pub async fn delete<E: Routed>(&self, id: &str) -> Result<(), AppError> {
        let owner = self.require_owner()?;
        self.store::<E>().delete(id, owner).await
    }

    /// Push pending local changes and pull the backend copy, every kind.
    ///
    /// Never invoked implicitly by a connectivity change.
    pub async fn flush(&self, synchronizer: &Synchronizer) -> Result<Vec<SyncReport>, AppError> {
        let owner = self
            .context
            .owner()
            .ok_or_else(|| AppError::Unauthenticated("Sign in to sync".to_string()))?;
        if !self.context.is_online {
            return Err(AppError::TransportFailure(
                "Cannot sync while offline".to_string(),
            ));
        }
        synchronizer.sync_all(&self.stores, owner).await
    }
}
