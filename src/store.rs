//! The CRUD contract shared by the local and remote adapters.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{Entity, NewRecord, Record, RecordPatch};

/// Owner-scoped CRUD over one entity kind.
///
/// Implemented by [`crate::local::LocalStore`] against the embedded store and by
/// [`crate::remote::RemoteStore`] against the backend. The store selector picks
/// exactly one implementation per call.
#[async_trait]
pub trait RecordStore<E: Entity>: Send + Sync {
    /// Live records for the owner, in the kind's listing order.
    async fn get_all(&self, owner_id: &str) -> Result<Vec<Record<E>>, AppError>;

    async fn get_by_id(&self, id: &str, owner_id: &str) -> Result<Option<Record<E>>, AppError>;

    async fn add(&self, new: NewRecord<E>, owner_id: &str) -> Result<Record<E>, AppError>;

    /// Insert on behalf of the local record `client_id`.
    ///
    /// Stores that remember the client id return the existing row when the
    /// same insert is replayed. The default ignores it.
    async fn add_idempotent(
        &self,
        new: NewRecord<E>,
        owner_id: &str,
        client_id: &str,
    ) -> Result<Record<E>, AppError> {
        let _ = client_id;
        self.add(new, owner_id).await
    }

    async fn update(
        &self,
        id: &str,
        patch: RecordPatch<E::Patch>,
        owner_id: &str,
    ) -> Result<Record<E>, AppError>;

    async fn delete(&self, id: &str, owner_id: &str) -> Result<(), AppError>;
}
