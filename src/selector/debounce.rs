//! Coalescing of rapid edits to the same record.
//!
//! Each submitted patch restarts the record's window; when a window elapses
//! without further edits the merged patch is committed as one update.
//!
//! An editor is bound to the selector context it was built with. On login,
//! logout or a connectivity change, replace it through
//! [`DebouncedEditor::with_context`] alongside [`StoreSelector::with_context`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::{Routed, StoreSelector, SyncContext};
use crate::errors::AppError;
use crate::models::RecordPatch;

struct PendingEdit<P> {
    patch: RecordPatch<P>,
    generation: u64,
}

struct EditQueue<P> {
    edits: HashMap<String, PendingEdit<P>>,
    next_generation: u64,
}

/// Debounced update front end for one entity kind.
pub struct DebouncedEditor<E: Routed> {
    selector: Arc<StoreSelector>,
    window: Duration,
    queue: Arc<Mutex<EditQueue<E::Patch>>>,
}

impl<E: Routed> DebouncedEditor<E> {
    pub fn new(selector: Arc<StoreSelector>, window: Duration) -> Self {
        Self {
            selector,
            window,
            queue: Arc::new(Mutex::new(EditQueue {
                edits: HashMap::new(),
                next_generation: 0,
            })),
        }
    }

    /// Queue a patch for `id`, merging it into any edit still waiting.
    pub async fn submit(&self, id: &str, patch: RecordPatch<E::Patch>) {
        let generation = {
            let mut queue = self.queue.lock().await;
            queue.next_generation += 1;
            let generation = queue.next_generation;
            match queue.edits.entry(id.to_string()) {
                Entry::Occupied(mut slot) => {
                    let pending = slot.get_mut();
                    pending.patch.merge::<E>(patch);
                    pending.generation = generation;
                }
                Entry::Vacant(slot) => {
                    slot.insert(PendingEdit { patch, generation });
                }
            }
            generation
        };

        let selector = Arc::clone(&self.selector);
        let queue = Arc::clone(&self.queue);
        let window = self.window;
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let patch = {
                let mut queue = queue.lock().await;
                // A later edit restarted the window, or a flush took it.
                if queue.edits.get(&id).map(|pending| pending.generation) != Some(generation) {
                    return;
                }
                queue.edits.remove(&id).map(|pending| pending.patch)
            };

            if let Some(patch) = patch {
                if let Err(e) = selector.update::<E>(&id, patch).await {
                    tracing::warn!("Debounced update of {} {} failed: {}", E::KIND, id, e);
                }
            }
        });
    }

    /// Commit waiting edits under the current context, then rebind to `context`.
    ///
    /// Failed commits are logged and dropped, as on [`DebouncedEditor::flush`].
    pub async fn with_context(self, context: SyncContext) -> Self {
        if let Err(e) = self.flush().await {
            tracing::warn!("Edits to {} lost on context change: {}", E::KIND, e);
        }
        Self::new(Arc::new(self.selector.with_context(context)), self.window)
    }

    /// Number of records with an uncommitted edit.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.edits.len()
    }

    /// Commit every waiting edit now.
    ///
    /// All edits are attempted; the first failure is returned.
    pub async fn flush(&self) -> Result<usize, AppError> {
        let drained: Vec<(String, RecordPatch<E::Patch>)> = {
            let mut queue = self.queue.lock().await;
            queue
                .edits
                .drain()
                .map(|(id, pending)| (id, pending.patch))
                .collect()
        };

        let mut committed = 0;
        let mut first_error = None;
        for (id, patch) in drained {
            match self.selector.update::<E>(&id, patch).await {
                Ok(_) => committed += 1,
                Err(e) => {
                    tracing::warn!("Flushing edit of {} {} failed: {}", E::KIND, id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(committed),
        }
    }
}
