//! Projector bound to a key-value projection store.
//!
//! [`StoreProjector`] binds an [`EventMapBuilder`]'s modification and
//! deletion handlers to a [`ProjectionStore`] fronted by an
//! [`LruProjectionCache`]: projections are loaded through the cache,
//! mutated, serialized with `bincode`, written back, and re-cached. With a
//! [`CheckpointStore`] attached, the last checkpoint of every successfully
//! projected batch is persisted so the projector can resume where it left
//! off.

use crate::cache::LruProjectionCache;
use prism_core::error::{ProjectionError, Result};
use prism_core::projection::{CheckpointStore, ProjectionStore};
use prism_core::transaction::{Checkpoint, ProjectionContext, Transaction};
use prism_engine::map::{
    DeletionHandler, EventMapBuilder, ExistingHandling, MapBuildError, MissingDeletionHandling,
    MissingHandling, ModificationHandler,
};
use prism_engine::projector::Projector;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;

struct CheckpointTracking {
    store: Arc<dyn CheckpointStore>,
    projector_id: String,
}

/// A [`Projector`] whose create/update/delete actions run against a
/// cached key-value store.
pub struct StoreProjector {
    projector: Projector,
    checkpoint: Option<CheckpointTracking>,
}

impl fmt::Debug for StoreProjector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreProjector")
            .field("projector", &self.projector)
            .field(
                "projector_id",
                &self.checkpoint.as_ref().map(|c| c.projector_id.as_str()),
            )
            .finish()
    }
}

impl StoreProjector {
    /// Bind `builder`'s storage actions to `store` through `cache` and
    /// build the projector.
    ///
    /// Projection keys are stringified with their `Display` implementation;
    /// projections are serialized with `bincode`. A created projection
    /// starts from `P::default()` before the update runs.
    ///
    /// # Errors
    ///
    /// Returns a [`MapBuildError`] when a registered mapping's action kind
    /// has no bound handler.
    pub fn new<P, K>(
        store: Arc<dyn ProjectionStore>,
        cache: Arc<LruProjectionCache<P>>,
        mut builder: EventMapBuilder<P, K, ProjectionContext>,
    ) -> std::result::Result<Self, MapBuildError>
    where
        P: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        K: fmt::Display + Send + 'static,
    {
        builder.handle_modifications_with(Self::modification_handler(
            Arc::clone(&store),
            Arc::clone(&cache),
        ));
        builder.handle_deletions_with(Self::deletion_handler(store, cache));
        Ok(Self {
            projector: Projector::new(builder, Vec::new())?,
            checkpoint: None,
        })
    }

    /// Persist the last processed checkpoint under `projector_id` after
    /// each batch.
    #[must_use]
    pub fn with_checkpoint_store(
        mut self,
        store: Arc<dyn CheckpointStore>,
        projector_id: impl Into<String>,
    ) -> Self {
        self.checkpoint = Some(CheckpointTracking {
            store,
            projector_id: projector_id.into(),
        });
        self
    }

    /// Project `batch` and persist the checkpoint of its last transaction.
    ///
    /// # Errors
    ///
    /// Propagates the first projection or storage failure; the checkpoint is
    /// not advanced when the batch fails.
    pub async fn handle(&self, batch: &[Transaction]) -> Result<()> {
        self.projector.handle(batch).await?;
        if let (Some(tracking), Some(last)) = (&self.checkpoint, batch.last()) {
            tracking
                .store
                .save_checkpoint(&tracking.projector_id, last.checkpoint)
                .await?;
            tracing::debug!(
                projector = %tracking.projector_id,
                checkpoint = %last.checkpoint,
                "checkpoint saved"
            );
        }
        Ok(())
    }

    /// The checkpoint to resume from, one past the last saved checkpoint.
    ///
    /// `None` means the projector has no saved progress and should subscribe
    /// from the beginning.
    ///
    /// # Errors
    ///
    /// Propagates checkpoint store failures.
    pub async fn resume_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let Some(tracking) = &self.checkpoint else {
            return Ok(None);
        };
        let state = tracking
            .store
            .load_checkpoint(&tracking.projector_id)
            .await?;
        Ok(state.map(|state| state.checkpoint.next()))
    }

    fn modification_handler<P, K>(
        store: Arc<dyn ProjectionStore>,
        cache: Arc<LruProjectionCache<P>>,
    ) -> ModificationHandler<P, K, ProjectionContext>
    where
        P: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        K: fmt::Display + Send + 'static,
    {
        Arc::new(move |key, _context, apply, options| {
            let store = Arc::clone(&store);
            let cache = Arc::clone(&cache);
            Box::pin(async move {
                let key = key.to_string();
                let existing: Option<P> = match cache.get(&key) {
                    Some(projection) => Some(projection),
                    None => match store.get(&key).await? {
                        Some(bytes) => Some(decode(&key, &bytes)?),
                        None => None,
                    },
                };

                match existing {
                    Some(mut projection) => match options.when_existing {
                        ExistingHandling::Fail => Err(ProjectionError::duplicate_key(&key)),
                        ExistingHandling::Ignore => Ok(()),
                        ExistingHandling::Update => {
                            apply(&mut projection).await?;
                            store.save(&key, &encode(&key, &projection)?).await?;
                            cache.add(key, projection);
                            Ok(())
                        }
                    },
                    None => match options.when_missing {
                        MissingHandling::Fail => Err(ProjectionError::missing_key(&key)),
                        MissingHandling::Ignore => Ok(()),
                        MissingHandling::Create => {
                            let mut projection = P::default();
                            apply(&mut projection).await?;
                            store.save(&key, &encode(&key, &projection)?).await?;
                            cache.add(key, projection);
                            Ok(())
                        }
                    },
                }
            })
        })
    }

    fn deletion_handler<P, K>(
        store: Arc<dyn ProjectionStore>,
        cache: Arc<LruProjectionCache<P>>,
    ) -> DeletionHandler<K, ProjectionContext>
    where
        P: Clone + Send + Sync + 'static,
        K: fmt::Display + Send + 'static,
    {
        Arc::new(move |key, _context, options| {
            let store = Arc::clone(&store);
            let cache = Arc::clone(&cache);
            Box::pin(async move {
                let key = key.to_string();
                let was_cached = cache.remove(&key);
                if store.get(&key).await?.is_some() {
                    store.delete(&key).await?;
                    return Ok(());
                }
                // Cached but never persisted still counts as existing.
                if was_cached {
                    return Ok(());
                }
                match options.when_missing {
                    MissingDeletionHandling::Ignore => Ok(()),
                    MissingDeletionHandling::Fail => Err(ProjectionError::missing_key(&key)),
                }
            })
        })
    }
}

fn encode<P: Serialize>(key: &str, projection: &P) -> Result<Vec<u8>> {
    bincode::serialize(projection).map_err(|error| {
        ProjectionError::storage(format!("failed to serialize projection '{key}': {error}"))
    })
}

fn decode<P: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<P> {
    bincode::deserialize(bytes).map_err(|error| {
        ProjectionError::storage(format!("failed to deserialize projection '{key}': {error}"))
    })
}
