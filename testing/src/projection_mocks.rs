//! In-memory projection storage doubles.
//!
//! - [`InMemoryProjectionStore`]: `HashMap`-backed projection records
//! - [`InMemoryCheckpointStore`]: `HashMap`-backed projector checkpoints

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use chrono::Utc;
use prism_core::projection::{CheckpointStore, ProjectionStore, ProjectorState};
use prism_core::transaction::Checkpoint;
use prism_core::error::Result;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// In-memory projection store for fast, deterministic testing.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryProjectionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every record, for test isolation.
    pub fn clear(&self) {
        self.data.write().unwrap().clear();
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().unwrap().is_empty()
    }

    /// Whether a record exists for `key`, without going through the trait.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().unwrap().contains_key(key)
    }

    /// Every stored key, for assertions.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().unwrap().keys().cloned().collect()
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn save(&self, key: &str, data: &[u8]) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        let data = data.to_vec();
        Box::pin(async move {
            self.data.write().unwrap().insert(key, data);
            Ok(())
        })
    }

    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.data.read().unwrap().get(&key).cloned()) })
    }

    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            self.data.write().unwrap().remove(&key);
            Ok(())
        })
    }

    fn exists(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.data.read().unwrap().contains_key(&key)) })
    }
}

/// In-memory checkpoint records for testing projector resumption.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: Arc<RwLock<HashMap<String, ProjectorState>>>,
}

impl InMemoryCheckpointStore {
    /// An empty checkpoint store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every record, for test isolation.
    pub fn clear(&self) {
        self.states.write().unwrap().clear();
    }

    /// Every tracked projector id.
    #[must_use]
    pub fn projector_ids(&self) -> Vec<String> {
        self.states.read().unwrap().keys().cloned().collect()
    }

    /// The raw record for `projector_id`, without going through the trait.
    #[must_use]
    pub fn state(&self, projector_id: &str) -> Option<ProjectorState> {
        self.states.read().unwrap().get(projector_id).cloned()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save_checkpoint(
        &self,
        projector_id: &str,
        checkpoint: Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projector_id = projector_id.to_string();
        Box::pin(async move {
            let state = ProjectorState {
                projector_id: projector_id.clone(),
                checkpoint,
                last_update_utc: Utc::now(),
            };
            self.states.write().unwrap().insert(projector_id, state);
            Ok(())
        })
    }

    fn load_checkpoint(
        &self,
        projector_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectorState>>> + Send + '_>> {
        let projector_id = projector_id.to_string();
        Box::pin(async move { Ok(self.states.read().unwrap().get(&projector_id).cloned()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_records_can_be_read_back_and_deleted() {
        let store = InMemoryProjectionStore::new();
        store.save("catalog:c350E", b"entry").await.unwrap();

        assert!(store.exists("catalog:c350E").await.unwrap());
        assert_eq!(
            store.get("catalog:c350E").await.unwrap(),
            Some(b"entry".to_vec())
        );

        store.delete("catalog:c350E").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn checkpoint_records_are_overwritten_per_projector() {
        let checkpoints = InMemoryCheckpointStore::new();
        checkpoints
            .save_checkpoint("catalog", Checkpoint::new(10))
            .await
            .unwrap();
        checkpoints
            .save_checkpoint("catalog", Checkpoint::new(25))
            .await
            .unwrap();

        let state = checkpoints.load_checkpoint("catalog").await.unwrap().unwrap();
        assert_eq!(state.checkpoint, Checkpoint::new(25));
        assert_eq!(checkpoints.projector_ids(), vec!["catalog".to_string()]);
    }
}
