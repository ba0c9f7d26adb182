//! Storage collaborators for projections and projector checkpoints.
//!
//! # Overview
//!
//! Projections are the read side of an event-sourced system: denormalized
//! records derived from events, keyed by an application-defined key. This
//! module defines the two storage boundaries the engine consumes but never
//! implements itself:
//!
//! - [`ProjectionStore`]: byte-oriented key-value storage for projection
//!   records (backed by a document, relational, or KV store).
//! - [`CheckpointStore`]: durable "last checkpoint processed by projector X"
//!   records, overwritten on every save.
//!
//! The engine never manages storage transactions or sessions; mutation
//! discipline belongs to the implementations behind these traits.
//!
//! # Dyn Compatibility
//!
//! Both traits use explicit `Pin<Box<dyn Future>>` returns instead of
//! `async fn` so they can be held as `Arc<dyn ProjectionStore>` /
//! `Arc<dyn CheckpointStore>` by storage adapters.

use crate::error::Result;
use crate::transaction::Checkpoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Byte-oriented key-value storage for projection records.
///
/// Implementations should treat `save` as an upsert. Callers serialize
/// projection records themselves (the store adapter uses `bincode`), so a
/// store implementation only moves bytes.
pub trait ProjectionStore: Send + Sync {
    /// Insert or overwrite the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Storage`](crate::error::ErrorKind::Storage) when
    /// the backend fails.
    fn save(&self, key: &str, data: &[u8]) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Load the record for `key`, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Storage`](crate::error::ErrorKind::Storage) when
    /// the backend fails.
    fn get(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + '_>>;

    /// Remove the record for `key`. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Storage`](crate::error::ErrorKind::Storage) when
    /// the backend fails.
    fn delete(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Whether a record exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Storage`](crate::error::ErrorKind::Storage) when
    /// the backend fails.
    fn exists(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move { Ok(self.get(&key).await?.is_some()) })
    }
}

/// The durable checkpoint record for one projector.
///
/// Written whole on every save; the previous record for the same projector id
/// is fully overwritten.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectorState {
    /// The projector this record belongs to.
    pub projector_id: String,

    /// Last checkpoint the projector fully processed.
    pub checkpoint: Checkpoint,

    /// When the record was last written.
    pub last_update_utc: DateTime<Utc>,
}

/// Durable tracking of projector progress through the log.
///
/// A projector saves its last processed checkpoint after each batch; on
/// startup the saved value becomes the subscribe-from point. The engine never
/// interprets the record beyond that.
pub trait CheckpointStore: Send + Sync {
    /// Overwrite the record for `projector_id` with `checkpoint` and the
    /// current UTC time.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Checkpoint`](crate::error::ErrorKind::Checkpoint)
    /// when persistence fails.
    fn save_checkpoint(
        &self,
        projector_id: &str,
        checkpoint: Checkpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Load the last saved record for `projector_id`, or `None` for a new
    /// projector.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Checkpoint`](crate::error::ErrorKind::Checkpoint)
    /// when the backend fails.
    fn load_checkpoint(
        &self,
        projector_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ProjectorState>>> + Send + '_>>;
}
