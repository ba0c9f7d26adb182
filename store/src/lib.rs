//! Cached key-value storage adapter for projection pipelines.
//!
//! Binds the map-builder's storage actions to any
//! [`ProjectionStore`](prism_core::projection::ProjectionStore), with an
//! LRU cache in front and optional durable checkpoint tracking:
//!
//! - [`LruProjectionCache`](cache::LruProjectionCache): bounded cache with
//!   absolute or sliding expiration
//! - [`StoreProjector`](projector::StoreProjector): projector whose
//!   create/update/delete actions read and write serialized projections

pub mod cache;
pub mod projector;

pub use cache::{Expiration, LruProjectionCache};
pub use projector::StoreProjector;
