//! # Prism Testing
//!
//! In-memory doubles for testing projection pipelines end to end.
//!
//! This crate provides:
//! - [`MemoryEventLog`]: an event log assigning gapless checkpoints on write
//! - [`InMemoryProjectionStore`]: `HashMap`-backed projection records
//! - [`InMemoryCheckpointStore`]: `HashMap`-backed projector checkpoints
//!
//! ## Example
//!
//! ```ignore
//! use prism_testing::MemoryEventLog;
//!
//! #[tokio::test]
//! async fn catalog_catches_up() {
//!     let log = Arc::new(MemoryEventLog::new(10));
//!     log.write_event(ProductAddedToCatalog {
//!         product_key: "c350E".to_string(),
//!         category: "Hybrid".to_string(),
//!     })
//!     .await
//!     .unwrap();
//!
//!     let dispatcher = Dispatcher::new(log);
//!     // ... subscribe a projector and assert on its store
//! }
//! ```

pub mod memory_log;
pub mod projection_mocks;

pub use memory_log::MemoryEventLog;
pub use projection_mocks::{InMemoryCheckpointStore, InMemoryProjectionStore};
