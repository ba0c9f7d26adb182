//! # Prism Core
//!
//! Core data model and boundary traits for the Prism projection engine.
//!
//! Prism consumes an ordered, checkpointed stream of committed transactions
//! and turns them into materialized read-model records ("projections")
//! through a declarative event map. This crate holds everything the other
//! crates agree on:
//!
//! - The transaction model: [`transaction::Transaction`],
//!   [`transaction::EventEnvelope`], [`transaction::Checkpoint`],
//!   [`transaction::ProjectionContext`].
//! - The subscription protocol: [`log::EventLog`], [`log::Subscriber`],
//!   [`log::SubscriptionHandle`], [`log::SubscriptionInfo`].
//! - The storage boundaries: [`projection::ProjectionStore`],
//!   [`projection::CheckpointStore`].
//! - The shared failure type: [`error::ProjectionError`], with its
//!   attach-once event context.
//!
//! The engine itself (dispatcher, event map, projector) lives in
//! `prism-engine`; the reference in-memory log and storage doubles live in
//! `prism-testing`; the cache-fronted storage adapter lives in `prism-store`.

pub use chrono::{DateTime, Utc};

pub mod error;
pub mod log;
pub mod projection;
pub mod stream;
pub mod transaction;

pub use error::{ErrorKind, FailureContext, ProjectionError};
pub use log::{EventLog, SubscriptionHandle, SubscriptionInfo};
pub use transaction::{Checkpoint, EventEnvelope, ProjectionContext, Transaction};
