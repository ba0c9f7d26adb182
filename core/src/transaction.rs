//! The transaction model: atomic groups of events with assigned checkpoints.
//!
//! A [`Transaction`] is the unit of commit in the event log: an ordered list
//! of [`EventEnvelope`]s that were durably written together and assigned one
//! [`Checkpoint`]. Checkpoints are strictly increasing in write order, which
//! makes them both the resume point for subscriptions and the ordering key
//! for projection work.
//!
//! # Polymorphic event bodies
//!
//! Event payloads are opaque to the engine. An envelope carries its body as
//! `Arc<dyn Any + Send + Sync>` and consumers dispatch on the body's runtime
//! type: the event map resolves handlers through a `TypeId` lookup table
//! built once at configuration time.
//!
//! # Example
//!
//! ```
//! use prism_core::transaction::{Checkpoint, EventEnvelope, Transaction};
//!
//! #[derive(Debug)]
//! struct ProductAddedToCatalog {
//!     product_key: String,
//! }
//!
//! let transaction = Transaction::new(
//!     "tx-1",
//!     vec![EventEnvelope::new(ProductAddedToCatalog {
//!         product_key: "c350E".to_string(),
//!     })],
//! );
//!
//! assert_eq!(transaction.events.len(), 1);
//! assert_eq!(transaction.checkpoint, Checkpoint::default());
//! ```

use crate::stream::StreamId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Position of a transaction in the event log.
///
/// Checkpoints are assigned by the log when a transaction is durably written,
/// strictly increase in write order, and never change once assigned. A value
/// of zero means "not yet assigned" (or, when used as a subscription starting
/// point, "from the very beginning").
///
/// # Examples
///
/// ```
/// use prism_core::transaction::Checkpoint;
///
/// let checkpoint = Checkpoint::new(41);
/// assert_eq!(checkpoint.next(), Checkpoint::new(42));
/// assert!(checkpoint < checkpoint.next());
/// ```
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Checkpoint(u64);

impl Checkpoint {
    /// Create a checkpoint from a raw position.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw position.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The checkpoint immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Headers attached to a transaction or an event envelope.
///
/// Order-irrelevant string-to-JSON mapping for metadata such as correlation
/// ids or the originating user.
pub type Headers = HashMap<String, serde_json::Value>;

/// An event payload, dispatched on its runtime type.
pub type EventBody = Arc<dyn Any + Send + Sync>;

/// One event within a transaction: the polymorphic body plus its headers.
#[derive(Clone)]
pub struct EventEnvelope {
    /// The event payload. Consumers downcast to the concrete event type.
    pub body: EventBody,

    /// Metadata scoped to this single event.
    pub headers: Headers,
}

impl EventEnvelope {
    /// Wrap an event body with empty headers.
    #[must_use]
    pub fn new(body: impl Any + Send + Sync) -> Self {
        Self {
            body: Arc::new(body),
            headers: Headers::new(),
        }
    }

    /// Attach headers to this envelope.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

impl fmt::Debug for EventEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEnvelope")
            .field("body", &(*self.body).type_id())
            .field("headers", &self.headers)
            .finish()
    }
}

/// An atomic, ordered group of events committed together.
///
/// The log assigns the [`Checkpoint`] on write; everything else is chosen by
/// the producer. `stream_id` identifies the origin stream and may be absent
/// for transactions that do not belong to one.
#[derive(Clone, Debug)]
pub struct Transaction {
    /// Opaque transaction identifier.
    pub id: String,

    /// Origin stream, when the transaction came from one.
    pub stream_id: Option<StreamId>,

    /// Position in the log; assigned on write, immutable afterwards.
    pub checkpoint: Checkpoint,

    /// When the transaction was committed.
    pub timestamp_utc: DateTime<Utc>,

    /// Metadata scoped to the whole transaction.
    pub headers: Headers,

    /// The events committed together, in order.
    pub events: Vec<EventEnvelope>,
}

impl Transaction {
    /// Create a transaction with an unassigned checkpoint.
    ///
    /// The checkpoint stays at its default (zero) until an event log writes
    /// the transaction and assigns the real position.
    #[must_use]
    pub fn new(id: impl Into<String>, events: Vec<EventEnvelope>) -> Self {
        Self {
            id: id.into(),
            stream_id: None,
            checkpoint: Checkpoint::default(),
            timestamp_utc: Utc::now(),
            headers: Headers::new(),
            events,
        }
    }

    /// Attach the origin stream.
    #[must_use]
    pub fn with_stream_id(mut self, stream_id: StreamId) -> Self {
        self.stream_id = Some(stream_id);
        self
    }

    /// Attach transaction-level headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }
}

/// Per-event metadata handed to every mapping action.
///
/// A context is created for each (event, transaction) pair the moment the
/// event is about to be projected and is shared, through `Arc`, by child and
/// parent projectors working on the same event. It is never retained beyond
/// the call in progress.
#[derive(Clone, Debug)]
pub struct ProjectionContext {
    /// Identifier of the owning transaction.
    pub transaction_id: String,

    /// Origin stream of the owning transaction, when present.
    pub stream_id: Option<StreamId>,

    /// Commit timestamp of the owning transaction.
    pub timestamp_utc: DateTime<Utc>,

    /// Checkpoint of the owning transaction.
    pub checkpoint: Checkpoint,

    /// Headers of the event being projected.
    pub event_headers: Headers,

    /// Headers of the owning transaction.
    pub transaction_headers: Headers,
}

impl ProjectionContext {
    /// Build the context for one event within a transaction.
    #[must_use]
    pub fn for_event(transaction: &Transaction, envelope: &EventEnvelope) -> Self {
        Self {
            transaction_id: transaction.id.clone(),
            stream_id: transaction.stream_id.clone(),
            timestamp_utc: transaction.timestamp_utc,
            checkpoint: transaction.checkpoint,
            event_headers: envelope.headers.clone(),
            transaction_headers: transaction.headers.clone(),
        }
    }
}
