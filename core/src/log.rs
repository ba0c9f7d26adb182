//! The event-log boundary: subscriptions, cancellation, and batch delivery.
//!
//! An [`EventLog`] delivers committed transactions to a [`Subscriber`] in
//! checkpoint order: first everything already held at or past the requested
//! starting checkpoint, then every later write, batched and with at most one
//! batch in flight per subscriber.
//!
//! The "ahead of log" condition, a requested starting checkpoint the log has
//! never reached (for example after the log was reset), is its own signal
//! ([`Subscriber::no_such_checkpoint`]), never an empty batch. Recovery from
//! it is the dispatcher's decision, not the log's.
//!
//! # Dyn Compatibility
//!
//! [`EventLog::subscribe`] returns `Pin<Box<dyn Future>>` instead of using
//! `async fn` so the trait can be used as `Arc<dyn EventLog>` by the
//! dispatcher.

use crate::error::ProjectionError;
use crate::transaction::{Checkpoint, Transaction};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Errors raised by an event log.
#[derive(Error, Debug, Clone)]
pub enum EventLogError {
    /// The log could not establish the subscription.
    #[error("Subscription '{id}' failed: {reason}")]
    SubscribeFailed {
        /// Caller-chosen subscription id.
        id: String,
        /// Why the subscription could not be established.
        reason: String,
    },

    /// The log could not durably write a transaction.
    #[error("Write failed: {0}")]
    WriteFailed(String),
}

/// Async handler for one ordered batch of transactions.
///
/// The log awaits the returned future before delivering the next batch to the
/// same subscriber.
pub type TransactionHandler =
    Arc<dyn Fn(Vec<Transaction>, SubscriptionInfo) -> BoxFuture<'static, Result<(), ProjectionError>> + Send + Sync>;

/// Async handler for the ahead-of-log signal.
pub type AheadHandler = Arc<dyn Fn(SubscriptionInfo) -> BoxFuture<'static, ()> + Send + Sync>;

/// The pair of callbacks a log delivers to.
#[derive(Clone)]
pub struct Subscriber {
    /// Invoked once per ordered batch; awaited before the next batch.
    pub handle_transactions: TransactionHandler,

    /// Invoked when the requested starting checkpoint cannot be resolved.
    pub no_such_checkpoint: AheadHandler,
}

impl Subscriber {
    /// A subscriber that treats the ahead-of-log signal as a no-op.
    #[must_use]
    pub fn new(handle_transactions: TransactionHandler) -> Self {
        Self {
            handle_transactions,
            no_such_checkpoint: Arc::new(|_| Box::pin(async {})),
        }
    }

    /// Replace the ahead-of-log callback.
    #[must_use]
    pub fn with_no_such_checkpoint(mut self, handler: AheadHandler) -> Self {
        self.no_such_checkpoint = handler;
        self
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").finish_non_exhaustive()
    }
}

/// Single-shot, idempotent cancellation handle for one subscription.
///
/// Cancelling takes effect at the next batch boundary: an in-flight handler
/// is never interrupted, but no further batch is delivered. A cancelled
/// subscription cannot be resumed; resubscribing requires a fresh call to
/// [`EventLog::subscribe`].
///
/// # Examples
///
/// ```
/// use prism_core::log::SubscriptionHandle;
///
/// let handle = SubscriptionHandle::new();
/// assert!(!handle.is_cancelled());
/// handle.cancel();
/// handle.cancel(); // idempotent
/// assert!(handle.is_cancelled());
/// ```
#[derive(Clone, Debug, Default)]
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Create a live handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop delivery permanently. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the subscription has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Identifies one live subscription.
///
/// Created when a subscription is established and passed into every handler
/// and ahead-signal invocation for it. The embedded handle stays valid until
/// the subscription is cancelled.
#[derive(Clone, Debug)]
pub struct SubscriptionInfo {
    /// Caller-chosen id, so subscribers can tell which is which.
    pub id: String,

    /// Handle that cancels this subscription.
    pub subscription: SubscriptionHandle,
}

/// A source of ordered, checkpointed transaction batches.
///
/// # Contract
///
/// - Catch-up first: every held transaction with checkpoint `>= from` (all of
///   them when `from` is absent), in checkpoint order, split into batches.
/// - Then live delivery: every subsequent write, batched the same way.
/// - One batch in flight per subscriber; the handler is awaited before the
///   next batch is sent.
/// - A cancelled subscriber receives no further batches.
/// - A starting checkpoint the log never assigned triggers
///   [`Subscriber::no_such_checkpoint`] instead of batch delivery.
pub trait EventLog: Send + Sync {
    /// Establish a subscription starting at `from_checkpoint`.
    ///
    /// The returned future resolves once the subscription is registered;
    /// depending on the implementation, catch-up delivery may happen before
    /// it resolves or concurrently afterwards, but always in order.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::SubscribeFailed`] when the log cannot
    /// establish the subscription.
    fn subscribe(
        &self,
        from_checkpoint: Option<Checkpoint>,
        subscriber: Subscriber,
        subscription_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, EventLogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_observable() {
        let handle = SubscriptionHandle::new();
        assert!(!handle.is_cancelled());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());

        // Clones share the cancellation flag.
        let clone = handle.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn default_ahead_handler_is_a_no_op() {
        let subscriber = Subscriber::new(Arc::new(|_, _| Box::pin(async { Ok(()) })));
        let info = SubscriptionInfo {
            id: "s-1".to_string(),
            subscription: SubscriptionHandle::new(),
        };

        // Must complete without touching the subscription.
        futures::executor::block_on((subscriber.no_such_checkpoint)(info.clone()));
        assert!(!info.subscription.is_cancelled());
    }
}
