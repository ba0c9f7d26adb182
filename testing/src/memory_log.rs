//! In-memory event log for fast, deterministic pipeline tests.

use prism_core::log::{
    EventLog, EventLogError, Subscriber, SubscriptionHandle, SubscriptionInfo,
};
use prism_core::transaction::{Checkpoint, EventEnvelope, Transaction};
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

const DEFAULT_BATCH_SIZE: usize = 10;

struct RegisteredSubscriber {
    from: u64,
    info: SubscriptionInfo,
    subscriber: Subscriber,
}

#[derive(Default)]
struct Inner {
    history: Vec<Transaction>,
    subscribers: Vec<RegisteredSubscriber>,
}

/// An [`EventLog`] holding every transaction in memory.
///
/// Checkpoints are assigned on write: gapless, monotonically increasing,
/// starting at 1 per log instance. A new subscriber first receives the
/// retained history from its requested checkpoint onward, in batches of at
/// most `batch_size`, then live writes as they happen. Writers block until
/// every subscriber's handler has accepted the write.
///
/// A requested checkpoint beyond the last one assigned triggers the
/// subscriber's ahead signal instead of any delivery.
pub struct MemoryEventLog {
    batch_size: usize,
    last_checkpoint: AtomicU64,
    inner: Mutex<Inner>,
}

impl Default for MemoryEventLog {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl std::fmt::Debug for MemoryEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEventLog")
            .field("batch_size", &self.batch_size)
            .field("last_checkpoint", &self.last_checkpoint)
            .finish_non_exhaustive()
    }
}

impl MemoryEventLog {
    /// An empty log delivering at most `batch_size` transactions per call.
    ///
    /// A `batch_size` of zero is treated as one.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            last_checkpoint: AtomicU64::new(0),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The last checkpoint assigned by this log, zero when nothing was
    /// written yet.
    #[must_use]
    pub fn last_checkpoint(&self) -> Checkpoint {
        Checkpoint::new(self.last_checkpoint.load(Ordering::SeqCst))
    }

    /// Append `transactions`, assigning each the next checkpoint, and fan
    /// them out to every live subscriber before returning.
    ///
    /// # Errors
    ///
    /// Never fails for the in-memory log; the signature mirrors durable
    /// implementations.
    pub async fn write(&self, mut transactions: Vec<Transaction>) -> Result<(), EventLogError> {
        if transactions.is_empty() {
            return Ok(());
        }

        // The lock is held across the fan-out so concurrent writers cannot
        // interleave deliveries out of checkpoint order.
        let mut inner = self.inner.lock().await;
        for transaction in &mut transactions {
            let assigned = self.last_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
            transaction.checkpoint = Checkpoint::new(assigned);
        }
        inner.history.extend(transactions.iter().cloned());
        inner
            .subscribers
            .retain(|registered| !registered.info.subscription.is_cancelled());

        for registered in &inner.subscribers {
            let batch: Vec<Transaction> = transactions
                .iter()
                .filter(|transaction| transaction.checkpoint.value() >= registered.from)
                .cloned()
                .collect();
            if batch.is_empty() {
                continue;
            }
            Self::deliver(self.batch_size, &registered.subscriber, &registered.info, batch).await;
        }
        Ok(())
    }

    /// Append a single-event transaction with a random identifier.
    ///
    /// # Errors
    ///
    /// Never fails for the in-memory log.
    pub async fn write_event(&self, body: impl Any + Send + Sync) -> Result<(), EventLogError> {
        let id = format!("{:016x}", rand::random::<u64>());
        self.write(vec![Transaction::new(id, vec![EventEnvelope::new(body)])])
            .await
    }

    async fn deliver(
        batch_size: usize,
        subscriber: &Subscriber,
        info: &SubscriptionInfo,
        transactions: Vec<Transaction>,
    ) {
        for chunk in transactions.chunks(batch_size) {
            if info.subscription.is_cancelled() {
                return;
            }
            if let Err(error) = (subscriber.handle_transactions)(chunk.to_vec(), info.clone()).await
            {
                tracing::warn!(
                    subscription = %info.id,
                    %error,
                    "transaction handler failed, stopping delivery"
                );
                return;
            }
        }
    }
}

impl EventLog for MemoryEventLog {
    fn subscribe(
        &self,
        from_checkpoint: Option<Checkpoint>,
        subscriber: Subscriber,
        subscription_id: String,
    ) -> Pin<Box<dyn Future<Output = Result<SubscriptionHandle, EventLogError>> + Send + '_>> {
        Box::pin(async move {
            let info = SubscriptionInfo {
                id: subscription_id,
                subscription: SubscriptionHandle::default(),
            };
            let from = from_checkpoint.map_or(0, Checkpoint::value);

            let mut inner = self.inner.lock().await;
            // Loaded under the lock so a racing write cannot produce a
            // stale ahead signal.
            let ahead = from > self.last_checkpoint.load(Ordering::SeqCst);
            inner.subscribers.push(RegisteredSubscriber {
                from,
                info: info.clone(),
                subscriber: subscriber.clone(),
            });

            if ahead {
                // The lock is released first: the ahead signal may
                // resubscribe from inside its handler.
                drop(inner);
                tracing::debug!(
                    subscription = %info.id,
                    from,
                    "requested checkpoint is ahead of the log"
                );
                (subscriber.no_such_checkpoint)(info.clone()).await;
            } else {
                // Catch-up happens under the lock so a concurrent write
                // cannot overtake the replay.
                let catch_up: Vec<Transaction> = inner
                    .history
                    .iter()
                    .filter(|transaction| transaction.checkpoint.value() >= from)
                    .cloned()
                    .collect();
                Self::deliver(self.batch_size, &subscriber, &info, catch_up).await;
            }

            Ok(info.subscription)
        })
    }
}
