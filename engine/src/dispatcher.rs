//! Resilient subscription management between an event log and a projector.
//!
//! A [`Dispatcher`] wraps an [`EventLog`] and mediates every delivery through
//! an [`ExceptionPolicy`]: when the downstream handler fails, the policy sees
//! the error, the 1-based attempt number, and the subscription, and resolves
//! to [`Retry`](ExceptionResolution::Retry) (same batch again),
//! [`Abort`](ExceptionResolution::Abort) (cancel the subscription), or
//! [`Ignore`](ExceptionResolution::Ignore) (drop the batch and stay live).
//!
//! With [`SubscriptionOptions::restart_when_ahead`] the dispatcher also
//! handles a projector that is ahead of the log (a restored backup, say): it
//! cancels the stale subscription, runs the
//! [`before_restarting`](SubscriptionOptions::before_restarting) hook so the
//! owner can purge derived state, and resubscribes from the beginning.

use futures::future::BoxFuture;
use prism_core::error::ProjectionError;
use prism_core::log::{
    EventLog, EventLogError, Subscriber, SubscriptionHandle, SubscriptionInfo, TransactionHandler,
};
use prism_core::transaction::Checkpoint;
use std::fmt;
use std::sync::Arc;

/// Outcome of consulting the exception policy about a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionResolution {
    /// Deliver the same batch to the handler again.
    Retry,
    /// Give up and cancel the subscription.
    Abort,
    /// Drop the batch and keep the subscription live.
    Ignore,
}

/// Decides what to do with a failed projection attempt.
///
/// Receives the error, the 1-based attempt number, and the subscription the
/// failure happened on. The policy may wait (backoff) before resolving.
pub type ExceptionPolicy = Arc<
    dyn for<'a> Fn(&'a ProjectionError, u32, &'a SubscriptionInfo) -> BoxFuture<'a, ExceptionResolution>
        + Send
        + Sync,
>;

/// Hook run before a restart-from-beginning, so the owner can purge state
/// derived from the log.
pub type BeforeRestarting =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), ProjectionError>> + Send + Sync>;

/// Per-subscription configuration.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    /// Identifier carried on every delivery, for diagnostics.
    pub id: String,
    /// Restart from the beginning of the log when the requested checkpoint
    /// is ahead of it. Off by default; an ahead signal is then left alone.
    pub restart_when_ahead: bool,
    /// Runs after the stale subscription is cancelled and before the new one
    /// is created. Only consulted when `restart_when_ahead` is set.
    pub before_restarting: Option<BeforeRestarting>,
}

impl SubscriptionOptions {
    /// Options with the given identifier and everything else off.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("id", &self.id)
            .field("restart_when_ahead", &self.restart_when_ahead)
            .field("before_restarting", &self.before_restarting.is_some())
            .finish()
    }
}

/// Policy-mediated bridge between an event log and transaction handlers.
///
/// Cloning is cheap; clones share the underlying log and policy.
#[derive(Clone)]
pub struct Dispatcher {
    log: Arc<dyn EventLog>,
    policy: ExceptionPolicy,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// A dispatcher over `log` whose policy aborts on the first failure.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self {
            log,
            policy: Arc::new(|_error, _attempt, _info| {
                Box::pin(async { ExceptionResolution::Abort })
            }),
        }
    }

    /// Replace the exception policy.
    #[must_use]
    pub fn with_exception_policy(mut self, policy: ExceptionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Subscribe `handler` to the log from `from_checkpoint`, mediated by
    /// the exception policy.
    ///
    /// `None` subscribes from the beginning of the log.
    ///
    /// # Errors
    ///
    /// Returns the log's error when the subscription cannot be created.
    pub async fn subscribe(
        &self,
        from_checkpoint: Option<Checkpoint>,
        handler: TransactionHandler,
        options: SubscriptionOptions,
    ) -> Result<SubscriptionHandle, EventLogError> {
        self.clone()
            .subscribe_boxed(from_checkpoint, handler, options)
            .await
    }

    // Boxed so the restart path can resubscribe recursively.
    fn subscribe_boxed(
        self,
        from_checkpoint: Option<Checkpoint>,
        handler: TransactionHandler,
        options: SubscriptionOptions,
    ) -> BoxFuture<'static, Result<SubscriptionHandle, EventLogError>> {
        Box::pin(async move {
            let mut subscriber = Subscriber::new(self.mediated_handler(Arc::clone(&handler)));

            if options.restart_when_ahead {
                let dispatcher = self.clone();
                let handler = Arc::clone(&handler);
                let options = options.clone();
                subscriber = subscriber.with_no_such_checkpoint(Arc::new(move |info| {
                    let dispatcher = dispatcher.clone();
                    let handler = Arc::clone(&handler);
                    let options = options.clone();
                    Box::pin(async move {
                        info.subscription.cancel();
                        dispatcher.restart_from_beginning(handler, options, &info).await;
                    })
                }));
            }

            let subscription_id = options.id.clone();
            self.log
                .subscribe(from_checkpoint, subscriber, subscription_id)
                .await
        })
    }

    /// Wrap `handler` in the retry/abort/ignore loop.
    fn mediated_handler(&self, handler: TransactionHandler) -> TransactionHandler {
        let policy = Arc::clone(&self.policy);
        Arc::new(move |batch, info| {
            let policy = Arc::clone(&policy);
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let mut attempt: u32 = 1;
                loop {
                    let Err(error) = handler(batch.clone(), info.clone()).await else {
                        return Ok(());
                    };
                    match policy(&error, attempt, &info).await {
                        ExceptionResolution::Retry => attempt += 1,
                        ExceptionResolution::Abort => {
                            tracing::error!(
                                subscription = %info.id,
                                %error,
                                attempt,
                                "projection failed fatally, cancelling subscription"
                            );
                            info.subscription.cancel();
                            return Err(error);
                        }
                        ExceptionResolution::Ignore => {
                            tracing::warn!(
                                subscription = %info.id,
                                %error,
                                attempt,
                                "projection failure ignored, dropping batch"
                            );
                            return Ok(());
                        }
                    }
                }
            })
        })
    }

    /// Run the restart hook and resubscribe from the beginning, mediated by
    /// the exception policy.
    async fn restart_from_beginning(
        &self,
        handler: TransactionHandler,
        options: SubscriptionOptions,
        info: &SubscriptionInfo,
    ) {
        let mut attempt: u32 = 1;
        loop {
            let Err(error) = self.try_restart(&handler, &options).await else {
                return;
            };
            match (self.policy)(&error, attempt, info).await {
                ExceptionResolution::Retry => attempt += 1,
                ExceptionResolution::Abort => {
                    tracing::error!(
                        subscription = %info.id,
                        %error,
                        attempt,
                        "restarting an ahead subscription failed fatally"
                    );
                    return;
                }
                ExceptionResolution::Ignore => {
                    // Resubscribe anyway, skipping the restart hook.
                    tracing::warn!(
                        subscription = %info.id,
                        %error,
                        attempt,
                        "restart hook failure ignored, resubscribing from the beginning"
                    );
                    if let Err(resubscribe_error) = self
                        .clone()
                        .subscribe_boxed(None, Arc::clone(&handler), options.clone())
                        .await
                    {
                        tracing::error!(
                            subscription = %info.id,
                            error = %resubscribe_error,
                            "resubscribing after an ignored restart failure failed"
                        );
                    }
                    return;
                }
            }
        }
    }

    async fn try_restart(
        &self,
        handler: &TransactionHandler,
        options: &SubscriptionOptions,
    ) -> Result<(), ProjectionError> {
        if let Some(before_restarting) = &options.before_restarting {
            before_restarting().await?;
        }
        self.clone()
            .subscribe_boxed(None, Arc::clone(handler), options.clone())
            .await
            .map_err(|error| ProjectionError::log(error.to_string()))?;
        Ok(())
    }
}
