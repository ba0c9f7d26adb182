//! Sequential transaction-batch projection with hierarchical children.
//!
//! A [`Projector`] owns one built [`EventMap`] over [`ProjectionContext`] and
//! an ordered list of child projectors. For every event of every transaction
//! in a batch, children project first (depth-first, in order), then the
//! projector's own map runs. Processing is strictly sequential; the first
//! failure aborts the batch and surfaces with the failing event attached.

use crate::map::{EventMapBuilder, EventMap, MapBuildError};
use futures::future::BoxFuture;
use prism_core::error::Result;
use prism_core::transaction::{EventEnvelope, ProjectionContext, Transaction};
use std::fmt;
use std::sync::Arc;

/// Drives a batch of transactions through an event map and its children.
pub struct Projector {
    map: EventMap<ProjectionContext>,
    children: Vec<Projector>,
}

impl fmt::Debug for Projector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Projector")
            .field("map", &self.map)
            .field("children", &self.children.len())
            .finish()
    }
}

impl Projector {
    /// Build a projector from a configured map builder.
    ///
    /// Custom actions are bound to run inline; modification and deletion
    /// handlers must already be bound by the caller (typically a storage
    /// adapter) before the builder reaches this point.
    ///
    /// # Errors
    ///
    /// Returns a [`MapBuildError`] when a registered mapping's action kind
    /// has no bound handler.
    pub fn new<P, K>(
        mut builder: EventMapBuilder<P, K, ProjectionContext>,
        children: Vec<Projector>,
    ) -> std::result::Result<Self, MapBuildError>
    where
        P: Send + Sync + 'static,
        K: Send + 'static,
    {
        builder.handle_custom_actions_with(Arc::new(|_context, action| action()));
        Ok(Self {
            map: builder.build()?,
            children,
        })
    }

    /// Project every event of every transaction in `batch`, in order.
    ///
    /// # Errors
    ///
    /// Propagates the first projection failure, enriched with the event and
    /// transaction being processed when it crossed the projection boundary.
    pub async fn handle(&self, batch: &[Transaction]) -> Result<()> {
        for transaction in batch {
            for envelope in &transaction.events {
                let context = Arc::new(ProjectionContext::for_event(transaction, envelope));
                self.project_event(envelope, &context)
                    .await
                    .map_err(|error| error.with_event_context(envelope, transaction))?;
            }
        }
        Ok(())
    }

    fn project_event<'a>(
        &'a self,
        envelope: &'a EventEnvelope,
        context: &'a Arc<ProjectionContext>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for child in &self.children {
                child.project_event(envelope, context).await?;
            }
            self.map.handle(&envelope.body, context).await
        })
    }
}
