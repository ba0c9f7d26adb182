//! The projection error type.
//!
//! All failure paths in the engine converge on [`ProjectionError`]: a kind
//! describing what went wrong plus an optional [`FailureContext`] naming the
//! event and transaction that was being projected when the failure happened.
//!
//! The context is attached exactly once, at the event level, by the projector
//! ([`ProjectionError::with_event_context`] is a no-op when context is
//! already present). Outer frames pass an annotated error through unchanged,
//! so a failure deep inside a child projector still points at the one
//! offending event rather than being re-wrapped at every level.

use crate::transaction::{EventEnvelope, Transaction};
use std::fmt;
use thiserror::Error;

/// Result alias for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// What went wrong while projecting.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A create action found a projection that already exists.
    #[error("a projection with key '{0}' already exists")]
    DuplicateKey(String),

    /// An update or delete action found no projection for the key.
    #[error("no projection with key '{0}' exists")]
    MissingKey(String),

    /// The projection storage collaborator failed.
    #[error("projection storage failed: {0}")]
    Storage(String),

    /// Persisting or loading a projector checkpoint failed.
    #[error("checkpoint persistence failed: {0}")]
    Checkpoint(String),

    /// The event log failed to subscribe or deliver.
    #[error("event log failed: {0}")]
    Log(String),

    /// A mapping action or restart hook failed for an application reason.
    #[error("event handler failed: {0}")]
    Handler(String),
}

/// The event-level context of a projection failure.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// The envelope whose projection failed.
    pub current_event: EventEnvelope,

    /// Identifier of the transaction the event belongs to.
    pub transaction_id: String,

    /// The failing transaction as a batch of one, ready to be re-dispatched.
    pub transaction_batch: Vec<Transaction>,
}

/// Error raised by mapping actions, projectors, and their collaborators.
///
/// # Examples
///
/// ```
/// use prism_core::error::ProjectionError;
///
/// let error = ProjectionError::missing_key("c350E");
/// assert!(error.to_string().contains("c350E"));
/// assert!(error.failure_context().is_none());
/// ```
#[derive(Debug)]
pub struct ProjectionError {
    kind: ErrorKind,
    context: Option<Box<FailureContext>>,
}

impl ProjectionError {
    /// Wrap an [`ErrorKind`] without event context.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// A create action hit an existing projection.
    #[must_use]
    pub fn duplicate_key(key: impl fmt::Display) -> Self {
        Self::new(ErrorKind::DuplicateKey(key.to_string()))
    }

    /// An update or delete action found nothing to act on.
    #[must_use]
    pub fn missing_key(key: impl fmt::Display) -> Self {
        Self::new(ErrorKind::MissingKey(key.to_string()))
    }

    /// The projection storage collaborator failed.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage(message.into()))
    }

    /// Checkpoint persistence failed.
    #[must_use]
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Checkpoint(message.into()))
    }

    /// The event log failed.
    #[must_use]
    pub fn log(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Log(message.into()))
    }

    /// A mapping action or restart hook failed.
    #[must_use]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Handler(message.into()))
    }

    /// The failure kind.
    #[must_use]
    pub const fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The event-level context, when one has been attached.
    #[must_use]
    pub fn failure_context(&self) -> Option<&FailureContext> {
        self.context.as_deref()
    }

    /// Whether event context has already been attached.
    #[must_use]
    pub const fn has_event_context(&self) -> bool {
        self.context.is_some()
    }

    /// Attach the failing event and its transaction, once.
    ///
    /// An error that already carries context is returned unchanged, so the
    /// innermost frame wins and outer frames cannot re-wrap.
    #[must_use]
    pub fn with_event_context(mut self, envelope: &EventEnvelope, transaction: &Transaction) -> Self {
        if self.context.is_none() {
            self.context = Some(Box::new(FailureContext {
                current_event: envelope.clone(),
                transaction_id: transaction.id.clone(),
                transaction_batch: vec![transaction.clone()],
            }));
        }
        self
    }
}

impl fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(context) = &self.context {
            write!(
                f,
                " (while projecting an event of transaction '{}' at checkpoint {})",
                context.transaction_id,
                context
                    .transaction_batch
                    .first()
                    .map(|t| t.checkpoint)
                    .unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for ProjectionError {}

impl From<ErrorKind> for ProjectionError {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can unwrap
mod tests {
    use super::*;
    use crate::transaction::EventEnvelope;

    #[derive(Debug)]
    struct Failed;

    fn transaction_with_one_event() -> Transaction {
        Transaction::new("tx-1", vec![EventEnvelope::new(Failed)])
    }

    #[test]
    fn context_is_attached_exactly_once() {
        let transaction = transaction_with_one_event();
        let other = Transaction::new("tx-2", vec![EventEnvelope::new(Failed)]);

        let error = ProjectionError::storage("connection lost")
            .with_event_context(&transaction.events[0], &transaction)
            .with_event_context(&other.events[0], &other);

        let context = error.failure_context().unwrap();
        assert_eq!(context.transaction_id, "tx-1");
        assert_eq!(context.transaction_batch.len(), 1);
    }

    #[test]
    fn display_names_the_owning_transaction() {
        let transaction = transaction_with_one_event();
        let error = ProjectionError::duplicate_key("c350E")
            .with_event_context(&transaction.events[0], &transaction);

        let rendered = error.to_string();
        assert!(rendered.contains("c350E"));
        assert!(rendered.contains("tx-1"));
    }

    #[test]
    fn kinds_render_their_keys() {
        assert!(
            ProjectionError::missing_key("p-1")
                .to_string()
                .contains("no projection with key 'p-1'")
        );
        assert!(matches!(
            ProjectionError::duplicate_key("p-2").kind(),
            ErrorKind::DuplicateKey(_)
        ));
    }
}
