//! Projection engine: declarative event mapping, hierarchical projectors,
//! and policy-mediated dispatch.
//!
//! Three pieces compose into a projection pipeline:
//!
//! - [`EventMapBuilder`](map::EventMapBuilder) turns `map::<E>() … as_*_of`
//!   registrations into a frozen [`EventMap`](map::EventMap), with storage
//!   concerns delegated to pluggable handlers.
//! - [`Projector`](projector::Projector) drives transaction batches through
//!   a map and its children, attaching the failing event to any error.
//! - [`Dispatcher`](dispatcher::Dispatcher) subscribes handlers to an
//!   [`EventLog`](prism_core::EventLog) and mediates failures through an
//!   [`ExceptionPolicy`](dispatcher::ExceptionPolicy).

pub mod dispatcher;
pub mod map;
pub mod projector;

pub use dispatcher::{
    BeforeRestarting, Dispatcher, ExceptionPolicy, ExceptionResolution, SubscriptionOptions,
};
pub use map::{
    ApplyToProjection, CustomAction, CustomActionHandler, DeletionHandler, DeletionOptions,
    EventMap, EventMapBuilder, EventMapping, ExistingHandling, MapBuildError,
    MissingDeletionHandling, MissingHandling, ModificationHandler, ModificationOptions,
};
pub use projector::Projector;
