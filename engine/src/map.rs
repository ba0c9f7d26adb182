//! Declarative event-to-projection mapping.
//!
//! An [`EventMap`] is a frozen table from runtime event type to an ordered
//! list of guarded handlers. It is configured through [`EventMapBuilder`]:
//! `map::<E>()` opens a mapping stage for one event type, zero or more
//! [`when`](EventMapping::when) guards narrow it, and one terminal action
//! (`as_create_of`, `as_update_of`, `as_delete_of`, `as_action`, and their
//! `-if-` variants) finishes it. `build()` resolves everything into a
//! `TypeId` lookup table once; nothing is re-resolved per event.
//!
//! The map itself never touches storage. Create/update/delete registrations
//! compile down to calls on pluggable handlers
//! ([`handle_modifications_with`](EventMapBuilder::handle_modifications_with),
//! [`handle_deletions_with`](EventMapBuilder::handle_deletions_with)), which
//! a storage adapter binds before `build()`; the action's existence
//! preconditions travel along as [`ModificationOptions`] /
//! [`DeletionOptions`]. Custom actions route through
//! [`handle_custom_actions_with`](EventMapBuilder::handle_custom_actions_with),
//! which the projector binds to "invoke inline".
//!
//! # Example
//!
//! ```ignore
//! let mut builder = EventMapBuilder::<ProductCatalogEntry, String, ProjectionContext>::new();
//!
//! builder
//!     .map::<ProductAddedToCatalog>()
//!     .as_create_of(
//!         |e| e.product_key.clone(),
//!         |entry, e, _ctx| {
//!             entry.category = e.category.clone();
//!             Box::pin(async { Ok(()) })
//!         },
//!     );
//!
//! builder.map::<ProductDiscontinued>().as_delete_of(|e| e.product_key.clone());
//! ```

use futures::future::BoxFuture;
use prism_core::error::Result;
use prism_core::transaction::EventBody;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// How a modification action treats a missing projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingHandling {
    /// Materialize a fresh projection and apply the update to it.
    Create,
    /// Skip the action silently.
    Ignore,
    /// Raise [`ErrorKind::MissingKey`](prism_core::error::ErrorKind::MissingKey).
    Fail,
}

/// How a modification action treats an existing projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExistingHandling {
    /// Apply the update to the existing projection.
    Update,
    /// Skip the action silently.
    Ignore,
    /// Raise [`ErrorKind::DuplicateKey`](prism_core::error::ErrorKind::DuplicateKey).
    Fail,
}

/// The compiled precondition of a create/update action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModificationOptions {
    /// Behavior when no projection exists for the key.
    pub when_missing: MissingHandling,
    /// Behavior when a projection already exists for the key.
    pub when_existing: ExistingHandling,
}

/// How a delete action treats a missing projection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MissingDeletionHandling {
    /// Skip the deletion silently.
    Ignore,
    /// Raise [`ErrorKind::MissingKey`](prism_core::error::ErrorKind::MissingKey).
    Fail,
}

/// The compiled precondition of a delete action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeletionOptions {
    /// Behavior when no projection exists for the key.
    pub when_missing: MissingDeletionHandling,
}

/// Mutation applied to a loaded (or freshly created) projection.
///
/// The closure owns its event and context, so the storage adapter can call it
/// on whatever `&mut P` it materializes.
pub type ApplyToProjection<P> =
    Box<dyn for<'a> Fn(&'a mut P) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Storage-adapter hook performing a create/update with its precondition.
pub type ModificationHandler<P, K, Ctx> = Arc<
    dyn Fn(K, Arc<Ctx>, ApplyToProjection<P>, ModificationOptions) -> BoxFuture<'static, Result<()>>
        + Send
        + Sync,
>;

/// Storage-adapter hook performing a delete with its precondition.
pub type DeletionHandler<K, Ctx> =
    Arc<dyn Fn(K, Arc<Ctx>, DeletionOptions) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A bare asynchronous action, ready to run.
pub type CustomAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// Hook deciding how bare actions run (the projector invokes them inline).
pub type CustomActionHandler<Ctx> =
    Arc<dyn Fn(Arc<Ctx>, CustomAction) -> BoxFuture<'static, Result<()>> + Send + Sync>;

type GuardFn<E, Ctx> =
    Arc<dyn Fn(Arc<E>, Arc<Ctx>) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

type ErasedHandler<Ctx> =
    Box<dyn Fn(EventBody, Arc<Ctx>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A mapping was registered for an action kind that has no bound handler.
///
/// Raised at `build()` time: configuration problems surface at registration,
/// never during event processing.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MapBuildError {
    /// A create or update mapping exists but no modification handler is set.
    #[error("a create/update mapping was registered but no modification handler is configured")]
    MissingModificationHandler,

    /// A delete mapping exists but no deletion handler is set.
    #[error("a delete mapping was registered but no deletion handler is configured")]
    MissingDeletionHandler,

    /// A custom action mapping exists but no custom action handler is set.
    #[error("a custom action mapping was registered but no custom action handler is configured")]
    MissingCustomActionHandler,
}

enum Registration<P, K, Ctx> {
    Modification(Box<dyn FnOnce(ModificationHandler<P, K, Ctx>) -> (TypeId, ErasedHandler<Ctx>) + Send>),
    Deletion(Box<dyn FnOnce(DeletionHandler<K, Ctx>) -> (TypeId, ErasedHandler<Ctx>) + Send>),
    Custom(Box<dyn FnOnce(CustomActionHandler<Ctx>) -> (TypeId, ErasedHandler<Ctx>) + Send>),
}

/// Frozen per-event-type handler table.
///
/// [`handle`](EventMap::handle) dispatches on the exact runtime type of the
/// event body, evaluates each matching handler's guards in order, and runs
/// every handler whose guards all pass, in registration order. The first
/// error aborts the remaining handlers for that event and propagates; fault
/// isolation between handlers is the projector's and dispatcher's job, not
/// the map's. An event type with no registered handler is a no-op.
pub struct EventMap<Ctx> {
    handlers: HashMap<TypeId, Vec<ErasedHandler<Ctx>>>,
}

impl<Ctx: Send + Sync + 'static> EventMap<Ctx> {
    /// Apply every matching handler to `event` under `context`.
    ///
    /// # Errors
    ///
    /// Propagates the first error raised by a guard or an action.
    pub async fn handle(&self, event: &EventBody, context: &Arc<Ctx>) -> Result<()> {
        if let Some(entries) = self.handlers.get(&(**event).type_id()) {
            for entry in entries {
                entry(Arc::clone(event), Arc::clone(context)).await?;
            }
        }
        Ok(())
    }

    /// Whether any event type is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<Ctx> fmt::Debug for EventMap<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMap")
            .field("mapped_types", &self.handlers.len())
            .finish()
    }
}

/// Fluent configuration of an [`EventMap`].
///
/// Generic over the projection type `P`, its key type `K`, and the context
/// type `Ctx` every action receives. Registrations are collected in order and
/// compiled once by [`build`](EventMapBuilder::build).
pub struct EventMapBuilder<P, K, Ctx> {
    registrations: Vec<Registration<P, K, Ctx>>,
    modification_handler: Option<ModificationHandler<P, K, Ctx>>,
    deletion_handler: Option<DeletionHandler<K, Ctx>>,
    custom_handler: Option<CustomActionHandler<Ctx>>,
}

impl<P, K, Ctx> Default for EventMapBuilder<P, K, Ctx>
where
    P: Send + Sync + 'static,
    K: Send + 'static,
    Ctx: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, K, Ctx> fmt::Debug for EventMapBuilder<P, K, Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMapBuilder")
            .field("registrations", &self.registrations.len())
            .finish_non_exhaustive()
    }
}

impl<P, K, Ctx> EventMapBuilder<P, K, Ctx>
where
    P: Send + Sync + 'static,
    K: Send + 'static,
    Ctx: Send + Sync + 'static,
{
    /// An empty builder with no handlers bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            modification_handler: None,
            deletion_handler: None,
            custom_handler: None,
        }
    }

    /// Open a mapping stage for events of runtime type `E`.
    ///
    /// The same event type may be mapped multiple times; all matching
    /// handlers fire, in registration order.
    pub fn map<E: Send + Sync + 'static>(&mut self) -> EventMapping<'_, E, P, K, Ctx> {
        EventMapping {
            builder: self,
            guards: Vec::new(),
        }
    }

    /// Bind the hook that performs create/update actions.
    pub fn handle_modifications_with(&mut self, handler: ModificationHandler<P, K, Ctx>) {
        self.modification_handler = Some(handler);
    }

    /// Bind the hook that performs delete actions.
    pub fn handle_deletions_with(&mut self, handler: DeletionHandler<K, Ctx>) {
        self.deletion_handler = Some(handler);
    }

    /// Bind the hook that runs bare custom actions.
    pub fn handle_custom_actions_with(&mut self, handler: CustomActionHandler<Ctx>) {
        self.custom_handler = Some(handler);
    }

    /// Freeze the configuration into an immutable lookup table.
    ///
    /// # Errors
    ///
    /// Returns a [`MapBuildError`] when a registration's action kind has no
    /// bound handler.
    pub fn build(self) -> std::result::Result<EventMap<Ctx>, MapBuildError> {
        let Self {
            registrations,
            modification_handler,
            deletion_handler,
            custom_handler,
        } = self;

        let mut handlers: HashMap<TypeId, Vec<ErasedHandler<Ctx>>> = HashMap::new();
        for registration in registrations {
            let (type_id, handler) = match registration {
                Registration::Modification(compile) => {
                    let bound = modification_handler
                        .clone()
                        .ok_or(MapBuildError::MissingModificationHandler)?;
                    compile(bound)
                }
                Registration::Deletion(compile) => {
                    let bound = deletion_handler
                        .clone()
                        .ok_or(MapBuildError::MissingDeletionHandler)?;
                    compile(bound)
                }
                Registration::Custom(compile) => {
                    let bound = custom_handler
                        .clone()
                        .ok_or(MapBuildError::MissingCustomActionHandler)?;
                    compile(bound)
                }
            };
            handlers.entry(type_id).or_default().push(handler);
        }

        Ok(EventMap { handlers })
    }
}

/// One mapping stage: guards plus a terminal action for event type `E`.
pub struct EventMapping<'m, E, P, K, Ctx> {
    builder: &'m mut EventMapBuilder<P, K, Ctx>,
    guards: Vec<GuardFn<E, Ctx>>,
}

impl<E, P, K, Ctx> EventMapping<'_, E, P, K, Ctx>
where
    E: Send + Sync + 'static,
    P: Send + Sync + 'static,
    K: Send + 'static,
    Ctx: Send + Sync + 'static,
{
    /// Add a guard; the handler fires only when every guard returns `true`.
    #[must_use]
    pub fn when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Arc<E>, Arc<Ctx>) -> BoxFuture<'static, Result<bool>> + Send + Sync + 'static,
    {
        self.guards.push(Arc::new(predicate));
        self
    }

    /// Create a new projection; fails when one already exists for the key.
    pub fn as_create_of<KF, UF>(self, get_key: KF, update: UF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
        UF: for<'a> Fn(&'a mut P, &'a E, &'a Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.modification(
            get_key,
            update,
            ModificationOptions {
                when_missing: MissingHandling::Create,
                when_existing: ExistingHandling::Fail,
            },
        );
    }

    /// Create a new projection; silently skips when one already exists.
    pub fn as_create_if_absent_of<KF, UF>(self, get_key: KF, update: UF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
        UF: for<'a> Fn(&'a mut P, &'a E, &'a Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.modification(
            get_key,
            update,
            ModificationOptions {
                when_missing: MissingHandling::Create,
                when_existing: ExistingHandling::Ignore,
            },
        );
    }

    /// Mutate the existing projection; fails when none exists for the key.
    pub fn as_update_of<KF, UF>(self, get_key: KF, update: UF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
        UF: for<'a> Fn(&'a mut P, &'a E, &'a Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.modification(
            get_key,
            update,
            ModificationOptions {
                when_missing: MissingHandling::Fail,
                when_existing: ExistingHandling::Update,
            },
        );
    }

    /// Mutate the existing projection; silently skips when none exists.
    pub fn as_update_if_exists_of<KF, UF>(self, get_key: KF, update: UF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
        UF: for<'a> Fn(&'a mut P, &'a E, &'a Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.modification(
            get_key,
            update,
            ModificationOptions {
                when_missing: MissingHandling::Ignore,
                when_existing: ExistingHandling::Update,
            },
        );
    }

    /// Create the projection when absent, otherwise mutate it.
    pub fn as_create_or_update_of<KF, UF>(self, get_key: KF, update: UF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
        UF: for<'a> Fn(&'a mut P, &'a E, &'a Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.modification(
            get_key,
            update,
            ModificationOptions {
                when_missing: MissingHandling::Create,
                when_existing: ExistingHandling::Update,
            },
        );
    }

    /// Delete the projection; fails when none exists for the key.
    pub fn as_delete_of<KF>(self, get_key: KF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
    {
        self.deletion(
            get_key,
            DeletionOptions {
                when_missing: MissingDeletionHandling::Fail,
            },
        );
    }

    /// Delete the projection; silently skips when none exists.
    pub fn as_delete_if_exists_of<KF>(self, get_key: KF)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
    {
        self.deletion(
            get_key,
            DeletionOptions {
                when_missing: MissingDeletionHandling::Ignore,
            },
        );
    }

    /// Run an arbitrary asynchronous action; no projection lookup happens.
    pub fn as_action<F>(self, action: F)
    where
        F: Fn(Arc<E>, Arc<Ctx>) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let guards = self.guards;
        let action = Arc::new(action);
        let compile: Box<dyn FnOnce(CustomActionHandler<Ctx>) -> (TypeId, ErasedHandler<Ctx>) + Send> =
            Box::new(move |handler| {
                let erased: ErasedHandler<Ctx> = Box::new(move |event, context| {
                    let guards = guards.clone();
                    let action = Arc::clone(&action);
                    let handler = Arc::clone(&handler);
                    Box::pin(async move {
                        let Ok(event) = event.downcast::<E>() else {
                            return Ok(());
                        };
                        for guard in &guards {
                            if !guard(Arc::clone(&event), Arc::clone(&context)).await? {
                                return Ok(());
                            }
                        }
                        let run: CustomAction = Box::new({
                            let context = Arc::clone(&context);
                            move || action(event, context)
                        });
                        handler(context, run).await
                    })
                });
                (TypeId::of::<E>(), erased)
            });
        self.builder.registrations.push(Registration::Custom(compile));
    }

    fn modification<KF, UF>(self, get_key: KF, update: UF, options: ModificationOptions)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
        UF: for<'a> Fn(&'a mut P, &'a E, &'a Ctx) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        let guards = self.guards;
        let get_key = Arc::new(get_key);
        let update = Arc::new(update);
        let compile: Box<
            dyn FnOnce(ModificationHandler<P, K, Ctx>) -> (TypeId, ErasedHandler<Ctx>) + Send,
        > = Box::new(move |handler| {
            let erased: ErasedHandler<Ctx> = Box::new(move |event, context| {
                let guards = guards.clone();
                let get_key = Arc::clone(&get_key);
                let update = Arc::clone(&update);
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let Ok(event) = event.downcast::<E>() else {
                        return Ok(());
                    };
                    for guard in &guards {
                        if !guard(Arc::clone(&event), Arc::clone(&context)).await? {
                            return Ok(());
                        }
                    }
                    let key = get_key(&event);
                    let apply: ApplyToProjection<P> = Box::new({
                        let event = Arc::clone(&event);
                        let context = Arc::clone(&context);
                        let update = Arc::clone(&update);
                        move |projection| {
                            let event = Arc::clone(&event);
                            let context = Arc::clone(&context);
                            let update = Arc::clone(&update);
                            Box::pin(async move {
                                update(&mut *projection, &event, &context).await
                            })
                        }
                    });
                    handler(key, context, apply, options).await
                })
            });
            (TypeId::of::<E>(), erased)
        });
        self.builder
            .registrations
            .push(Registration::Modification(compile));
    }

    fn deletion<KF>(self, get_key: KF, options: DeletionOptions)
    where
        KF: Fn(&E) -> K + Send + Sync + 'static,
    {
        let guards = self.guards;
        let get_key = Arc::new(get_key);
        let compile: Box<dyn FnOnce(DeletionHandler<K, Ctx>) -> (TypeId, ErasedHandler<Ctx>) + Send> =
            Box::new(move |handler| {
                let erased: ErasedHandler<Ctx> = Box::new(move |event, context| {
                    let guards = guards.clone();
                    let get_key = Arc::clone(&get_key);
                    let handler = Arc::clone(&handler);
                    Box::pin(async move {
                        let Ok(event) = event.downcast::<E>() else {
                            return Ok(());
                        };
                        for guard in &guards {
                            if !guard(Arc::clone(&event), Arc::clone(&context)).await? {
                                return Ok(());
                            }
                        }
                        let key = get_key(&event);
                        handler(key, context, options).await
                    })
                });
                (TypeId::of::<E>(), erased)
            });
        self.builder.registrations.push(Registration::Deletion(compile));
    }
}
