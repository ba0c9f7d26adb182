//! End-to-end product catalog projection against the in-memory doubles.

#![allow(clippy::unwrap_used)] // Test code can unwrap

use prism_core::error::ErrorKind;
use prism_core::log::TransactionHandler;
use prism_core::projection::CheckpointStore;
use prism_core::projection::ProjectionStore;
use prism_core::transaction::{Checkpoint, EventEnvelope, ProjectionContext, Transaction};
use prism_engine::map::EventMapBuilder;
use prism_engine::{Dispatcher, SubscriptionOptions};
use prism_store::{Expiration, LruProjectionCache, StoreProjector};
use prism_testing::{InMemoryCheckpointStore, InMemoryProjectionStore, MemoryEventLog};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug)]
struct ProductAddedToCatalog {
    product_key: String,
    category: String,
}

#[derive(Debug)]
struct ProductDiscontinued {
    product_key: String,
}

#[derive(Debug)]
struct CatalogClosed;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct CatalogEntry {
    category: String,
}

type CatalogBuilder = EventMapBuilder<CatalogEntry, String, ProjectionContext>;

fn set_category(builder: &mut CatalogBuilder, as_create: bool) {
    if as_create {
        builder.map::<ProductAddedToCatalog>().as_create_of(
            |e| e.product_key.clone(),
            |entry, event, _ctx| {
                entry.category = event.category.clone();
                Box::pin(async { Ok(()) })
            },
        );
    } else {
        builder.map::<ProductAddedToCatalog>().as_update_of(
            |e| e.product_key.clone(),
            |entry, event, _ctx| {
                entry.category = event.category.clone();
                Box::pin(async { Ok(()) })
            },
        );
    }
}

fn transaction(id: &str, checkpoint: u64, body: impl std::any::Any + Send + Sync) -> Transaction {
    let mut transaction = Transaction::new(id.to_string(), vec![EventEnvelope::new(body)]);
    transaction.checkpoint = Checkpoint::new(checkpoint);
    transaction
}

fn added(key: &str, category: &str) -> ProductAddedToCatalog {
    ProductAddedToCatalog {
        product_key: key.to_string(),
        category: category.to_string(),
    }
}

fn stored_entry(store: &InMemoryProjectionStore, key: &str) -> Option<CatalogEntry> {
    futures::executor::block_on(store.get(key))
        .unwrap()
        .map(|bytes| bincode::deserialize(&bytes).unwrap())
}

#[tokio::test]
async fn a_create_mapping_materializes_a_new_entry() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap();

    assert_eq!(
        stored_entry(&store, "c350E"),
        Some(CatalogEntry {
            category: "Hybrid".to_string()
        })
    );
}

#[tokio::test]
async fn updating_an_absent_entry_fails_with_the_event_attached() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, false);
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap();

    let error = projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap_err();

    assert!(matches!(error.kind(), ErrorKind::MissingKey(key) if key == "c350E"));
    let context = error.failure_context().unwrap();
    assert_eq!(context.transaction_id, "t1");
    assert!(store.is_empty());
}

#[tokio::test]
async fn creating_a_duplicate_entry_fails_while_create_if_absent_skips_it() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    builder.map::<ProductDiscontinued>().as_delete_of(|e| e.product_key.clone());
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap();
    let error = projector
        .handle(&[transaction("t2", 2, added("c350E", "Electric"))])
        .await
        .unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::DuplicateKey(key) if key == "c350E"));

    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    builder.map::<ProductAddedToCatalog>().as_create_if_absent_of(
        |e| e.product_key.clone(),
        |entry, event, _ctx| {
            entry.category = event.category.clone();
            Box::pin(async { Ok(()) })
        },
    );
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap();

    projector
        .handle(&[
            transaction("t1", 1, added("c350E", "Hybrid")),
            transaction("t2", 2, added("c350E", "Electric")),
        ])
        .await
        .unwrap();

    // The second event was skipped, not applied.
    assert_eq!(
        stored_entry(&store, "c350E"),
        Some(CatalogEntry {
            category: "Hybrid".to_string()
        })
    );
}

#[tokio::test]
async fn update_if_exists_skips_an_absent_entry_without_touching_storage() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    builder.map::<ProductAddedToCatalog>().as_update_if_exists_of(
        |e| e.product_key.clone(),
        |entry, event, _ctx| {
            entry.category = event.category.clone();
            Box::pin(async { Ok(()) })
        },
    );
    let projector =
        StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,Arc::clone(&cache), builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap();

    assert!(store.is_empty());
    assert_eq!(cache.hits(), 0);
}

#[tokio::test]
async fn create_or_update_creates_then_overwrites_the_same_entry() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    builder.map::<ProductAddedToCatalog>().as_create_or_update_of(
        |e| e.product_key.clone(),
        |entry, event, _ctx| {
            entry.category = event.category.clone();
            Box::pin(async { Ok(()) })
        },
    );
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap();
    assert_eq!(
        stored_entry(&store, "c350E"),
        Some(CatalogEntry {
            category: "Hybrid".to_string()
        })
    );

    projector
        .handle(&[transaction("t2", 2, added("c350E", "Electric"))])
        .await
        .unwrap();
    assert_eq!(
        stored_entry(&store, "c350E"),
        Some(CatalogEntry {
            category: "Electric".to_string()
        })
    );
}

#[tokio::test]
async fn deleting_an_uncached_entry_still_removes_it_from_storage() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    builder.map::<ProductDiscontinued>().as_delete_of(|e| e.product_key.clone());
    let projector =
        StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,Arc::clone(&cache), builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap();
    // Evict everything, leaving the entry in storage only.
    cache.clear();

    projector
        .handle(&[transaction(
            "t2",
            2,
            ProductDiscontinued {
                product_key: "c350E".to_string(),
            },
        )])
        .await
        .unwrap();

    assert!(store.is_empty());
}

#[tokio::test]
async fn deleting_removes_the_entry_from_store_and_cache() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    builder.map::<ProductDiscontinued>().as_delete_of(|e| e.product_key.clone());
    let projector =
        StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,Arc::clone(&cache), builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, added("c350E", "Hybrid"))])
        .await
        .unwrap();
    projector
        .handle(&[transaction(
            "t2",
            2,
            ProductDiscontinued {
                product_key: "c350E".to_string(),
            },
        )])
        .await
        .unwrap();

    assert!(store.is_empty());
    assert!(cache.is_empty());

    // A second delete of the same key now fails.
    let error = projector
        .handle(&[transaction(
            "t3",
            3,
            ProductDiscontinued {
                product_key: "c350E".to_string(),
            },
        )])
        .await
        .unwrap_err();
    assert!(matches!(error.kind(), ErrorKind::MissingKey(key) if key == "c350E"));
}

#[tokio::test]
async fn delete_if_exists_tolerates_a_missing_entry() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::<CatalogEntry>::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    builder
        .map::<ProductDiscontinued>()
        .as_delete_if_exists_of(|e| e.product_key.clone());
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap();

    projector
        .handle(&[transaction(
            "t1",
            1,
            ProductDiscontinued {
                product_key: "c350E".to_string(),
            },
        )])
        .await
        .unwrap();
}

#[tokio::test]
async fn an_unmapped_event_touches_neither_store_nor_cache() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    let projector =
        StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,Arc::clone(&cache), builder).unwrap();

    projector
        .handle(&[transaction("t1", 1, CatalogClosed)])
        .await
        .unwrap();

    assert!(store.is_empty());
    assert_eq!(cache.hits() + cache.misses(), 0);
}

#[tokio::test]
async fn the_checkpoint_record_is_overwritten_after_each_batch() {
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    let projector = StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder)
        .unwrap()
        .with_checkpoint_store(Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>, "catalog");

    assert_eq!(projector.resume_checkpoint().await.unwrap(), None);

    projector
        .handle(&[
            transaction("t1", 1, added("c350E", "Hybrid")),
            transaction("t2", 2, added("c351E", "Electric")),
        ])
        .await
        .unwrap();
    projector
        .handle(&[transaction("t3", 3, added("c352E", "Diesel"))])
        .await
        .unwrap();

    let state = checkpoints.load_checkpoint("catalog").await.unwrap().unwrap();
    assert_eq!(state.checkpoint, Checkpoint::new(3));
    assert_eq!(
        projector.resume_checkpoint().await.unwrap(),
        Some(Checkpoint::new(4))
    );
}

#[tokio::test]
async fn the_full_pipeline_projects_writes_from_the_log() {
    let log = Arc::new(MemoryEventLog::new(10));
    let store = Arc::new(InMemoryProjectionStore::new());
    let cache = Arc::new(LruProjectionCache::new(1000, Expiration::Never));
    let mut builder = CatalogBuilder::new();
    set_category(&mut builder, true);
    builder.map::<ProductDiscontinued>().as_delete_of(|e| e.product_key.clone());
    let projector = Arc::new(
        StoreProjector::new(Arc::clone(&store) as Arc<dyn ProjectionStore>,cache, builder).unwrap(),
    );

    let handler: TransactionHandler = {
        let projector = Arc::clone(&projector);
        Arc::new(move |batch: Vec<Transaction>, _info| {
            let projector = Arc::clone(&projector);
            Box::pin(async move { projector.handle(&batch).await })
        })
    };

    log.write_event(added("c350E", "Hybrid")).await.unwrap();

    let dispatcher = Dispatcher::new(Arc::clone(&log) as Arc<dyn prism_core::log::EventLog>);
    dispatcher
        .subscribe(None, handler, SubscriptionOptions::with_id("catalog"))
        .await
        .unwrap();

    log.write_event(added("c351E", "Electric")).await.unwrap();
    log.write_event(ProductDiscontinued {
        product_key: "c350E".to_string(),
    })
    .await
    .unwrap();

    assert_eq!(stored_entry(&store, "c350E"), None);
    assert_eq!(
        stored_entry(&store, "c351E"),
        Some(CatalogEntry {
            category: "Electric".to_string()
        })
    );
}
