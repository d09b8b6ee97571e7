//! Consistency guarantees of the sync core.
//!
//! Each test drives the public API against an in-process store and checks
//! what ends up in the store, the mirror and the derived views.

mod common;

use std::sync::Arc;
use std::time::Duration;

use armory_engine::{
    Error, Freshness, LogKind, ManualClock, MemoryBackend, MoneyType, ProfitRecord, Record,
    StorageBackend, Storefront, SyncConfig, SyncEvent, Topic, UpsertOutcome,
};
use common::*;

// ============================================================================
// Upsert
// ============================================================================

#[tokio::test]
async fn identical_additions_merge_into_one_row() {
    let (shop, backend, _) = local_storefront();
    let writes = shop.coordinator();

    let first = writes.upsert_item(draft("Pistol", 800.0, 1200.0, 2)).await.unwrap();
    let second = writes.upsert_item(draft("Pistol", 800.0, 1200.0, 3)).await.unwrap();

    assert!(matches!(first, UpsertOutcome::Created { .. }));
    assert_eq!(
        second,
        UpsertOutcome::Merged {
            id: first.id().clone(),
            quantity: 5
        }
    );

    let rows = items_named(backend.as_ref(), "Pistol").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].quantity, 5);
}

#[tokio::test]
async fn prices_within_tolerance_still_merge() {
    let (shop, backend, _) = local_storefront();
    let writes = shop.coordinator();

    writes.upsert_item(draft("SMG", 100.0, 150.0, 1)).await.unwrap();
    let outcome = writes
        .upsert_item(draft("SMG", 100.005, 150.01, 1))
        .await
        .unwrap();

    assert!(matches!(outcome, UpsertOutcome::Merged { quantity: 2, .. }));
    assert_eq!(items_named(backend.as_ref(), "SMG").await.len(), 1);
}

#[tokio::test]
async fn cost_one_cent_apart_still_merges() {
    let (shop, backend, _) = local_storefront();
    let writes = shop.coordinator();

    writes.upsert_item(draft("Rifle", 100.0, 150.0, 1)).await.unwrap();
    let outcome = writes
        .upsert_item(draft("Rifle", 100.01, 150.0, 1))
        .await
        .unwrap();

    assert!(matches!(outcome, UpsertOutcome::Merged { quantity: 2, .. }));
    assert_eq!(items_named(backend.as_ref(), "Rifle").await.len(), 1);
}

#[tokio::test]
async fn unconfirmed_create_fails_verification() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    backend.lag_inserts(usize::MAX);
    let (shop, _) = storefront(backend.clone());

    let result = shop
        .coordinator()
        .upsert_item(draft("Pistol", 800.0, 1200.0, 1))
        .await;

    assert!(matches!(result, Err(Error::VerificationFailed(_))));
    assert_eq!(backend.weapon_gets(), shop.config().verify_attempts as usize);
}

#[tokio::test]
async fn late_create_is_confirmed_on_retry() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    backend.lag_inserts(1);
    let (shop, _) = storefront(backend.clone());

    let outcome = shop
        .coordinator()
        .upsert_item(draft("Pistol", 800.0, 1200.0, 1))
        .await
        .unwrap();

    assert!(matches!(outcome, UpsertOutcome::Created { .. }));
    assert_eq!(backend.weapon_gets(), 2);
}

#[tokio::test]
async fn visible_create_is_confirmed_without_waiting() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    let config = SyncConfig::default().with_verification(3, Duration::from_secs(30));
    let shop = Storefront::new(backend.clone(), Arc::new(ManualClock::new(0)), config);

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        shop.coordinator().upsert_item(draft("Pistol", 800.0, 1200.0, 1)),
    )
    .await
    .expect("read-back waited for a backoff")
    .unwrap();

    assert!(matches!(outcome, UpsertOutcome::Created { .. }));
    assert_eq!(backend.weapon_gets(), 1);
}

#[tokio::test]
async fn diverging_prices_create_a_second_row() {
    let (shop, backend, _) = local_storefront();
    let writes = shop.coordinator();

    writes.upsert_item(draft("SMG", 100.0, 150.0, 1)).await.unwrap();
    let outcome = writes.upsert_item(draft("SMG", 100.0, 150.02, 1)).await.unwrap();
    assert!(matches!(outcome, UpsertOutcome::Created { .. }));

    let outcome = writes.upsert_item(draft("SMG", 100.02, 150.0, 1)).await.unwrap();
    assert!(matches!(outcome, UpsertOutcome::Created { .. }));

    assert_eq!(items_named(backend.as_ref(), "SMG").await.len(), 3);
}

#[tokio::test]
async fn money_type_separates_rows() {
    let (shop, backend, _) = local_storefront();
    let writes = shop.coordinator();

    writes.upsert_item(draft("Rifle", 10.0, 20.0, 1)).await.unwrap();
    let dirty = draft("Rifle", 10.0, 20.0, 1);
    let dirty = armory_engine::ItemDraft {
        money_type: MoneyType::Dirty,
        ..dirty
    };
    let outcome = writes.upsert_item(dirty).await.unwrap();

    assert!(matches!(outcome, UpsertOutcome::Created { .. }));
    assert_eq!(items_named(backend.as_ref(), "Rifle").await.len(), 2);
}

#[tokio::test]
async fn validation_errors_never_reach_the_store() {
    let (shop, backend, _) = local_storefront();
    let writes = shop.coordinator();

    assert!(matches!(
        writes.upsert_item(draft("  ", 1.0, 2.0, 1)).await,
        Err(Error::ValidationFailed(_))
    ));
    assert!(matches!(
        writes.upsert_item(draft("Knife", -1.0, 2.0, 1)).await,
        Err(Error::ValidationFailed(_))
    ));
    assert!(matches!(
        writes.upsert_item(draft("Knife", 1.0, 2.0, 0)).await,
        Err(Error::ValidationFailed(_))
    ));

    assert_eq!(backend.document_count(Topic::Weapons), 0);
    assert_eq!(backend.document_count(Topic::Logs), 0);
}

#[tokio::test]
async fn overwrite_of_a_deleted_row_is_not_found() {
    let (shop, _, _) = local_storefront();
    let writes = shop.coordinator();

    let id = writes
        .upsert_item(draft("Pistol", 1.0, 2.0, 1))
        .await
        .unwrap()
        .id()
        .clone();
    writes.remove_item(&id).await.unwrap();

    let result = writes
        .upsert_item(draft("Pistol", 1.0, 3.0, 1).with_id(id.clone()))
        .await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(matches!(writes.remove_item(&id).await, Err(Error::NotFound(_))));
    assert!(matches!(writes.remove_item("").await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn overwrite_keeps_creation_time() {
    let (shop, backend, clock) = local_storefront();
    let writes = shop.coordinator();

    let id = writes
        .upsert_item(draft("Pistol", 1.0, 2.0, 1))
        .await
        .unwrap()
        .id()
        .clone();
    let created = items_named(backend.as_ref(), "Pistol").await[0].created_at;

    clock.advance(60_000);
    let outcome = writes
        .upsert_item(draft("Pistol", 1.5, 2.5, 7).with_id(id.clone()))
        .await
        .unwrap();
    assert_eq!(outcome, UpsertOutcome::Updated { id });

    let row = &items_named(backend.as_ref(), "Pistol").await[0];
    assert_eq!(row.created_at, created);
    assert_eq!(row.quantity, 7);
    assert_eq!(row.price, 2.5);
}

// ============================================================================
// Sales
// ============================================================================

#[tokio::test]
async fn sale_at_zero_quantity_has_no_effect() {
    let (shop, backend, _) = local_storefront();
    let id = seed_item(backend.as_ref(), "Pistol", 100.0, 150.0, 0, MoneyType::Clean).await;

    let result = shop.coordinator().record_sale(&id, 150.0).await;
    assert_eq!(result, Err(Error::StockExhausted(id.clone())));

    assert_eq!(backend.document_count(Topic::Profits), 0);
    assert_eq!(backend.document_count(Topic::Logs), 0);
    assert_eq!(items_named(backend.as_ref(), "Pistol").await[0].quantity, 0);
}

#[tokio::test]
async fn last_unit_sale_records_profit_and_leaves_buyer_listings() {
    let (shop, backend, _) = local_storefront();
    let id = seed_item(backend.as_ref(), "Pistol", 100.0, 150.0, 1, MoneyType::Dirty).await;
    shop.policy().refresh().await.unwrap();
    assert_eq!(shop.buyer_listings().await.unwrap().len(), 1);

    let receipt = shop.coordinator().record_sale(&id, 180.0).await.unwrap();
    assert_eq!(receipt.remaining, 0);
    assert_eq!(receipt.profit, 80.0);

    assert_eq!(items_named(backend.as_ref(), "Pistol").await[0].quantity, 0);

    let profits = ProfitRecord::decode_all(&backend.list(Topic::Profits).await.unwrap());
    assert_eq!(profits.len(), 1);
    assert_eq!(profits[0].profit, 80.0);
    assert_eq!(profits[0].sale_price, 180.0);
    assert_eq!(profits[0].money_type, MoneyType::Dirty);
    assert!(!profits[0].from_request);

    // The refresh after the write already reflects the sale.
    assert!(shop.buyer_listings().await.unwrap().is_empty());
    let admin = shop.admin_listings().await.unwrap();
    assert_eq!(admin.len(), 1);
    assert_eq!(admin[0].total_quantity, 0);

    let logs = shop.logs().await.unwrap();
    assert_eq!(logs[0].kind, LogKind::Sale);
    assert_eq!(logs[0].amount, 80.0);
    assert_eq!(logs[0].money_type, Some(MoneyType::Dirty));
}

#[tokio::test]
async fn sale_without_atomic_increment_clamps_quantity() {
    let backend = std::sync::Arc::new(MemoryBackend::new().without_increment());
    let (shop, _) = storefront(backend.clone());
    let id = seed_item(backend.as_ref(), "Knife", 5.0, 10.0, 2, MoneyType::Clean).await;

    let receipt = shop.coordinator().record_sale(&id, 10.0).await.unwrap();
    assert_eq!(receipt.remaining, 1);
    let receipt = shop.coordinator().record_sale(&id, 10.0).await.unwrap();
    assert_eq!(receipt.remaining, 0);
    assert!(matches!(
        shop.coordinator().record_sale(&id, 10.0).await,
        Err(Error::StockExhausted(_))
    ));
    assert_eq!(backend.document_count(Topic::Profits), 2);
}

#[tokio::test]
async fn sell_listing_picks_a_row_with_stock() {
    let (shop, backend, _) = local_storefront();
    seed_item(backend.as_ref(), "Pistol", 100.0, 150.0, 0, MoneyType::Clean).await;
    let stocked = seed_item(backend.as_ref(), "Pistol", 100.0, 150.0, 3, MoneyType::Clean).await;

    let receipt = shop
        .coordinator()
        .sell_listing("Pistol", MoneyType::Clean, 150.0)
        .await
        .unwrap();
    assert_eq!(receipt.item_id, stocked);
    assert_eq!(receipt.remaining, 2);

    assert!(matches!(
        shop.coordinator()
            .sell_listing("Pistol", MoneyType::Dirty, 150.0)
            .await,
        Err(Error::StockExhausted(_))
    ));
}

#[tokio::test]
async fn negative_sale_price_is_rejected() {
    let (shop, backend, _) = local_storefront();
    let id = seed_item(backend.as_ref(), "Pistol", 1.0, 2.0, 1, MoneyType::Clean).await;
    assert!(matches!(
        shop.coordinator().record_sale(&id, -5.0).await,
        Err(Error::ValidationFailed(_))
    ));
    assert_eq!(items_named(backend.as_ref(), "Pistol").await[0].quantity, 1);
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn permission_denied_clears_mirror_and_blocks() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    seed_item(backend.as_ref(), "Pistol", 1.0, 2.0, 1, MoneyType::Clean).await;
    let (shop, _) = storefront(backend.clone());
    shop.start().await.unwrap();
    assert_eq!(shop.mirror().len(), 1);

    let mut events = shop.events();
    backend.fail_reads(Error::PermissionDenied("rules".into()));

    let err = shop.read_through(Topic::Weapons).await.unwrap_err();
    assert!(err.is_blocking());
    assert!(shop.mirror().is_empty());

    let event = wait_for(&mut events, |e| matches!(e, SyncEvent::Blocked(_))).await;
    assert_eq!(
        event,
        SyncEvent::Blocked(Error::PermissionDenied("rules".into()))
    );
    shop.shutdown().await;
}

#[tokio::test]
async fn unreachable_store_serves_previous_snapshot() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    seed_item(backend.as_ref(), "Pistol", 1.0, 2.0, 4, MoneyType::Clean).await;
    let (shop, _) = storefront(backend.clone());
    shop.start().await.unwrap();
    let before = shop.mirror().snapshot();

    backend.fail_reads(Error::Unreachable("timeout".into()));
    let view = shop.read_through(Topic::Weapons).await.unwrap();

    assert!(view.is_stale());
    assert_eq!(view.freshness, Freshness::Stale(Error::Unreachable("timeout".into())));
    assert_eq!(view.items().unwrap(), &before);
    assert_eq!(shop.mirror().snapshot(), before);

    // Derived views keep working on the stale copy.
    assert_eq!(shop.buyer_listings().await.unwrap()[0].total_quantity, 4);

    backend.heal();
    let view = shop.read_through(Topic::Weapons).await.unwrap();
    assert_eq!(view.freshness, Freshness::Fresh);
    shop.shutdown().await;
}

#[tokio::test]
async fn remote_reads_refetch_only_after_a_subscription() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    let (shop, _) = storefront(backend.clone());

    let view = shop.read_through(Topic::Weapons).await.unwrap();
    assert_eq!(view.freshness, Freshness::Cached);

    shop.resubscribe(Topic::Weapons).await.unwrap();
    seed_item(backend.as_ref(), "Pistol", 1.0, 2.0, 1, MoneyType::Clean).await;
    let view = shop.read_through(Topic::Weapons).await.unwrap();
    assert_eq!(view.freshness, Freshness::Fresh);
    assert_eq!(view.items().unwrap().len(), 1);

    // Still refetched after the subscription is gone.
    shop.subscriptions().unsubscribe(Topic::Weapons).await;
    let view = shop.read_through(Topic::Weapons).await.unwrap();
    assert_eq!(view.freshness, Freshness::Fresh);
}

#[tokio::test]
async fn denied_log_read_also_blocks() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    seed_item(backend.as_ref(), "Pistol", 1.0, 2.0, 1, MoneyType::Clean).await;
    let (shop, _) = storefront(backend.clone());
    shop.policy().refresh().await.unwrap();
    assert_eq!(shop.mirror().len(), 1);

    let mut events = shop.events();
    backend.fail_reads(Error::PermissionDenied("rules".into()));

    assert!(matches!(
        shop.read_through(Topic::Logs).await,
        Err(Error::PermissionDenied(_))
    ));
    assert!(shop.mirror().is_empty());
    let event = wait_for(&mut events, |e| matches!(e, SyncEvent::Blocked(_))).await;
    assert_eq!(
        event,
        SyncEvent::Blocked(Error::PermissionDenied("rules".into()))
    );
}

#[tokio::test]
async fn other_topics_propagate_read_errors() {
    let backend = FlakyBackend::new(MemoryBackend::new());
    let (shop, _) = storefront(backend.clone());
    backend.fail_reads(Error::Unreachable("down".into()));

    assert!(matches!(shop.logs().await, Err(Error::Unreachable(_))));
    assert!(matches!(
        shop.read_through(Topic::Profits).await,
        Err(Error::Unreachable(_))
    ));
}
