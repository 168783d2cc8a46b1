//! Integration tests for call contexts, data accessors and the statement
//! cache.

mod common;

use std::sync::Arc;

use common::{customer, score, shop};
use strata_core::{ArgumentContractError, Filter, Grain, Score, SqlValue};
use strata_sync::prelude::*;

async fn prepared(score: &Arc<Score>) -> Arc<LiveConnection> {
    let connection = LiveConnection::connect("sqlite::memory:").await.unwrap();
    Synchronizer::new(score)
        .run(&mut *connection.lock().await)
        .await
        .unwrap();
    connection
}

async fn seeded() -> CallContext {
    let score = Arc::new(score(vec![shop()]));
    let connection = prepared(&score).await;
    let mut ctx = CallContext::begin(connection, score).await.unwrap();
    let customers = ctx.accessor("shop", "customer").unwrap();
    for (id, name) in [(1, "Ada"), (2, "Grace"), (3, "Barbara")] {
        customers
            .insert(&[SqlValue::Int(id), SqlValue::Text(name.to_string())])
            .await
            .unwrap();
    }
    let orders = ctx.accessor("shop", "orders").unwrap();
    for (id, customer, amount) in [(1, 1, 50), (2, 1, 700), (3, 2, 300)] {
        orders
            .insert(&[
                SqlValue::Int(id),
                SqlValue::Int(customer),
                SqlValue::Int(amount),
                SqlValue::Null,
            ])
            .await
            .unwrap();
    }
    customers.close();
    orders.close();
    ctx
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn get_reads_by_primary_key() {
    let mut ctx = seeded().await;
    let customers = ctx.accessor("shop", "customer").unwrap();

    let ada = customers.get(&[SqlValue::Int(1)]).await.unwrap().unwrap();
    assert_eq!(ada.get("name"), Some(&SqlValue::Text("Ada".to_string())));
    assert_eq!(ada.revision(), Some(1));
    assert!(customers.get(&[SqlValue::Int(99)]).await.unwrap().is_none());

    let err = customers.get(&[]).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ArgumentContract(ArgumentContractError::Count {
            expected: 1,
            provided: 0,
            ..
        })
    ));
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn select_filters_and_orders() {
    let mut ctx = seeded().await;
    let orders = ctx.accessor("shop", "orders").unwrap();

    let rows = orders
        .select(&Filter::new().ge("amount", 100), &["amount".to_string()])
        .await
        .unwrap();
    let ids: Vec<&SqlValue> = rows.iter().filter_map(|r| r.get("id")).collect();
    assert_eq!(ids, vec![&SqlValue::Int(3), &SqlValue::Int(2)]);

    let rows = orders
        .select(&Filter::new().in_list("customer_id", vec![1, 3]).is_null("note"), &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let err = orders
        .select(&Filter::new().eq("missing", 1), &[])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SyncError::ArgumentContract(ArgumentContractError::UnknownColumn { .. })
    ));
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn views_are_readable() {
    let mut ctx = seeded().await;

    let big = ctx.accessor("shop", "big_orders").unwrap();
    let rows = big.select(&Filter::new(), &[]).await.unwrap();
    assert_eq!(rows.len(), 2);

    let totals = ctx.accessor("shop", "per_customer").unwrap();
    let first = totals.get(&[SqlValue::Int(1)]).await.unwrap().unwrap();
    assert_eq!(first.get("total"), Some(&SqlValue::Int(750)));
    assert_eq!(first.get("order_count"), Some(&SqlValue::Int(2)));

    let err = totals.insert(&[SqlValue::Int(9)]).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ArgumentContract(ArgumentContractError::ReadOnly { .. })
    ));
    ctx.close().await.unwrap();
}

// =============================================================================
// Writes and revisions
// =============================================================================

#[tokio::test]
async fn versioned_update_round_trip() {
    let mut ctx = seeded().await;
    let customers = ctx.accessor("shop", "customer").unwrap();

    let mut fresh = customers.get(&[SqlValue::Int(2)]).await.unwrap().unwrap();
    let mut stale = fresh.clone();

    fresh.set("name", "Grace Hopper");
    assert!(customers.update(&mut fresh).await.unwrap());
    assert_eq!(fresh.revision(), Some(2));

    let stored = customers.get(&[SqlValue::Int(2)]).await.unwrap().unwrap();
    assert_eq!(stored, fresh);

    stale.set("name", "Someone else");
    let err = customers.update(&mut stale).await.unwrap_err();
    assert!(matches!(err, SyncError::ConcurrencyViolation { ref element } if element == "shop.customer"));
    assert!(err.is_retryable());

    // The current record still writes.
    fresh.set("name", "Rear Admiral Hopper");
    assert!(customers.update(&mut fresh).await.unwrap());
    assert_eq!(fresh.revision(), Some(3));
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn update_needs_every_column_in_the_record() {
    let mut ctx = seeded().await;
    let customers = ctx.accessor("shop", "customer").unwrap();
    let orders = ctx.accessor("shop", "orders").unwrap();

    let mut order = orders.get(&[SqlValue::Int(1)]).await.unwrap().unwrap();
    let err = customers.update(&mut order).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::ArgumentContract(ArgumentContractError::UnknownColumn { ref element, ref column })
            if element == "shop.customer" && column == "name"
    ));

    let ada = customers.get(&[SqlValue::Int(1)]).await.unwrap().unwrap();
    assert_eq!(ada.get("name"), Some(&SqlValue::Text("Ada".to_string())));
    assert_eq!(ada.revision(), Some(1));
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn rollback_and_commit_bound_the_unit_of_work() {
    let mut ctx = seeded().await;
    ctx.commit().await.unwrap();

    let customers = ctx.accessor("shop", "customer").unwrap();
    customers
        .insert(&[SqlValue::Int(4), SqlValue::Text("Frances".to_string())])
        .await
        .unwrap();
    ctx.rollback().await.unwrap();

    assert!(customers.get(&[SqlValue::Int(4)]).await.unwrap().is_none());
    assert!(customers.get(&[SqlValue::Int(1)]).await.unwrap().is_some());
    ctx.close().await.unwrap();
    assert!(matches!(
        customers.get(&[SqlValue::Int(1)]).await,
        Err(SyncError::Closed)
    ));
}

// =============================================================================
// Statement cache
// =============================================================================

#[tokio::test]
async fn statements_compile_once_per_shape() {
    let mut ctx = seeded().await;
    let orders = ctx.accessor("shop", "orders").unwrap();
    let cache = Arc::clone(ctx.statements());
    let before = cache.compilations();

    orders
        .select(&Filter::new().eq("customer_id", 1), &[])
        .await
        .unwrap();
    orders
        .select(&Filter::new().eq("customer_id", 2), &[])
        .await
        .unwrap();
    assert_eq!(cache.compilations(), before + 1);

    let by_amount = ["amount".to_string()];
    orders
        .select(&Filter::new().eq("customer_id", 1), &by_amount)
        .await
        .unwrap();
    orders
        .select(&Filter::new().eq("customer_id", 3), &by_amount)
        .await
        .unwrap();
    assert_eq!(cache.compilations(), before + 2);

    // Another accessor on the same connection shares the cache.
    let again = ctx.accessor("shop", "orders").unwrap();
    again
        .select(&Filter::new().eq("customer_id", 2), &by_amount)
        .await
        .unwrap();
    assert_eq!(cache.compilations(), before + 2);
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn each_connection_has_its_own_cache() {
    let score = Arc::new(score(vec![Grain::new("shop", "1.0").table(customer())]));
    let first = prepared(&score).await;
    let second = prepared(&score).await;

    assert!(Arc::ptr_eq(&first.statements(), &first.statements()));
    assert!(!Arc::ptr_eq(&first.statements(), &second.statements()));
}

// =============================================================================
// Resource limits
// =============================================================================

#[tokio::test]
async fn accessor_ceiling_and_sequential_reuse() {
    let mut ctx = seeded().await;

    let mut open = Vec::with_capacity(MAX_DATA_ACCESSORS);
    for _ in 0..MAX_DATA_ACCESSORS {
        open.push(ctx.accessor("shop", "customer").unwrap());
    }
    assert!(matches!(
        ctx.accessor("shop", "customer"),
        Err(SyncError::ResourceLeak { .. })
    ));
    for accessor in &open {
        accessor.close();
    }

    for i in 0..2000 {
        let customers = ctx.accessor("shop", "customer").unwrap();
        let id = i % 3 + 1;
        assert!(customers.get(&[SqlValue::Int(id)]).await.unwrap().is_some());
        customers.close();
    }
    assert_eq!(ctx.open_accessors(), 0);
    ctx.close().await.unwrap();
}
