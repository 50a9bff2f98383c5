mod common;

use common::{FaultyEngine, Order, faulty_context, order_context, order_context_with, seed};
use shardmemodb::core::{DbError, Value};
use shardmemodb::expression::{Assignments, col};
use shardmemodb::{ShardingOptions, TransactionState};

#[tokio::test]
async fn test_routed_unique_delete_skips_transaction() {
    let context = order_context(1);
    seed(&context, &[Order::new(1, 42, 10), Order::new(2, 43, 20)]).await;

    let before = context.engine().counters();
    let deleted = context
        .delete::<Order>(col("customer_id").eq(42).and(col("id").eq(1)))
        .await
        .unwrap();
    let after = context.engine().counters();

    assert_eq!(deleted, 1);
    assert_eq!(after.begins, before.begins);
    assert!(context.engine().rows("default", "Order_2").unwrap().is_empty());
}

#[tokio::test]
async fn test_unrouted_unique_delete_runs_in_transaction() {
    let context = order_context(2);
    seed(&context, &[Order::new(1, 42, 10), Order::new(2, 43, 20)]).await;

    let before = context.engine().counters();
    let deleted = context.delete::<Order>(col("id").eq(2)).await.unwrap();
    let after = context.engine().counters();

    assert_eq!(deleted, 1);
    // one lane per data source
    assert_eq!(after.begins - before.begins, 2);
    assert_eq!(after.commits - before.commits, 2);
    assert_eq!(context.query::<Order>().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_unique_violation_rolls_back() {
    let context = faulty_context(FaultyEngine::new().over_reporting_deletes_on("Order_3", 1), 1);
    seed(&context, &[Order::new(5, 42, 10)]).await;

    let err = context.delete::<Order>(col("id").eq(5)).await.unwrap_err();
    match err {
        DbError::UniquenessViolation { expected, actual } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected {:?}", other),
    }

    let engine = &context.engine().inner;
    assert_eq!(engine.rows("default", "Order_2").unwrap().len(), 1);
    assert_eq!(engine.counters().rollbacks, 1);
}

#[tokio::test]
async fn test_non_unique_delete_sums_tables() {
    let context = order_context(2);
    seed(&context, &common::sample_orders(20)).await;

    let expected = common::sample_orders(20)
        .iter()
        .filter(|o| o.amount > 50)
        .count() as u64;
    let deleted = context.delete::<Order>(col("amount").gt(50)).await.unwrap();
    assert_eq!(deleted, expected);
    assert_eq!(context.query::<Order>().count().await.unwrap(), 20 - expected);
}

#[tokio::test]
async fn test_insert_range_is_atomic() {
    for data_sources in [1, 2] {
        let context = faulty_context(FaultyEngine::new().failing_inserts_on("Order_3"), data_sources);
        let orders = vec![Order::new(1, 1, 10), Order::new(2, 2, 20), Order::new(3, 3, 30)];

        let err = context.insert_range(&orders).await.unwrap_err();
        assert!(matches!(err, DbError::ExecutionError(_)), "{:?}", err);

        let engine = &context.engine().inner;
        for ds in ["default", "ds0", "ds1"] {
            for table in ["Order_1", "Order_2", "Order_3"] {
                assert!(engine.rows(ds, table).unwrap().is_empty(), "{}.{}", ds, table);
            }
        }
    }
}

#[tokio::test]
async fn test_insert_range_keeps_order_within_table() {
    let context = order_context(1);
    let orders = vec![Order::new(3, 4, 1), Order::new(1, 8, 2), Order::new(2, 0, 3)];
    assert_eq!(context.insert_range(&orders).await.unwrap(), 3);

    let ids: Vec<Value> = context
        .engine()
        .rows("default", "Order_0")
        .unwrap()
        .into_iter()
        .map(|row| row[0].clone())
        .collect();
    assert_eq!(ids, vec![Value::Integer(3), Value::Integer(1), Value::Integer(2)]);
}

#[tokio::test]
async fn test_update() {
    let context = order_context(2);
    seed(&context, &[Order::new(1, 42, 10), Order::new(2, 42, 20), Order::new(3, 7, 30)]).await;

    let updated = context
        .update::<Order>(
            col("customer_id").eq(42),
            &Assignments::new().set("amount", col("amount").add(5)),
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);

    let amounts: Vec<i64> = context
        .query::<Order>()
        .to_list()
        .await
        .unwrap()
        .iter()
        .map(|o| o.amount)
        .collect();
    assert_eq!(amounts, vec![15, 25, 30]);
}

#[tokio::test]
async fn test_update_rejections() {
    let context = order_context(1);

    let err = context
        .update::<Order>(col("id").eq(1), &Assignments::new().set("customer_id", 3))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Routing(_)));

    let err = context
        .update::<Order>(col("id").eq(1), &Assignments::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ExecutionError(_)));

    let err = context
        .update::<Order>(col("id").eq(1), &Assignments::new().set("region", "eu"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ColumnNotFound(..)));

    let err = context.delete::<Order>(col("region").eq("eu")).await.unwrap_err();
    assert!(matches!(err, DbError::ColumnNotFound(..)));
}

#[tokio::test]
async fn test_entity_update_and_delete() {
    let context = order_context(2);
    seed(&context, &[Order::new(1, 42, 10), Order::new(2, 43, 20)]).await;

    let changed = Order::new(1, 42, 99);
    assert_eq!(context.update_entity(&changed).await.unwrap(), 1);
    let found = context
        .query::<Order>()
        .filter(col("id").eq(1))
        .first()
        .await
        .unwrap();
    assert_eq!(found, Some(changed.clone()));

    assert_eq!(context.delete_entity(&changed).await.unwrap(), 1);
    assert_eq!(context.delete_entity(&changed).await.unwrap(), 0);
    assert_eq!(context.query::<Order>().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_primary_key() {
    let context = order_context(1);
    context.insert(&Order::new(1, 42, 10)).await.unwrap();
    let err = context.insert(&Order::new(1, 42, 11)).await.unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
}

#[tokio::test]
async fn test_duplicate_primary_key_within_batch() {
    let context = order_context(1);
    let err = context
        .insert_range(&[Order::new(7, 4, 10), Order::new(7, 4, 20)])
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ConstraintViolation(_)));
    assert_eq!(context.query::<Order>().count().await.unwrap(), 0);

    context
        .insert_range(&[Order::new(7, 4, 10), Order::new(8, 5, 20)])
        .await
        .unwrap();
    let all = context.query::<Order>().to_list().await.unwrap();
    let paged = context
        .query::<Order>()
        .filter(col("customer_id").in_list([4, 5]))
        .take(10)
        .to_list()
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(paged.len(), 2);
}

#[tokio::test]
async fn test_in_list_batching() {
    let context = order_context_with(1, ShardingOptions::new().max_in_items(2));
    seed(&context, &common::sample_orders(8)).await;

    let before = context.engine().counters();
    let deleted = context
        .delete::<Order>(col("id").in_list([1, 2, 3, 4, 5]))
        .await
        .unwrap();
    let after = context.engine().counters();

    assert_eq!(deleted, 5);
    // 3 slices on each of the 4 tables, in one transaction
    assert_eq!(after.writes - before.writes, 12);
    assert_eq!(after.begins - before.begins, 1);
    assert_eq!(context.query::<Order>().count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_ambient_transaction() {
    let context = order_context(2);

    let mut txn = context.begin_transaction();
    context.insert_in(&mut txn, &Order::new(1, 1, 10)).await.unwrap();
    context.insert_in(&mut txn, &Order::new(2, 2, 20)).await.unwrap();
    assert_eq!(txn.lane_count(), 2);
    txn.rollback().await.unwrap();
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert_eq!(context.query::<Order>().count().await.unwrap(), 0);

    let mut txn = context.begin_transaction();
    context
        .insert_range_in(&mut txn, &[Order::new(1, 1, 10), Order::new(2, 2, 20)])
        .await
        .unwrap();
    context
        .delete_in::<Order>(&mut txn, col("id").eq(2))
        .await
        .unwrap();
    txn.commit().await.unwrap();
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(context.query::<Order>().count().await.unwrap(), 1);

    let err = context.insert_in(&mut txn, &Order::new(3, 3, 30)).await.unwrap_err();
    assert!(matches!(err, DbError::TransactionError(_)));
}

#[tokio::test]
async fn test_failure_aborts_ambient_transaction() {
    let context = faulty_context(FaultyEngine::new().failing_inserts_on("Order_3"), 1);

    let mut txn = context.begin_transaction();
    context.insert_in(&mut txn, &Order::new(1, 1, 10)).await.unwrap();
    assert!(context.insert_in(&mut txn, &Order::new(2, 3, 10)).await.is_err());
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert!(context.engine().inner.rows("default", "Order_1").unwrap().is_empty());
}

#[tokio::test]
async fn test_dropped_transaction_discards_writes() {
    let context = order_context(2);
    seed(&context, &[Order::new(10, 4, 1)]).await;

    let mut txn = context.begin_transaction();
    context
        .insert_range_in(
            &mut txn,
            &[Order::new(1, 1, 10), Order::new(2, 2, 20), Order::new(3, 3, 30)],
        )
        .await
        .unwrap();
    context
        .delete_in::<Order>(&mut txn, col("id").eq(10))
        .await
        .unwrap();
    assert_eq!(txn.state(), TransactionState::Active);
    drop(txn);

    let remaining = context.query::<Order>().to_list().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, 10);
}
