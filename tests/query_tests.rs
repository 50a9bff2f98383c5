mod common;

use common::{Order, order_context, order_context_with, sample_orders, seed};
use shardmemodb::core::DbError;
use shardmemodb::expression::col;
use shardmemodb::{PaginationMode, QueryExpression, ShardedQuery, ShardingOptions};

fn by_amount_desc(orders: &[Order]) -> Vec<Order> {
    let mut sorted = orders.to_vec();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount).then(a.id.cmp(&b.id)));
    sorted
}

#[tokio::test]
async fn test_merge_is_globally_ordered() {
    let context = order_context(2);
    let orders = sample_orders(60);
    seed(&context, &orders).await;

    let result = context
        .query::<Order>()
        .order_by_desc("amount")
        .to_list()
        .await
        .unwrap();
    assert_eq!(result, by_amount_desc(&orders));
}

#[tokio::test]
async fn test_unordered_query_uses_primary_key() {
    let context = order_context(1);
    let orders = sample_orders(25);
    seed(&context, &orders).await;

    let ids: Vec<i64> = context
        .query::<Order>()
        .to_list()
        .await
        .unwrap()
        .iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(ids, (1..=25).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_skip_take_window() {
    let context = order_context(2);
    let orders = sample_orders(40);
    seed(&context, &orders).await;
    let expected = by_amount_desc(&orders);

    let page = context
        .query::<Order>()
        .order_by_desc("amount")
        .skip(7)
        .take(5)
        .to_list()
        .await
        .unwrap();
    assert_eq!(page, expected[7..12].to_vec());

    let tail = context
        .query::<Order>()
        .order_by_desc("amount")
        .skip(35)
        .to_list()
        .await
        .unwrap();
    assert_eq!(tail, expected[35..].to_vec());

    let none = context
        .query::<Order>()
        .order_by_desc("amount")
        .take(0)
        .to_list()
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_pagination_modes_agree() {
    let orders = sample_orders(50);
    let key_phase = order_context_with(2, ShardingOptions::new().max_in_items(3));
    let prefetch = order_context_with(
        2,
        ShardingOptions::new().pagination_mode(PaginationMode::Prefetch),
    );
    seed(&key_phase, &orders).await;
    seed(&prefetch, &orders).await;

    for (skip, take) in [(0, 10), (5, 10), (45, 10), (60, 5)] {
        let a = key_phase
            .query::<Order>()
            .filter(col("amount").gt(20))
            .order_by("amount")
            .then_by_desc("customer_id")
            .skip(skip)
            .take(take)
            .to_list()
            .await
            .unwrap();
        let b = prefetch
            .query::<Order>()
            .filter(col("amount").gt(20))
            .order_by("amount")
            .then_by_desc("customer_id")
            .skip(skip)
            .take(take)
            .to_list()
            .await
            .unwrap();
        assert_eq!(a, b, "skip {} take {}", skip, take);
    }

    let counters = key_phase.engine().counters();
    assert!(counters.projections > 0);
    assert_eq!(prefetch.engine().counters().projections, 0);
}

#[tokio::test]
async fn test_first() {
    let context = order_context(2);
    let orders = sample_orders(20);
    seed(&context, &orders).await;

    let top = context
        .query::<Order>()
        .order_by_desc("amount")
        .first()
        .await
        .unwrap();
    assert_eq!(top, by_amount_desc(&orders).into_iter().next());

    let none = context
        .query::<Order>()
        .filter(col("customer_id").eq(1000))
        .first()
        .await
        .unwrap();
    assert!(none.is_none());

    let empty_page = context.query::<Order>().take(0).first().await.unwrap();
    assert!(empty_page.is_none());
}

#[tokio::test]
async fn test_paging() {
    let context = order_context(2);
    let orders = sample_orders(23);
    seed(&context, &orders).await;
    let expected = by_amount_desc(&orders);

    let query = context.query::<Order>().order_by_desc("amount");
    let page = query.paging(3, 10).await.unwrap();
    assert_eq!(page.total_count, 23);
    assert_eq!(page.page_number, 3);
    assert_eq!(page.page_size, 10);
    assert_eq!(page.page_count(), 3);
    assert!(!page.has_next());
    assert_eq!(page.items, expected[20..].to_vec());

    assert!(matches!(query.paging(0, 10).await, Err(DbError::ExecutionError(_))));
}

#[tokio::test]
async fn test_context_filters() {
    let context = order_context(2);
    let orders = sample_orders(30);
    seed(&context, &orders).await;

    context.has_query_filter::<Order>(col("amount").lt_eq(50)).unwrap();
    let expected = orders.iter().filter(|o| o.amount <= 50).count() as u64;
    assert_eq!(context.query::<Order>().count().await.unwrap(), expected);
    assert_eq!(
        context.query::<Order>().ignore_all_filters().count().await.unwrap(),
        30
    );

    // Clones share registered filters.
    let clone = context.clone();
    assert_eq!(clone.query::<Order>().count().await.unwrap(), expected);

    assert!(matches!(
        context.has_query_filter::<Order>(col("region").eq("eu")),
        Err(DbError::ColumnNotFound(..))
    ));
}

#[tokio::test]
async fn test_unsupported_shapes() {
    let context = order_context(1);

    let err = ShardedQuery::<_, Order>::from_expression(
        &context,
        QueryExpression::root("Order").distinct(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DbError::UnsupportedQueryShape(_)));

    let err = ShardedQuery::<_, Order>::from_expression(
        &context,
        QueryExpression::root("Order").order_by(col("amount").add(1)),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DbError::UnsupportedQueryShape(_)));

    let err = context
        .query::<Order>()
        .order_by("region")
        .to_list()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ColumnNotFound(..)));

    let query = ShardedQuery::<_, Order>::from_expression(
        &context,
        QueryExpression::root("Order").filter(col("amount").gt(1)).take(3),
    )
    .unwrap();
    assert!(query.to_list().await.unwrap().is_empty());
}
