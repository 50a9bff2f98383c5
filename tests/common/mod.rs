#![allow(dead_code)]

use async_trait::async_trait;
use lazy_static::lazy_static;
use shardmemodb::core::{DataType, DbError, Entity, EntityDescriptor, Member, Result, Row, Value};
use shardmemodb::engine::{InMemoryConnection, InMemoryEngine, ShardEngine};
use shardmemodb::expression::{Assignments, Expr};
use shardmemodb::planner::ShardAggregate;
use shardmemodb::query::DataQueryModel;
use shardmemodb::routing::{ModShardingStrategy, PhysicDataSource, PhysicTable, ShardingConfig, ShardingRegistry};
use shardmemodb::{ShardingDbContext, ShardingOptions};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub amount: i64,
}

impl Order {
    pub fn new(id: i64, customer_id: i64, amount: i64) -> Self {
        Self {
            id,
            customer_id,
            amount,
        }
    }
}

lazy_static! {
    static ref ORDER: EntityDescriptor = EntityDescriptor::new(
        "Order",
        vec![
            Member::new("id", DataType::Integer).not_null(),
            Member::new("customer_id", DataType::Integer).not_null(),
            Member::new("amount", DataType::Integer),
        ],
        "id",
    );
}

impl Entity for Order {
    fn descriptor() -> &'static EntityDescriptor {
        &ORDER
    }

    fn to_row(&self) -> Row {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.customer_id),
            Value::Integer(self.amount),
        ]
    }

    fn from_row(row: &Row) -> Result<Self> {
        let int = |i: usize| {
            row.get(i)
                .and_then(Value::as_i64)
                .ok_or_else(|| DbError::TypeMismatch(format!("member #{} is not an integer", i)))
        };
        Ok(Order::new(int(0)?, int(1)?, int(2)?))
    }
}

/// `customer_id mod 4` over `Order_0..Order_3`, on one data source or
/// alternating over `ds0`/`ds1`.
pub fn order_registry(data_sources: usize) -> ShardingRegistry {
    let mut strategy = ModShardingStrategy::new("Order", 4).unwrap();
    if data_sources > 1 {
        strategy = strategy
            .with_data_sources((0..data_sources).map(|i| format!("ds{}", i)))
            .unwrap();
    }
    ShardingRegistry::new()
        .with::<Order>(ShardingConfig::for_entity::<Order>("customer_id", strategy))
        .unwrap()
}

pub fn order_context(data_sources: usize) -> ShardingDbContext<InMemoryEngine> {
    order_context_with(data_sources, ShardingOptions::new())
}

pub fn order_context_with(
    data_sources: usize,
    options: ShardingOptions,
) -> ShardingDbContext<InMemoryEngine> {
    ShardingDbContext::new(InMemoryEngine::new(), order_registry(data_sources), options).unwrap()
}

pub fn faulty_context(engine: FaultyEngine, data_sources: usize) -> ShardingDbContext<FaultyEngine> {
    ShardingDbContext::new(engine, order_registry(data_sources), ShardingOptions::new()).unwrap()
}

pub async fn seed<E: ShardEngine>(context: &ShardingDbContext<E>, orders: &[Order]) {
    for order in orders {
        context.insert(order).await.unwrap();
    }
}

/// Orders 1..=n with customers spread over every table.
pub fn sample_orders(n: i64) -> Vec<Order> {
    (1..=n)
        .map(|id| Order::new(id, id % 9, (id * 37) % 101))
        .collect()
}

/// In-memory engine with injectable faults.
#[derive(Debug, Default)]
pub struct FaultyEngine {
    pub inner: InMemoryEngine,
    pub fail_insert_table: Option<String>,
    pub extra_deleted: Option<(String, u64)>,
    pub query_delay: Option<Duration>,
}

impl FaultyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_inserts_on(mut self, table: &str) -> Self {
        self.fail_insert_table = Some(table.to_string());
        self
    }

    pub fn over_reporting_deletes_on(mut self, table: &str, extra: u64) -> Self {
        self.extra_deleted = Some((table.to_string(), extra));
        self
    }

    pub fn slow_queries(mut self, delay: Duration) -> Self {
        self.query_delay = Some(delay);
        self
    }
}

#[async_trait]
impl ShardEngine for FaultyEngine {
    type Connection = InMemoryConnection;

    async fn connect(&self, data_source: &PhysicDataSource) -> Result<InMemoryConnection> {
        self.inner.connect(data_source).await
    }

    async fn query(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
    ) -> Result<Vec<Row>> {
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.query(conn, descriptor, query).await
    }

    async fn query_projection(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
        members: &[String],
    ) -> Result<Vec<Row>> {
        if let Some(delay) = self.query_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.query_projection(conn, descriptor, query, members).await
    }

    async fn aggregate(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
        aggregates: &[ShardAggregate],
    ) -> Result<Vec<Value>> {
        self.inner.aggregate(conn, descriptor, query, aggregates).await
    }

    async fn insert(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        rows: &[Row],
    ) -> Result<u64> {
        if self.fail_insert_table.as_deref() == Some(table.name()) {
            return Err(DbError::ExecutionError(format!(
                "injected insert failure on {}",
                table.name()
            )));
        }
        self.inner.insert(conn, descriptor, table, rows).await
    }

    async fn update(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        predicate: Option<&Expr>,
        assignments: &Assignments,
    ) -> Result<u64> {
        self.inner
            .update(conn, descriptor, table, predicate, assignments)
            .await
    }

    async fn delete(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        predicate: Option<&Expr>,
    ) -> Result<u64> {
        let deleted = self.inner.delete(conn, descriptor, table, predicate).await?;
        match &self.extra_deleted {
            Some((name, extra)) if name == table.name() => Ok(deleted + extra),
            _ => Ok(deleted),
        }
    }

    async fn begin(&self, conn: &mut InMemoryConnection) -> Result<()> {
        self.inner.begin(conn).await
    }

    async fn commit(&self, conn: &mut InMemoryConnection) -> Result<()> {
        self.inner.commit(conn).await
    }

    async fn rollback(&self, conn: &mut InMemoryConnection) -> Result<()> {
        self.inner.rollback(conn).await
    }
}

pub fn shared(engine: FaultyEngine) -> Arc<FaultyEngine> {
    Arc::new(engine)
}
