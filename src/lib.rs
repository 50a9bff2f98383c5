// ============================================================================
// ShardMemoDB Library
// ============================================================================

pub mod connection;
pub mod core;
pub mod engine;
pub mod executor;
pub mod expression;
pub mod facade;
pub mod planner;
pub mod query;
pub mod routing;
pub mod transaction;

// Re-export main types for convenience
pub use core::{DataType, DbError, Entity, EntityDescriptor, Member, Result, Row, Value};
pub use expression::{Assignments, Expr, bound, col, lit, param};

// Re-export routing configuration
pub use routing::{
    ModShardingStrategy, PhysicDataSource, PhysicTable, RangeRoute, RangeShardingStrategy,
    RouteTable, RoutingResolver, ShardingConfig, ShardingRegistry, ShardingStrategy,
};

// Re-export execution API
pub use connection::{PaginationMode, PoolStats, ShardingOptions};
pub use engine::{InMemoryEngine, ShardConnection, ShardEngine};
pub use executor::CancellationSignal;
pub use facade::{BlockingQuery, ShardingDb, ShardingDbContext};
pub use query::{AggregateFunction, LockType, PagedList, QueryExpression, ShardedQuery};
pub use transaction::{ShardTransaction, TransactionState};

// ============================================================================
// Sharded entity context
// ============================================================================
//
// Entities are plain Rust types implementing `Entity`. A `ShardingRegistry`
// maps each entity to a shard key and a `ShardingStrategy`; the context then
// routes writes to physical tables, fans queries out across them and merges
// the results back into one globally ordered stream.
//
// ```ignore
// use shardmemodb::*;
//
// let registry = ShardingRegistry::new().with::<Order>(ShardingConfig::for_entity::<Order>(
//     "customer_id",
//     ModShardingStrategy::new("Order", 4)?,
// ))?;
// let context = ShardingDbContext::new(InMemoryEngine::new(), registry, ShardingOptions::new())?;
//
// context.insert(&Order { id: 1, customer_id: 42, amount: 250 }).await?;
// let page = context.query::<Order>().order_by_desc("amount").paging(1, 20).await?;
// println!("{} orders", page.total_count);
// ```
