//! Per-shard single-database engine seam.
//!
//! The federation layer never talks to storage directly; every physical
//! read and write goes through a [`ShardEngine`] connection obtained from
//! the shard connection pool.

pub mod change;
pub mod memory;

use crate::core::{EntityDescriptor, Result, Row, Value};
use crate::expression::{Assignments, Expr};
use crate::planner::ShardAggregate;
use crate::query::DataQueryModel;
use crate::routing::{PhysicDataSource, PhysicTable};
use async_trait::async_trait;

pub use memory::{EngineCounters, InMemoryConnection, InMemoryEngine};

/// A live connection to one data source.
pub trait ShardConnection: Send + 'static {
    /// True while a transaction opened with `begin` is still open.
    fn in_transaction(&self) -> bool;
}

#[async_trait]
pub trait ShardEngine: Send + Sync + 'static {
    type Connection: ShardConnection;

    async fn connect(&self, data_source: &PhysicDataSource) -> Result<Self::Connection>;

    /// Full rows matching the query, ordered and paged as requested.
    async fn query(
        &self,
        conn: &mut Self::Connection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
    ) -> Result<Vec<Row>>;

    /// Like [`query`](Self::query) but returning only `members`, in order.
    async fn query_projection(
        &self,
        conn: &mut Self::Connection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
        members: &[String],
    ) -> Result<Vec<Row>>;

    /// One value per requested primitive over the matching rows.
    async fn aggregate(
        &self,
        conn: &mut Self::Connection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
        aggregates: &[ShardAggregate],
    ) -> Result<Vec<Value>>;

    async fn insert(
        &self,
        conn: &mut Self::Connection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        rows: &[Row],
    ) -> Result<u64>;

    async fn update(
        &self,
        conn: &mut Self::Connection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        predicate: Option<&Expr>,
        assignments: &Assignments,
    ) -> Result<u64>;

    async fn delete(
        &self,
        conn: &mut Self::Connection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        predicate: Option<&Expr>,
    ) -> Result<u64>;

    async fn begin(&self, conn: &mut Self::Connection) -> Result<()>;

    async fn commit(&self, conn: &mut Self::Connection) -> Result<()>;

    async fn rollback(&self, conn: &mut Self::Connection) -> Result<()>;
}
