//! Synchronous facade over [`ShardingDbContext`].
//!
//! Each call drives the async context to completion on a runtime owned by
//! the facade, so it must not be used from inside another tokio runtime.

use super::provider::ShardingDbContext;
use crate::connection::{PoolStats, ShardingOptions};
use crate::core::{DbError, Entity, Result, Value};
use crate::engine::ShardEngine;
use crate::executor::CancellationSignal;
use crate::expression::{Assignments, Expr, col};
use crate::query::{LockType, PagedList, QueryExpression, ShardedQuery};
use crate::routing::ShardingRegistry;
use crate::transaction::ShardTransaction;
use std::future::Future;
use std::marker::PhantomData;
use tokio::runtime::Runtime;

pub struct ShardingDb<E: ShardEngine> {
    runtime: Runtime,
    context: ShardingDbContext<E>,
}

impl<E: ShardEngine> ShardingDb<E> {
    pub fn new(engine: E, registry: ShardingRegistry, options: ShardingOptions) -> Result<Self> {
        let context = ShardingDbContext::new(engine, registry, options)?;
        Self::from_context(context)
    }

    pub fn from_context(context: ShardingDbContext<E>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| DbError::ExecutionError(format!("Failed to start runtime: {}", e)))?;
        Ok(Self { runtime, context })
    }

    pub fn context(&self) -> &ShardingDbContext<E> {
        &self.context
    }

    pub fn pool_stats(&self) -> Result<Vec<PoolStats>> {
        self.context.pool_stats()
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn with_cancellation(self, signal: CancellationSignal) -> Self {
        Self {
            context: self.context.with_cancellation(signal),
            runtime: self.runtime,
        }
    }

    pub fn has_query_filter<T: Entity>(&self, predicate: Expr) -> Result<()> {
        self.context.has_query_filter::<T>(predicate)
    }

    pub fn insert<T: Entity>(&self, entity: &T) -> Result<T> {
        self.block_on(self.context.insert(entity))
    }

    pub fn insert_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entity: &T) -> Result<T> {
        self.block_on(self.context.insert_in(txn, entity))
    }

    pub fn insert_content<T: Entity>(&self, content: &Assignments) -> Result<u64> {
        self.block_on(self.context.insert_content::<T>(content))
    }

    pub fn insert_content_in<T: Entity>(
        &self,
        txn: &mut ShardTransaction<E>,
        content: &Assignments,
    ) -> Result<u64> {
        self.block_on(self.context.insert_content_in::<T>(txn, content))
    }

    pub fn insert_range<T: Entity>(&self, entities: &[T]) -> Result<u64> {
        self.block_on(self.context.insert_range(entities))
    }

    pub fn insert_range_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entities: &[T]) -> Result<u64> {
        self.block_on(self.context.insert_range_in(txn, entities))
    }

    pub fn update<T: Entity>(&self, predicate: Expr, assignments: &Assignments) -> Result<u64> {
        self.block_on(self.context.update::<T>(predicate, assignments))
    }

    pub fn update_in<T: Entity>(
        &self,
        txn: &mut ShardTransaction<E>,
        predicate: Expr,
        assignments: &Assignments,
    ) -> Result<u64> {
        self.block_on(self.context.update_in::<T>(txn, predicate, assignments))
    }

    pub fn delete<T: Entity>(&self, predicate: Expr) -> Result<u64> {
        self.block_on(self.context.delete::<T>(predicate))
    }

    pub fn delete_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, predicate: Expr) -> Result<u64> {
        self.block_on(self.context.delete_in::<T>(txn, predicate))
    }

    pub fn update_entity<T: Entity>(&self, entity: &T) -> Result<u64> {
        self.block_on(self.context.update_entity(entity))
    }

    pub fn update_entity_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entity: &T) -> Result<u64> {
        self.block_on(self.context.update_entity_in(txn, entity))
    }

    pub fn delete_entity<T: Entity>(&self, entity: &T) -> Result<u64> {
        self.block_on(self.context.delete_entity(entity))
    }

    pub fn delete_entity_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entity: &T) -> Result<u64> {
        self.block_on(self.context.delete_entity_in(txn, entity))
    }

    pub fn begin_transaction(&self) -> ShardTransaction<E> {
        self.context.begin_transaction()
    }

    pub fn commit(&self, txn: &mut ShardTransaction<E>) -> Result<()> {
        self.block_on(txn.commit())
    }

    pub fn rollback(&self, txn: &mut ShardTransaction<E>) -> Result<()> {
        self.block_on(txn.rollback())
    }

    pub fn query<T: Entity>(&self) -> BlockingQuery<'_, E, T> {
        BlockingQuery::new(self, QueryExpression::root(T::descriptor().name()))
    }

    pub fn query_with<T: Entity>(&self, table: Option<&str>, lock: LockType) -> BlockingQuery<'_, E, T> {
        BlockingQuery::new(
            self,
            QueryExpression::root_with(T::descriptor().name(), table.map(str::to_string), lock),
        )
    }
}

/// Blocking counterpart of [`ShardedQuery`].
pub struct BlockingQuery<'a, E: ShardEngine, T: Entity> {
    db: &'a ShardingDb<E>,
    expression: QueryExpression,
    _entity: PhantomData<T>,
}

impl<'a, E: ShardEngine, T: Entity> BlockingQuery<'a, E, T> {
    fn new(db: &'a ShardingDb<E>, expression: QueryExpression) -> Self {
        Self {
            db,
            expression,
            _entity: PhantomData,
        }
    }

    fn map(self, f: impl FnOnce(QueryExpression) -> QueryExpression) -> Self {
        Self::new(self.db, f(self.expression))
    }

    fn handle(&self) -> ShardedQuery<'a, E, T> {
        ShardedQuery::new(&self.db.context, self.expression.clone())
    }

    pub fn filter(self, predicate: Expr) -> Self {
        self.map(|e| e.filter(predicate))
    }

    pub fn order_by(self, member: &str) -> Self {
        self.map(|e| e.order_by(col(member)))
    }

    pub fn order_by_desc(self, member: &str) -> Self {
        self.map(|e| e.order_by_desc(col(member)))
    }

    pub fn then_by(self, member: &str) -> Self {
        self.map(|e| e.then_by(col(member)))
    }

    pub fn then_by_desc(self, member: &str) -> Self {
        self.map(|e| e.then_by_desc(col(member)))
    }

    pub fn skip(self, count: u64) -> Self {
        self.map(|e| e.skip(count))
    }

    pub fn take(self, count: u64) -> Self {
        self.map(|e| e.take(count))
    }

    pub fn ignore_all_filters(self) -> Self {
        self.map(QueryExpression::ignore_all_filters)
    }

    pub fn to_list(&self) -> Result<Vec<T>> {
        self.db.block_on(self.handle().to_list())
    }

    pub fn first(&self) -> Result<Option<T>> {
        self.db.block_on(self.handle().first())
    }

    pub fn count(&self) -> Result<u64> {
        self.db.block_on(self.handle().count())
    }

    pub fn any(&self) -> Result<bool> {
        self.db.block_on(self.handle().any())
    }

    pub fn sum(&self, member: &str) -> Result<Value> {
        self.db.block_on(self.handle().sum(member))
    }

    pub fn average(&self, member: &str) -> Result<Value> {
        self.db.block_on(self.handle().average(member))
    }

    pub fn max(&self, member: &str) -> Result<Value> {
        self.db.block_on(self.handle().max(member))
    }

    pub fn min(&self, member: &str) -> Result<Value> {
        self.db.block_on(self.handle().min(member))
    }

    pub fn paging(&self, page_number: u64, page_size: u64) -> Result<PagedList<T>> {
        self.db.block_on(self.handle().paging(page_number, page_size))
    }
}
