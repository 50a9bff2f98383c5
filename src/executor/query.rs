//! Runs sharding query plans: fan out per-table queries, merge, paginate.

use super::merge::merge_sorted;
use super::sort::{RowComparator, SortExecutor};
use crate::connection::ShardConnectionPool;
use crate::core::{EntityDescriptor, Result, Row, Value};
use crate::engine::ShardEngine;
use crate::planner::{AggregateSelector, PlanShape, ProjectionRow, ShardingQueryPlan};
use crate::query::{AggregateFunction, DataQueryModel, QueryModel};
use crate::routing::PhysicTable;
use futures::future::try_join_all;
use std::collections::HashMap;
use tracing::{Instrument, debug, info_span};

pub struct QueryExecutor<'a, E: ShardEngine> {
    pool: &'a ShardConnectionPool<E>,
    descriptor: &'a EntityDescriptor,
}

impl<'a, E: ShardEngine> QueryExecutor<'a, E> {
    pub fn new(pool: &'a ShardConnectionPool<E>, descriptor: &'a EntityDescriptor) -> Self {
        Self { pool, descriptor }
    }

    /// Full rows of the plan in global order.
    pub async fn execute(&self, plan: &ShardingQueryPlan) -> Result<Vec<Row>> {
        let span = info_span!(
            "sharding.query",
            entity = self.descriptor.name(),
            shape = %plan.shape,
            tables = plan.tables.len()
        );
        async {
            match plan.shape {
                PlanShape::Empty => Ok(Vec::new()),
                PlanShape::SingleTable => {
                    let queries = plan.shard_queries();
                    let mut rows = self.fetch_rows(&queries).await?;
                    Ok(rows.pop().unwrap_or_default())
                }
                PlanShape::Unbounded => {
                    let merged = self.fetch_merged(plan, None).await?;
                    Ok(merged.into_iter().skip(plan.skip() as usize).collect())
                }
                PlanShape::Paginated if plan.is_key_phase() => self.execute_key_phase(plan).await,
                PlanShape::Paginated => {
                    let window = plan.window().map(|w| w as usize);
                    let merged = self.fetch_merged(plan, window).await?;
                    Ok(merged.into_iter().skip(plan.skip() as usize).collect())
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetches every shard stream, sorts unordered ones, then merges.
    async fn fetch_merged(&self, plan: &ShardingQueryPlan, limit: Option<usize>) -> Result<Vec<Row>> {
        let comparator = RowComparator::for_entity(self.descriptor, &plan.model.orderings)?;
        let mut streams = self.fetch_rows(&plan.shard_queries()).await?;
        for stream in &mut streams {
            SortExecutor::ensure_sorted(stream, &comparator);
        }
        Ok(merge_sorted(streams, &comparator, limit))
    }

    async fn execute_key_phase(&self, plan: &ShardingQueryPlan) -> Result<Vec<Row>> {
        let members = plan.key_projection();
        let comparator = RowComparator::for_projection(&plan.model.orderings);

        let projections = try_join_all(plan.shard_queries().iter().enumerate().map(|(index, query)| {
            let members = &members;
            let comparator = &comparator;
            async move {
                let rows = self.fetch_projection(query, members).await?;
                let mut keys = rows
                    .into_iter()
                    .map(|row| ProjectionRow::from_projection(row, index))
                    .collect::<Result<Vec<_>>>()?;
                if !keys.is_sorted_by(|a, b| {
                    comparator.compare_lenient(&a.order_values, &b.order_values).is_le()
                }) {
                    keys.sort_by(|a, b| comparator.compare_lenient(&a.order_values, &b.order_values));
                }
                Ok::<_, crate::core::DbError>(keys)
            }
        }))
        .await?;

        let window = plan.window().map(|w| w as usize);
        let selected: Vec<ProjectionRow> = merge_sorted(projections, &comparator, window)
            .into_iter()
            .skip(plan.skip() as usize)
            .collect();
        debug!(selected = selected.len(), "key phase merged");
        if selected.is_empty() {
            return Ok(Vec::new());
        }

        let data_plans = plan.data_plans(&selected, self.pool.options().max_in_items)?;
        let key_index = self.descriptor.primary_key_index()?;
        let queries: Vec<DataQueryModel> = data_plans.iter().map(|p| p.model.clone()).collect();
        let mut by_key: HashMap<(usize, Value), Row> = HashMap::with_capacity(selected.len());
        for (plan, rows) in data_plans.iter().zip(self.fetch_rows(&queries).await?) {
            for row in rows {
                let key = row.get(key_index).cloned().unwrap_or(Value::Null);
                by_key.insert((plan.table_index, key), row);
            }
        }

        // Rows deleted between the two phases are skipped.
        Ok(selected
            .into_iter()
            .filter_map(|k| by_key.remove(&(k.table_index, k.key)))
            .collect())
    }

    /// Combined value of an aggregate over the query's tables.
    pub async fn aggregate(
        &self,
        model: &QueryModel,
        tables: &[PhysicTable],
        function: &AggregateFunction,
    ) -> Result<Value> {
        let primitives = AggregateSelector::rewrite(function);
        let span = info_span!(
            "sharding.aggregate",
            entity = self.descriptor.name(),
            function = %function,
            tables = tables.len()
        );
        let partials = try_join_all(tables.iter().map(|table| {
            let query = model.bind(table.clone(), None, None).unpaged();
            let primitives = &primitives;
            async move {
                let mut guard = self.pool.acquire(table.data_source()).await?;
                self.pool
                    .engine()
                    .aggregate(guard.connection()?, self.descriptor, &query, primitives)
                    .await
            }
        }))
        .instrument(span)
        .await?;
        AggregateSelector::combine(function, &partials)
    }

    /// Runs full-row queries concurrently, one result per query, in order.
    pub async fn fetch_rows(&self, queries: &[DataQueryModel]) -> Result<Vec<Vec<Row>>> {
        try_join_all(queries.iter().map(|query| async move {
            let mut guard = self.pool.acquire(query.table.data_source()).await?;
            self.pool
                .engine()
                .query(guard.connection()?, self.descriptor, query)
                .await
        }))
        .await
    }

    async fn fetch_projection(&self, query: &DataQueryModel, members: &[String]) -> Result<Vec<Row>> {
        let mut guard = self.pool.acquire(query.table.data_source()).await?;
        self.pool
            .engine()
            .query_projection(guard.connection()?, self.descriptor, query, members)
            .await
    }
}
