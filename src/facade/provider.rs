use crate::connection::{PoolStats, ShardConnectionPool, ShardingOptions};
use crate::core::{DbError, Entity, Result, Row, Value, row_value};
use crate::engine::ShardEngine;
use crate::executor::cancel::{CancellationSignal, run_cancellable};
use crate::executor::query::QueryExecutor;
use crate::executor::unique::UniqueWriteAuthenticator;
use crate::executor::write::{TableWrite, WriteExecutor, WritePolicy, WriteStep, split_in_list};
use crate::expression::{Assignments, Expr, col, lit};
use crate::planner::{AggregateSelector, PlanBuilder};
use crate::query::{
    AggregateFunction, LockType, QueryExpression, QueryModel, QueryModelBuilder, ShardedQuery,
};
use crate::routing::{PhysicTable, RouteTable, RoutingResolver, ShardedEntity, ShardingRegistry};
use crate::transaction::ShardTransaction;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Entry point of the sharding layer
///
/// Routes CRUD operations on registered entities to their physical tables,
/// runs them against pooled engine connections and merges the results.
/// Cloning is cheap; clones share the registry, the pools and the
/// registered query filters.
///
/// # Examples
///
/// ```ignore
/// let context = ShardingDbContext::new(InMemoryEngine::new(), registry, ShardingOptions::new())?;
/// context.insert(&Order { id: 1, customer_id: 42, amount: 10 }).await?;
///
/// let top = context
///     .query::<Order>()
///     .filter(col("amount").gt(5))
///     .order_by_desc("amount")
///     .take(10)
///     .to_list()
///     .await?;
/// ```
pub struct ShardingDbContext<E: ShardEngine> {
    registry: Arc<ShardingRegistry>,
    pool: Arc<ShardConnectionPool<E>>,
    context_filters: Arc<RwLock<HashMap<String, Vec<Expr>>>>,
    cancellation: Option<CancellationSignal>,
}

impl<E: ShardEngine> Clone for ShardingDbContext<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            pool: Arc::clone(&self.pool),
            context_filters: Arc::clone(&self.context_filters),
            cancellation: self.cancellation.clone(),
        }
    }
}

impl<E: ShardEngine> ShardingDbContext<E> {
    pub fn new(engine: E, registry: ShardingRegistry, options: ShardingOptions) -> Result<Self> {
        Self::with_shared_engine(Arc::new(engine), registry, options)
    }

    pub fn with_shared_engine(
        engine: Arc<E>,
        registry: ShardingRegistry,
        options: ShardingOptions,
    ) -> Result<Self> {
        Ok(Self {
            registry: Arc::new(registry),
            pool: Arc::new(ShardConnectionPool::new(engine, options)?),
            context_filters: Arc::new(RwLock::new(HashMap::new())),
            cancellation: None,
        })
    }

    pub fn engine(&self) -> &Arc<E> {
        self.pool.engine()
    }

    pub fn options(&self) -> &ShardingOptions {
        self.pool.options()
    }

    pub fn registry(&self) -> &ShardingRegistry {
        &self.registry
    }

    pub fn pool_stats(&self) -> Result<Vec<PoolStats>> {
        self.pool.stats()
    }

    /// A context whose operations give up with [`DbError::Cancelled`] once
    /// `signal` fires.
    pub fn with_cancellation(&self, signal: CancellationSignal) -> Self {
        Self {
            cancellation: Some(signal),
            ..self.clone()
        }
    }

    pub fn cancellation(&self) -> Option<&CancellationSignal> {
        self.cancellation.as_ref()
    }

    /// Registers a filter applied to every query on `T` made through this
    /// context (and its clones) unless filters are ignored.
    pub fn has_query_filter<T: Entity>(&self, predicate: Expr) -> Result<()> {
        let meta = self.entity::<T>()?;
        for member in predicate.referenced_members() {
            meta.descriptor.require_member(member)?;
        }
        self.context_filters
            .write()?
            .entry(meta.descriptor.name().to_string())
            .or_default()
            .push(predicate);
        Ok(())
    }

    /// Explicit transaction for the `*_in` write methods. Lanes are opened
    /// as writes reach their data sources.
    pub fn begin_transaction(&self) -> ShardTransaction<E> {
        ShardTransaction::new(Arc::clone(&self.pool))
    }

    fn entity<T: Entity>(&self) -> Result<Arc<ShardedEntity>> {
        self.registry.get(T::descriptor().name())
    }

    fn writer<'a>(&'a self, meta: &'a ShardedEntity) -> WriteExecutor<'a, E> {
        WriteExecutor::new(&self.pool, &meta.descriptor, self.cancellation.as_ref())
    }

    // ------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------

    pub async fn insert<T: Entity>(&self, entity: &T) -> Result<T> {
        self.insert_with(None, entity).await
    }

    pub async fn insert_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entity: &T) -> Result<T> {
        self.insert_with(Some(txn), entity).await
    }

    async fn insert_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        entity: &T,
    ) -> Result<T> {
        let meta = self.entity::<T>()?;
        let table = RoutingResolver::new(&meta.config, &meta.descriptor).resolve_entity(entity)?;
        debug!(entity = meta.descriptor.name(), table = %table, "insert routed");

        let step = WriteStep::new(table.into(), TableWrite::Insert(vec![entity.to_row()]));
        self.writer(&meta)
            .execute(vec![step], WritePolicy::default(), txn)
            .await?;
        Ok(entity.clone())
    }

    /// Inserts one row given as member assignments. Every assigned value,
    /// the shard key included, must be statically evaluable; unassigned
    /// members are NULL.
    pub async fn insert_content<T: Entity>(&self, content: &Assignments) -> Result<u64> {
        self.insert_content_with::<T>(None, content).await
    }

    pub async fn insert_content_in<T: Entity>(
        &self,
        txn: &mut ShardTransaction<E>,
        content: &Assignments,
    ) -> Result<u64> {
        self.insert_content_with::<T>(Some(txn), content).await
    }

    async fn insert_content_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        content: &Assignments,
    ) -> Result<u64> {
        let meta = self.entity::<T>()?;
        let descriptor = &meta.descriptor;
        let table = RoutingResolver::new(&meta.config, descriptor).resolve_content(content)?;

        for (member, _) in content.iter() {
            descriptor.require_member(member)?;
        }
        let row = descriptor
            .members()
            .iter()
            .map(|member| match content.get(&member.name) {
                None => Ok(Value::Null),
                Some(expr) => expr.try_constant().ok_or_else(|| {
                    DbError::UnsupportedQueryShape(format!(
                        "Value of '{}' is not statically evaluable: {}",
                        member.name, expr
                    ))
                }),
            })
            .collect::<Result<Row>>()?;
        debug!(entity = descriptor.name(), table = %table, "insert content routed");

        let step = WriteStep::new(table.into(), TableWrite::Insert(vec![row]));
        self.writer(&meta)
            .execute(vec![step], WritePolicy::default(), txn)
            .await
    }

    /// Inserts many entities; atomic when they span several tables.
    pub async fn insert_range<T: Entity>(&self, entities: &[T]) -> Result<u64> {
        self.insert_range_with(None, entities).await
    }

    pub async fn insert_range_in<T: Entity>(
        &self,
        txn: &mut ShardTransaction<E>,
        entities: &[T],
    ) -> Result<u64> {
        self.insert_range_with(Some(txn), entities).await
    }

    async fn insert_range_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        entities: &[T],
    ) -> Result<u64> {
        let meta = self.entity::<T>()?;
        let resolver = RoutingResolver::new(&meta.config, &meta.descriptor);

        let mut groups: Vec<(PhysicTable, Vec<Row>)> = Vec::new();
        for entity in entities {
            let table = PhysicTable::from(resolver.resolve_entity(entity)?);
            match groups.iter_mut().find(|(t, _)| *t == table) {
                Some((_, rows)) => rows.push(entity.to_row()),
                None => groups.push((table, vec![entity.to_row()])),
            }
        }
        groups.sort_by(|(a, _), (b, _)| a.data_source().name().cmp(b.data_source().name()));
        debug!(
            entity = meta.descriptor.name(),
            rows = entities.len(),
            tables = groups.len(),
            "insert range routed"
        );

        let policy = WritePolicy {
            transactional: groups.len() > 1,
            max_affected: None,
        };
        let steps = groups
            .into_iter()
            .map(|(table, rows)| WriteStep::new(table, TableWrite::Insert(rows)))
            .collect();
        self.writer(&meta).execute(steps, policy, txn).await
    }

    // ------------------------------------------------------------------
    // Updates and deletes
    // ------------------------------------------------------------------

    /// Applies `assignments` to every row matching `predicate`. The shard
    /// key cannot be assigned.
    pub async fn update<T: Entity>(&self, predicate: Expr, assignments: &Assignments) -> Result<u64> {
        self.update_with::<T>(None, predicate, assignments).await
    }

    pub async fn update_in<T: Entity>(
        &self,
        txn: &mut ShardTransaction<E>,
        predicate: Expr,
        assignments: &Assignments,
    ) -> Result<u64> {
        self.update_with::<T>(Some(txn), predicate, assignments).await
    }

    async fn update_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        predicate: Expr,
        assignments: &Assignments,
    ) -> Result<u64> {
        let meta = self.entity::<T>()?;
        let shard_key = meta.config.shard_key();
        if assignments.contains(shard_key) {
            return Err(DbError::Routing(format!(
                "Sharding key '{}' of '{}' cannot be updated",
                shard_key,
                meta.descriptor.name()
            )));
        }
        if assignments.is_empty() {
            return Err(DbError::ExecutionError(format!(
                "Update of '{}' has no assignments",
                meta.descriptor.name()
            )));
        }
        for (member, value) in assignments.iter() {
            meta.descriptor.require_member(member)?;
            for referenced in value.referenced_members() {
                meta.descriptor.require_member(referenced)?;
            }
        }

        let (steps, policy) = self.plan_predicate_write(&meta, &predicate, |predicate| {
            TableWrite::Update {
                predicate,
                assignments: assignments.clone(),
            }
        })?;
        self.writer(&meta).execute(steps, policy, txn).await
    }

    pub async fn delete<T: Entity>(&self, predicate: Expr) -> Result<u64> {
        self.delete_with::<T>(None, predicate).await
    }

    pub async fn delete_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, predicate: Expr) -> Result<u64> {
        self.delete_with::<T>(Some(txn), predicate).await
    }

    async fn delete_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        predicate: Expr,
    ) -> Result<u64> {
        let meta = self.entity::<T>()?;
        let (steps, policy) =
            self.plan_predicate_write(&meta, &predicate, |predicate| TableWrite::Delete { predicate })?;
        self.writer(&meta).execute(steps, policy, txn).await
    }

    /// Candidate tables × IN-list slices, with the transaction and
    /// uniqueness policy that follows from them.
    fn plan_predicate_write(
        &self,
        meta: &ShardedEntity,
        predicate: &Expr,
        write: impl Fn(Option<Expr>) -> TableWrite,
    ) -> Result<(Vec<WriteStep>, WritePolicy)> {
        for member in predicate.referenced_members() {
            meta.descriptor.require_member(member)?;
        }
        let tables = RoutingResolver::new(&meta.config, &meta.descriptor).resolve_range(Some(predicate));
        let slices = split_in_list(Some(predicate), self.options().max_in_items);

        let max_affected = (tables.len() > 1
            && UniqueWriteAuthenticator::is_unique_match(&meta.descriptor, Some(predicate)))
        .then_some(1);

        let mut steps = Vec::with_capacity(tables.len() * slices.len());
        for table in &tables {
            for slice in &slices {
                steps.push(WriteStep::new(PhysicTable::from(table), write(slice.clone())));
            }
        }
        debug!(
            entity = meta.descriptor.name(),
            tables = tables.len(),
            statements = steps.len(),
            unique = max_affected.is_some(),
            "predicate write routed"
        );

        let policy = WritePolicy {
            transactional: steps.len() > 1,
            max_affected,
        };
        Ok((steps, policy))
    }

    /// Writes every non-key member of `entity` to its row.
    pub async fn update_entity<T: Entity>(&self, entity: &T) -> Result<u64> {
        self.update_entity_with(None, entity).await
    }

    pub async fn update_entity_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entity: &T) -> Result<u64> {
        self.update_entity_with(Some(txn), entity).await
    }

    async fn update_entity_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        entity: &T,
    ) -> Result<u64> {
        let meta = self.entity::<T>()?;
        let (table, predicate) = self.locate_entity(&meta, entity)?;

        let row = entity.to_row();
        let mut assignments = Assignments::new();
        for (member, value) in meta.descriptor.members().iter().zip(row) {
            if member.name != meta.descriptor.primary_key() && member.name != meta.config.shard_key() {
                assignments = assignments.set(member.name.clone(), lit(value));
            }
        }

        let step = WriteStep::new(
            table.into(),
            TableWrite::Update {
                predicate: Some(predicate),
                assignments,
            },
        );
        self.writer(&meta)
            .execute(vec![step], WritePolicy::default(), txn)
            .await
    }

    pub async fn delete_entity<T: Entity>(&self, entity: &T) -> Result<u64> {
        self.delete_entity_with(None, entity).await
    }

    pub async fn delete_entity_in<T: Entity>(&self, txn: &mut ShardTransaction<E>, entity: &T) -> Result<u64> {
        self.delete_entity_with(Some(txn), entity).await
    }

    async fn delete_entity_with<T: Entity>(
        &self,
        txn: Option<&mut ShardTransaction<E>>,
        entity: &T,
    ) -> Result<u64> {
        let meta = self.entity::<T>()?;
        let (table, predicate) = self.locate_entity(&meta, entity)?;
        let step = WriteStep::new(
            table.into(),
            TableWrite::Delete {
                predicate: Some(predicate),
            },
        );
        self.writer(&meta)
            .execute(vec![step], WritePolicy::default(), txn)
            .await
    }

    /// Table of the entity and a predicate matching it by primary key.
    fn locate_entity<T: Entity>(&self, meta: &ShardedEntity, entity: &T) -> Result<(RouteTable, Expr)> {
        let table = RoutingResolver::new(&meta.config, &meta.descriptor).resolve_entity(entity)?;
        let key = entity.member_value(meta.descriptor.primary_key())?;
        if key.is_null() {
            return Err(DbError::ExecutionError(format!(
                "Primary key '{}' of '{}' is NULL",
                meta.descriptor.primary_key(),
                meta.descriptor.name()
            )));
        }
        Ok((table, col(meta.descriptor.primary_key()).eq(lit(key))))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn query<T: Entity>(&self) -> ShardedQuery<'_, E, T> {
        ShardedQuery::new(self, QueryExpression::root(T::descriptor().name()))
    }

    /// Query pinned to one physical table (or routed when `None`), with
    /// the given row lock.
    pub fn query_with<T: Entity>(&self, table: Option<&str>, lock: LockType) -> ShardedQuery<'_, E, T> {
        ShardedQuery::new(
            self,
            QueryExpression::root_with(T::descriptor().name(), table.map(str::to_string), lock),
        )
    }

    pub(crate) fn build_model(&self, expression: &QueryExpression) -> Result<(Arc<ShardedEntity>, QueryModel)> {
        let meta = self.registry.get(expression.entity())?;
        let filters = self
            .context_filters
            .read()?
            .get(meta.descriptor.name())
            .cloned()
            .unwrap_or_default();
        let model = QueryModelBuilder::build(&meta.descriptor, &filters, expression)?;
        Ok((meta, model))
    }

    fn route(&self, meta: &ShardedEntity, model: &QueryModel) -> Result<Vec<RouteTable>> {
        match &model.table {
            Some(name) => meta.config.find_table(name).map(|t| vec![t]).ok_or_else(|| {
                DbError::Routing(format!(
                    "Table '{}' is not configured for '{}'",
                    name,
                    meta.descriptor.name()
                ))
            }),
            None => Ok(RoutingResolver::new(&meta.config, &meta.descriptor)
                .resolve_range(model.predicate().as_ref())),
        }
    }

    /// Rows of a query expression in its global order.
    pub(crate) async fn fetch_rows(&self, expression: &QueryExpression) -> Result<Vec<Row>> {
        run_cancellable(self.cancellation.as_ref(), async {
            let (meta, model) = self.build_model(expression)?;
            let tables = self.route(&meta, &model)?;
            let plan = PlanBuilder::new(&meta.descriptor, self.options().pagination_mode)
                .build(&model, &tables)?;
            QueryExecutor::new(&self.pool, &meta.descriptor)
                .execute(&plan)
                .await
        })
        .await
    }

    /// Aggregate over a query expression.
    ///
    /// Without skip/take the function is computed per shard and combined.
    /// With a page, `Count` is clamped to it and the other functions are
    /// computed locally over the materialised page.
    pub(crate) async fn aggregate(
        &self,
        expression: &QueryExpression,
        function: &AggregateFunction,
    ) -> Result<Value> {
        let (meta, model) = self.build_model(expression)?;
        let member_index = match function.member() {
            Some(member) => Some(meta.descriptor.require_member(member)?),
            None => None,
        };
        if model.take == Some(0) {
            let empty: Vec<Value> = Vec::new();
            return AggregateSelector::compute_local(function, &empty);
        }

        let paged = model.skip.is_some() || model.take.is_some();
        if paged && *function != AggregateFunction::Count {
            let rows = self.fetch_rows(expression).await?;
            let values: Vec<Value> = match member_index {
                Some(index) => rows
                    .iter()
                    .map(|row| row_value(row, index, &meta.descriptor).cloned())
                    .collect::<Result<_>>()?,
                None => Vec::new(),
            };
            return AggregateSelector::compute_local(function, &values);
        }

        let value = run_cancellable(self.cancellation.as_ref(), async {
            let tables: Vec<PhysicTable> = self
                .route(&meta, &model)?
                .iter()
                .map(PhysicTable::from)
                .collect();
            QueryExecutor::new(&self.pool, &meta.descriptor)
                .aggregate(&model, &tables, function)
                .await
        })
        .await?;

        if !paged {
            return Ok(value);
        }
        let total = value.as_i64().unwrap_or(0).max(0) as u64;
        let after_skip = total.saturating_sub(model.skip.unwrap_or(0));
        let clamped = model.take.map_or(after_skip, |take| after_skip.min(take));
        Ok(Value::Integer(clamped as i64))
    }
}
