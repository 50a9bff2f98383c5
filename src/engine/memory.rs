//! Reference [`ShardEngine`]: a small in-memory row store.
//!
//! Every data source is a set of named tables holding positional rows.
//! Tables are created on first insert; reading a missing table yields no
//! rows. Transactions keep an undo log per connection (see
//! [`Change`](super::change::Change)); writes are visible to other
//! connections before commit. Dropping a connection whose transaction is
//! still open rolls it back.

use super::change::Change;
use super::{ShardConnection, ShardEngine};
use crate::core::{DbError, EntityDescriptor, Result, Row, Value};
use crate::executor::sort::{RowComparator, SortExecutor};
use crate::expression::{Assignments, Expr, RowEvaluator};
use crate::planner::{ShardAggregate, compute_primitive};
use crate::query::DataQueryModel;
use crate::routing::{PhysicDataSource, PhysicTable};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

type Tables = HashMap<String, Vec<Row>>;

#[derive(Debug, Default)]
struct DataSourceStore {
    tables: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicU64,
    queries: AtomicU64,
    projections: AtomicU64,
    aggregates: AtomicU64,
    writes: AtomicU64,
    begins: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

/// Snapshot of the operations an [`InMemoryEngine`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCounters {
    pub connects: u64,
    pub queries: u64,
    pub projections: u64,
    pub aggregates: u64,
    pub writes: u64,
    pub begins: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    data_sources: RwLock<HashMap<String, Arc<DataSourceStore>>>,
    counters: Counters,
    next_connection_id: AtomicU64,
}

/// Connection of the in-memory engine, bound to one data source.
#[derive(Debug)]
pub struct InMemoryConnection {
    id: u64,
    data_source: String,
    store: Arc<DataSourceStore>,
    undo: Option<Vec<(Change, usize)>>,
}

impl InMemoryConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    fn record(&mut self, change: Change, key_index: usize) {
        if let Some(log) = self.undo.as_mut() {
            log.push((change, key_index));
        }
    }

    /// Replays the undo log backwards. `false` when no transaction was open.
    fn revert(&mut self) -> Result<bool> {
        let Some(log) = self.undo.take() else {
            return Ok(false);
        };
        let mut tables = self.store.tables.write()?;
        for (change, key_index) in log.into_iter().rev() {
            if let Some(rows) = tables.get_mut(change.table_name()) {
                change.undo(rows, key_index);
            }
        }
        Ok(true)
    }
}

impl Drop for InMemoryConnection {
    fn drop(&mut self) {
        match self.revert() {
            Ok(true) => log::warn!(
                "Connection {} to '{}' dropped inside a transaction. Changes rolled back.",
                self.id,
                self.data_source
            ),
            Ok(false) => {}
            Err(err) => log::error!(
                "Connection {} to '{}' failed to roll back on drop: {}",
                self.id,
                self.data_source,
                err
            ),
        }
    }
}

impl ShardConnection for InMemoryConnection {
    fn in_transaction(&self) -> bool {
        self.undo.is_some()
    }
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, data_source: &str) -> Result<Arc<DataSourceStore>> {
        if let Some(store) = self.data_sources.read()?.get(data_source) {
            return Ok(Arc::clone(store));
        }
        let mut data_sources = self.data_sources.write()?;
        Ok(Arc::clone(
            data_sources.entry(data_source.to_string()).or_default(),
        ))
    }

    /// Committed and uncommitted rows of one table, in storage order.
    pub fn rows(&self, data_source: &str, table: &str) -> Result<Vec<Row>> {
        let store = self.store(data_source)?;
        let tables = store.tables.read()?;
        Ok(tables.get(table).cloned().unwrap_or_default())
    }

    /// Names of the tables created so far in a data source, sorted.
    pub fn table_names(&self, data_source: &str) -> Result<Vec<String>> {
        let store = self.store(data_source)?;
        let mut names: Vec<String> = store.tables.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn counters(&self) -> EngineCounters {
        let c = &self.counters;
        EngineCounters {
            connects: c.connects.load(Ordering::SeqCst),
            queries: c.queries.load(Ordering::SeqCst),
            projections: c.projections.load(Ordering::SeqCst),
            aggregates: c.aggregates.load(Ordering::SeqCst),
            writes: c.writes.load(Ordering::SeqCst),
            begins: c.begins.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            rollbacks: c.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Matching rows, ordered and paged per the query.
    fn select(
        conn: &InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
    ) -> Result<Vec<Row>> {
        let evaluator = RowEvaluator::new(descriptor);
        let predicates = query.predicates();

        let mut rows = Vec::new();
        {
            let tables = conn.store.tables.read()?;
            if let Some(stored) = tables.get(query.table.name()) {
                for row in stored {
                    if evaluator.matches_all(&predicates, row)? {
                        rows.push(row.clone());
                    }
                }
            }
        }

        if !query.orderings.is_empty() {
            let comparator = RowComparator::for_entity(descriptor, &query.orderings)?;
            SortExecutor::sort(&mut rows, &comparator);
        }

        let skip = query.skip.unwrap_or(0) as usize;
        let rows = rows.into_iter().skip(skip);
        Ok(match query.take {
            Some(take) => rows.take(take as usize).collect(),
            None => rows.collect(),
        })
    }

    fn matching_indexes(
        rows: &[Row],
        descriptor: &EntityDescriptor,
        predicate: Option<&Expr>,
    ) -> Result<Vec<usize>> {
        let evaluator = RowEvaluator::new(descriptor);
        let mut indexes = Vec::new();
        for (index, row) in rows.iter().enumerate() {
            let hit = match predicate {
                Some(predicate) => evaluator.matches(predicate, row)?,
                None => true,
            };
            if hit {
                indexes.push(index);
            }
        }
        Ok(indexes)
    }
}

#[async_trait]
impl ShardEngine for InMemoryEngine {
    type Connection = InMemoryConnection;

    async fn connect(&self, data_source: &PhysicDataSource) -> Result<InMemoryConnection> {
        self.counters.connects.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryConnection {
            id: self.next_connection_id.fetch_add(1, Ordering::SeqCst) + 1,
            data_source: data_source.name().to_string(),
            store: self.store(data_source.name())?,
            undo: None,
        })
    }

    async fn query(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
    ) -> Result<Vec<Row>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        Self::select(conn, descriptor, query)
    }

    async fn query_projection(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
        members: &[String],
    ) -> Result<Vec<Row>> {
        self.counters.projections.fetch_add(1, Ordering::SeqCst);
        let indexes = members
            .iter()
            .map(|m| descriptor.require_member(m))
            .collect::<Result<Vec<_>>>()?;
        let rows = Self::select(conn, descriptor, query)?;
        Ok(rows
            .into_iter()
            .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    async fn aggregate(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        query: &DataQueryModel,
        aggregates: &[ShardAggregate],
    ) -> Result<Vec<Value>> {
        self.counters.aggregates.fetch_add(1, Ordering::SeqCst);
        let rows = Self::select(conn, descriptor, query)?;
        aggregates
            .iter()
            .map(|primitive| {
                let member = match primitive {
                    ShardAggregate::Count(None) => {
                        return Ok(Value::Integer(rows.len() as i64));
                    }
                    ShardAggregate::Count(Some(m))
                    | ShardAggregate::Sum(m)
                    | ShardAggregate::Min(m)
                    | ShardAggregate::Max(m) => m,
                };
                let index = descriptor.require_member(member)?;
                let values: Vec<Value> = rows.iter().map(|row| row[index].clone()).collect();
                compute_primitive(primitive, &values)
            })
            .collect()
    }

    async fn insert(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        rows: &[Row],
    ) -> Result<u64> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        let key_index = descriptor.primary_key_index()?;
        for row in rows {
            descriptor.validate_row(row)?;
        }

        let mut changes = Vec::with_capacity(rows.len());
        {
            let mut tables = conn.store.tables.write()?;
            let stored = tables.entry(table.name().to_string()).or_default();
            {
                let mut keys: HashSet<&Value> = stored.iter().map(|r| &r[key_index]).collect();
                for row in rows {
                    let key = &row[key_index];
                    if !keys.insert(key) {
                        return Err(DbError::ConstraintViolation(format!(
                            "Duplicate primary key {} in table '{}'",
                            key,
                            table.name()
                        )));
                    }
                }
            }
            for row in rows {
                stored.push(row.clone());
                changes.push(Change::InsertRow {
                    table: table.name().to_string(),
                    key: row[key_index].clone(),
                });
            }
        }

        for change in changes {
            conn.record(change, key_index);
        }
        Ok(rows.len() as u64)
    }

    async fn update(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        predicate: Option<&Expr>,
        assignments: &Assignments,
    ) -> Result<u64> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        let key_index = descriptor.primary_key_index()?;
        if assignments.contains(descriptor.primary_key()) {
            return Err(DbError::ConstraintViolation(format!(
                "Primary key '{}' cannot be updated",
                descriptor.primary_key()
            )));
        }
        let targets = assignments
            .iter()
            .map(|(member, expr)| Ok((descriptor.require_member(member)?, expr)))
            .collect::<Result<Vec<_>>>()?;

        let evaluator = RowEvaluator::new(descriptor);
        let mut changes = Vec::new();
        {
            let mut tables = conn.store.tables.write()?;
            let Some(stored) = tables.get_mut(table.name()) else {
                return Ok(0);
            };

            // Compute every new row before touching the table.
            let mut updates = Vec::new();
            for index in Self::matching_indexes(stored, descriptor, predicate)? {
                let old_row = &stored[index];
                let mut new_row = old_row.clone();
                for (target, expr) in &targets {
                    new_row[*target] = evaluator.evaluate(expr, old_row)?;
                }
                descriptor.validate_row(&new_row)?;
                updates.push((index, new_row));
            }

            for (index, new_row) in updates {
                let old_row = std::mem::replace(&mut stored[index], new_row);
                changes.push(Change::UpdateRow {
                    table: table.name().to_string(),
                    key: old_row[key_index].clone(),
                    old_row,
                });
            }
        }

        let affected = changes.len() as u64;
        for change in changes {
            conn.record(change, key_index);
        }
        Ok(affected)
    }

    async fn delete(
        &self,
        conn: &mut InMemoryConnection,
        descriptor: &EntityDescriptor,
        table: &PhysicTable,
        predicate: Option<&Expr>,
    ) -> Result<u64> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        let key_index = descriptor.primary_key_index()?;

        let mut changes = Vec::new();
        {
            let mut tables = conn.store.tables.write()?;
            let Some(stored) = tables.get_mut(table.name()) else {
                return Ok(0);
            };
            let indexes = Self::matching_indexes(stored, descriptor, predicate)?;
            for index in indexes.into_iter().rev() {
                let old_row = stored.remove(index);
                changes.push(Change::DeleteRow {
                    table: table.name().to_string(),
                    row_index: index,
                    old_row,
                });
            }
        }

        let affected = changes.len() as u64;
        for change in changes {
            conn.record(change, key_index);
        }
        Ok(affected)
    }

    async fn begin(&self, conn: &mut InMemoryConnection) -> Result<()> {
        if conn.undo.is_some() {
            return Err(DbError::TransactionError(format!(
                "Connection {} already has an active transaction",
                conn.id
            )));
        }
        self.counters.begins.fetch_add(1, Ordering::SeqCst);
        conn.undo = Some(Vec::new());
        Ok(())
    }

    async fn commit(&self, conn: &mut InMemoryConnection) -> Result<()> {
        if conn.undo.take().is_none() {
            return Err(DbError::TransactionError(format!(
                "Connection {} has no active transaction",
                conn.id
            )));
        }
        self.counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, conn: &mut InMemoryConnection) -> Result<()> {
        if !conn.in_transaction() {
            return Err(DbError::TransactionError(format!(
                "Connection {} has no active transaction",
                conn.id
            )));
        }
        self.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        conn.revert()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Member};
    use crate::expression::{col, lit};
    use crate::query::{Ordering as QueryOrdering, QueryModel};
    use crate::routing::RouteTable;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new(
            "Order",
            vec![
                Member::new("id", DataType::Integer).not_null(),
                Member::new("customer_id", DataType::Integer).not_null(),
                Member::new("amount", DataType::Integer),
            ],
            "id",
        )
    }

    fn table() -> PhysicTable {
        RouteTable::new("Order_0", "ds").into()
    }

    fn row(id: i64, customer: i64, amount: i64) -> Row {
        vec![Value::Integer(id), Value::Integer(customer), Value::Integer(amount)]
    }

    async fn seeded() -> (InMemoryEngine, InMemoryConnection) {
        let engine = InMemoryEngine::new();
        let mut conn = engine.connect(&PhysicDataSource::new("ds")).await.unwrap();
        engine
            .insert(&mut conn, &descriptor(), &table(), &[row(1, 4, 30), row(2, 4, 10), row(3, 8, 20)])
            .await
            .unwrap();
        (engine, conn)
    }

    #[tokio::test]
    async fn test_query_filters_orders_pages() {
        let (engine, mut conn) = seeded().await;
        let mut model = QueryModel::new("Order");
        model.conditions.push(col("amount").gt(5));
        model.orderings.push(QueryOrdering::desc("amount"));
        let query = model.bind(table(), Some(1), Some(1));

        let rows = engine.query(&mut conn, &descriptor(), &query).await.unwrap();
        assert_eq!(rows, vec![row(3, 8, 20)]);

        let keys = engine
            .query_projection(&mut conn, &descriptor(), &query, &["id".to_string(), "amount".to_string()])
            .await
            .unwrap();
        assert_eq!(keys, vec![vec![Value::Integer(3), Value::Integer(20)]]);
    }

    #[tokio::test]
    async fn test_missing_table_reads_empty() {
        let engine = InMemoryEngine::new();
        let mut conn = engine.connect(&PhysicDataSource::new("ds")).await.unwrap();
        let query = QueryModel::new("Order").bind(table(), None, None);
        assert!(engine.query(&mut conn, &descriptor(), &query).await.unwrap().is_empty());
        assert_eq!(engine.delete(&mut conn, &descriptor(), &table(), None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_aggregate() {
        let (engine, mut conn) = seeded().await;
        let query = QueryModel::new("Order").bind(table(), None, None);
        let values = engine
            .aggregate(
                &mut conn,
                &descriptor(),
                &query,
                &[ShardAggregate::Count(None), ShardAggregate::Sum("amount".into()), ShardAggregate::Max("amount".into())],
            )
            .await
            .unwrap();
        assert_eq!(values, vec![Value::Integer(3), Value::Integer(60), Value::Integer(30)]);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let (engine, mut conn) = seeded().await;
        let err = engine
            .insert(&mut conn, &descriptor(), &table(), &[row(1, 4, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(engine.rows("ds", "Order_0").unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_key_within_batch_rejected() {
        let (engine, mut conn) = seeded().await;
        let err = engine
            .insert(&mut conn, &descriptor(), &table(), &[row(7, 4, 10), row(7, 4, 20)])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(_)));
        assert_eq!(engine.rows("ds", "Order_0").unwrap().len(), 3);
    }

    #[test]
    fn test_dropped_connection_rolls_back() {
        let engine = InMemoryEngine::new();
        tokio_test::block_on(async {
            let mut conn = engine.connect(&PhysicDataSource::new("ds")).await.unwrap();
            engine
                .insert(&mut conn, &descriptor(), &table(), &[row(1, 4, 30)])
                .await
                .unwrap();
            engine.begin(&mut conn).await.unwrap();
            engine
                .insert(&mut conn, &descriptor(), &table(), &[row(2, 4, 10)])
                .await
                .unwrap();
            engine
                .delete(&mut conn, &descriptor(), &table(), Some(&col("id").eq(1)))
                .await
                .unwrap();
            assert_eq!(engine.rows("ds", "Order_0").unwrap(), vec![row(2, 4, 10)]);
        });
        assert_eq!(engine.rows("ds", "Order_0").unwrap(), vec![row(1, 4, 30)]);
        assert_eq!(engine.counters().rollbacks, 0);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (engine, mut conn) = seeded().await;
        let assignments = Assignments::new().set("amount", col("amount").add(lit(1)));
        let updated = engine
            .update(&mut conn, &descriptor(), &table(), Some(&col("customer_id").eq(4)), &assignments)
            .await
            .unwrap();
        assert_eq!(updated, 2);
        assert_eq!(engine.rows("ds", "Order_0").unwrap()[0], row(1, 4, 31));

        let deleted = engine
            .delete(&mut conn, &descriptor(), &table(), Some(&col("amount").lt(25)))
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(engine.rows("ds", "Order_0").unwrap(), vec![row(1, 4, 31)]);
    }

    #[tokio::test]
    async fn test_rollback_restores_rows() {
        let (engine, mut conn) = seeded().await;
        let before = engine.rows("ds", "Order_0").unwrap();

        engine.begin(&mut conn).await.unwrap();
        assert!(conn.in_transaction());
        engine.insert(&mut conn, &descriptor(), &table(), &[row(9, 1, 1)]).await.unwrap();
        engine
            .update(&mut conn, &descriptor(), &table(), None, &Assignments::new().set("amount", 0))
            .await
            .unwrap();
        engine
            .delete(&mut conn, &descriptor(), &table(), Some(&col("id").in_list([1, 3])))
            .await
            .unwrap();
        engine.rollback(&mut conn).await.unwrap();

        assert!(!conn.in_transaction());
        assert_eq!(engine.rows("ds", "Order_0").unwrap(), before);
        assert_eq!(engine.counters().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_transaction_misuse() {
        let (engine, mut conn) = seeded().await;
        assert!(engine.commit(&mut conn).await.is_err());
        engine.begin(&mut conn).await.unwrap();
        assert!(matches!(engine.begin(&mut conn).await, Err(DbError::TransactionError(_))));
        engine.commit(&mut conn).await.unwrap();
        assert_eq!(engine.counters().commits, 1);
    }
}
