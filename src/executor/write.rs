//! Applies routed writes to shard tables, inside a transaction when more
//! than one statement is involved.

use super::cancel::{CancellationSignal, run_cancellable};
use crate::connection::ShardConnectionPool;
use crate::core::{DbError, EntityDescriptor, Result, Row};
use crate::engine::ShardEngine;
use crate::expression::{Assignments, Expr};
use crate::planner::slice_in_list;
use crate::routing::{PhysicDataSource, PhysicTable, group_tables};
use crate::transaction::ShardTransaction;
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span, warn};

/// One statement against one physical table.
#[derive(Debug, Clone)]
pub enum TableWrite {
    Insert(Vec<Row>),
    Update {
        predicate: Option<Expr>,
        assignments: Assignments,
    },
    Delete {
        predicate: Option<Expr>,
    },
}

impl TableWrite {
    pub fn kind(&self) -> &'static str {
        match self {
            TableWrite::Insert(_) => "insert",
            TableWrite::Update { .. } => "update",
            TableWrite::Delete { .. } => "delete",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteStep {
    pub table: PhysicTable,
    pub write: TableWrite,
}

impl WriteStep {
    pub fn new(table: PhysicTable, write: TableWrite) -> Self {
        Self { table, write }
    }
}

/// How a batch of steps must be run.
#[derive(Debug, Clone, Copy, Default)]
pub struct WritePolicy {
    /// Wrap in a transaction even without an ambient one
    pub transactional: bool,
    /// Upper bound on the summed affected rows
    pub max_affected: Option<u64>,
}

pub struct WriteExecutor<'a, E: ShardEngine> {
    pool: &'a Arc<ShardConnectionPool<E>>,
    descriptor: &'a EntityDescriptor,
    cancellation: Option<&'a CancellationSignal>,
}

impl<'a, E: ShardEngine> WriteExecutor<'a, E> {
    pub fn new(
        pool: &'a Arc<ShardConnectionPool<E>>,
        descriptor: &'a EntityDescriptor,
        cancellation: Option<&'a CancellationSignal>,
    ) -> Self {
        Self {
            pool,
            descriptor,
            cancellation,
        }
    }

    /// Runs `steps` and returns the summed affected rows.
    ///
    /// With an ambient transaction every step runs in it; otherwise a
    /// transaction is opened when the policy asks for one. Any failure, a
    /// cap violation or cancellation rolls back whichever transaction is in
    /// use before the error is returned.
    pub async fn execute(
        &self,
        steps: Vec<WriteStep>,
        policy: WritePolicy,
        ambient: Option<&mut ShardTransaction<E>>,
    ) -> Result<u64> {
        let tables: Vec<PhysicTable> = steps.iter().map(|s| s.table.clone()).collect();
        let table_count: usize = group_tables(&tables).iter().map(|(_, t)| t.len()).sum();
        let span = info_span!(
            "sharding.write",
            entity = self.descriptor.name(),
            kind = steps.first().map(|s| s.write.kind()).unwrap_or("none"),
            tables = table_count,
            statements = steps.len()
        );

        async {
            if steps.is_empty() {
                return Ok(0);
            }
            match ambient {
                Some(txn) => self.execute_in(txn, steps, policy).await,
                None if policy.transactional => {
                    let mut txn = ShardTransaction::new(Arc::clone(self.pool));
                    let affected = self.execute_in(&mut txn, steps, policy).await?;
                    txn.commit().await?;
                    Ok(affected)
                }
                None => {
                    run_cancellable(self.cancellation, self.execute_direct(steps)).await
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute_in(
        &self,
        txn: &mut ShardTransaction<E>,
        steps: Vec<WriteStep>,
        policy: WritePolicy,
    ) -> Result<u64> {
        let outcome = run_cancellable(self.cancellation, self.execute_lanes(txn, &steps)).await;
        let outcome = outcome.and_then(|affected| match policy.max_affected {
            Some(cap) if affected > cap => Err(DbError::UniquenessViolation {
                expected: cap,
                actual: affected,
            }),
            _ => Ok(affected),
        });

        if let Err(err) = &outcome {
            debug!(transaction = %txn.id(), error = %err, "rolling back");
            if let Err(rollback_err) = txn.rollback().await {
                warn!(transaction = %txn.id(), error = %rollback_err, "rollback failed");
            }
        }
        outcome
    }

    /// One lane per data source; lanes run concurrently, the steps of a
    /// lane run in order.
    async fn execute_lanes(&self, txn: &mut ShardTransaction<E>, steps: &[WriteStep]) -> Result<u64> {
        let mut by_source: Vec<(PhysicDataSource, Vec<&WriteStep>)> = Vec::new();
        for step in steps {
            let ds = step.table.data_source();
            match by_source.iter_mut().find(|(d, _)| d == ds) {
                Some((_, group)) => group.push(step),
                None => by_source.push((ds.clone(), vec![step])),
            }
        }

        let data_sources: Vec<PhysicDataSource> = by_source.iter().map(|(d, _)| d.clone()).collect();
        txn.open_lanes(&data_sources).await?;

        let engine = self.pool.engine();
        let lanes = txn
            .connections_mut()?
            .into_iter()
            .filter_map(|(ds, conn)| {
                let group = by_source.iter().find(|(d, _)| *d == ds)?.1.clone();
                Some(async move {
                    let mut affected = 0;
                    for step in group {
                        affected += apply(engine.as_ref(), conn, self.descriptor, step).await?;
                    }
                    Ok::<u64, DbError>(affected)
                })
            });

        Ok(try_join_all(lanes).await?.into_iter().sum())
    }

    /// Single statement outside any transaction.
    async fn execute_direct(&self, steps: Vec<WriteStep>) -> Result<u64> {
        let mut affected = 0;
        for step in &steps {
            let mut guard = self.pool.acquire(step.table.data_source()).await?;
            affected += apply(self.pool.engine().as_ref(), guard.connection()?, self.descriptor, step).await?;
        }
        Ok(affected)
    }
}

async fn apply<E: ShardEngine>(
    engine: &E,
    conn: &mut E::Connection,
    descriptor: &EntityDescriptor,
    step: &WriteStep,
) -> Result<u64> {
    match &step.write {
        TableWrite::Insert(rows) => engine.insert(conn, descriptor, &step.table, rows).await,
        TableWrite::Update {
            predicate,
            assignments,
        } => {
            engine
                .update(conn, descriptor, &step.table, predicate.as_ref(), assignments)
                .await
        }
        TableWrite::Delete { predicate } => {
            engine
                .delete(conn, descriptor, &step.table, predicate.as_ref())
                .await
        }
    }
}

/// Splits the first top-level `IN` conjunct longer than `max_in_items`
/// into one predicate per slice. Other predicates come back unchanged.
pub fn split_in_list(predicate: Option<&Expr>, max_in_items: usize) -> Vec<Option<Expr>> {
    let Some(predicate) = predicate else {
        return vec![None];
    };
    let max = max_in_items.max(1);
    let conjuncts = predicate.conjuncts();
    let Some(position) = conjuncts.iter().position(|c| {
        matches!(c, Expr::In { negated: false, list, .. } if list.len() > max)
    }) else {
        return vec![Some(predicate.clone())];
    };

    let Expr::In { expr, list, .. } = conjuncts[position] else {
        return vec![Some(predicate.clone())];
    };
    slice_in_list(list, max)
        .into_iter()
        .map(|chunk| {
            let sliced = Expr::In {
                expr: expr.clone(),
                list: chunk,
                negated: false,
            };
            let parts = conjuncts.iter().enumerate().map(|(i, c)| {
                if i == position { sliced.clone() } else { (*c).clone() }
            });
            Expr::and_all(parts)
        })
        .collect()
}
