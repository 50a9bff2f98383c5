use super::state::{TransactionId, TransactionState};
use crate::connection::{PoolGuard, ShardConnectionPool};
use crate::core::{DbError, Result};
use crate::engine::ShardEngine;
use crate::routing::PhysicDataSource;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// A transaction spanning every data source it touches.
///
/// Each data source contributes one pooled connection (a lane), acquired
/// and begun on first use. Commit and rollback walk the lanes in the order
/// they were opened. There is no two-phase commit: a lane failing to commit
/// after earlier lanes committed leaves those committed.
pub struct ShardTransaction<E: ShardEngine> {
    id: TransactionId,
    state: TransactionState,
    pool: Arc<ShardConnectionPool<E>>,
    lanes: Vec<PoolGuard<E>>,
    start_time: Instant,
}

impl<E: ShardEngine> ShardTransaction<E> {
    pub fn new(pool: Arc<ShardConnectionPool<E>>) -> Self {
        let id = TransactionId::next();
        debug!(transaction = %id, "transaction started");
        Self {
            id,
            state: TransactionState::Active,
            pool,
            lanes: Vec::new(),
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    fn ensure_active(&self) -> Result<()> {
        if !self.state.is_active() {
            return Err(DbError::TransactionError(format!(
                "Transaction {} is already {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// Opens a lane on every listed data source that has none yet.
    ///
    /// Lanes are acquired in name order so concurrent transactions over
    /// the same data sources queue instead of deadlocking.
    pub async fn open_lanes(&mut self, data_sources: &[PhysicDataSource]) -> Result<()> {
        self.ensure_active()?;
        let mut missing: Vec<&PhysicDataSource> = data_sources
            .iter()
            .filter(|ds| !self.lanes.iter().any(|lane| lane.data_source() == *ds))
            .collect();
        missing.sort_by(|a, b| a.name().cmp(b.name()));
        missing.dedup();

        for data_source in missing {
            let mut guard = self.pool.acquire(data_source).await?;
            self.pool.engine().begin(guard.connection()?).await?;
            debug!(transaction = %self.id, data_source = %data_source, "lane opened");
            self.lanes.push(guard);
        }
        Ok(())
    }

    /// Connection of the lane on `data_source`, opened if needed.
    pub async fn connection(&mut self, data_source: &PhysicDataSource) -> Result<&mut E::Connection> {
        self.open_lanes(std::slice::from_ref(data_source)).await?;
        let lane = self
            .lanes
            .iter_mut()
            .find(|lane| lane.data_source() == data_source)
            .ok_or_else(|| {
                DbError::TransactionError(format!("No lane for data source '{}'", data_source))
            })?;
        lane.connection()
    }

    /// Disjoint mutable access to every open lane.
    pub fn connections_mut(&mut self) -> Result<Vec<(PhysicDataSource, &mut E::Connection)>> {
        self.ensure_active()?;
        self.lanes
            .iter_mut()
            .map(|lane| {
                let data_source = lane.data_source().clone();
                Ok((data_source, lane.connection()?))
            })
            .collect()
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        let engine = Arc::clone(self.pool.engine());

        let mut lanes = std::mem::take(&mut self.lanes).into_iter();
        let mut committed_lanes = 0;
        while let Some(mut lane) = lanes.next() {
            let result = match lane.connection() {
                Ok(conn) => engine.commit(conn).await,
                Err(e) => Err(e),
            };
            if let Err(err) = result {
                warn!(transaction = %self.id, data_source = %lane.data_source(), error = %err, "commit failed, rolling back remaining lanes");
                self.lanes.push(lane);
                self.lanes.extend(lanes);
                self.rollback_lanes().await;
                self.state = if committed_lanes == 0 {
                    TransactionState::Aborted
                } else {
                    TransactionState::PartiallyCommitted { committed_lanes }
                };
                return Err(err);
            }
            committed_lanes += 1;
        }

        self.state = TransactionState::Committed;
        debug!(transaction = %self.id, elapsed = ?self.duration(), "transaction committed");
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_active()?;
        let first_error = self.rollback_lanes().await;
        self.state = TransactionState::Aborted;
        debug!(transaction = %self.id, "transaction rolled back");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Rolls back every lane still in a transaction; keeps going on failure.
    async fn rollback_lanes(&mut self) -> Option<DbError> {
        let engine = Arc::clone(self.pool.engine());
        let mut first_error = None;
        for mut lane in std::mem::take(&mut self.lanes) {
            let result = match lane.connection() {
                Ok(conn) => engine.rollback(conn).await,
                Err(e) => Err(e),
            };
            if let Err(err) = result {
                warn!(transaction = %self.id, data_source = %lane.data_source(), error = %err, "rollback failed");
                first_error.get_or_insert(err);
            }
        }
        first_error
    }
}

impl<E: ShardEngine> Drop for ShardTransaction<E> {
    fn drop(&mut self) {
        if self.state.is_active() && !self.lanes.is_empty() {
            warn!(
                transaction = %self.id,
                lanes = self.lanes.len(),
                "transaction dropped while active; its connections are discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ShardingOptions;
    use crate::engine::InMemoryEngine;

    fn pool() -> Arc<ShardConnectionPool<InMemoryEngine>> {
        Arc::new(ShardConnectionPool::new(Arc::new(InMemoryEngine::new()), ShardingOptions::new()).unwrap())
    }

    #[tokio::test]
    async fn test_one_lane_per_data_source() {
        let pool = pool();
        let mut txn = ShardTransaction::new(Arc::clone(&pool));
        let ds0 = PhysicDataSource::new("ds0");
        let ds1 = PhysicDataSource::new("ds1");

        txn.open_lanes(&[ds1.clone(), ds0.clone(), ds1.clone()]).await.unwrap();
        txn.connection(&ds0).await.unwrap();
        assert_eq!(txn.lane_count(), 2);
        assert_eq!(pool.engine().counters().begins, 2);

        txn.commit().await.unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(pool.engine().counters().commits, 2);
        assert!(pool.stats().unwrap().iter().all(|s| s.idle_connections == 1));
    }

    #[tokio::test]
    async fn test_finished_transaction_rejects_use() {
        let pool = pool();
        let mut txn = ShardTransaction::new(pool);
        txn.connection(&PhysicDataSource::new("ds")).await.unwrap();
        txn.rollback().await.unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);

        assert!(matches!(txn.commit().await, Err(DbError::TransactionError(_))));
        assert!(txn.connection(&PhysicDataSource::new("ds")).await.is_err());
    }
}
