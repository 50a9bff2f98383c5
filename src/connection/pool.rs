use super::config::ShardingOptions;
use crate::core::{DbError, Result};
use crate::engine::{ShardConnection, ShardEngine};
use crate::routing::PhysicDataSource;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Connection pool of one data source
///
/// At most `max_connections` engine connections exist at once; callers
/// beyond that wait on a semaphore for up to `acquire_timeout`.
pub struct DataSourcePool<E: ShardEngine> {
    data_source: PhysicDataSource,
    engine: Arc<E>,
    /// Idle connections ready for reuse
    idle: Mutex<VecDeque<E::Connection>>,
    /// One permit per connection slot
    slots: Arc<Semaphore>,
    /// Connections currently alive (idle + in use)
    total_connections: AtomicUsize,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl<E: ShardEngine> DataSourcePool<E> {
    pub fn new(
        data_source: PhysicDataSource,
        engine: Arc<E>,
        max_connections: usize,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            data_source,
            engine,
            idle: Mutex::new(VecDeque::new()),
            slots: Arc::new(Semaphore::new(max_connections)),
            total_connections: AtomicUsize::new(0),
            max_connections,
            acquire_timeout,
        }
    }

    pub fn data_source(&self) -> &PhysicDataSource {
        &self.data_source
    }

    /// Get a connection, reusing an idle one when available
    pub async fn acquire(self: &Arc<Self>) -> Result<PoolGuard<E>> {
        let permit = tokio::time::timeout(self.acquire_timeout, self.slots.clone().acquire_owned())
            .await
            .map_err(|_| {
                DbError::PoolTimeout(format!(
                    "no connection to '{}' available after {:?}",
                    self.data_source, self.acquire_timeout
                ))
            })?
            .map_err(|_| {
                DbError::ExecutionError(format!("pool of '{}' is closed", self.data_source))
            })?;

        let reused = self.idle.lock()?.pop_front();
        let connection = match reused {
            Some(connection) => connection,
            None => {
                let connection = self.engine.connect(&self.data_source).await?;
                self.total_connections.fetch_add(1, Ordering::SeqCst);
                connection
            }
        };

        Ok(PoolGuard {
            connection: Some(connection),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    /// Get pool statistics
    pub fn stats(&self) -> Result<PoolStats> {
        let idle = self.idle.lock()?.len();
        let total = self.total_connections.load(Ordering::SeqCst);
        Ok(PoolStats {
            data_source: self.data_source.name().to_string(),
            total_connections: total,
            idle_connections: idle,
            in_use_connections: total.saturating_sub(idle),
            max_connections: self.max_connections,
        })
    }

    fn give_back(&self, connection: E::Connection) {
        if connection.in_transaction() {
            log::warn!(
                "PoolGuard for '{}' dropped with active transaction. Connection discarded.",
                self.data_source
            );
            self.total_connections.fetch_sub(1, Ordering::SeqCst);
            return;
        }

        match self.idle.lock() {
            Ok(mut idle) => idle.push_back(connection),
            Err(_) => {
                log::warn!(
                    "Idle list of '{}' is poisoned. Connection discarded.",
                    self.data_source
                );
                self.total_connections.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}

/// Connection pools of every data source, created on first use.
pub struct ShardConnectionPool<E: ShardEngine> {
    engine: Arc<E>,
    options: ShardingOptions,
    pools: RwLock<HashMap<String, Arc<DataSourcePool<E>>>>,
}

impl<E: ShardEngine> ShardConnectionPool<E> {
    pub fn new(engine: Arc<E>, options: ShardingOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            engine,
            options,
            pools: RwLock::new(HashMap::new()),
        })
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    pub fn options(&self) -> &ShardingOptions {
        &self.options
    }

    pub fn pool_for(&self, data_source: &PhysicDataSource) -> Result<Arc<DataSourcePool<E>>> {
        if let Some(pool) = self.pools.read()?.get(data_source.name()) {
            return Ok(Arc::clone(pool));
        }

        let mut pools = self.pools.write()?;
        let pool = pools
            .entry(data_source.name().to_string())
            .or_insert_with(|| {
                Arc::new(DataSourcePool::new(
                    data_source.clone(),
                    Arc::clone(&self.engine),
                    self.options.max_connections_per_data_source,
                    self.options.acquire_timeout,
                ))
            });
        Ok(Arc::clone(pool))
    }

    pub async fn acquire(&self, data_source: &PhysicDataSource) -> Result<PoolGuard<E>> {
        self.pool_for(data_source)?.acquire().await
    }

    /// Statistics of every data source pool created so far, by name.
    pub fn stats(&self) -> Result<Vec<PoolStats>> {
        let pools: Vec<Arc<DataSourcePool<E>>> = self.pools.read()?.values().cloned().collect();
        let mut stats = pools.iter().map(|p| p.stats()).collect::<Result<Vec<_>>>()?;
        stats.sort_by(|a, b| a.data_source.cmp(&b.data_source));
        Ok(stats)
    }
}

/// Connection pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub data_source: String,
    pub total_connections: usize,
    pub idle_connections: usize,
    pub in_use_connections: usize,
    pub max_connections: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool '{}': {}/{} in use, {} idle, max {}",
            self.data_source,
            self.in_use_connections,
            self.total_connections,
            self.idle_connections,
            self.max_connections
        )
    }
}

/// RAII guard for pooled connections
///
/// Returns the connection to its pool when dropped. A connection still
/// inside a transaction is discarded instead, since rollback is async.
pub struct PoolGuard<E: ShardEngine> {
    connection: Option<E::Connection>,
    pool: Arc<DataSourcePool<E>>,
    _permit: OwnedSemaphorePermit,
}

impl<E: ShardEngine> PoolGuard<E> {
    pub fn data_source(&self) -> &PhysicDataSource {
        self.pool.data_source()
    }

    /// Get a reference to the connection
    pub fn connection(&mut self) -> Result<&mut E::Connection> {
        self.connection.as_mut().ok_or_else(|| {
            DbError::ExecutionError("Connection already returned to pool".to_string())
        })
    }

    /// Return the connection to the pool now.
    pub fn release(self) {
        drop(self);
    }
}

impl<E: ShardEngine> Drop for PoolGuard<E> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.give_back(connection);
        }
    }
}
