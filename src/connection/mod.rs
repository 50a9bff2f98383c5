pub mod config;
pub mod pool;

pub use config::{PaginationMode, ShardingOptions};
pub use pool::{DataSourcePool, PoolGuard, PoolStats, ShardConnectionPool};
