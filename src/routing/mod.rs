pub mod config;
pub mod hash;
pub mod resolver;
pub mod strategy;
pub mod table;

pub use config::{ShardedEntity, ShardingConfig, ShardingRegistry};
pub use hash::{stable_bucket_for, stable_hash};
pub use resolver::RoutingResolver;
pub use strategy::{ModShardingStrategy, RangeRoute, RangeShardingStrategy, ShardingStrategy};
pub use table::{PhysicDataSource, PhysicTable, RouteTable, group_tables};
