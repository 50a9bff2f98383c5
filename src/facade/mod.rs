pub mod blocking;
pub mod provider;

pub use blocking::{BlockingQuery, ShardingDb};
pub use provider::ShardingDbContext;
