pub mod builder;
pub mod expression;
pub mod handle;
pub mod model;

pub use builder::QueryModelBuilder;
pub use expression::{AggregateFunction, LockType, OrderKind, QueryExpression};
pub use handle::{PagedList, ShardedQuery};
pub use model::{DataQueryModel, Ordering, QueryModel};
