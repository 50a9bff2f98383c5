pub mod aggregate;
pub mod builder;
pub mod plan;

pub use aggregate::{AggregateModel, AggregateSelector, ShardAggregate, compute_primitive};
pub use builder::PlanBuilder;
pub use plan::{
    KeyQueryResult, PlanShape, ProjectionRow, ShardingQueryPlan, TableDataQueryPlan,
    slice_in_list,
};
