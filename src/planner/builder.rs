use super::plan::{PlanShape, ShardingQueryPlan};
use crate::connection::PaginationMode;
use crate::core::{EntityDescriptor, Result};
use crate::query::{Ordering, QueryModel};
use crate::routing::{PhysicTable, RouteTable};
use tracing::debug;

/// Chooses a plan shape for a query over its candidate tables.
pub struct PlanBuilder<'a> {
    descriptor: &'a EntityDescriptor,
    pagination: PaginationMode,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(descriptor: &'a EntityDescriptor, pagination: PaginationMode) -> Self {
        Self {
            descriptor,
            pagination,
        }
    }

    pub fn build(&self, model: &QueryModel, route_tables: &[RouteTable]) -> Result<ShardingQueryPlan> {
        let primary_key = self.descriptor.primary_key().to_string();
        self.descriptor.primary_key_index()?;

        let mut model = model.clone();
        if !model.is_ordered_by(&primary_key) {
            model.orderings.push(Ordering::asc(primary_key.clone()));
        }

        let tables: Vec<PhysicTable> = route_tables.iter().map(PhysicTable::from).collect();
        let shape = if tables.is_empty() || model.take == Some(0) {
            PlanShape::Empty
        } else if tables.len() == 1 {
            PlanShape::SingleTable
        } else if model.take.is_none() {
            PlanShape::Unbounded
        } else {
            PlanShape::Paginated
        };

        debug!(
            entity = self.descriptor.name(),
            %shape,
            tables = tables.len(),
            skip = ?model.skip,
            take = ?model.take,
            "built query plan"
        );

        Ok(ShardingQueryPlan {
            shape,
            model,
            tables,
            primary_key,
            pagination: self.pagination,
        })
    }
}
