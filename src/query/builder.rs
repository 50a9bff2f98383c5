use super::expression::QueryExpression;
use super::model::{Ordering, QueryModel};
use crate::core::{DbError, EntityDescriptor, Result};
use crate::expression::Expr;

/// Folds a [`QueryExpression`] chain into a [`QueryModel`].
pub struct QueryModelBuilder<'a> {
    descriptor: &'a EntityDescriptor,
    context_filters: &'a [Expr],
}

impl<'a> QueryModelBuilder<'a> {
    pub fn new(descriptor: &'a EntityDescriptor, context_filters: &'a [Expr]) -> Self {
        Self {
            descriptor,
            context_filters,
        }
    }

    pub fn build(
        descriptor: &EntityDescriptor,
        context_filters: &[Expr],
        expression: &QueryExpression,
    ) -> Result<QueryModel> {
        QueryModelBuilder::new(descriptor, context_filters).visit(expression)
    }

    fn visit(&self, expression: &QueryExpression) -> Result<QueryModel> {
        match expression {
            QueryExpression::Root {
                entity,
                table,
                lock,
            } => {
                if entity != self.descriptor.name() {
                    return Err(DbError::UnsupportedQueryShape(format!(
                        "Query root '{}' does not match entity '{}'",
                        entity,
                        self.descriptor.name()
                    )));
                }
                let mut model = QueryModel::new(entity.clone());
                model.global_filters = self.descriptor.filters().to_vec();
                model.context_filters = self.context_filters.to_vec();
                model.lock = *lock;
                model.table = table.clone();
                Ok(model)
            }
            QueryExpression::Where { source, predicate } => {
                let mut model = self.visit(source)?;
                self.check_members(predicate)?;
                model.conditions.push(predicate.clone());
                Ok(model)
            }
            QueryExpression::Order { source, kind, key } => {
                let mut model = self.visit(source)?;
                let member = key.as_member().ok_or_else(|| {
                    DbError::UnsupportedQueryShape(format!(
                        "Ordering key '{}' is not a member access",
                        key
                    ))
                })?;
                self.descriptor.require_member(member)?;
                let ordering = Ordering::new(member, kind.is_ascending());
                if kind.replaces() {
                    model.orderings = vec![ordering];
                } else {
                    model.orderings.push(ordering);
                }
                Ok(model)
            }
            QueryExpression::Skip { source, count } => {
                let mut model = self.visit(source)?;
                model.skip = Some(*count);
                Ok(model)
            }
            QueryExpression::Take { source, count } => {
                let mut model = self.visit(source)?;
                model.take = Some(*count);
                Ok(model)
            }
            QueryExpression::IgnoreAllFilters { source } => {
                let mut model = self.visit(source)?;
                model.ignore_all_filters = true;
                Ok(model)
            }
            QueryExpression::Aggregate { function, .. } => Err(DbError::UnsupportedQueryShape(
                format!("Nested aggregate {} cannot be sharded", function),
            )),
            unsupported => Err(DbError::UnsupportedQueryShape(format!(
                "'{}' is not supported on sharded entity '{}'",
                unsupported.name(),
                self.descriptor.name()
            ))),
        }
    }

    fn check_members(&self, predicate: &Expr) -> Result<()> {
        for member in predicate.referenced_members() {
            self.descriptor.require_member(member)?;
        }
        Ok(())
    }
}
