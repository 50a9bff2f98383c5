use super::expression::{AggregateFunction, QueryExpression};
use crate::core::{DbError, Entity, Result, Value};
use crate::engine::ShardEngine;
use crate::expression::{Expr, col};
use crate::facade::ShardingDbContext;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// Lazy query over a sharded entity.
///
/// Composition only extends the underlying [`QueryExpression`]; nothing
/// touches a shard until a materialiser is awaited.
pub struct ShardedQuery<'a, E: ShardEngine, T: Entity> {
    context: &'a ShardingDbContext<E>,
    expression: QueryExpression,
    _entity: PhantomData<T>,
}

impl<'a, E: ShardEngine, T: Entity> Clone for ShardedQuery<'a, E, T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context,
            expression: self.expression.clone(),
            _entity: PhantomData,
        }
    }
}

impl<'a, E: ShardEngine, T: Entity> ShardedQuery<'a, E, T> {
    pub(crate) fn new(context: &'a ShardingDbContext<E>, expression: QueryExpression) -> Self {
        Self {
            context,
            expression,
            _entity: PhantomData,
        }
    }

    /// Wraps an externally built expression. The expression is checked
    /// eagerly so shape errors surface here rather than at materialisation.
    pub fn from_expression(context: &'a ShardingDbContext<E>, expression: QueryExpression) -> Result<Self> {
        if expression.entity() != T::descriptor().name() {
            return Err(DbError::UnsupportedQueryShape(format!(
                "Expression over '{}' used as a query of '{}'",
                expression.entity(),
                T::descriptor().name()
            )));
        }
        context.build_model(&expression)?;
        Ok(Self::new(context, expression))
    }

    pub fn expression(&self) -> &QueryExpression {
        &self.expression
    }

    fn map(self, f: impl FnOnce(QueryExpression) -> QueryExpression) -> Self {
        Self {
            context: self.context,
            expression: f(self.expression),
            _entity: PhantomData,
        }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        self.map(|e| e.filter(predicate))
    }

    pub fn order_by(self, member: &str) -> Self {
        self.map(|e| e.order_by(col(member)))
    }

    pub fn order_by_desc(self, member: &str) -> Self {
        self.map(|e| e.order_by_desc(col(member)))
    }

    pub fn then_by(self, member: &str) -> Self {
        self.map(|e| e.then_by(col(member)))
    }

    pub fn then_by_desc(self, member: &str) -> Self {
        self.map(|e| e.then_by_desc(col(member)))
    }

    pub fn skip(self, count: u64) -> Self {
        self.map(|e| e.skip(count))
    }

    pub fn take(self, count: u64) -> Self {
        self.map(|e| e.take(count))
    }

    pub fn ignore_all_filters(self) -> Self {
        self.map(QueryExpression::ignore_all_filters)
    }

    pub async fn to_list(&self) -> Result<Vec<T>> {
        let rows = self.context.fetch_rows(&self.expression).await?;
        rows.iter().map(T::from_row).collect()
    }

    pub async fn first(&self) -> Result<Option<T>> {
        let (_, model) = self.context.build_model(&self.expression)?;
        if model.take == Some(0) {
            return Ok(None);
        }
        let rows = self
            .context
            .fetch_rows(&self.expression.clone().take(1))
            .await?;
        rows.first().map(T::from_row).transpose()
    }

    pub async fn count(&self) -> Result<u64> {
        let value = self
            .context
            .aggregate(&self.expression, &AggregateFunction::Count)
            .await?;
        Ok(value.as_i64().unwrap_or(0).max(0) as u64)
    }

    pub async fn any(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    /// NULL when no row has a value for `member`.
    pub async fn sum(&self, member: &str) -> Result<Value> {
        self.context
            .aggregate(&self.expression, &AggregateFunction::Sum(member.to_string()))
            .await
    }

    pub async fn average(&self, member: &str) -> Result<Value> {
        self.context
            .aggregate(&self.expression, &AggregateFunction::Average(member.to_string()))
            .await
    }

    pub async fn max(&self, member: &str) -> Result<Value> {
        self.context
            .aggregate(&self.expression, &AggregateFunction::Max(member.to_string()))
            .await
    }

    pub async fn min(&self, member: &str) -> Result<Value> {
        self.context
            .aggregate(&self.expression, &AggregateFunction::Min(member.to_string()))
            .await
    }

    /// One page of the query plus the total row count. Pages start at 1.
    pub async fn paging(&self, page_number: u64, page_size: u64) -> Result<PagedList<T>> {
        if page_number == 0 {
            return Err(DbError::ExecutionError(
                "Page numbers start at 1".to_string(),
            ));
        }
        let total_count = self.count().await?;
        let items = self
            .clone()
            .skip((page_number - 1).saturating_mul(page_size))
            .take(page_size)
            .to_list()
            .await?;
        Ok(PagedList {
            total_count,
            page_number,
            page_size,
            items,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedList<T> {
    pub total_count: u64,
    pub page_number: u64,
    pub page_size: u64,
    pub items: Vec<T>,
}

impl<T> PagedList<T> {
    pub fn page_count(&self) -> u64 {
        if self.page_size == 0 {
            0
        } else {
            self.total_count.div_ceil(self.page_size)
        }
    }

    pub fn has_next(&self) -> bool {
        self.page_number < self.page_count()
    }
}
