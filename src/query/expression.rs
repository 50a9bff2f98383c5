use crate::expression::Expr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row lock requested by a query, passed through to shard engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockType {
    #[default]
    None,
    Shared,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    OrderBy,
    OrderByDesc,
    ThenBy,
    ThenByDesc,
}

impl OrderKind {
    pub fn is_ascending(self) -> bool {
        matches!(self, OrderKind::OrderBy | OrderKind::ThenBy)
    }

    /// `OrderBy*` replaces prior orderings, `ThenBy*` appends.
    pub fn replaces(self) -> bool {
        matches!(self, OrderKind::OrderBy | OrderKind::OrderByDesc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Sum(String),
    Average(String),
    Min(String),
    Max(String),
}

impl AggregateFunction {
    pub fn member(&self) -> Option<&str> {
        match self {
            AggregateFunction::Count => None,
            AggregateFunction::Sum(m)
            | AggregateFunction::Average(m)
            | AggregateFunction::Min(m)
            | AggregateFunction::Max(m) => Some(m),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Count => write!(f, "COUNT(*)"),
            AggregateFunction::Sum(m) => write!(f, "SUM({})", m),
            AggregateFunction::Average(m) => write!(f, "AVG({})", m),
            AggregateFunction::Min(m) => write!(f, "MIN({})", m),
            AggregateFunction::Max(m) => write!(f, "MAX({})", m),
        }
    }
}

/// A logical query as a chain of composition steps over an entity root.
///
/// Only a subset of the chain is representable in the sharded algebra;
/// see [`QueryModelBuilder`](super::QueryModelBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryExpression {
    Root {
        entity: String,
        table: Option<String>,
        lock: LockType,
    },
    Where {
        source: Box<QueryExpression>,
        predicate: Expr,
    },
    Order {
        source: Box<QueryExpression>,
        kind: OrderKind,
        key: Expr,
    },
    Skip {
        source: Box<QueryExpression>,
        count: u64,
    },
    Take {
        source: Box<QueryExpression>,
        count: u64,
    },
    IgnoreAllFilters {
        source: Box<QueryExpression>,
    },
    Select {
        source: Box<QueryExpression>,
        projection: Vec<Expr>,
    },
    Join {
        source: Box<QueryExpression>,
        entity: String,
        on: Expr,
    },
    GroupBy {
        source: Box<QueryExpression>,
        key: Expr,
    },
    Include {
        source: Box<QueryExpression>,
        path: String,
    },
    Distinct {
        source: Box<QueryExpression>,
    },
    Aggregate {
        source: Box<QueryExpression>,
        function: AggregateFunction,
    },
}

impl QueryExpression {
    pub fn root(entity: impl Into<String>) -> Self {
        QueryExpression::Root {
            entity: entity.into(),
            table: None,
            lock: LockType::None,
        }
    }

    pub fn root_with(entity: impl Into<String>, table: Option<String>, lock: LockType) -> Self {
        QueryExpression::Root {
            entity: entity.into(),
            table,
            lock,
        }
    }

    pub fn filter(self, predicate: Expr) -> Self {
        QueryExpression::Where {
            source: Box::new(self),
            predicate,
        }
    }

    pub fn order(self, kind: OrderKind, key: Expr) -> Self {
        QueryExpression::Order {
            source: Box::new(self),
            kind,
            key,
        }
    }

    pub fn order_by(self, key: Expr) -> Self {
        self.order(OrderKind::OrderBy, key)
    }

    pub fn order_by_desc(self, key: Expr) -> Self {
        self.order(OrderKind::OrderByDesc, key)
    }

    pub fn then_by(self, key: Expr) -> Self {
        self.order(OrderKind::ThenBy, key)
    }

    pub fn then_by_desc(self, key: Expr) -> Self {
        self.order(OrderKind::ThenByDesc, key)
    }

    pub fn skip(self, count: u64) -> Self {
        QueryExpression::Skip {
            source: Box::new(self),
            count,
        }
    }

    pub fn take(self, count: u64) -> Self {
        QueryExpression::Take {
            source: Box::new(self),
            count,
        }
    }

    pub fn ignore_all_filters(self) -> Self {
        QueryExpression::IgnoreAllFilters {
            source: Box::new(self),
        }
    }

    pub fn select(self, projection: Vec<Expr>) -> Self {
        QueryExpression::Select {
            source: Box::new(self),
            projection,
        }
    }

    pub fn join(self, entity: impl Into<String>, on: Expr) -> Self {
        QueryExpression::Join {
            source: Box::new(self),
            entity: entity.into(),
            on,
        }
    }

    pub fn group_by(self, key: Expr) -> Self {
        QueryExpression::GroupBy {
            source: Box::new(self),
            key,
        }
    }

    pub fn include(self, path: impl Into<String>) -> Self {
        QueryExpression::Include {
            source: Box::new(self),
            path: path.into(),
        }
    }

    pub fn distinct(self) -> Self {
        QueryExpression::Distinct {
            source: Box::new(self),
        }
    }

    pub fn aggregate(self, function: AggregateFunction) -> Self {
        QueryExpression::Aggregate {
            source: Box::new(self),
            function,
        }
    }

    /// Entity named by the root of the chain.
    pub fn entity(&self) -> &str {
        match self {
            QueryExpression::Root { entity, .. } => entity,
            QueryExpression::Where { source, .. }
            | QueryExpression::Order { source, .. }
            | QueryExpression::Skip { source, .. }
            | QueryExpression::Take { source, .. }
            | QueryExpression::IgnoreAllFilters { source }
            | QueryExpression::Select { source, .. }
            | QueryExpression::Join { source, .. }
            | QueryExpression::GroupBy { source, .. }
            | QueryExpression::Include { source, .. }
            | QueryExpression::Distinct { source }
            | QueryExpression::Aggregate { source, .. } => source.entity(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QueryExpression::Root { .. } => "Root",
            QueryExpression::Where { .. } => "Where",
            QueryExpression::Order { .. } => "Order",
            QueryExpression::Skip { .. } => "Skip",
            QueryExpression::Take { .. } => "Take",
            QueryExpression::IgnoreAllFilters { .. } => "IgnoreAllFilters",
            QueryExpression::Select { .. } => "Select",
            QueryExpression::Join { .. } => "Join",
            QueryExpression::GroupBy { .. } => "GroupBy",
            QueryExpression::Include { .. } => "Include",
            QueryExpression::Distinct { .. } => "Distinct",
            QueryExpression::Aggregate { .. } => "Aggregate",
        }
    }
}
