use super::expression::LockType;
use crate::expression::Expr;
use crate::routing::PhysicTable;

/// One ordering of a query. The key is always a member access; `member`
/// caches its name.
#[derive(Debug, Clone, PartialEq)]
pub struct Ordering {
    pub key: Expr,
    pub member: String,
    pub ascending: bool,
}

impl Ordering {
    pub fn asc(member: impl Into<String>) -> Self {
        Self::new(member, true)
    }

    pub fn desc(member: impl Into<String>) -> Self {
        Self::new(member, false)
    }

    pub fn new(member: impl Into<String>, ascending: bool) -> Self {
        let member = member.into();
        Self {
            key: Expr::Member(member.clone()),
            member,
            ascending,
        }
    }
}

/// Normalised form of a logical query against one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryModel {
    pub entity: String,
    /// Conjunctive conditions in visitation order.
    pub conditions: Vec<Expr>,
    pub orderings: Vec<Ordering>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub global_filters: Vec<Expr>,
    pub context_filters: Vec<Expr>,
    pub ignore_all_filters: bool,
    pub lock: LockType,
    /// Physical table the query was pinned to, if any.
    pub table: Option<String>,
}

impl QueryModel {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            conditions: Vec::new(),
            orderings: Vec::new(),
            skip: None,
            take: None,
            global_filters: Vec::new(),
            context_filters: Vec::new(),
            ignore_all_filters: false,
            lock: LockType::None,
            table: None,
        }
    }

    /// Global and context filters in effect, empty when filters are ignored.
    pub fn active_filters(&self) -> Vec<Expr> {
        if self.ignore_all_filters {
            return Vec::new();
        }
        self.global_filters
            .iter()
            .chain(&self.context_filters)
            .cloned()
            .collect()
    }

    /// Every predicate a matching row must satisfy.
    pub fn predicate(&self) -> Option<Expr> {
        Expr::and_all(self.conditions.iter().cloned().chain(self.active_filters()))
    }

    pub fn is_ordered_by(&self, member: &str) -> bool {
        self.orderings.iter().any(|o| o.member == member)
    }

    /// The query bound to one physical table with the given page.
    pub fn bind(&self, table: PhysicTable, skip: Option<u64>, take: Option<u64>) -> DataQueryModel {
        DataQueryModel {
            table,
            conditions: self.conditions.clone(),
            orderings: self.orderings.clone(),
            skip,
            take,
            filters: self
                .global_filters
                .iter()
                .chain(&self.context_filters)
                .cloned()
                .collect(),
            ignore_all_filters: self.ignore_all_filters,
            lock: self.lock,
        }
    }
}

/// A query bound to exactly one physical table; what a shard engine runs.
#[derive(Debug, Clone, PartialEq)]
pub struct DataQueryModel {
    pub table: PhysicTable,
    pub conditions: Vec<Expr>,
    pub orderings: Vec<Ordering>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub filters: Vec<Expr>,
    pub ignore_all_filters: bool,
    pub lock: LockType,
}

impl DataQueryModel {
    /// Conditions plus the filters in effect.
    pub fn predicates(&self) -> Vec<Expr> {
        let mut predicates = self.conditions.clone();
        if !self.ignore_all_filters {
            predicates.extend(self.filters.iter().cloned());
        }
        predicates
    }

    /// Same query with orderings and page removed; used for aggregates.
    pub fn unpaged(&self) -> Self {
        Self {
            orderings: Vec::new(),
            skip: None,
            take: None,
            ..self.clone()
        }
    }
}
