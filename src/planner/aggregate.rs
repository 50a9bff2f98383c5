use crate::core::{DbError, Result, Value};
use crate::query::AggregateFunction;
use std::cmp::Ordering;

/// Aggregate primitive a single shard can compute on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardAggregate {
    /// `COUNT(*)` when `None`, count of non-NULL member values otherwise.
    Count(Option<String>),
    Sum(String),
    Min(String),
    Max(String),
}

/// Partial `(sum, count)` of one shard, combinable by addition.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateModel {
    pub sum: Value,
    pub count: u64,
}

impl Default for AggregateModel {
    fn default() -> Self {
        Self {
            sum: Value::Null,
            count: 0,
        }
    }
}

impl AggregateModel {
    pub fn new(sum: Value, count: u64) -> Self {
        Self { sum, count }
    }

    pub fn combine(&self, other: &AggregateModel) -> Result<AggregateModel> {
        Ok(AggregateModel {
            sum: add_partial(&self.sum, &other.sum)?,
            count: self.count + other.count,
        })
    }

    /// `sum / count`, NULL over zero rows.
    pub fn average(&self) -> Result<Value> {
        if self.count == 0 || self.sum.is_null() {
            return Ok(Value::Null);
        }
        let sum = self.sum.as_f64().ok_or_else(|| {
            DbError::TypeMismatch(format!("Cannot average {} values", self.sum.type_name()))
        })?;
        Ok(Value::Float(sum / self.count as f64))
    }
}

/// Rewrites aggregate functions into shard primitives and combines the
/// per-shard results.
pub struct AggregateSelector;

impl AggregateSelector {
    pub fn rewrite(function: &AggregateFunction) -> Vec<ShardAggregate> {
        match function {
            AggregateFunction::Count => vec![ShardAggregate::Count(None)],
            AggregateFunction::Sum(m) => vec![ShardAggregate::Sum(m.clone())],
            AggregateFunction::Average(m) => {
                vec![ShardAggregate::Sum(m.clone()), ShardAggregate::Count(Some(m.clone()))]
            }
            AggregateFunction::Min(m) => vec![ShardAggregate::Min(m.clone())],
            AggregateFunction::Max(m) => vec![ShardAggregate::Max(m.clone())],
        }
    }

    /// Combines per-shard results of the primitives returned by
    /// [`rewrite`](Self::rewrite), one `Vec` per shard.
    pub fn combine(function: &AggregateFunction, partials: &[Vec<Value>]) -> Result<Value> {
        let expected = Self::rewrite(function).len();
        if let Some(bad) = partials.iter().find(|p| p.len() != expected) {
            return Err(DbError::ExecutionError(format!(
                "{} expects {} partial value(s) per shard, got {}",
                function,
                expected,
                bad.len()
            )));
        }

        match function {
            AggregateFunction::Count => {
                let mut total = 0u64;
                for partial in partials {
                    total += count_of(&partial[0])?;
                }
                Ok(Value::Integer(total as i64))
            }
            AggregateFunction::Sum(_) => {
                let mut sum = Value::Null;
                for partial in partials {
                    sum = add_partial(&sum, &partial[0])?;
                }
                Ok(sum)
            }
            AggregateFunction::Average(_) => {
                let mut model = AggregateModel::default();
                for partial in partials {
                    model = model.combine(&AggregateModel::new(
                        partial[0].clone(),
                        count_of(&partial[1])?,
                    ))?;
                }
                model.average()
            }
            AggregateFunction::Min(_) => extremum(partials, Ordering::Less),
            AggregateFunction::Max(_) => extremum(partials, Ordering::Greater),
        }
    }

    /// Computes a function over already materialised member values.
    pub fn compute_local(function: &AggregateFunction, values: &[Value]) -> Result<Value> {
        let partial: Vec<Value> = Self::rewrite(function)
            .iter()
            .map(|primitive| compute_primitive(primitive, values))
            .collect::<Result<_>>()?;
        Self::combine(function, &[partial])
    }
}

/// Evaluates one primitive over a column of values; NULLs are skipped.
pub fn compute_primitive(primitive: &ShardAggregate, values: &[Value]) -> Result<Value> {
    let non_null = values.iter().filter(|v| !v.is_null());
    match primitive {
        ShardAggregate::Count(None) => Ok(Value::Integer(values.len() as i64)),
        ShardAggregate::Count(Some(_)) => Ok(Value::Integer(non_null.count() as i64)),
        ShardAggregate::Sum(_) => non_null.fold(Ok(Value::Null), |acc, v| add_partial(&acc?, v)),
        ShardAggregate::Min(_) => pick(non_null, Ordering::Less),
        ShardAggregate::Max(_) => pick(non_null, Ordering::Greater),
    }
}

fn add_partial(a: &Value, b: &Value) -> Result<Value> {
    match (a.is_null(), b.is_null()) {
        (true, _) => Ok(b.clone()),
        (_, true) => Ok(a.clone()),
        _ => a.add(b),
    }
}

fn count_of(value: &Value) -> Result<u64> {
    match value {
        Value::Integer(n) if *n >= 0 => Ok(*n as u64),
        Value::Null => Ok(0),
        other => Err(DbError::TypeMismatch(format!("Invalid count value '{}'", other))),
    }
}

fn extremum(partials: &[Vec<Value>], want: Ordering) -> Result<Value> {
    pick(partials.iter().map(|p| &p[0]).filter(|v| !v.is_null()), want)
}

fn pick<'a>(values: impl Iterator<Item = &'a Value>, want: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for value in values {
        let replace = match best {
            None => true,
            Some(current) => value.compare(current)? == want,
        };
        if replace {
            best = Some(value);
        }
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}
