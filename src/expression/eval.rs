//! Row-level evaluation of [`Expr`] trees with SQL three-valued logic.

use super::pattern::eval_like;
use super::{ArithmeticOp, CompareOp, Expr};
use crate::core::{DbError, EntityDescriptor, Result, Row, Value, row_value};
use std::cmp::Ordering;

/// Evaluates expressions against positional rows of one entity.
pub struct RowEvaluator<'a> {
    descriptor: &'a EntityDescriptor,
}

impl<'a> RowEvaluator<'a> {
    pub fn new(descriptor: &'a EntityDescriptor) -> Self {
        Self { descriptor }
    }

    /// True only when the predicate evaluates to TRUE (NULL filters the row out).
    pub fn matches(&self, predicate: &Expr, row: &Row) -> Result<bool> {
        Ok(matches!(self.evaluate(predicate, row)?, Value::Boolean(true)))
    }

    /// True when every predicate matches.
    pub fn matches_all(&self, predicates: &[Expr], row: &Row) -> Result<bool> {
        for predicate in predicates {
            if !self.matches(predicate, row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn evaluate(&self, expr: &Expr, row: &Row) -> Result<Value> {
        match expr {
            Expr::Member(name) => {
                let index = self.descriptor.require_member(name)?;
                row_value(row, index, self.descriptor).cloned()
            }
            Expr::Constant(value) => Ok(value.clone()),
            Expr::Parameter { name, value } => value.clone().ok_or_else(|| {
                DbError::ExecutionError(format!("Parameter '@{}' has no bound value", name))
            }),
            Expr::Compare { op, left, right } => {
                let l = self.evaluate(left, row)?;
                let r = self.evaluate(right, row)?;
                compare(*op, &l, &r)
            }
            Expr::Arithmetic { op, left, right } => {
                let l = self.evaluate(left, row)?;
                let r = self.evaluate(right, row)?;
                match op {
                    ArithmeticOp::Add => l.add(&r),
                    ArithmeticOp::Sub => l.sub(&r),
                    ArithmeticOp::Mul => l.mul(&r),
                    ArithmeticOp::Div => l.div(&r),
                }
            }
            Expr::And(items) => {
                let mut saw_null = false;
                for item in items {
                    match self.evaluate(item, row)? {
                        Value::Null => saw_null = true,
                        value if !value.as_bool() => return Ok(Value::Boolean(false)),
                        _ => {}
                    }
                }
                Ok(if saw_null { Value::Null } else { Value::Boolean(true) })
            }
            Expr::Or(items) => {
                let mut saw_null = false;
                for item in items {
                    match self.evaluate(item, row)? {
                        Value::Null => saw_null = true,
                        value if value.as_bool() => return Ok(Value::Boolean(true)),
                        _ => {}
                    }
                }
                Ok(if saw_null { Value::Null } else { Value::Boolean(false) })
            }
            Expr::Not(inner) => match self.evaluate(inner, row)? {
                Value::Null => Ok(Value::Null),
                value => Ok(Value::Boolean(!value.as_bool())),
            },
            Expr::In { expr, list, negated } => {
                let left = self.evaluate(expr, row)?;
                if left.is_null() {
                    return Ok(Value::Null);
                }

                let mut saw_null = false;
                for item in list {
                    let right = self.evaluate(item, row)?;
                    if right.is_null() {
                        saw_null = true;
                        continue;
                    }
                    if left == right {
                        return Ok(Value::Boolean(!*negated));
                    }
                }

                if saw_null {
                    return Ok(Value::Null);
                }
                Ok(Value::Boolean(*negated))
            }
            Expr::IsNull { expr, negated } => {
                let value = self.evaluate(expr, row)?;
                Ok(Value::Boolean(value.is_null() != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
                case_sensitive,
            } => match self.evaluate(expr, row)? {
                Value::Null => Ok(Value::Null),
                Value::Text(text) => {
                    let matched = eval_like(&text, pattern, *case_sensitive)?;
                    Ok(Value::Boolean(matched != *negated))
                }
                other => Err(DbError::TypeMismatch(format!(
                    "LIKE expects TEXT, got {}",
                    other.type_name()
                ))),
            },
        }
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }
    let ordering = left.compare(right)?;
    let result = match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::NotEq => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::LtEq => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::GtEq => ordering != Ordering::Less,
    };
    Ok(Value::Boolean(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Member};
    use crate::expression::{col, lit, param};

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new(
            "Order",
            vec![
                Member::new("id", DataType::Integer),
                Member::new("amount", DataType::Float),
                Member::new("code", DataType::Text),
            ],
            "id",
        )
    }

    #[test]
    fn test_compare_and_logic() {
        let d = descriptor();
        let eval = RowEvaluator::new(&d);
        let row = vec![Value::Integer(1), Value::Float(10.5), Value::Text("A-1".into())];

        assert!(eval.matches(&col("id").eq(1), &row).unwrap());
        assert!(eval.matches(&col("amount").gt(10), &row).unwrap());
        assert!(!eval.matches(&col("amount").gt(10).and(col("id").eq(2)), &row).unwrap());
        assert!(eval.matches(&col("amount").gt(99).or(col("code").like("A%")), &row).unwrap());
        assert!(eval.matches(&col("id").in_list([3, 1]), &row).unwrap());
        assert!(!eval.matches(&col("id").not_in_list([3, 1]), &row).unwrap());
    }

    #[test]
    fn test_null_semantics() {
        let d = descriptor();
        let eval = RowEvaluator::new(&d);
        let row = vec![Value::Integer(1), Value::Null, Value::Null];

        assert_eq!(eval.evaluate(&col("amount").eq(1), &row).unwrap(), Value::Null);
        assert!(!eval.matches(&col("amount").eq(1), &row).unwrap());
        assert!(!eval.matches(&col("amount").eq(1).negate(), &row).unwrap());
        assert!(eval.matches(&col("amount").is_null(), &row).unwrap());
        // NULL OR TRUE is TRUE
        assert!(eval.matches(&col("amount").eq(1).or(col("id").eq(1)), &row).unwrap());
    }

    #[test]
    fn test_arithmetic_and_errors() {
        let d = descriptor();
        let eval = RowEvaluator::new(&d);
        let row = vec![Value::Integer(4), Value::Float(2.0), Value::Text("x".into())];

        assert_eq!(
            eval.evaluate(&col("id").mul(lit(2)), &row).unwrap(),
            Value::Integer(8)
        );
        assert!(eval.evaluate(&col("missing"), &row).is_err());
        assert!(eval.evaluate(&param("p"), &row).is_err());
        assert!(eval.evaluate(&col("code").gt(1), &row).is_err());
    }
}
