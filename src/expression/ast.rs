use crate::core::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Predicate / selector AST exchanged between the query model, the planner
/// and shard engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Member access off the query's single input row.
    Member(String),
    Constant(Value),
    /// Named parameter. `value: None` means the value is only known to the
    /// engine at execution time, so it is not statically evaluable.
    Parameter { name: String, value: Option<Value> },
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    IsNull { expr: Box<Expr>, negated: bool },
    Like {
        expr: Box<Expr>,
        pattern: String,
        negated: bool,
        case_sensitive: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    /// Operator to use when both operands swap sides (`5 < a` ⇔ `a > 5`).
    pub fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Member reference.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Member(name.into())
}

/// Constant value.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Constant(value.into())
}

/// Parameter whose value is supplied by the engine at execution time.
pub fn param(name: impl Into<String>) -> Expr {
    Expr::Parameter {
        name: name.into(),
        value: None,
    }
}

/// Parameter bound to a known value.
pub fn bound(name: impl Into<String>, value: impl Into<Value>) -> Expr {
    Expr::Parameter {
        name: name.into(),
        value: Some(value.into()),
    }
}

macro_rules! expr_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Self {
                    Expr::Constant(value.into())
                }
            }
        )*
    };
}

expr_from_value!(Value, i64, i32, f64, bool, String, &str, DateTime<Utc>);

impl Expr {
    fn compare(self, op: CompareOp, other: impl Into<Expr>) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    fn arithmetic(self, op: ArithmeticOp, other: impl Into<Expr>) -> Expr {
        Expr::Arithmetic {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    pub fn eq(self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Eq, other)
    }

    pub fn not_eq(self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::NotEq, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Lt, other)
    }

    pub fn lt_eq(self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::LtEq, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::Gt, other)
    }

    pub fn gt_eq(self, other: impl Into<Expr>) -> Expr {
        self.compare(CompareOp::GtEq, other)
    }

    pub fn add(self, other: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithmeticOp::Add, other)
    }

    pub fn sub(self, other: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithmeticOp::Sub, other)
    }

    pub fn mul(self, other: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithmeticOp::Mul, other)
    }

    pub fn div(self, other: impl Into<Expr>) -> Expr {
        self.arithmetic(ArithmeticOp::Div, other)
    }

    pub fn in_list<I, T>(self, items: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        Expr::In {
            expr: Box::new(self),
            list: items.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in_list<I, T>(self, items: I) -> Expr
    where
        I: IntoIterator<Item = T>,
        T: Into<Expr>,
    {
        Expr::In {
            expr: Box::new(self),
            list: items.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    pub fn like(self, pattern: impl Into<String>) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: pattern.into(),
            negated: false,
            case_sensitive: true,
        }
    }

    pub fn negate(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Conjunction; nested `And`s are flattened.
    pub fn and(self, other: Expr) -> Expr {
        let mut items = match self {
            Expr::And(items) => items,
            expr => vec![expr],
        };
        match other {
            Expr::And(more) => items.extend(more),
            expr => items.push(expr),
        }
        Expr::And(items)
    }

    /// Disjunction; nested `Or`s are flattened.
    pub fn or(self, other: Expr) -> Expr {
        let mut items = match self {
            Expr::Or(items) => items,
            expr => vec![expr],
        };
        match other {
            Expr::Or(more) => items.extend(more),
            expr => items.push(expr),
        }
        Expr::Or(items)
    }

    /// Combine predicates with AND, `None` when there are none.
    pub fn and_all(predicates: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        predicates.into_iter().reduce(Expr::and)
    }

    /// Top-level conjuncts, with nested `And`s flattened.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(items) => items.iter().flat_map(Expr::conjuncts).collect(),
            expr => vec![expr],
        }
    }

    pub fn as_member(&self) -> Option<&str> {
        match self {
            Expr::Member(name) => Some(name),
            _ => None,
        }
    }

    /// True when any sub-expression reads a member of the row.
    pub fn references_members(&self) -> bool {
        match self {
            Expr::Member(_) => true,
            Expr::Constant(_) | Expr::Parameter { .. } => false,
            Expr::Compare { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
                left.references_members() || right.references_members()
            }
            Expr::And(items) | Expr::Or(items) => items.iter().any(Expr::references_members),
            Expr::Not(expr) | Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => {
                expr.references_members()
            }
            Expr::In { expr, list, .. } => {
                expr.references_members() || list.iter().any(Expr::references_members)
            }
        }
    }

    /// Member names referenced anywhere in the expression, in first-seen order.
    pub fn referenced_members(&self) -> Vec<&str> {
        let mut members = Vec::new();
        self.collect_members(&mut members);
        members
    }

    fn collect_members<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Member(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Constant(_) | Expr::Parameter { .. } => {}
            Expr::Compare { left, right, .. } | Expr::Arithmetic { left, right, .. } => {
                left.collect_members(out);
                right.collect_members(out);
            }
            Expr::And(items) | Expr::Or(items) => {
                items.iter().for_each(|item| item.collect_members(out))
            }
            Expr::Not(expr) | Expr::IsNull { expr, .. } | Expr::Like { expr, .. } => {
                expr.collect_members(out)
            }
            Expr::In { expr, list, .. } => {
                expr.collect_members(out);
                list.iter().for_each(|item| item.collect_members(out));
            }
        }
    }

    /// Evaluates the expression without a row, if that is possible.
    ///
    /// Constants, bound parameters and arithmetic over them are statically
    /// evaluable; members and unbound parameters are not.
    pub fn try_constant(&self) -> Option<Value> {
        match self {
            Expr::Constant(value) => Some(value.clone()),
            Expr::Parameter { value, .. } => value.clone(),
            Expr::Arithmetic { op, left, right } => {
                let l = left.try_constant()?;
                let r = right.try_constant()?;
                let result = match op {
                    ArithmeticOp::Add => l.add(&r),
                    ArithmeticOp::Sub => l.sub(&r),
                    ArithmeticOp::Mul => l.mul(&r),
                    ArithmeticOp::Div => l.div(&r),
                };
                result.ok()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Member(name) => write!(f, "{}", name),
            Expr::Constant(Value::Text(s)) => write!(f, "'{}'", s),
            Expr::Constant(value) => write!(f, "{}", value),
            Expr::Parameter { name, value: Some(v) } => write!(f, "@{}({})", name, v),
            Expr::Parameter { name, value: None } => write!(f, "@{}", name),
            Expr::Compare { op, left, right } => write!(f, "({} {} {})", left, op.symbol(), right),
            Expr::Arithmetic { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expr::And(items) | Expr::Or(items) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(sep))
            }
            Expr::Not(expr) => write!(f, "NOT {}", expr),
            Expr::In { expr, list, negated } => {
                let parts: Vec<String> = list.iter().map(ToString::to_string).collect();
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "({} {} ({}))", expr, keyword, parts.join(", "))
            }
            Expr::IsNull { expr, negated } => {
                let keyword = if *negated { "IS NOT NULL" } else { "IS NULL" };
                write!(f, "({} {})", expr, keyword)
            }
            Expr::Like { expr, pattern, negated, .. } => {
                let keyword = if *negated { "NOT LIKE" } else { "LIKE" };
                write!(f, "({} {} '{}')", expr, keyword, pattern)
            }
        }
    }
}

/// Member assignments of an update or a content insert (`member = expr`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Assignments {
    items: Vec<(String, Expr)>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign `value` to `member`; a later assignment to the same member wins.
    pub fn set(mut self, member: impl Into<String>, value: impl Into<Expr>) -> Self {
        let member = member.into();
        let value = value.into();
        match self.items.iter_mut().find(|(name, _)| *name == member) {
            Some(slot) => slot.1 = value,
            None => self.items.push((member, value)),
        }
        self
    }

    pub fn get(&self, member: &str) -> Option<&Expr> {
        self.items
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, expr)| expr)
    }

    pub fn contains(&self, member: &str) -> bool {
        self.get(member).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.items.iter().map(|(name, expr)| (name.as_str(), expr))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
