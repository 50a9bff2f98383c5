use crate::core::EntityDescriptor;
use crate::expression::{CompareOp, Expr};

/// Static proof that a write predicate matches at most one logical row.
pub struct UniqueWriteAuthenticator;

impl UniqueWriteAuthenticator {
    /// True when some top-level conjunct pins the primary key or a declared
    /// unique key to a single member-free value.
    pub fn is_unique_match(descriptor: &EntityDescriptor, predicate: Option<&Expr>) -> bool {
        let Some(predicate) = predicate else {
            return false;
        };
        predicate
            .conjuncts()
            .into_iter()
            .any(|conjunct| Self::pins_unique_member(descriptor, conjunct))
    }

    fn pins_unique_member(descriptor: &EntityDescriptor, expr: &Expr) -> bool {
        let is_unique = |e: &Expr| e.as_member().is_some_and(|m| descriptor.is_unique_member(m));
        match expr {
            Expr::Compare {
                op: CompareOp::Eq,
                left,
                right,
            } => {
                (is_unique(left) && !right.references_members())
                    || (is_unique(right) && !left.references_members())
            }
            Expr::In {
                expr,
                list,
                negated: false,
            } => is_unique(expr) && list.len() <= 1 && !list.iter().any(Expr::references_members),
            _ => false,
        }
    }
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
                Member::new("id", DataType::Integer).not_null(),
                Member::new("number", DataType::Text),
                Member::new("customer_id", DataType::Integer),
            ],
            "id",
        )
        .unique_key("number")
    }

    #[test]
    fn test_unique_shapes() {
        let d = descriptor();
        for predicate in [
            col("id").eq(5),
            lit(5).eq(col("id")),
            col("number").eq("A-1"),
            col("id").eq(param("id")),
            col("customer_id").gt(3).and(col("id").eq(lit(2).add(3))),
            col("id").in_list([5]),
        ] {
            assert!(UniqueWriteAuthenticator::is_unique_match(&d, Some(&predicate)), "{}", predicate);
        }
    }

    #[test]
    fn test_non_unique_shapes() {
        let d = descriptor();
        assert!(!UniqueWriteAuthenticator::is_unique_match(&d, None));
        for predicate in [
            col("customer_id").eq(5),
            col("id").gt(5),
            col("id").eq(5).or(col("id").eq(6)),
            col("id").eq(5).negate(),
            col("id").in_list([1, 2]),
            col("id").not_in_list([1]),
            col("id").eq(col("customer_id")),
            col("id").not_eq(5),
        ] {
            assert!(!UniqueWriteAuthenticator::is_unique_match(&d, Some(&predicate)), "{}", predicate);
        }
    }
}
