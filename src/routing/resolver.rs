use super::config::ShardingConfig;
use super::table::RouteTable;
use crate::core::{DbError, Entity, EntityDescriptor, Result, Value};
use crate::expression::{Assignments, CompareOp, Expr};
use tracing::debug;

/// Maps shard-key values and predicates of one entity to route tables.
pub struct RoutingResolver<'a> {
    config: &'a ShardingConfig,
    descriptor: &'a EntityDescriptor,
}

impl<'a> RoutingResolver<'a> {
    pub fn new(config: &'a ShardingConfig, descriptor: &'a EntityDescriptor) -> Self {
        Self { config, descriptor }
    }

    pub fn shard_key(&self) -> &str {
        self.config.shard_key()
    }

    pub fn all_tables(&self) -> Vec<RouteTable> {
        self.config.all_tables()
    }

    /// Exact table for one shard-key value.
    pub fn resolve(&self, value: &Value) -> Result<RouteTable> {
        if value.is_null() {
            return Err(DbError::ShardKeyResolution(format!(
                "Sharding key '{}' of '{}' is NULL",
                self.config.shard_key(),
                self.descriptor.name()
            )));
        }
        self.config.strategy().route_table(value)
    }

    pub fn resolve_entity<T: Entity>(&self, entity: &T) -> Result<RouteTable> {
        let value = entity.member_value(self.config.shard_key())?;
        self.resolve(&value)
    }

    /// Table for an insert given as member assignments. The shard-key
    /// assignment must be statically evaluable.
    pub fn resolve_content(&self, content: &Assignments) -> Result<RouteTable> {
        let key = self.config.shard_key();
        let expr = content.get(key).ok_or_else(|| {
            DbError::ShardKeyResolution(format!(
                "Sharding key '{}' not assigned in content of '{}'",
                key,
                self.descriptor.name()
            ))
        })?;
        let value = expr.try_constant().ok_or_else(|| {
            DbError::ShardKeyResolution(format!(
                "Unable to get sharding key value from expression '{}'",
                expr
            ))
        })?;
        self.resolve(&value)
    }

    /// Every table that may hold rows matching `predicate`.
    ///
    /// Never under-approximates: without usable shard-key information all
    /// tables are returned. Output keeps the strategy's order, deduplicated.
    pub fn resolve_range(&self, predicate: Option<&Expr>) -> Vec<RouteTable> {
        let all = self.config.all_tables();
        let Some(found) = predicate.and_then(|p| self.discover(p)) else {
            return all;
        };

        let mut ordered: Vec<RouteTable> = all.into_iter().filter(|t| found.contains(t)).collect();
        for table in found {
            if !ordered.contains(&table) {
                ordered.push(table);
            }
        }
        debug!(
            entity = self.descriptor.name(),
            tables = ordered.len(),
            "pruned route tables"
        );
        ordered
    }

    /// `None` means "no information" (every table).
    fn discover(&self, expr: &Expr) -> Option<Vec<RouteTable>> {
        let key = self.config.shard_key();
        let strategy = self.config.strategy();
        match expr {
            Expr::Compare { op, left, right } => {
                if left.as_member() == Some(key) {
                    let value = right.try_constant()?;
                    Some(strategy.tables_for(*op, &value))
                } else if right.as_member() == Some(key) {
                    let value = left.try_constant()?;
                    Some(strategy.tables_for(op.flip(), &value))
                } else {
                    None
                }
            }
            Expr::In {
                expr,
                list,
                negated: false,
            } if expr.as_member() == Some(key) => {
                let mut tables = Vec::new();
                for item in list {
                    let value = item.try_constant()?;
                    union(&mut tables, strategy.tables_for(CompareOp::Eq, &value));
                }
                Some(tables)
            }
            Expr::And(items) => items.iter().fold(None, |acc, item| {
                match (acc, self.discover(item)) {
                    (None, found) => found,
                    (acc, None) => acc,
                    (Some(mut acc), Some(found)) => {
                        acc.retain(|t| found.contains(t));
                        Some(acc)
                    }
                }
            }),
            Expr::Or(items) => {
                let mut tables = Vec::new();
                for item in items {
                    union(&mut tables, self.discover(item)?);
                }
                Some(tables)
            }
            _ => None,
        }
    }
}

fn union(target: &mut Vec<RouteTable>, tables: Vec<RouteTable>) {
    for table in tables {
        if !target.contains(&table) {
            target.push(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Member};
    use crate::expression::{col, lit, param};
    use crate::routing::strategy::ModShardingStrategy;

    fn setup() -> (ShardingConfig, EntityDescriptor) {
        let descriptor = EntityDescriptor::new(
            "Order",
            vec![
                Member::new("id", DataType::Integer).not_null(),
                Member::new("customer_id", DataType::Integer).not_null(),
                Member::new("amount", DataType::Integer),
            ],
            "id",
        );
        let config = ShardingConfig::new(
            "Order",
            "customer_id",
            ModShardingStrategy::new("Order", 4).unwrap(),
        );
        (config, descriptor)
    }

    fn names(tables: &[RouteTable]) -> Vec<&str> {
        tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_resolve_value() {
        let (config, descriptor) = setup();
        let resolver = RoutingResolver::new(&config, &descriptor);
        assert_eq!(resolver.resolve(&Value::Integer(42)).unwrap().name, "Order_2");
        assert!(matches!(
            resolver.resolve(&Value::Null),
            Err(DbError::ShardKeyResolution(_))
        ));
    }

    #[test]
    fn test_equality_pins_one_table() {
        let (config, descriptor) = setup();
        let resolver = RoutingResolver::new(&config, &descriptor);
        let predicate = col("customer_id").eq(42).and(col("amount").gt(5));
        let tables = resolver.resolve_range(Some(&predicate));
        assert_eq!(tables, vec![resolver.resolve(&Value::Integer(42)).unwrap()]);

        let flipped = lit(42).eq(col("customer_id"));
        assert_eq!(names(&resolver.resolve_range(Some(&flipped))), vec!["Order_2"]);
    }

    #[test]
    fn test_no_information_returns_all() {
        let (config, descriptor) = setup();
        let resolver = RoutingResolver::new(&config, &descriptor);
        assert_eq!(resolver.resolve_range(None).len(), 4);
        for predicate in [
            col("amount").gt(5),
            col("customer_id").eq(42).negate(),
            col("customer_id").eq(param("c")),
            col("customer_id").eq(col("id")),
            col("customer_id").eq(1).or(col("amount").eq(2)),
        ] {
            assert_eq!(resolver.resolve_range(Some(&predicate)).len(), 4, "{}", predicate);
        }
    }

    #[test]
    fn test_in_or_and() {
        let (config, descriptor) = setup();
        let resolver = RoutingResolver::new(&config, &descriptor);

        let in_list = col("customer_id").in_list([7, 1, 5]);
        assert_eq!(names(&resolver.resolve_range(Some(&in_list))), vec!["Order_1", "Order_3"]);

        let or = col("customer_id").eq(3).or(col("customer_id").eq(4));
        assert_eq!(names(&resolver.resolve_range(Some(&or))), vec!["Order_0", "Order_3"]);

        let and = in_list.and(col("customer_id").eq(3));
        assert_eq!(names(&resolver.resolve_range(Some(&and))), vec!["Order_3"]);

        let contradiction = col("customer_id").eq(1).and(col("customer_id").eq(2));
        assert!(resolver.resolve_range(Some(&contradiction)).is_empty());
    }

    #[test]
    fn test_resolve_content() {
        let (config, descriptor) = setup();
        let resolver = RoutingResolver::new(&config, &descriptor);

        let content = Assignments::new().set("id", 1).set("customer_id", lit(40).add(2));
        assert_eq!(resolver.resolve_content(&content).unwrap().name, "Order_2");

        let unbound = Assignments::new().set("customer_id", param("c"));
        assert!(matches!(
            resolver.resolve_content(&unbound),
            Err(DbError::ShardKeyResolution(_))
        ));

        let missing = Assignments::new().set("id", 1);
        assert!(matches!(
            resolver.resolve_content(&missing),
            Err(DbError::ShardKeyResolution(_))
        ));
    }
}
