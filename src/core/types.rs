use super::{DataType, DbError, Result, Value};
use crate::expression::Expr;

pub type Row = Vec<Value>;

/// One mapped member (column) of an entity.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Member {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Member '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Member '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

/// Mapping metadata for an entity type.
///
/// Rows exchanged with shard engines are positional: value `i` belongs to
/// `members[i]`. The primary key is a single member; `unique_keys` lists
/// further members declared unique across the whole logical entity.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: String,
    members: Vec<Member>,
    primary_key: String,
    unique_keys: Vec<String>,
    filters: Vec<Expr>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>, members: Vec<Member>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members,
            primary_key: primary_key.into(),
            unique_keys: Vec::new(),
            filters: Vec::new(),
        }
    }

    /// Declare an additional member whose values are unique across all shards.
    pub fn unique_key(mut self, member: impl Into<String>) -> Self {
        self.unique_keys.push(member.into());
        self
    }

    /// Global filter applied to every query unless filters are ignored.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn unique_keys(&self) -> &[String] {
        &self.unique_keys
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    /// True for the primary key and every declared unique key.
    pub fn is_unique_member(&self, member: &str) -> bool {
        member == self.primary_key || self.unique_keys.iter().any(|k| k == member)
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }

    pub fn require_member(&self, name: &str) -> Result<usize> {
        self.member_index(name)
            .ok_or_else(|| DbError::ColumnNotFound(name.to_string(), self.name.clone()))
    }

    pub fn primary_key_index(&self) -> Result<usize> {
        self.require_member(&self.primary_key)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Checks row arity and member types.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if row.len() != self.members.len() {
            return Err(DbError::TypeMismatch(format!(
                "Entity '{}' expects {} values, got {}",
                self.name,
                self.members.len(),
                row.len()
            )));
        }
        for (member, value) in self.members.iter().zip(row) {
            member.validate(value)?;
        }
        Ok(())
    }

    /// Checks that the descriptor itself is coherent.
    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(DbError::ConfigError(format!(
                "Entity '{}' has no members",
                self.name
            )));
        }
        self.primary_key_index()?;
        for key in &self.unique_keys {
            self.require_member(key)?;
        }
        Ok(())
    }
}

/// A typed entity stored in sharded tables.
///
/// Implementations are resolved statically per entity type; the federation
/// engine never inspects a type at runtime beyond its descriptor.
pub trait Entity: Clone + Send + Sync + 'static {
    fn descriptor() -> &'static EntityDescriptor;

    fn to_row(&self) -> Row;

    fn from_row(row: &Row) -> Result<Self>;

    /// Value of one member, looked up through the descriptor.
    fn member_value(&self, member: &str) -> Result<Value> {
        let descriptor = Self::descriptor();
        let index = descriptor.require_member(member)?;
        let row = self.to_row();
        row_value(&row, index, descriptor).cloned()
    }
}

/// Reads member `index` of a row, reporting a typed error when it is missing.
pub fn row_value<'a>(row: &'a Row, index: usize, descriptor: &EntityDescriptor) -> Result<&'a Value> {
    row.get(index).ok_or_else(|| {
        DbError::TypeMismatch(format!(
            "Row for entity '{}' has {} values, member #{} requested",
            descriptor.name(),
            row.len(),
            index
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::new(
            "Order",
            vec![
                Member::new("id", DataType::Integer).not_null(),
                Member::new("customer_id", DataType::Integer).not_null(),
                Member::new("code", DataType::Text),
            ],
            "id",
        )
        .unique_key("code")
    }

    #[test]
    fn test_member_lookup() {
        let d = descriptor();
        assert_eq!(d.member_index("customer_id"), Some(1));
        assert!(d.require_member("missing").is_err());
        assert!(d.is_unique_member("id"));
        assert!(d.is_unique_member("code"));
        assert!(!d.is_unique_member("customer_id"));
    }

    #[test]
    fn test_validate_row() {
        let d = descriptor();
        assert!(d.validate_row(&vec![1.into(), 2.into(), Value::Null]).is_ok());
        assert!(d.validate_row(&vec![Value::Null, 2.into(), Value::Null]).is_err());
        assert!(d.validate_row(&vec![1.into()]).is_err());
        assert!(d.validate_row(&vec![1.into(), "x".into(), Value::Null]).is_err());
    }

    #[test]
    fn test_validate_descriptor() {
        assert!(descriptor().validate().is_ok());
        let broken = EntityDescriptor::new("X", vec![Member::new("a", DataType::Integer)], "id");
        assert!(broken.validate().is_err());
    }
}
