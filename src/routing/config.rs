use super::strategy::ShardingStrategy;
use super::table::RouteTable;
use crate::core::{DbError, Entity, EntityDescriptor, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Sharding rule for one entity type: which member is the shard key and
/// which strategy maps its values to tables.
#[derive(Clone)]
pub struct ShardingConfig {
    entity: String,
    shard_key: String,
    strategy: Arc<dyn ShardingStrategy>,
}

impl ShardingConfig {
    pub fn new(
        entity: impl Into<String>,
        shard_key: impl Into<String>,
        strategy: impl ShardingStrategy + 'static,
    ) -> Self {
        Self::with_strategy(entity, shard_key, Arc::new(strategy))
    }

    pub fn with_strategy(
        entity: impl Into<String>,
        shard_key: impl Into<String>,
        strategy: Arc<dyn ShardingStrategy>,
    ) -> Self {
        Self {
            entity: entity.into(),
            shard_key: shard_key.into(),
            strategy,
        }
    }

    /// Config for entity type `T`, named after its descriptor.
    pub fn for_entity<T: Entity>(
        shard_key: impl Into<String>,
        strategy: impl ShardingStrategy + 'static,
    ) -> Self {
        Self::new(T::descriptor().name(), shard_key, strategy)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn shard_key(&self) -> &str {
        &self.shard_key
    }

    pub fn strategy(&self) -> &dyn ShardingStrategy {
        self.strategy.as_ref()
    }

    pub fn all_tables(&self) -> Vec<RouteTable> {
        self.strategy.all_tables()
    }

    /// Finds a configured table by physical name.
    pub fn find_table(&self, name: &str) -> Option<RouteTable> {
        self.strategy.all_tables().into_iter().find(|t| t.name == name)
    }

    fn validate(&self, descriptor: &EntityDescriptor) -> Result<()> {
        descriptor.validate()?;
        descriptor.require_member(&self.shard_key)?;

        let tables = self.strategy.all_tables();
        if tables.is_empty() {
            return Err(DbError::Routing(format!(
                "Sharding strategy for '{}' exposes no tables",
                self.entity
            )));
        }

        let mut owners: HashMap<&str, &str> = HashMap::with_capacity(tables.len());
        for table in &tables {
            if let Some(previous) = owners.insert(&table.name, table.data_source.name()) {
                return Err(DbError::Routing(format!(
                    "Table '{}' of '{}' is ambiguous: listed for data sources '{}' and '{}'",
                    table.name,
                    self.entity,
                    previous,
                    table.data_source.name()
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShardingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardingConfig")
            .field("entity", &self.entity)
            .field("shard_key", &self.shard_key)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Registered entity: its mapping metadata and its sharding rule.
#[derive(Debug, Clone)]
pub struct ShardedEntity {
    pub descriptor: EntityDescriptor,
    pub config: ShardingConfig,
}

/// Sharding rules of every entity known to a context.
///
/// Built once at startup, then shared read-only.
#[derive(Debug, Clone, Default)]
pub struct ShardingRegistry {
    entities: HashMap<String, Arc<ShardedEntity>>,
}

impl ShardingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the rule for entity type `T`.
    pub fn register<T: Entity>(&mut self, config: ShardingConfig) -> Result<()> {
        self.register_descriptor(T::descriptor().clone(), config)
    }

    pub fn register_descriptor(
        &mut self,
        descriptor: EntityDescriptor,
        config: ShardingConfig,
    ) -> Result<()> {
        if descriptor.name() != config.entity() {
            return Err(DbError::Routing(format!(
                "Sharding config for '{}' registered against entity '{}'",
                config.entity(),
                descriptor.name()
            )));
        }
        if self.entities.contains_key(config.entity()) {
            return Err(DbError::Routing(format!(
                "Entity '{}' is already registered",
                config.entity()
            )));
        }
        config.validate(&descriptor)?;

        self.entities.insert(
            config.entity().to_string(),
            Arc::new(ShardedEntity { descriptor, config }),
        );
        Ok(())
    }

    /// Builder-style variant of [`register`](Self::register).
    pub fn with<T: Entity>(mut self, config: ShardingConfig) -> Result<Self> {
        self.register::<T>(config)?;
        Ok(self)
    }

    pub fn get(&self, entity: &str) -> Result<Arc<ShardedEntity>> {
        self.entities.get(entity).cloned().ok_or_else(|| {
            DbError::Routing(format!("Entity '{}' has no sharding configuration", entity))
        })
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.contains_key(entity)
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
