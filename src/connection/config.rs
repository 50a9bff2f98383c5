use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How multi-table paginated queries are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    /// Probe keys and ordering values first, then fetch the selected rows.
    #[default]
    KeyPhase,
    /// Fetch `skip + take` full rows from every table and merge them.
    Prefetch,
}

/// Sharding engine options
///
/// Built with the same chained setters as a connection config:
///
/// ```ignore
/// let options = ShardingOptions::new()
///     .max_in_items(500)
///     .max_connections_per_data_source(4)
///     .acquire_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingOptions {
    /// Largest IN-list sent to a shard in one statement
    pub max_in_items: usize,

    /// Live engine connections per data source
    pub max_connections_per_data_source: usize,

    /// How long to wait for a pooled connection
    #[serde(with = "duration_millis")]
    pub acquire_timeout: Duration,

    pub pagination_mode: PaginationMode,
}

impl ShardingOptions {
    pub fn new() -> Self {
        Self {
            max_in_items: 1000,
            max_connections_per_data_source: 8,
            acquire_timeout: Duration::from_secs(30),
            pagination_mode: PaginationMode::KeyPhase,
        }
    }

    pub fn max_in_items(mut self, max: usize) -> Self {
        self.max_in_items = max;
        self
    }

    pub fn max_connections_per_data_source(mut self, max: usize) -> Self {
        self.max_connections_per_data_source = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn pagination_mode(mut self, mode: PaginationMode) -> Self {
        self.pagination_mode = mode;
        self
    }

    /// Parse options from JSON; missing fields take their defaults.
    ///
    /// ```ignore
    /// let options = ShardingOptions::from_json(r#"{"max_in_items": 200}"#)?;
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let options: ShardingOptions = serde_json::from_str(json)
            .map_err(|e| DbError::ConfigError(format!("Invalid sharding options: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DbError::ConfigError(format!("Cannot serialise options: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_in_items == 0 {
            return Err(DbError::ConfigError("max_in_items must be > 0".to_string()));
        }

        if self.max_connections_per_data_source == 0 {
            return Err(DbError::ConfigError(
                "max_connections_per_data_source must be > 0".to_string(),
            ));
        }

        if self.acquire_timeout.is_zero() {
            return Err(DbError::ConfigError(
                "acquire_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for ShardingOptions {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
