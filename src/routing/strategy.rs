use super::hash::stable_bucket_for;
use super::table::RouteTable;
use crate::core::{DbError, Result, Value};
use crate::expression::CompareOp;
use chrono::{Datelike, TimeZone, Utc};
use std::cmp::Ordering;
use std::fmt;

/// Table-naming and data-source selection rule for one entity type.
pub trait ShardingStrategy: Send + Sync + fmt::Debug {
    /// The single table that owns `key`. Used for writes; must be
    /// deterministic and must fail rather than guess.
    fn route_table(&self, key: &Value) -> Result<RouteTable>;

    /// Every table the strategy can route to, in a stable order.
    fn all_tables(&self) -> Vec<RouteTable>;

    /// Tables that may hold rows whose shard key satisfies `key <op> value`.
    ///
    /// Implementations may over-approximate but never under-approximate.
    fn tables_for(&self, op: CompareOp, value: &Value) -> Vec<RouteTable> {
        match op {
            CompareOp::Eq => match self.route_table(value) {
                Ok(table) => vec![table],
                Err(_) => self.all_tables(),
            },
            _ => self.all_tables(),
        }
    }
}

/// `n` tables named `{prefix}_{i}`, `i = key mod n`.
///
/// Integer keys use `rem_euclid`, text keys a stable FNV-1a hash, timestamps
/// their unix seconds. Tables are spread round-robin across data sources.
#[derive(Debug, Clone)]
pub struct ModShardingStrategy {
    table_prefix: String,
    table_count: u32,
    data_sources: Vec<String>,
}

impl ModShardingStrategy {
    pub const DEFAULT_DATA_SOURCE: &'static str = "default";

    pub fn new(table_prefix: impl Into<String>, table_count: u32) -> Result<Self> {
        if table_count == 0 {
            return Err(DbError::ConfigError("table_count must be >= 1".to_string()));
        }
        let table_prefix = table_prefix.into();
        if table_prefix.trim().is_empty() {
            return Err(DbError::ConfigError(
                "table_prefix must not be empty".to_string(),
            ));
        }
        Ok(Self {
            table_prefix,
            table_count,
            data_sources: vec![Self::DEFAULT_DATA_SOURCE.to_string()],
        })
    }

    pub fn with_data_sources<I, S>(mut self, data_sources: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let data_sources: Vec<String> = data_sources.into_iter().map(Into::into).collect();
        if data_sources.is_empty() {
            return Err(DbError::ConfigError(
                "at least one data source is required".to_string(),
            ));
        }
        if data_sources.iter().any(|ds| ds.trim().is_empty()) {
            return Err(DbError::ConfigError(
                "data source names must not be empty".to_string(),
            ));
        }
        self.data_sources = data_sources;
        Ok(self)
    }

    pub fn table_count(&self) -> u32 {
        self.table_count
    }

    pub fn table_index(&self, key: &Value) -> Result<u32> {
        let n = self.table_count;
        match key {
            Value::Integer(i) => Ok(i.rem_euclid(n as i64) as u32),
            Value::Text(s) => Ok(stable_bucket_for(s, n)),
            Value::Boolean(b) => Ok(*b as u32 % n),
            Value::Timestamp(ts) => Ok(ts.timestamp().rem_euclid(n as i64) as u32),
            other => Err(DbError::Routing(format!(
                "Cannot route {} value '{}' with modulo sharding on '{}'",
                other.type_name(),
                other,
                self.table_prefix
            ))),
        }
    }

    pub fn table(&self, index: u32) -> RouteTable {
        let ds = &self.data_sources[index as usize % self.data_sources.len()];
        RouteTable::new(format!("{}_{}", self.table_prefix, index), ds.clone())
    }
}

impl ShardingStrategy for ModShardingStrategy {
    fn route_table(&self, key: &Value) -> Result<RouteTable> {
        Ok(self.table(self.table_index(key)?))
    }

    fn all_tables(&self) -> Vec<RouteTable> {
        (0..self.table_count).map(|i| self.table(i)).collect()
    }
}

/// One half-open key range `[lower, upper)` owned by a table.
#[derive(Debug, Clone)]
pub struct RangeRoute {
    pub lower: Value,
    pub upper: Value,
    pub table: RouteTable,
}

impl RangeRoute {
    pub fn new(lower: impl Into<Value>, upper: impl Into<Value>, table: RouteTable) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
            table,
        }
    }

    fn contains(&self, key: &Value) -> bool {
        matches!(
            (self.lower.compare(key), key.compare(&self.upper)),
            (Ok(Ordering::Less | Ordering::Equal), Ok(Ordering::Less))
        )
    }
}

/// Ordered, non-overlapping key ranges, each mapped to a table.
///
/// Supports pruning for range comparisons on the shard key.
#[derive(Debug, Clone)]
pub struct RangeShardingStrategy {
    ranges: Vec<RangeRoute>,
}

impl RangeShardingStrategy {
    pub fn new(mut ranges: Vec<RangeRoute>) -> Result<Self> {
        if ranges.is_empty() {
            return Err(DbError::ConfigError(
                "range sharding needs at least one range".to_string(),
            ));
        }

        for range in &ranges {
            if range.lower.is_null() || range.upper.is_null() {
                return Err(DbError::ConfigError(format!(
                    "range bounds of table '{}' must not be NULL",
                    range.table.name
                )));
            }
            if range.lower.compare(&range.upper)? != Ordering::Less {
                return Err(DbError::ConfigError(format!(
                    "range of table '{}' is empty: [{}, {})",
                    range.table.name, range.lower, range.upper
                )));
            }
        }

        ranges.sort_by(|a, b| a.lower.compare(&b.lower).unwrap_or(Ordering::Equal));

        for pair in ranges.windows(2) {
            if pair[0].upper.compare(&pair[1].lower)? == Ordering::Greater {
                return Err(DbError::ConfigError(format!(
                    "ranges of tables '{}' and '{}' overlap",
                    pair[0].table.name, pair[1].table.name
                )));
            }
        }

        Ok(Self { ranges })
    }

    /// One table per calendar month, named `{prefix}_{YYYYMM}`, starting at
    /// `start_year`/`start_month` (UTC) and covering `months` months.
    pub fn monthly(
        table_prefix: &str,
        data_source: &str,
        start_year: i32,
        start_month: u32,
        months: u32,
    ) -> Result<Self> {
        if months == 0 {
            return Err(DbError::ConfigError("months must be >= 1".to_string()));
        }
        if !(1..=12).contains(&start_month) {
            return Err(DbError::ConfigError(format!(
                "invalid start month {}",
                start_month
            )));
        }

        let month_start = |year: i32, month: u32| {
            Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
                .single()
                .ok_or_else(|| {
                    DbError::ConfigError(format!("invalid month {}-{:02}", year, month))
                })
        };

        let mut ranges = Vec::with_capacity(months as usize);
        let mut current = month_start(start_year, start_month)?;
        for _ in 0..months {
            let (next_year, next_month) = if current.month() == 12 {
                (current.year() + 1, 1)
            } else {
                (current.year(), current.month() + 1)
            };
            let next = month_start(next_year, next_month)?;
            let table = RouteTable::new(
                format!("{}_{}{:02}", table_prefix, current.year(), current.month()),
                data_source,
            );
            ranges.push(RangeRoute::new(current, next, table));
            current = next;
        }

        Self::new(ranges)
    }

    pub fn ranges(&self) -> &[RangeRoute] {
        &self.ranges
    }

    fn select(&self, keep: impl Fn(&RangeRoute) -> bool) -> Vec<RouteTable> {
        self.ranges
            .iter()
            .filter(|range| keep(range))
            .map(|range| range.table.clone())
            .collect()
    }
}

impl ShardingStrategy for RangeShardingStrategy {
    fn route_table(&self, key: &Value) -> Result<RouteTable> {
        self.ranges
            .iter()
            .find(|range| range.contains(key))
            .map(|range| range.table.clone())
            .ok_or_else(|| {
                DbError::Routing(format!("No range covers shard key value '{}'", key))
            })
    }

    fn all_tables(&self) -> Vec<RouteTable> {
        self.select(|_| true)
    }

    fn tables_for(&self, op: CompareOp, value: &Value) -> Vec<RouteTable> {
        if value.is_null() {
            return self.all_tables();
        }
        // Incomparable bounds keep the range (over-approximation).
        let cmp = |bound: &Value| bound.compare(value).ok();
        match op {
            CompareOp::Eq => match self.route_table(value) {
                Ok(table) => vec![table],
                Err(_) => self.all_tables(),
            },
            CompareOp::NotEq => self.all_tables(),
            CompareOp::Lt => self.select(|r| matches!(cmp(&r.lower), Some(Ordering::Less) | None)),
            CompareOp::LtEq => self.select(|r| cmp(&r.lower) != Some(Ordering::Greater)),
            CompareOp::Gt | CompareOp::GtEq => {
                self.select(|r| matches!(cmp(&r.upper), Some(Ordering::Greater) | None))
            }
        }
    }
}
