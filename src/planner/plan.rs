use crate::connection::PaginationMode;
use crate::core::{DbError, Result, Row, Value};
use crate::expression::{Expr, col};
use crate::query::{DataQueryModel, QueryModel};
use crate::routing::PhysicTable;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanShape {
    /// Nothing to fetch: no candidate table or `take == 0`.
    Empty,
    /// One candidate table; the whole query is pushed down.
    SingleTable,
    /// Several tables, no `take`: merge full ordered streams, then skip.
    Unbounded,
    /// Several tables with `take`: key phase, merge, data phase.
    Paginated,
}

impl fmt::Display for PlanShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlanShape::Empty => "empty",
            PlanShape::SingleTable => "single_table",
            PlanShape::Unbounded => "unbounded",
            PlanShape::Paginated => "paginated",
        };
        write!(f, "{}", name)
    }
}

/// Key-phase row: primary key, ordering values and the owning table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionRow {
    pub key: Value,
    pub order_values: Row,
    pub table_index: usize,
}

impl ProjectionRow {
    /// Splits an engine projection row laid out as `[key, order values...]`.
    pub fn from_projection(mut row: Row, table_index: usize) -> Result<Self> {
        if row.is_empty() {
            return Err(DbError::ExecutionError(
                "Key projection returned an empty row".to_string(),
            ));
        }
        let order_values = row.split_off(1);
        let key = row.pop().unwrap_or(Value::Null);
        Ok(Self {
            key,
            order_values,
            table_index,
        })
    }
}

/// Primary keys selected from one table, in global result order.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyQueryResult {
    pub table_index: usize,
    pub table: PhysicTable,
    pub keys: Vec<Value>,
}

impl KeyQueryResult {
    /// Groups merged key rows by table, tables in first-seen order.
    pub fn group(selected: &[ProjectionRow], tables: &[PhysicTable]) -> Result<Vec<Self>> {
        let mut results: Vec<KeyQueryResult> = Vec::new();
        for row in selected {
            match results.iter_mut().find(|r| r.table_index == row.table_index) {
                Some(result) => result.keys.push(row.key.clone()),
                None => {
                    let table = tables.get(row.table_index).ok_or_else(|| {
                        DbError::ExecutionError(format!(
                            "Key row references unknown table #{}",
                            row.table_index
                        ))
                    })?;
                    results.push(KeyQueryResult {
                        table_index: row.table_index,
                        table: table.clone(),
                        keys: vec![row.key.clone()],
                    });
                }
            }
        }
        Ok(results)
    }
}

/// Data-phase fetch of full rows for a slice of selected keys.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDataQueryPlan {
    pub table_index: usize,
    pub keys: Vec<Value>,
    pub model: DataQueryModel,
}

/// Execution plan of one logical query over its candidate tables.
#[derive(Debug, Clone)]
pub struct ShardingQueryPlan {
    pub shape: PlanShape,
    /// The query with the primary-key tiebreak appended.
    pub model: QueryModel,
    pub tables: Vec<PhysicTable>,
    pub primary_key: String,
    pub pagination: PaginationMode,
}

impl ShardingQueryPlan {
    pub fn skip(&self) -> u64 {
        self.model.skip.unwrap_or(0)
    }

    pub fn take(&self) -> Option<u64> {
        self.model.take
    }

    /// Rows each shard must contribute to a paginated merge.
    pub fn window(&self) -> Option<u64> {
        self.model.take.map(|take| self.skip().saturating_add(take))
    }

    pub fn is_key_phase(&self) -> bool {
        self.shape == PlanShape::Paginated && self.pagination == PaginationMode::KeyPhase
    }

    /// Per-table queries for the first (or only) phase.
    pub fn shard_queries(&self) -> Vec<DataQueryModel> {
        let (skip, take) = match self.shape {
            PlanShape::Empty => return Vec::new(),
            PlanShape::SingleTable => (self.model.skip, self.model.take),
            PlanShape::Unbounded => (None, None),
            PlanShape::Paginated => (None, self.window()),
        };
        self.tables
            .iter()
            .map(|table| self.model.bind(table.clone(), skip, take))
            .collect()
    }

    /// Members fetched by the key phase: primary key, then ordering members.
    pub fn key_projection(&self) -> Vec<String> {
        std::iter::once(self.primary_key.clone())
            .chain(self.model.orderings.iter().map(|o| o.member.clone()))
            .collect()
    }

    /// Data-phase plans for the merged key selection, `IN` lists sliced to
    /// at most `max_in_items` keys.
    pub fn data_plans(
        &self,
        selected: &[ProjectionRow],
        max_in_items: usize,
    ) -> Result<Vec<TableDataQueryPlan>> {
        let mut plans = Vec::new();
        for result in KeyQueryResult::group(selected, &self.tables)? {
            for keys in slice_in_list(&result.keys, max_in_items) {
                let mut model = self.model.bind(result.table.clone(), None, None);
                model.conditions = vec![in_keys(&self.primary_key, &keys)];
                model.orderings.clear();
                model.ignore_all_filters = true;
                plans.push(TableDataQueryPlan {
                    table_index: result.table_index,
                    keys,
                    model,
                });
            }
        }
        Ok(plans)
    }
}

fn in_keys(primary_key: &str, keys: &[Value]) -> Expr {
    col(primary_key).in_list(keys.iter().cloned())
}

/// Splits `items` into slices of at most `max_in_items`.
pub fn slice_in_list<T: Clone>(items: &[T], max_in_items: usize) -> Vec<Vec<T>> {
    items.chunks(max_in_items.max(1)).map(<[T]>::to_vec).collect()
}
