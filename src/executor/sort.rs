// ============================================================================
// src/executor/sort.rs - Ordering comparator
// ============================================================================
//
// Shared by the k-way merge of shard streams and by the in-memory engine,
// so both sides of a federated query agree on one total order.
//
// - Multi-member ordering
// - Stable sort (maintains relative order for equal elements)
// - NULLS LAST for ASC, NULLS FIRST for DESC
//
// ============================================================================

use crate::core::{EntityDescriptor, Result, Row, Value};
use crate::query::Ordering as QueryOrdering;
use std::cmp::Ordering;

/// Strategy for handling NULL values during sorting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    NullsFirst,
    NullsLast,
}

impl NullOrdering {
    /// ASC → NULLS LAST, DESC → NULLS FIRST
    pub fn default_for_direction(descending: bool) -> Self {
        if descending {
            Self::NullsFirst
        } else {
            Self::NullsLast
        }
    }
}

/// One sort key: a position in the compared rows plus direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub index: usize,
    pub descending: bool,
    pub null_ordering: NullOrdering,
}

impl SortKey {
    pub fn new(index: usize, descending: bool) -> Self {
        Self {
            index,
            descending,
            null_ordering: NullOrdering::default_for_direction(descending),
        }
    }
}

/// Comparator for rows based on multiple sort keys
#[derive(Debug, Clone, Default)]
pub struct RowComparator {
    sort_keys: Vec<SortKey>,
}

impl RowComparator {
    pub fn new(sort_keys: Vec<SortKey>) -> Self {
        Self { sort_keys }
    }

    /// Keys over full entity rows, one per ordering.
    pub fn for_entity(descriptor: &EntityDescriptor, orderings: &[QueryOrdering]) -> Result<Self> {
        let sort_keys = orderings
            .iter()
            .map(|o| Ok(SortKey::new(descriptor.require_member(&o.member)?, !o.ascending)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(sort_keys))
    }

    /// Keys over rows that hold exactly the ordering values, in order.
    pub fn for_projection(orderings: &[QueryOrdering]) -> Self {
        Self::new(
            orderings
                .iter()
                .enumerate()
                .map(|(i, o)| SortKey::new(i, !o.ascending))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.sort_keys.is_empty()
    }

    /// Compare two rows according to the sort keys
    pub fn compare(&self, row1: &Row, row2: &Row) -> Result<Ordering> {
        for key in &self.sort_keys {
            let ordering = Self::compare_values(value_at(row1, key.index), value_at(row2, key.index), key)?;
            if ordering != Ordering::Equal {
                return Ok(ordering);
            }
        }
        Ok(Ordering::Equal)
    }

    /// Like [`compare`](Self::compare); incomparable values count as equal.
    pub fn compare_lenient(&self, row1: &Row, row2: &Row) -> Ordering {
        self.compare(row1, row2).unwrap_or(Ordering::Equal)
    }

    fn compare_values(value1: &Value, value2: &Value, key: &SortKey) -> Result<Ordering> {
        let ordering = match (value1.is_null(), value2.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match key.null_ordering {
                NullOrdering::NullsFirst => Ordering::Less,
                NullOrdering::NullsLast => Ordering::Greater,
            },
            (false, true) => match key.null_ordering {
                NullOrdering::NullsFirst => Ordering::Greater,
                NullOrdering::NullsLast => Ordering::Less,
            },
            (false, false) => {
                let ordering = value1.compare(value2)?;
                if key.descending { ordering.reverse() } else { ordering }
            }
        };
        Ok(ordering)
    }
}

fn value_at(row: &Row, index: usize) -> &Value {
    row.get(index).unwrap_or(&Value::Null)
}

/// Executes sorting of rows
pub struct SortExecutor;

impl SortExecutor {
    /// Stable in-place sort.
    pub fn sort(rows: &mut [Row], comparator: &RowComparator) {
        if rows.len() < 2 || comparator.is_empty() {
            return;
        }
        rows.sort_by(|a, b| comparator.compare_lenient(a, b));
    }

    /// Sorts only when the rows are not already ordered.
    pub fn ensure_sorted(rows: &mut [Row], comparator: &RowComparator) {
        if !rows.is_sorted_by(|a, b| comparator.compare_lenient(a, b) != Ordering::Greater) {
            Self::sort(rows, comparator);
        }
    }
}
