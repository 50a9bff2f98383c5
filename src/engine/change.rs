// ============================================================================
// Undo log of the in-memory engine
// ============================================================================
//
// Writes are applied to the table immediately; every change records what
// is needed to reverse it. ROLLBACK replays the log backwards, COMMIT
// discards it.
//
// ============================================================================

use crate::core::{Row, Value};

/// A single reversible change in a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    /// Row with primary key `key` was appended
    InsertRow { table: String, key: Value },

    /// Row with primary key `key` was overwritten
    UpdateRow {
        table: String,
        key: Value,
        old_row: Row,
    },

    /// Row at `row_index` was removed
    DeleteRow {
        table: String,
        row_index: usize,
        old_row: Row,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    /// Reverse the change on the rows of its table.
    pub fn undo(self, rows: &mut Vec<Row>, key_index: usize) {
        let position = |rows: &Vec<Row>, key: &Value| {
            rows.iter().position(|row| row.get(key_index) == Some(key))
        };
        match self {
            Change::InsertRow { key, .. } => {
                if let Some(index) = position(rows, &key) {
                    rows.remove(index);
                }
            }
            Change::UpdateRow { key, old_row, .. } => {
                if let Some(index) = position(rows, &key) {
                    rows[index] = old_row;
                }
            }
            Change::DeleteRow {
                row_index, old_row, ..
            } => {
                let index = row_index.min(rows.len());
                rows.insert(index, old_row);
            }
        }
    }
}
