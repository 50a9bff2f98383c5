//! K-way merge of per-shard streams that are each already ordered.

use super::sort::RowComparator;
use crate::core::Row;
use crate::planner::ProjectionRow;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

/// Anything that exposes the values it is ordered by.
pub trait SortValues {
    fn sort_values(&self) -> &Row;
}

impl SortValues for Row {
    fn sort_values(&self) -> &Row {
        self
    }
}

impl SortValues for ProjectionRow {
    fn sort_values(&self) -> &Row {
        &self.order_values
    }
}

struct MergeEntry<T> {
    item: T,
    stream: usize,
    comparator: Arc<RowComparator>,
}

impl<T: SortValues> PartialEq for MergeEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: SortValues> Eq for MergeEntry<T> {}

impl<T: SortValues> PartialOrd for MergeEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: SortValues> Ord for MergeEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.comparator
            .compare_lenient(self.item.sort_values(), other.item.sort_values())
            .then(self.stream.cmp(&other.stream))
    }
}

/// Merges ordered streams into one ordered sequence, stopping after
/// `limit` items when given. Ties go to the lower stream index.
pub fn merge_sorted<T: SortValues>(
    streams: Vec<Vec<T>>,
    comparator: &RowComparator,
    limit: Option<usize>,
) -> Vec<T> {
    let total: usize = streams.iter().map(Vec::len).sum();
    let capacity = limit.map_or(total, |l| l.min(total));
    let comparator = Arc::new(comparator.clone());

    let mut iters: Vec<std::vec::IntoIter<T>> = streams.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());
    for (stream, iter) in iters.iter_mut().enumerate() {
        if let Some(item) = iter.next() {
            heap.push(Reverse(MergeEntry {
                item,
                stream,
                comparator: Arc::clone(&comparator),
            }));
        }
    }

    let mut merged = Vec::with_capacity(capacity);
    while let Some(Reverse(entry)) = heap.pop() {
        if limit.is_some_and(|l| merged.len() >= l) {
            break;
        }
        let stream = entry.stream;
        merged.push(entry.item);
        if let Some(item) = iters[stream].next() {
            heap.push(Reverse(MergeEntry {
                item,
                stream,
                comparator: Arc::clone(&comparator),
            }));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::executor::sort::SortKey;

    fn rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![Value::Integer(*v)]).collect()
    }

    #[test]
    fn test_merge_ascending() {
        let comparator = RowComparator::new(vec![SortKey::new(0, false)]);
        let merged = merge_sorted(
            vec![rows(&[1, 4, 9]), rows(&[]), rows(&[2, 3, 10]), rows(&[5])],
            &comparator,
            None,
        );
        assert_eq!(merged, rows(&[1, 2, 3, 4, 5, 9, 10]));
    }

    #[test]
    fn test_merge_descending_with_limit() {
        let comparator = RowComparator::new(vec![SortKey::new(0, true)]);
        let merged = merge_sorted(vec![rows(&[9, 4, 1]), rows(&[10, 3, 2])], &comparator, Some(3));
        assert_eq!(merged, rows(&[10, 9, 4]));
    }

    #[test]
    fn test_ties_prefer_lower_stream() {
        let comparator = RowComparator::new(vec![SortKey::new(0, false)]);
        let first = vec![vec![Value::Integer(1), Value::from("a")]];
        let second = vec![vec![Value::Integer(1), Value::from("b")]];
        let merged = merge_sorted(vec![second.clone(), first.clone()], &comparator, None);
        assert_eq!(merged, vec![second[0].clone(), first[0].clone()]);
    }

    #[test]
    fn test_merge_projection_rows() {
        let comparator = RowComparator::new(vec![SortKey::new(0, false)]);
        let row = |key: i64, table_index| ProjectionRow {
            key: Value::Integer(key),
            order_values: vec![Value::Integer(key * 10)],
            table_index,
        };
        let merged = merge_sorted(vec![vec![row(1, 0), row(3, 0)], vec![row(2, 1)]], &comparator, None);
        let keys: Vec<_> = merged.iter().map(|r| r.key.clone()).collect();
        assert_eq!(keys, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    }
}
