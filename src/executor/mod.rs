pub mod cancel;
pub mod merge;
pub mod query;
pub mod sort;
pub mod unique;
pub mod write;

pub use cancel::{CancellationSignal, run_cancellable};
pub use merge::{SortValues, merge_sorted};
pub use query::QueryExecutor;
pub use sort::{NullOrdering, RowComparator, SortExecutor, SortKey};
pub use unique::UniqueWriteAuthenticator;
pub use write::{TableWrite, WriteExecutor, WritePolicy, WriteStep, split_in_list};
