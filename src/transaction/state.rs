use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`ShardTransaction`](super::ShardTransaction).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    pub(crate) fn next() -> Self {
        TransactionId(NEXT_TRANSACTION.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stx_{}", self.0)
    }
}

/// Lifecycle of a multi-lane transaction
///
/// ```text
/// Active ──commit──> Committed
///   │        └─(lane k fails, k > 0)──> PartiallyCommitted
///   └──rollback / failure──> Aborted
/// ```
///
/// `PartiallyCommitted` records that some lanes committed before another
/// lane's commit failed; the remaining lanes were rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    PartiallyCommitted { committed_lanes: usize },
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Active => write!(f, "active"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::PartiallyCommitted { committed_lanes } => {
                write!(f, "partially committed ({} lane(s))", committed_lanes)
            }
            TransactionState::Aborted => write!(f, "aborted"),
        }
    }
}
