// ============================================================================
// Transaction Module
// ============================================================================
//
// Multi-lane transactions over pooled shard connections.
//
// ============================================================================

pub mod context;
pub mod state;

pub use context::ShardTransaction;
pub use state::{TransactionId, TransactionState};
