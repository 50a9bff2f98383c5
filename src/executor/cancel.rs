use crate::core::{DbError, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation shared between a caller and running operations.
///
/// Cloning yields another handle to the same signal.
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the signal is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any handle, so this only ends on cancel.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `operation` unless `signal` fires first, in which case the
/// operation is dropped and [`DbError::Cancelled`] returned.
pub async fn run_cancellable<T, F>(signal: Option<&CancellationSignal>, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let Some(signal) = signal else {
        return operation.await;
    };
    if signal.is_cancelled() {
        return Err(DbError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(DbError::Cancelled),
        result = operation => result,
    }
}
