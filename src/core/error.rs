use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Shard key resolution error: {0}")]
    ShardKeyResolution(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Unsupported query shape: {0}")]
    UnsupportedQueryShape(String),

    #[error("Uniqueness violation: expected at most {expected} affected row(s), shards reported {actual}")]
    UniquenessViolation { expected: u64, actual: u64 },

    #[error("Column '{0}' not found in entity '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Connection pool timeout: {0}")]
    PoolTimeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error(transparent)]
    Engine(Box<dyn std::error::Error + Send + Sync>),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// Wrap an error raised by a shard engine so it propagates unchanged.
    pub fn engine<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Engine(Box::new(err))
    }

    /// Errors that abort the operation before any shard was contacted.
    pub fn is_planning_error(&self) -> bool {
        matches!(
            self,
            Self::ShardKeyResolution(_) | Self::Routing(_) | Self::UnsupportedQueryShape(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniqueness_violation_message() {
        let err = DbError::UniquenessViolation {
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Uniqueness violation: expected at most 1 affected row(s), shards reported 2"
        );
    }

    #[test]
    fn test_engine_error_is_transparent() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "shard link lost");
        let err = DbError::engine(io);
        assert_eq!(err.to_string(), "shard link lost");
        assert!(!err.is_planning_error());
    }

    #[test]
    fn test_planning_errors() {
        assert!(DbError::Routing("x".into()).is_planning_error());
        assert!(DbError::ShardKeyResolution("x".into()).is_planning_error());
        assert!(DbError::UnsupportedQueryShape("x".into()).is_planning_error());
        assert!(!DbError::Cancelled.is_planning_error());
    }
}
