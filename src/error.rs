use thiserror::Error;

/// Main error type for the position engine
#[derive(Error, Debug)]
pub enum GridError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Validation errors (malformed signal, bad precision); rejected
    // before any state is mutated
    #[error("Validation failed: {0}")]
    Validation(String),

    // Transactional write conflict on a capacity or uniqueness check;
    // the conflicting operation aborted, nothing was applied
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    // A data invariant that must never hold was observed (e.g. two
    // non-Closed groups for one key); surfaced, never absorbed
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for GridError
pub type Result<T> = std::result::Result<T, GridError>;

impl From<sqlx::Error> for GridError {
    fn from(err: sqlx::Error) -> Self {
        // Unique-index violations on the open-group key are lost races,
        // not plain database failures; callers may retry them.
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return GridError::ConcurrencyConflict(db_err.to_string());
            }
        }
        GridError::Database(err)
    }
}

impl GridError {
    /// Whether the operation may be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GridError::ConcurrencyConflict(_) | GridError::MarketDataUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_conflict_is_retryable() {
        assert!(GridError::ConcurrencyConflict("dup key".to_string()).is_retryable());
        assert!(GridError::MarketDataUnavailable("BTCUSDT".to_string()).is_retryable());
        assert!(!GridError::Validation("missing pair".to_string()).is_retryable());
        assert!(!GridError::InvariantViolation("two live groups".to_string()).is_retryable());
    }
}
