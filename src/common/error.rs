use thiserror::Error;

/// Errors surfaced by every marketplace operation.
///
/// Each variant carries a human-readable message; `kind()` gives the stable
/// machine-readable tag the transport layer puts on the wire.
#[derive(Debug, Error)]
pub enum MarketError {
    #[error("permission denied: {0}")]
    Role(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage failure: {0}")]
    Transient(String),
}

pub type MarketResult<T> = Result<T, MarketError>;

impl MarketError {
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Role(_) => "role_error",
            MarketError::Validation(_) => "validation_error",
            MarketError::NotFound(_) => "not_found_error",
            MarketError::State(_) => "state_error",
            MarketError::Conflict(_) => "conflict_error",
            MarketError::Transient(_) => "transient_error",
        }
    }

    /// Only storage failures are worth retrying; business-rule errors would
    /// fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MarketError::Transient(_))
    }
}

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        match e.as_database_error() {
            Some(db) if db.is_unique_violation() => MarketError::Conflict(e.to_string()),
            // Dangling reference: the referenced row does not exist
            Some(db) if db.is_foreign_key_violation() => MarketError::NotFound(e.to_string()),
            _ => MarketError::Transient(e.to_string()),
        }
    }
}
