pub mod aggregate;
pub mod filter;
pub mod histogram;
pub mod listing;
pub mod proportionality;

use crate::database::DatabaseError;

/// Errors of the analytics layer. Every variant is a deterministic function
/// of the request and carries the identifiers the caller needs to
/// self-diagnose; nothing here is transient or retryable.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("property {property} does not exist or is not supported for filtering")]
    UnknownFilterProperty { property: String },
    #[error("invalid constraint for property {property}: {detail}")]
    InvalidFilterShape { property: String, detail: String },
    #[error("property {property} of type {field_type} cannot be used here")]
    UnsupportedPropertyType {
        property: String,
        field_type: &'static str,
    },
    #[error("no election with id {id}")]
    ElectionNotFound { id: i64 },
    #[error("election {election} has no votes for projects with positive cost and categories")]
    NoPositiveCostVotes { election: i64 },
    #[error("property {property}: expected vectors of length {expected}, found {found}")]
    VectorLengthMismatch {
        property: String,
        expected: usize,
        found: usize,
    },
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AnalyticsResult<T> = std::result::Result<T, AnalyticsError>;
