//! Store error types.

use thiserror::Error;

use crate::db::DbError;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the persistence layer.
///
/// These are infrastructure errors: the engine passes them through untouched
/// and a failed mutation leaves the store as it was.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] DbError),

    /// A stored value could not be mapped back onto the domain model.
    #[error("corrupt {entity} row '{id}': {message}")]
    Corrupt {
        entity: &'static str,
        id: String,
        message: String,
    },
}

impl StoreError {
    pub(crate) fn corrupt(
        entity: &'static str,
        id: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Corrupt {
            entity,
            id: id.into(),
            message: message.to_string(),
        }
    }
}
