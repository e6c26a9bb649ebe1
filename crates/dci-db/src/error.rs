//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A conditional write matched zero rows.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for dci_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => dci_core::Error::NotFound(what),
            DbError::Conflict(what) => dci_core::Error::Conflict(what),
            other => dci_core::Error::Internal(other.to_string()),
        }
    }
}
