//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl DbError {
    /// Map a unique-constraint violation to `Duplicate`, anything else to `Database`.
    pub(crate) fn unique(err: sqlx::Error, what: impl Into<String>) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => DbError::Duplicate(what.into()),
            _ => DbError::Database(err),
        }
    }
}

impl From<DbError> for stagehand_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(msg) => stagehand_core::Error::NotFound(msg),
            DbError::Duplicate(msg) => {
                stagehand_core::Error::InvalidOperation(format!("{} already exists", msg))
            }
            _ => stagehand_core::Error::Internal(err.to_string()),
        }
    }
}

pub type DbResult<T> = std::result::Result<T, DbError>;
