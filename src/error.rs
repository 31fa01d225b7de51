//! Error types for the index synchronization worker.

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// Malformed input, never retried.
    #[error("invalid {kind}: {value:?}")]
    Validation { kind: &'static str, value: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// Some items of a batch failed. Siblings were still attempted.
    ///
    /// `retryable` is set when any failure was transient, whatever its position.
    #[error("{failed} of {total} items failed, first error: {first}")]
    Batch {
        failed: usize,
        total: usize,
        retryable: bool,
        first: Box<Error>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Relational store errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("corrupt {entity} row: {reason}")]
    Corrupt { entity: &'static str, reason: String },

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Search index backend errors.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("LanceDB error: {0}")]
    LanceDb(String),

    #[error("Arrow error: {0}")]
    Arrow(String),

    #[error("index schema error: {0}")]
    Schema(String),
}

impl Error {
    pub fn validation(kind: &'static str, value: impl Into<String>) -> Self {
        Error::Validation {
            kind,
            value: value.into(),
        }
    }

    /// Fold the failures of a batch into one error. `failures` must not be empty.
    pub fn batch(mut failures: Vec<Error>, total: usize) -> Self {
        let failed = failures.len();
        let retryable = failures.iter().any(Error::is_retryable);
        let first = if failures.is_empty() {
            Error::Other(anyhow::anyhow!("empty batch failure"))
        } else {
            failures.swap_remove(0)
        };
        Error::Batch {
            failed,
            total,
            retryable,
            first: Box::new(first),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        DbError::NotFound {
            entity,
            id: id.to_string(),
        }
        .into()
    }

    /// True when the identifier did not resolve in the repository.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Db(DbError::NotFound { .. }))
    }

    /// Whether re-running the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Index(_) => true,
            Error::Db(DbError::Sqlx(error)) => !matches!(error, sqlx::Error::RowNotFound),
            Error::Db(_) => false,
            Error::Validation { .. } | Error::Config(_) => false,
            Error::Batch { retryable, .. } => *retryable,
            Error::Other(_) => true,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Error::Db(DbError::Sqlx(error))
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Error::Config(error.to_string())
    }
}

impl From<lancedb::Error> for Error {
    fn from(error: lancedb::Error) -> Self {
        Error::Index(IndexError::LanceDb(error.to_string()))
    }
}

impl From<arrow_schema::ArrowError> for Error {
    fn from(error: arrow_schema::ArrowError) -> Self {
        Error::Index(IndexError::Arrow(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_not_found_are_permanent() {
        assert!(!Error::validation("node id", "nope").is_retryable());
        assert!(!Error::not_found("node", "abc").is_retryable());
        assert!(Error::not_found("node", "abc").is_not_found());
    }

    #[test]
    fn batch_failures_aggregate() {
        let mixed = Error::batch(
            vec![
                Error::not_found("document", "x"),
                IndexError::LanceDb("connection reset".into()).into(),
            ],
            3,
        );
        assert!(mixed.is_retryable());
        assert!(matches!(
            &mixed,
            Error::Batch { failed: 2, total: 3, first, .. } if first.is_not_found()
        ));

        let permanent = Error::batch(
            vec![Error::not_found("document", "x"), Error::validation("page id", "y")],
            2,
        );
        assert!(!permanent.is_retryable());
    }
}
