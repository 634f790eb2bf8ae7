use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// One rejected field of an audit input
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldViolation {
    /// Position inside a batch; `None` for single submissions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            index: None,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn at(mut self, index: Option<usize>) -> Self {
        self.index = index;
        self
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(idx) => write!(f, "[{}] {}: {}", idx, self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// Malformed input, rejected before anything is written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed: {}", join_violations(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![FieldViolation::new(field, message)])
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Broad classification of storage failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryErrorKind {
    /// Could not reach the store (pool timeout, I/O, TLS)
    Connection,
    /// Store is up but refused service (pool closed, worker crashed)
    Unavailable,
    /// Constraint violation (duplicate id, check failure)
    Constraint,
    /// Statement failed for another reason
    Query,
    /// A row could not be mapped back into a record
    Decode,
}

/// Storage failure, normalized from the driver's error shape
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("repository error ({kind:?}): {message}")]
pub struct RepositoryError {
    pub kind: RepositoryErrorKind,
    pub message: String,
}

impl RepositoryError {
    pub fn new(kind: RepositoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(RepositoryErrorKind::Decode, message)
    }

    /// Whether retrying the same operation may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::Connection | RepositoryErrorKind::Unavailable
        )
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
                RepositoryErrorKind::Connection
            }
            sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => RepositoryErrorKind::Unavailable,
            sqlx::Error::Database(db) if db.constraint().is_some() => RepositoryErrorKind::Constraint,
            sqlx::Error::Database(db)
                if matches!(
                    db.kind(),
                    sqlx::error::ErrorKind::UniqueViolation
                        | sqlx::error::ErrorKind::CheckViolation
                        | sqlx::error::ErrorKind::NotNullViolation
                        | sqlx::error::ErrorKind::ForeignKeyViolation
                ) =>
            {
                RepositoryErrorKind::Constraint
            }
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. } => RepositoryErrorKind::Decode,
            _ => RepositoryErrorKind::Query,
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors surfaced by [`crate::AuditLedger`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Repository(e) if e.is_transient())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
