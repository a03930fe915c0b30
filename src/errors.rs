use thiserror::Error;

use crate::isolation::IsolationLevel;

/// Errors reported by a database handle or by an operation running against it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// The engine aborted the unit of work to keep it serializable (includes deadlock victims).
    /// Work failing with this error is safe to retry from the start.
    #[error("Serialization failure: {0}")]
    SerializationFailure(String),

    #[error("Lock wait timeout exceeded: {0}")]
    LockWaitTimeout(String),

    #[error("Statement failed: {0}")]
    Statement(String),

    #[error("Database error: {0}")]
    Other(String),
}

impl DatabaseError {
    /// Returns `true` if the failure is a serialization conflict the coordinator may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::SerializationFailure(_))
    }
}

#[derive(Error, Debug)]
pub enum AtomqError {
    #[error("Isolation level {0} is currently unsupported")]
    UnsupportedIsolation(IsolationLevel),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Table locks only work with existing tables: {0:?}")]
    UnknownTable(String),

    #[error("Invalid lock strength {0}, use read or write")]
    InvalidLockStrength(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Write locks are only permitted under serializable isolation (requested {0})")]
    IncompatibleLockingPolicy(IsolationLevel),

    #[error("Timed out acquiring table locks: {0}")]
    LockTimeout(String),

    #[error("Serialization conflict persisted after {attempts} attempts")]
    ConflictExhausted {
        attempts: usize,
        /// Index of the operation that was running when the last conflict surfaced,
        /// `None` if the conflict was raised outside the queue (commit or lock acquisition).
        cursor: Option<usize>,
        #[source]
        source: DatabaseError,
    },

    #[error("Operation {cursor} failed")]
    OperationFailed {
        cursor: usize,
        #[source]
        source: DatabaseError,
    },

    #[error("Coordinator has already been run")]
    AlreadyRun,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AtomqError {
    /// Whether the failure came from a serialization conflict and the attempt can be replayed.
    pub fn is_conflict(&self) -> bool {
        match self {
            AtomqError::OperationFailed { source, .. } => source.is_conflict(),
            AtomqError::Database(source) => source.is_conflict(),
            _ => false,
        }
    }

    /// The operation index a failure is attributed to, if any.
    pub fn cursor(&self) -> Option<usize> {
        match self {
            AtomqError::OperationFailed { cursor, .. } => Some(*cursor),
            AtomqError::ConflictExhausted { cursor, .. } => *cursor,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtomqError>;
