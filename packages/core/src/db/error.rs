//! Database Error Types
//!
//! This module defines error types for store operations, providing
//! clear error handling for connection, initialization, query failures and
//! write conflicts surfaced by the backing store.

use std::path::PathBuf;
use thiserror::Error;

// SQLite primary result codes that mean "another writer got in the way" or
// "the write violated a constraint".
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CONSTRAINT: i32 = 19;

/// Database operation errors
///
/// Covers connection, initialization and statement failures. Conflicts are
/// kept apart from other failures so the engine can report them as
/// retryable.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),

    /// Serialization failure or constraint violation
    #[error("Write conflict: {context}")]
    Conflict { context: String },

    /// SQL execution error with context
    #[error("SQL execution failed: {context}")]
    SqlExecutionError { context: String },

    /// A stored value could not be decoded into the node model
    #[error("Invalid stored data: {context}")]
    InvalidData { context: String },
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }

    /// Create a conflict error
    pub fn conflict(context: impl Into<String>) -> Self {
        Self::Conflict {
            context: context.into(),
        }
    }

    /// Create a SQL execution error with context
    pub fn sql_execution(context: impl Into<String>) -> Self {
        Self::SqlExecutionError {
            context: context.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(context: impl Into<String>) -> Self {
        Self::InvalidData {
            context: context.into(),
        }
    }

    /// Wrap a libsql statement error, classifying busy/locked/constraint
    /// failures as conflicts
    pub fn from_statement(context: &str, err: libsql::Error) -> Self {
        match &err {
            libsql::Error::SqliteFailure(code, message) if is_conflict_code(*code) => {
                Self::conflict(format!("{}: {}", context, message))
            }
            _ => Self::sql_execution(format!("{}: {}", context, err)),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

fn is_conflict_code(code: i32) -> bool {
    // Extended result codes carry the primary code in the low byte
    matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED | SQLITE_CONSTRAINT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_failures_are_conflicts() {
        // SQLITE_CONSTRAINT_PRIMARYKEY = 1555
        let err = DatabaseError::from_statement(
            "Failed to insert node",
            libsql::Error::SqliteFailure(1555, "UNIQUE constraint failed".to_string()),
        );
        assert!(err.is_conflict());

        let busy = DatabaseError::from_statement(
            "Failed to begin transaction",
            libsql::Error::SqliteFailure(SQLITE_BUSY, "database is locked".to_string()),
        );
        assert!(busy.is_conflict());
    }

    #[test]
    fn test_other_failures_are_execution_errors() {
        let err = DatabaseError::from_statement(
            "Failed to prepare query",
            libsql::Error::SqliteFailure(1, "no such table: comments".to_string()),
        );
        assert!(!err.is_conflict());
        assert!(err.to_string().contains("no such table"));
    }
}
