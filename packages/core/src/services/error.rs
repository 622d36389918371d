//! Service Layer Error Types
//!
//! This module defines error types for nested-set engine operations.
//! Integrity problems are not errors: validation reports them as data.

use crate::db::DatabaseError;
use crate::models::TreeKind;
use thiserror::Error;

/// Nested-set engine errors
///
/// Every mutating operation is all-or-nothing: when one of these is
/// returned from a mutation, the store transaction has been rolled back.
#[derive(Error, Debug)]
pub enum TreeError {
    /// Node not found by ID (absent or soft-deleted)
    #[error("Node not found in {kind} tree: {id}")]
    NodeNotFound { kind: TreeKind, id: String },

    /// Referenced parent not found
    #[error("Parent node not found in {kind} tree: {parent_id}")]
    ParentNotFound { kind: TreeKind, parent_id: String },

    /// Move would place a subtree inside itself
    #[error("Cannot move node {node_id} under {target_id}: {reason}")]
    InvalidMove {
        node_id: String,
        target_id: String,
        reason: String,
    },

    /// No schema registered for the kind
    #[error("No tree schema registered for kind: {0}")]
    UnknownKind(TreeKind),

    /// Serialization failure or constraint violation reported by the store
    #[error("Conflicting write: {0}")]
    Conflict(String),

    /// Connection, transport or statement failure
    #[error("Storage failure: {0}")]
    Storage(#[source] DatabaseError),
}

impl TreeError {
    /// Create a node not found error
    pub fn node_not_found(kind: TreeKind, id: impl Into<String>) -> Self {
        Self::NodeNotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a parent not found error
    pub fn parent_not_found(kind: TreeKind, parent_id: impl Into<String>) -> Self {
        Self::ParentNotFound {
            kind,
            parent_id: parent_id.into(),
        }
    }

    /// Create an invalid move error
    pub fn invalid_move(
        node_id: impl Into<String>,
        target_id: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidMove {
            node_id: node_id.into(),
            target_id: target_id.into(),
            reason: reason.into(),
        }
    }

    /// True for missing nodes and missing parents
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NodeNotFound { .. } | Self::ParentNotFound { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<DatabaseError> for TreeError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict { context } => Self::Conflict(context),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicts_keep_their_context() {
        let err: TreeError = DatabaseError::conflict("database is locked").into();
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Conflicting write: database is locked");
    }

    #[test]
    fn test_other_database_errors_are_storage() {
        let err: TreeError = DatabaseError::sql_execution("disk I/O error").into();
        assert!(matches!(err, TreeError::Storage(_)));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_not_found_messages_name_the_kind() {
        let err = TreeError::node_not_found(TreeKind::MenuItem, "m-1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Node not found in menu_item tree: m-1");
    }
}
