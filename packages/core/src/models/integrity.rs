//! Integrity Reports
//!
//! Results of the read-only diagnostics and the repair pass. Integrity
//! problems are surfaced as data so callers decide on remediation
//! (typically a rebuild); they are never raised as operation errors.

use crate::models::TreeKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One problem found while validating a tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IntegrityFinding {
    /// `left >= right`
    #[serde(rename_all = "camelCase")]
    InvalidBounds { id: String, left: u64, right: u64 },

    /// Two intervals overlap without one properly containing the other
    #[serde(rename_all = "camelCase")]
    OverlappingIntervals { first_id: String, second_id: String },

    /// Depth disagrees with the parent's depth (or a root is not at depth 0)
    #[serde(rename_all = "camelCase")]
    DepthMismatch {
        id: String,
        depth: u32,
        expected: u32,
    },

    /// `parent_id` names no live node
    #[serde(rename_all = "camelCase")]
    DanglingParent { id: String, parent_id: String },

    /// The parent's interval does not enclose the child's
    #[serde(rename_all = "camelCase")]
    ParentNotEnclosing { id: String, parent_id: String },
}

impl IntegrityFinding {
    /// Id of the node the finding is reported against
    pub fn node_id(&self) -> &str {
        match self {
            IntegrityFinding::InvalidBounds { id, .. }
            | IntegrityFinding::DepthMismatch { id, .. }
            | IntegrityFinding::DanglingParent { id, .. }
            | IntegrityFinding::ParentNotEnclosing { id, .. } => id,
            IntegrityFinding::OverlappingIntervals { second_id, .. } => second_id,
        }
    }
}

impl fmt::Display for IntegrityFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityFinding::InvalidBounds { id, left, right } => {
                write!(f, "node '{}' has invalid bounds ({}, {})", id, left, right)
            }
            IntegrityFinding::OverlappingIntervals {
                first_id,
                second_id,
            } => write!(
                f,
                "nodes '{}' and '{}' overlap without nesting",
                first_id, second_id
            ),
            IntegrityFinding::DepthMismatch {
                id,
                depth,
                expected,
            } => write!(
                f,
                "node '{}' has depth {} but expected {}",
                id, depth, expected
            ),
            IntegrityFinding::DanglingParent { id, parent_id } => {
                write!(f, "node '{}' references missing parent '{}'", id, parent_id)
            }
            IntegrityFinding::ParentNotEnclosing { id, parent_id } => write!(
                f,
                "parent '{}' does not enclose child '{}'",
                parent_id, id
            ),
        }
    }
}

/// Outcome of validating one tree table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub kind: TreeKind,
    pub nodes_checked: u64,
    pub findings: Vec<IntegrityFinding>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.findings.is_empty()
    }
}

/// Outcome of a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub kind: TreeKind,
    pub nodes_positioned: u64,
    pub roots: u64,
    /// Rows whose stored position or parent changed
    pub rows_rewritten: u64,
    /// Nodes promoted to roots because their parent was missing or cyclic
    pub detached: Vec<String>,
}

/// Aggregate shape of one tree table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeStatistics {
    pub kind: TreeKind,
    pub total_nodes: u64,
    pub tree_height: u32,
    pub root_count: u64,
    pub leaf_count: u64,
    pub average_depth: f64,
    pub max_level_width: u64,
    /// Depth at which `max_level_width` occurs (shallowest on ties)
    pub widest_level: Option<u32>,
    pub deleted_nodes: u64,
}
