//! Data Models
//!
//! This module contains the data structures shared by the stores and the
//! nested-set engine:
//!
//! - `TreeKind` / `TreeSchema` - Typed table and column descriptors
//! - `TreeNode` - Positional view of one row in a nested-set table
//! - Integrity reports produced by validation, rebuild and statistics

mod integrity;
mod schema;
mod tree_node;

pub use integrity::{IntegrityFinding, RebuildReport, TreeStatistics, ValidationReport};
pub use schema::{TreeColumns, TreeKind, TreeSchema};
pub use tree_node::{NewTreeNode, NodePosition, NodeTree, Page, TreeNode};
