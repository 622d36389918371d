//! TreeStore Trait - Transactional Store Abstraction
//!
//! This module defines the seam between the nested-set engine and whatever
//! relational store holds the rows. The engine owns the interval arithmetic;
//! a store only has to evaluate a handful of typed primitives (fetch, range
//! filters, bound shifts, tombstoning) against one table described by a
//! [`TreeSchema`].
//!
//! # Architecture
//!
//! - **`TreeStore`**: Entry point; hands out readers and transactions
//! - **`TreeReader`**: Read primitives, usable with or without a transaction
//! - **`TreeTransaction`**: Mutating primitives plus commit/rollback
//!
//! Two implementations ship with the crate:
//!
//! - `TursoTreeStore` - libsql database (production)
//! - `MemoryTreeStore` - in-memory fake with the same transaction semantics
//!
//! # Transaction Contract
//!
//! Writes made through a `TreeTransaction` become visible to other sessions
//! only on `commit`. `rollback` (or an error before commit followed by
//! rollback) must leave the table exactly as it was before `begin`.

use crate::db::DatabaseError;
use crate::models::{Page, TreeNode, TreeSchema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Row predicate for list and count queries
///
/// Every filter except [`NodeFilter::Deleted`] only matches live rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFilter {
    /// Every live row
    All,
    /// Live rows without a parent
    Roots,
    /// Strictly inside `left..right` (descendants of the node with these bounds)
    Within { left: u64, right: u64 },
    /// Strictly enclosing `left..right` (ancestors)
    Enclosing { left: u64, right: u64 },
    /// Enclosing or equal to `left..right` (root-to-node path, inclusive)
    Path { left: u64, right: u64 },
    /// Rows whose `parent_id` equals `parent_id`
    Children { parent_id: String },
    /// Rows sharing `parent_id` (null matches null), except `exclude_id`
    Siblings {
        parent_id: Option<String>,
        exclude_id: String,
    },
    /// Rows at exactly this depth
    AtDepth(u32),
    /// Tombstoned rows
    Deleted,
}

impl NodeFilter {
    /// Evaluate the filter against a row held in memory
    pub fn matches(&self, node: &TreeNode) -> bool {
        match self {
            NodeFilter::Deleted => node.deleted_at.is_some(),
            _ if node.deleted_at.is_some() => false,
            NodeFilter::All => true,
            NodeFilter::Roots => node.parent_id.is_none(),
            NodeFilter::Within { left, right } => node.left > *left && node.right < *right,
            NodeFilter::Enclosing { left, right } => node.left < *left && node.right > *right,
            NodeFilter::Path { left, right } => node.left <= *left && node.right >= *right,
            NodeFilter::Children { parent_id } => {
                node.parent_id.as_deref() == Some(parent_id.as_str())
            }
            NodeFilter::Siblings {
                parent_id,
                exclude_id,
            } => node.parent_id == *parent_id && node.id != *exclude_id,
            NodeFilter::AtDepth(depth) => node.depth == *depth,
        }
    }
}

/// Sort order for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeOrder {
    /// `left` ascending (preorder)
    #[default]
    Left,
    /// `ordering` ascending, then `left`
    Ordering,
}

/// A list query: filter, order and optional window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeQuery {
    pub filter: NodeFilter,
    pub order: NodeOrder,
    pub page: Option<Page>,
}

impl NodeQuery {
    pub fn new(filter: NodeFilter) -> Self {
        Self {
            filter,
            order: NodeOrder::Left,
            page: None,
        }
    }

    pub fn ordered_by(mut self, order: NodeOrder) -> Self {
        self.order = order;
        self
    }

    pub fn paged(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }
}

/// Signed shift applied to every bound value inside `from..=to`
///
/// `to = None` leaves the range open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundShift {
    pub from: u64,
    pub to: Option<u64>,
    pub delta: i64,
}

impl BoundShift {
    pub fn covers(&self, value: u64) -> bool {
        value >= self.from && self.to.map_or(true, |to| value <= to)
    }
}

/// Depth adjustment for rows whose `left` falls inside `left_from..=left_to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthShift {
    pub left_from: u64,
    pub left_to: u64,
    pub delta: i64,
}

/// One piecewise-linear remapping of live bounds (and optionally depths)
///
/// All ranges are evaluated against the values as they were *before* the
/// plan is applied, so a store must apply the plan atomically (a single
/// UPDATE, or computing every new value before writing any). Bound ranges
/// must not overlap.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShiftPlan {
    pub bounds: Vec<BoundShift>,
    pub depth: Option<DepthShift>,
}

impl ShiftPlan {
    /// Shift every bound `>= from` by `delta`
    pub fn open_ended(from: u64, delta: i64) -> Self {
        Self {
            bounds: vec![BoundShift {
                from,
                to: None,
                delta,
            }],
            depth: None,
        }
    }

    /// True when applying the plan would change nothing
    pub fn is_identity(&self) -> bool {
        self.bounds.iter().all(|shift| shift.delta == 0)
            && self.depth.map_or(true, |depth| depth.delta == 0)
    }

    /// New value of one bound
    pub fn map_bound(&self, value: u64) -> u64 {
        self.bounds
            .iter()
            .find(|shift| shift.covers(value))
            .map_or(value, |shift| offset(value, shift.delta))
    }

    /// New depth of a row given its pre-shift `left`
    pub fn map_depth(&self, left: u64, depth: u32) -> u32 {
        match self.depth {
            Some(shift) if left >= shift.left_from && left <= shift.left_to => {
                let shifted = i64::from(depth) + shift.delta;
                u32::try_from(shifted.max(0)).unwrap_or(u32::MAX)
            }
            _ => depth,
        }
    }

    /// Smallest bound value the plan can touch
    pub fn lowest_bound(&self) -> Option<u64> {
        self.bounds.iter().map(|shift| shift.from).min()
    }
}

fn offset(value: u64, delta: i64) -> u64 {
    if delta >= 0 {
        value.saturating_add(delta.unsigned_abs())
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}

/// Read primitives over one nested-set table
#[async_trait]
pub trait TreeReader: Send + Sync {
    /// Live row by id (`Ok(None)` when absent or tombstoned)
    async fn fetch_node(&self, schema: &TreeSchema, id: &str)
        -> Result<Option<TreeNode>, DatabaseError>;

    /// Largest live `right` bound, 0 for an empty table
    async fn max_right(&self, schema: &TreeSchema) -> Result<u64, DatabaseError>;

    /// Largest live depth, `None` for an empty table
    async fn max_depth(&self, schema: &TreeSchema) -> Result<Option<u32>, DatabaseError>;

    async fn list_nodes(
        &self,
        schema: &TreeSchema,
        query: &NodeQuery,
    ) -> Result<Vec<TreeNode>, DatabaseError>;

    async fn count_nodes(
        &self,
        schema: &TreeSchema,
        filter: &NodeFilter,
    ) -> Result<u64, DatabaseError>;
}

/// Mutating primitives, visible to others only after `commit`
#[async_trait]
pub trait TreeTransaction: TreeReader {
    /// Insert a fully positioned row
    async fn insert_node(&mut self, schema: &TreeSchema, node: &TreeNode)
        -> Result<(), DatabaseError>;

    /// Apply a shift plan to every live row; returns rows touched
    async fn shift_bounds(
        &mut self,
        schema: &TreeSchema,
        plan: &ShiftPlan,
    ) -> Result<u64, DatabaseError>;

    /// Returns rows updated (0 when the node is absent)
    async fn set_parent(
        &mut self,
        schema: &TreeSchema,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<u64, DatabaseError>;

    /// Returns rows updated (0 when the node is absent)
    async fn set_ordering(
        &mut self,
        schema: &TreeSchema,
        id: &str,
        ordering: u32,
    ) -> Result<u64, DatabaseError>;

    /// Tombstone every live row with `left >= left and right <= right`
    async fn mark_deleted(
        &mut self,
        schema: &TreeSchema,
        left: u64,
        right: u64,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>;

    /// Overwrite bounds, depth and parent of one live row
    async fn write_position(
        &mut self,
        schema: &TreeSchema,
        node: &TreeNode,
    ) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Factory for readers and transactions over nested-set tables
///
/// Implementations must be `Send + Sync` so one store can be shared across
/// async tasks behind an `Arc`.
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Create the table and its indexes if they do not exist yet
    async fn ensure_schema(&self, schema: &TreeSchema) -> Result<(), DatabaseError>;

    /// Autocommit reader; may observe other sessions mid-flight
    async fn reader(&self) -> Result<Box<dyn TreeReader>, DatabaseError>;

    /// Start a write transaction
    async fn begin(&self) -> Result<Box<dyn TreeTransaction>, DatabaseError>;
}
