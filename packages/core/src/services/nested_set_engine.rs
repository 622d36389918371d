//! Nested-Set Engine - Mutations
//!
//! `NestedSetEngine` keeps the interval encoding of every registered tree
//! kind consistent. This module holds construction, the schema registry and
//! the mutating operations; read-only traversal lives in
//! [`tree_queries`](super::tree_queries) and repair/diagnostics in
//! [`tree_integrity`](super::tree_integrity).
//!
//! # Invariants
//!
//! After every committed mutation, for the live rows of one table:
//!
//! 1. `left < right`
//! 2. Any two intervals are disjoint or properly nested
//! 3. `depth(child) == depth(parent) + 1`, roots at depth 0
//! 4. `(right - left + 1) / 2` equals the subtree size
//!
//! Each mutation runs in a single store transaction. Bound changes are
//! expressed as one [`ShiftPlan`] evaluated against pre-update values, and
//! any error rolls the whole transaction back.
//!
//! # Examples
//!
//! ```rust
//! use nestedset_core::db::MemoryTreeStore;
//! use nestedset_core::models::{NewTreeNode, TreeKind};
//! use nestedset_core::services::NestedSetEngine;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = NestedSetEngine::new(Arc::new(MemoryTreeStore::new()));
//! engine.ensure_schema(TreeKind::MenuItem).await?;
//!
//! let root = engine
//!     .create_node(TreeKind::MenuItem, NewTreeNode::new("main", None, 1))
//!     .await?;
//! assert_eq!((root.left, root.right, root.depth), (1, 2, 0));
//!
//! let child = engine
//!     .create_node(TreeKind::MenuItem, NewTreeNode::new("about", Some("main".into()), 1))
//!     .await?;
//! assert_eq!((child.left, child.right, child.depth), (2, 3, 1));
//! # Ok(())
//! # }
//! ```

use crate::db::{BoundShift, DepthShift, ShiftPlan, TreeStore, TreeTransaction};
use crate::models::{NewTreeNode, NodePosition, TreeKind, TreeNode, TreeSchema};
use crate::services::{EngineConfig, TreeError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Nested-set tree engine shared by every hierarchical entity kind
///
/// One instance serves all registered kinds; each call names the kind it
/// operates on. The engine holds no tree state of its own.
///
/// # Thread Safety
///
/// `NestedSetEngine` is `Send + Sync` and is meant to be shared behind an
/// `Arc`. Concurrent mutations of the same table are serialized by the
/// store's write transactions.
pub struct NestedSetEngine {
    store: Arc<dyn TreeStore>,
    schemas: HashMap<TreeKind, TreeSchema>,
    config: EngineConfig,
}

impl NestedSetEngine {
    /// Engine over `store` with default schemas for every kind and default
    /// configuration
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: Arc<dyn TreeStore>, config: EngineConfig) -> Self {
        Self::with_kinds(store, config, &TreeKind::ALL)
    }

    /// Engine serving only `kinds`; calls for any other kind fail with
    /// `UnknownKind`
    pub fn with_kinds(store: Arc<dyn TreeStore>, config: EngineConfig, kinds: &[TreeKind]) -> Self {
        let schemas = kinds
            .iter()
            .map(|&kind| (kind, TreeSchema::for_kind(kind)))
            .collect();

        Self {
            store,
            schemas,
            config: config.normalized(),
        }
    }

    /// Register (or replace) the table mapping of one kind
    pub fn with_schema(mut self, schema: TreeSchema) -> Self {
        self.schemas.insert(schema.kind, schema);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    /// Table mapping registered for `kind`
    pub fn schema(&self, kind: TreeKind) -> Result<TreeSchema, TreeError> {
        self.schemas
            .get(&kind)
            .copied()
            .ok_or(TreeError::UnknownKind(kind))
    }

    /// Create the backing table of `kind` if needed
    pub async fn ensure_schema(&self, kind: TreeKind) -> Result<(), TreeError> {
        let schema = self.schema(kind)?;
        self.store.ensure_schema(&schema).await?;
        Ok(())
    }

    /// Create the backing tables of every registered kind
    pub async fn ensure_all_schemas(&self) -> Result<(), TreeError> {
        for schema in self.schemas.values() {
            self.store.ensure_schema(schema).await?;
        }
        Ok(())
    }

    /// Commit on success, roll back on failure
    ///
    /// A rollback failure is logged and the original error is returned; the
    /// store discards the open transaction when its connection goes away.
    pub(crate) async fn finish<T>(
        &self,
        tx: Box<dyn TreeTransaction>,
        result: Result<T, TreeError>,
    ) -> Result<T, TreeError> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(
                        "Failed to roll back tree transaction after '{}': {}",
                        err,
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    /// Insert a node as a new root or as the last child of its parent
    ///
    /// # Positioning
    ///
    /// - **Root**: `left = max(right) + 1`, `right = left + 1`, `depth = 0`
    /// - **Child**: with the parent's right bound `pr`, every live bound
    ///   `>= pr` moves up by 2 and the node takes `(pr, pr + 1)` at
    ///   `parent.depth + 1`
    ///
    /// The engine inserts the row with its positional columns; entity
    /// repositories fill their own columns afterwards.
    ///
    /// # Errors
    ///
    /// - `ParentNotFound` if the parent is absent or soft-deleted
    /// - `Conflict` if the id is already taken
    /// - `Storage` if the transaction cannot begin or commit
    pub async fn create_node(
        &self,
        kind: TreeKind,
        new_node: NewTreeNode,
    ) -> Result<NodePosition, TreeError> {
        let schema = self.schema(kind)?;
        let mut tx = self.store.begin().await?;
        let result = create_in(tx.as_mut(), &schema, &new_node).await;
        let position = self.finish(tx, result).await?;

        tracing::debug!(
            "Created {} node {} at ({}, {}) depth {}",
            kind,
            new_node.id,
            position.left,
            position.right,
            position.depth
        );
        Ok(position)
    }

    /// Relocate a node and its whole subtree
    ///
    /// With a parent the subtree becomes that parent's last child; without
    /// one it becomes the last root. Internal shape and relative depths are
    /// preserved.
    ///
    /// # Errors
    ///
    /// - `NodeNotFound` / `ParentNotFound` for missing rows
    /// - `InvalidMove` when the new parent is the node itself or one of its
    ///   descendants
    pub async fn move_subtree(
        &self,
        kind: TreeKind,
        node_id: &str,
        new_parent_id: Option<&str>,
    ) -> Result<(), TreeError> {
        let schema = self.schema(kind)?;
        let mut tx = self.store.begin().await?;
        let result = move_in(tx.as_mut(), &schema, node_id, new_parent_id).await;
        self.finish(tx, result).await?;

        tracing::debug!(
            "Moved {} node {} under {}",
            kind,
            node_id,
            new_parent_id.unwrap_or("<root>")
        );
        Ok(())
    }

    /// Soft-delete a node and its subtree, closing the gap it leaves
    ///
    /// Tombstoned rows keep their last bounds and are excluded from every
    /// query. Returns the number of rows tombstoned.
    pub async fn delete_subtree(&self, kind: TreeKind, node_id: &str) -> Result<u64, TreeError> {
        let schema = self.schema(kind)?;
        let mut tx = self.store.begin().await?;
        let result = delete_in(tx.as_mut(), &schema, node_id).await;
        let tombstoned = self.finish(tx, result).await?;

        tracing::debug!(
            "Soft-deleted {} node {} ({} rows)",
            kind,
            node_id,
            tombstoned
        );
        Ok(tombstoned)
    }

    /// Change the sibling display order of one node
    pub async fn set_ordering(
        &self,
        kind: TreeKind,
        node_id: &str,
        ordering: u32,
    ) -> Result<(), TreeError> {
        let schema = self.schema(kind)?;
        let mut tx = self.store.begin().await?;
        let result = match tx.set_ordering(&schema, node_id, ordering).await {
            Ok(0) => Err(TreeError::node_not_found(kind, node_id)),
            Ok(_) => Ok(()),
            Err(err) => Err(err.into()),
        };
        self.finish(tx, result).await
    }
}

async fn create_in(
    tx: &mut dyn TreeTransaction,
    schema: &TreeSchema,
    new_node: &NewTreeNode,
) -> Result<NodePosition, TreeError> {
    let (left, depth) = match new_node.parent_id.as_deref() {
        None => (tx.max_right(schema).await? + 1, 0),
        Some(parent_id) => {
            let parent = tx
                .fetch_node(schema, parent_id)
                .await?
                .ok_or_else(|| TreeError::parent_not_found(schema.kind, parent_id))?;
            tx.shift_bounds(schema, &insertion_plan(parent.right))
                .await?;
            (parent.right, parent.depth + 1)
        }
    };

    let node = TreeNode {
        id: new_node.id.clone(),
        parent_id: new_node.parent_id.clone(),
        left,
        right: left + 1,
        depth,
        ordering: new_node.ordering,
        created_at: Utc::now(),
        deleted_at: None,
    };
    tx.insert_node(schema, &node).await?;

    Ok(node.position())
}

async fn move_in(
    tx: &mut dyn TreeTransaction,
    schema: &TreeSchema,
    node_id: &str,
    new_parent_id: Option<&str>,
) -> Result<(), TreeError> {
    let node = tx
        .fetch_node(schema, node_id)
        .await?
        .ok_or_else(|| TreeError::node_not_found(schema.kind, node_id))?;

    let (anchor, new_depth) = match new_parent_id {
        None => (tx.max_right(schema).await? + 1, 0),
        Some(parent_id) => {
            if parent_id == node_id {
                return Err(TreeError::invalid_move(
                    node_id,
                    parent_id,
                    "a node cannot become its own parent",
                ));
            }
            let parent = tx
                .fetch_node(schema, parent_id)
                .await?
                .ok_or_else(|| TreeError::parent_not_found(schema.kind, parent_id))?;
            if node.contains(&parent) {
                return Err(TreeError::invalid_move(
                    node_id,
                    parent_id,
                    "target is inside the subtree being moved",
                ));
            }
            (parent.right, parent.depth + 1)
        }
    };

    let plan = relocation_plan(&node, anchor, new_depth);
    if plan.is_identity() {
        tracing::debug!("Node {} already in place, skipping shift", node_id);
    } else {
        tx.shift_bounds(schema, &plan).await?;
    }
    tx.set_parent(schema, node_id, new_parent_id).await?;

    Ok(())
}

async fn delete_in(
    tx: &mut dyn TreeTransaction,
    schema: &TreeSchema,
    node_id: &str,
) -> Result<u64, TreeError> {
    let node = tx
        .fetch_node(schema, node_id)
        .await?
        .ok_or_else(|| TreeError::node_not_found(schema.kind, node_id))?;

    let tombstoned = tx
        .mark_deleted(schema, node.left, node.right, Utc::now())
        .await?;
    tx.shift_bounds(schema, &gap_closing_plan(&node)).await?;

    Ok(tombstoned)
}

/// Open two slots at the parent's right bound `parent_right`
///
/// Lefts are never equal to a right bound, so one open-ended range covers
/// both `left > pr` and `right >= pr`.
pub(crate) fn insertion_plan(parent_right: u64) -> ShiftPlan {
    ShiftPlan::open_ended(parent_right, 2)
}

/// Pull every bound past a removed subtree down by its width
pub(crate) fn gap_closing_plan(removed: &TreeNode) -> ShiftPlan {
    ShiftPlan::open_ended(removed.right + 1, -(removed.width() as i64))
}

/// Relocate `node`'s block so it ends right before `anchor`
///
/// `anchor` is the new parent's right bound, or `max(right) + 1` when the
/// node becomes a root. Rows between the block and the anchor slide by the
/// block width in the opposite direction, which closes the old gap and
/// opens the new one in the same pass.
pub(crate) fn relocation_plan(node: &TreeNode, anchor: u64, new_depth: u32) -> ShiftPlan {
    let width = node.width() as i64;
    let depth = Some(DepthShift {
        left_from: node.left,
        left_to: node.right,
        delta: i64::from(new_depth) - i64::from(node.depth),
    });

    let bounds = if anchor > node.right {
        let mut bounds = vec![BoundShift {
            from: node.left,
            to: Some(node.right),
            delta: (anchor - node.right - 1) as i64,
        }];
        if anchor - 1 > node.right {
            bounds.push(BoundShift {
                from: node.right + 1,
                to: Some(anchor - 1),
                delta: -width,
            });
        }
        bounds
    } else {
        vec![
            BoundShift {
                from: node.left,
                to: Some(node.right),
                delta: -((node.left - anchor) as i64),
            },
            BoundShift {
                from: anchor,
                to: Some(node.left - 1),
                delta: width,
            },
        ]
    };

    ShiftPlan { bounds, depth }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(left: u64, right: u64, depth: u32) -> TreeNode {
        TreeNode {
            id: "n".to_string(),
            parent_id: None,
            left,
            right,
            depth,
            ordering: 0,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_relocation_to_the_right() {
        // R(1,8): A(2,5) -> A1(3,4); B(6,7). Move A under B (anchor 7).
        let plan = relocation_plan(&node(2, 5, 1), 7, 2);
        assert_eq!(plan.map_bound(2), 3);
        assert_eq!(plan.map_bound(5), 6);
        assert_eq!(plan.map_bound(6), 2);
        assert_eq!(plan.map_bound(7), 7);
        assert_eq!(plan.map_bound(8), 8);
        assert_eq!(plan.map_depth(3, 2), 3);
    }

    #[test]
    fn test_relocation_to_the_left() {
        // R(1,8): A(2,3); B(4,7) -> B1(5,6). Move B1 under A (anchor 3).
        let plan = relocation_plan(&node(5, 6, 2), 3, 2);
        assert_eq!(plan.map_bound(5), 3);
        assert_eq!(plan.map_bound(6), 4);
        assert_eq!(plan.map_bound(3), 5);
        assert_eq!(plan.map_bound(4), 6);
        assert_eq!(plan.map_bound(7), 7);
        assert_eq!(plan.map_depth(5, 2), 2);
    }

    #[test]
    fn test_relocation_in_place_is_identity() {
        // Already the last child: its right sits just before the anchor.
        let plan = relocation_plan(&node(4, 5, 1), 6, 1);
        assert!(plan.is_identity());
    }

    #[test]
    fn test_insertion_and_gap_closing_plans() {
        let open = insertion_plan(2);
        assert_eq!(open.map_bound(1), 1);
        assert_eq!(open.map_bound(2), 4);

        let close = gap_closing_plan(&node(5, 6, 1));
        assert_eq!(close.map_bound(6), 6);
        assert_eq!(close.map_bound(7), 5);
        assert_eq!(close.map_bound(10), 8);
    }
}

// Scenario tests against the in-memory store
#[cfg(test)]
#[path = "nested_set_engine_test.rs"]
mod nested_set_engine_test;
