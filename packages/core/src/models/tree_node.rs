//! Tree Node Data Structures
//!
//! A [`TreeNode`] is the positional view of one row in a nested-set table:
//! identity, parent link, interval bounds, depth, sibling ordering and the
//! bookkeeping timestamps. Entity-specific columns (comment body, menu label,
//! ...) are owned by the entity repositories and never read here.
//!
//! # Examples
//!
//! ```rust
//! use nestedset_core::models::NewTreeNode;
//!
//! // Root of a new menu
//! let root = NewTreeNode::root(1);
//!
//! // Child with a caller-chosen id
//! let child = NewTreeNode::new("menu-about", Some(root.id.clone()), 2);
//! assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One live or tombstoned node of a nested-set table
///
/// # Fields
///
/// - `left` / `right`: interval bounds, `left < right`
/// - `depth`: distance from the node's root (roots are 0)
/// - `ordering`: sibling display order
/// - `deleted_at`: soft-delete marker; tombstoned rows keep stale bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub left: u64,
    pub right: u64,
    pub depth: u32,
    pub ordering: u32,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl TreeNode {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.right == self.left + 1
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Number of bound values the subtree occupies (`2 * subtree_size`)
    pub fn width(&self) -> u64 {
        self.right.saturating_sub(self.left) + 1
    }

    /// Node plus all descendants
    pub fn subtree_size(&self) -> u64 {
        self.width() / 2
    }

    pub fn descendant_count(&self) -> u64 {
        self.subtree_size().saturating_sub(1)
    }

    /// True when `other` lies strictly inside this node's interval
    pub fn contains(&self, other: &TreeNode) -> bool {
        self.left < other.left && self.right > other.right
    }

    pub fn position(&self) -> NodePosition {
        NodePosition {
            left: self.left,
            right: self.right,
            depth: self.depth,
            ordering: self.ordering,
        }
    }
}

/// Positional columns assigned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePosition {
    pub left: u64,
    pub right: u64,
    pub depth: u32,
    pub ordering: u32,
}

/// Insertion request for a new node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTreeNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub ordering: u32,
}

impl NewTreeNode {
    pub fn new(id: impl Into<String>, parent_id: Option<String>, ordering: u32) -> Self {
        Self {
            id: id.into(),
            parent_id,
            ordering,
        }
    }

    /// Root node with a generated UUID
    pub fn root(ordering: u32) -> Self {
        Self::new(Uuid::new_v4().to_string(), None, ordering)
    }

    /// Child node with a generated UUID
    pub fn child(parent_id: impl Into<String>, ordering: u32) -> Self {
        Self::new(Uuid::new_v4().to_string(), Some(parent_id.into()), ordering)
    }
}

/// A node with its children, assembled from one subtree range scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTree {
    pub node: TreeNode,
    pub children: Vec<NodeTree>,
}

impl NodeTree {
    /// Total nodes in this tree, including the root
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(NodeTree::size).sum::<usize>()
    }

    /// Assemble a nested tree from `root` and its descendants
    ///
    /// `descendants` must be sorted by `left` ascending, which is the natural
    /// order of a subtree range scan. Rows outside `root`'s interval are
    /// ignored.
    pub fn assemble(root: TreeNode, descendants: Vec<TreeNode>) -> NodeTree {
        // Stack of open subtrees; each entry is closed once a row starts
        // beyond its right bound.
        let mut stack: Vec<NodeTree> = vec![NodeTree {
            node: root,
            children: Vec::new(),
        }];

        for node in descendants {
            if !stack[0].node.contains(&node) {
                continue;
            }
            while stack.len() > 1 && !stack[stack.len() - 1].node.contains(&node) {
                if let Some(done) = stack.pop() {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(done);
                    }
                }
            }
            stack.push(NodeTree {
                node,
                children: Vec::new(),
            });
        }

        while stack.len() > 1 {
            if let Some(done) = stack.pop() {
                if let Some(parent) = stack.last_mut() {
                    parent.children.push(done);
                }
            }
        }

        stack.remove(0)
    }
}

/// Limit/offset window for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }

    pub fn first(limit: u32) -> Self {
        Self::new(limit, 0)
    }

    /// Cap the limit at `max_limit`
    pub fn clamp(self, max_limit: u32) -> Self {
        Self {
            limit: self.limit.min(max_limit),
            offset: self.offset,
        }
    }
}
