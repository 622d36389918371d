//! Nested-Set Engine - Traversal Queries
//!
//! Read-only operations answered from the interval encoding alone: every
//! subtree, ancestor chain or level is one indexed range query, no matter
//! how deep the tree is.
//!
//! Queries run on an autocommit reader and never open a write transaction.
//! A node that is absent or soft-deleted yields `NodeNotFound`.

use crate::db::{NodeFilter, NodeOrder, NodeQuery, TreeReader};
use crate::models::{NodeTree, Page, TreeKind, TreeNode, TreeSchema};
use crate::services::{NestedSetEngine, TreeError};

impl NestedSetEngine {
    async fn require_node(
        reader: &dyn TreeReader,
        schema: &TreeSchema,
        id: &str,
    ) -> Result<TreeNode, TreeError> {
        reader
            .fetch_node(schema, id)
            .await?
            .ok_or_else(|| TreeError::node_not_found(schema.kind, id))
    }

    /// Live node by id, `None` when absent or soft-deleted
    pub async fn get_node(&self, kind: TreeKind, id: &str) -> Result<Option<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        Ok(reader.fetch_node(&schema, id).await?)
    }

    /// All descendants of a node in preorder (`left` ascending)
    ///
    /// Without a page the configured default page size applies; a supplied
    /// limit is capped at the configured maximum.
    pub async fn get_descendants(
        &self,
        kind: TreeKind,
        id: &str,
        page: Option<Page>,
    ) -> Result<Vec<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let node = Self::require_node(reader.as_ref(), &schema, id).await?;

        let page = page
            .unwrap_or_else(|| Page::first(self.config().default_page_size))
            .clamp(self.config().max_page_size);
        let query = NodeQuery::new(NodeFilter::Within {
            left: node.left,
            right: node.right,
        })
        .paged(page);

        Ok(reader.list_nodes(&schema, &query).await?)
    }

    /// Direct children of a node, by `left`
    pub async fn get_children(&self, kind: TreeKind, id: &str) -> Result<Vec<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        Self::require_node(reader.as_ref(), &schema, id).await?;

        let query = NodeQuery::new(NodeFilter::Children {
            parent_id: id.to_string(),
        });
        Ok(reader.list_nodes(&schema, &query).await?)
    }

    /// Strict ancestors of a node, root first
    pub async fn get_ancestors(&self, kind: TreeKind, id: &str) -> Result<Vec<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let node = Self::require_node(reader.as_ref(), &schema, id).await?;

        let query = NodeQuery::new(NodeFilter::Enclosing {
            left: node.left,
            right: node.right,
        });
        Ok(reader.list_nodes(&schema, &query).await?)
    }

    /// Root-to-node chain, inclusive of the node itself (breadcrumbs)
    pub async fn get_path(&self, kind: TreeKind, id: &str) -> Result<Vec<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let node = Self::require_node(reader.as_ref(), &schema, id).await?;

        let query = NodeQuery::new(NodeFilter::Path {
            left: node.left,
            right: node.right,
        });
        Ok(reader.list_nodes(&schema, &query).await?)
    }

    /// Nodes sharing the node's parent, excluding the node, by `ordering`
    ///
    /// Roots are siblings of each other.
    pub async fn get_siblings(&self, kind: TreeKind, id: &str) -> Result<Vec<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let node = Self::require_node(reader.as_ref(), &schema, id).await?;

        let query = NodeQuery::new(NodeFilter::Siblings {
            parent_id: node.parent_id,
            exclude_id: node.id,
        })
        .ordered_by(NodeOrder::Ordering);
        Ok(reader.list_nodes(&schema, &query).await?)
    }

    /// Every live root, by `left`
    pub async fn get_roots(&self, kind: TreeKind) -> Result<Vec<TreeNode>, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        Ok(reader
            .list_nodes(&schema, &NodeQuery::new(NodeFilter::Roots))
            .await?)
    }

    /// A node with its full subtree assembled as a nested structure
    pub async fn get_subtree(&self, kind: TreeKind, id: &str) -> Result<NodeTree, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let node = Self::require_node(reader.as_ref(), &schema, id).await?;

        let query = NodeQuery::new(NodeFilter::Within {
            left: node.left,
            right: node.right,
        });
        let descendants = reader.list_nodes(&schema, &query).await?;
        Ok(NodeTree::assemble(node, descendants))
    }

    /// True when `b` is a strict descendant of `a`
    ///
    /// Decided purely from bounds: `a.left < b.left && a.right > b.right`.
    pub async fn is_descendant(&self, kind: TreeKind, a: &str, b: &str) -> Result<bool, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let a = Self::require_node(reader.as_ref(), &schema, a).await?;
        let b = Self::require_node(reader.as_ref(), &schema, b).await?;
        Ok(a.contains(&b))
    }

    /// True when `b` is a strict ancestor of `a`
    pub async fn is_ancestor(&self, kind: TreeKind, a: &str, b: &str) -> Result<bool, TreeError> {
        self.is_descendant(kind, b, a).await
    }

    /// `(right - left - 1) / 2`, no query beyond the node fetch
    pub async fn count_descendants(&self, kind: TreeKind, id: &str) -> Result<u64, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let node = Self::require_node(reader.as_ref(), &schema, id).await?;
        Ok(node.descendant_count())
    }

    pub async fn count_children(&self, kind: TreeKind, id: &str) -> Result<u64, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        Self::require_node(reader.as_ref(), &schema, id).await?;

        let filter = NodeFilter::Children {
            parent_id: id.to_string(),
        };
        Ok(reader.count_nodes(&schema, &filter).await?)
    }

    /// Node plus all descendants
    pub async fn subtree_size(&self, kind: TreeKind, id: &str) -> Result<u64, TreeError> {
        Ok(self.count_descendants(kind, id).await? + 1)
    }

    /// Deepest live depth; 0 for a lone root and for an empty tree
    pub async fn tree_height(&self, kind: TreeKind) -> Result<u32, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        Ok(reader.max_depth(&schema).await?.unwrap_or(0))
    }

    /// Number of live nodes at exactly `depth`
    pub async fn level_width(&self, kind: TreeKind, depth: u32) -> Result<u64, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        Ok(reader
            .count_nodes(&schema, &NodeFilter::AtDepth(depth))
            .await?)
    }
}
