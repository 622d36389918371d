//! Nested-Set Engine - Integrity
//!
//! Repair and diagnostics for one tree table:
//!
//! - **Rebuild**: recompute every live node's bounds and depth from the
//!   `parent_id` adjacency, in one transaction
//! - **Validate**: read-only structural checks, returned as findings
//! - **Statistics**: aggregate shape (height, level widths, leaves)
//!
//! # Rebuild Rules
//!
//! - Roots and siblings are visited in `(created_at, left, id)` order, so
//!   the previous layout wins wherever it is still meaningful
//! - A node whose parent is absent, soft-deleted or itself is detached and
//!   becomes a root
//! - Nodes unreachable from any root sit on a parent cycle; the earliest of
//!   them is detached and the walk continues from it
//! - Only rows whose position or parent actually changed are written

use crate::db::{NodeFilter, NodeQuery};
use crate::models::{
    IntegrityFinding, RebuildReport, TreeKind, TreeNode, TreeStatistics, ValidationReport,
};
use crate::services::{NestedSetEngine, TreeError};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

impl NestedSetEngine {
    /// Recompute the whole encoding from `parent_id` links
    ///
    /// # Errors
    ///
    /// Storage and conflict errors only; structural damage is repaired, not
    /// reported. On error nothing is written.
    pub async fn rebuild_tree(&self, kind: TreeKind) -> Result<RebuildReport, TreeError> {
        let schema = self.schema(kind)?;
        let mut tx = self.store().begin().await?;

        let result = async {
            let nodes = tx
                .list_nodes(&schema, &NodeQuery::new(NodeFilter::All))
                .await?;
            let plan = plan_rebuild(&nodes);

            let mut rows_rewritten = 0;
            for (before, after) in nodes.iter().zip(plan.nodes.iter()) {
                if position_changed(before, after) {
                    tx.write_position(&schema, after).await?;
                    rows_rewritten += 1;
                }
            }

            Ok::<_, TreeError>(RebuildReport {
                kind,
                nodes_positioned: nodes.len() as u64,
                roots: plan.roots,
                rows_rewritten,
                detached: plan.detached,
            })
        }
        .await;

        let report = self.finish(tx, result).await?;

        if report.detached.is_empty() {
            tracing::info!(
                "Rebuilt {} tree: {} nodes, {} rows rewritten",
                kind,
                report.nodes_positioned,
                report.rows_rewritten
            );
        } else {
            tracing::warn!(
                "Rebuilt {} tree: {} nodes, {} rows rewritten, detached {:?}",
                kind,
                report.nodes_positioned,
                report.rows_rewritten,
                report.detached
            );
        }
        Ok(report)
    }

    /// Read-only structural check over every live node
    pub async fn validate_tree(&self, kind: TreeKind) -> Result<ValidationReport, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let nodes = reader
            .list_nodes(&schema, &NodeQuery::new(NodeFilter::All))
            .await?;

        let findings = find_integrity_issues(&nodes);
        for finding in &findings {
            tracing::debug!("{} tree: {}", kind, finding);
        }

        Ok(ValidationReport {
            kind,
            nodes_checked: nodes.len() as u64,
            findings,
        })
    }

    pub async fn get_tree_statistics(&self, kind: TreeKind) -> Result<TreeStatistics, TreeError> {
        let schema = self.schema(kind)?;
        let reader = self.store().reader().await?;
        let nodes = reader
            .list_nodes(&schema, &NodeQuery::new(NodeFilter::All))
            .await?;
        let deleted = reader.count_nodes(&schema, &NodeFilter::Deleted).await?;

        Ok(compute_statistics(kind, &nodes, deleted))
    }
}

/// Repositioned copy of every input node, in input order
pub(crate) struct RebuildPlan {
    pub nodes: Vec<TreeNode>,
    pub roots: u64,
    pub detached: Vec<String>,
}

fn position_changed(before: &TreeNode, after: &TreeNode) -> bool {
    before.left != after.left
        || before.right != after.right
        || before.depth != after.depth
        || before.parent_id != after.parent_id
}

pub(crate) fn plan_rebuild(nodes: &[TreeNode]) -> RebuildPlan {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();
    let sort_key = |&i: &usize| (nodes[i].created_at, nodes[i].left, nodes[i].id.clone());

    let mut output: Vec<TreeNode> = nodes.to_vec();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut roots = Vec::new();
    let mut detached = Vec::new();

    for (i, node) in nodes.iter().enumerate() {
        match node.parent_id.as_deref() {
            None => roots.push(i),
            Some(parent_id) => match index.get(parent_id) {
                Some(&p) if p != i => children[p].push(i),
                _ => {
                    detached.push(i);
                    roots.push(i);
                }
            },
        }
    }

    roots.sort_by_key(sort_key);
    for list in &mut children {
        list.sort_by_key(sort_key);
    }

    let mut walk = Walk {
        children: children.as_slice(),
        visited: vec![false; nodes.len()],
        counter: 1,
        output: output.as_mut_slice(),
    };
    for &root in &roots {
        walk.visit(root);
    }

    // Whatever is left hangs off a parent cycle
    let mut root_count = roots.len() as u64;
    loop {
        let pending = (0..nodes.len())
            .filter(|&i| !walk.visited[i])
            .min_by_key(sort_key);
        let Some(start) = pending else { break };
        detached.push(start);
        root_count += 1;
        walk.visit(start);
    }

    for &i in &detached {
        output[i].parent_id = None;
    }

    RebuildPlan {
        nodes: output,
        roots: root_count,
        detached: detached.into_iter().map(|i| nodes[i].id.clone()).collect(),
    }
}

struct Walk<'a> {
    children: &'a [Vec<usize>],
    visited: Vec<bool>,
    counter: u64,
    output: &'a mut [TreeNode],
}

impl Walk<'_> {
    /// Iterative preorder from `start` as a depth-0 root
    fn visit(&mut self, start: usize) {
        let mut stack = vec![(start, 0u32, false)];

        while let Some((i, depth, closing)) = stack.pop() {
            if closing {
                self.output[i].right = self.counter;
                self.counter += 1;
                continue;
            }
            if self.visited[i] {
                continue;
            }
            self.visited[i] = true;
            self.output[i].left = self.counter;
            self.output[i].depth = depth;
            self.counter += 1;

            stack.push((i, depth, true));
            for &child in self.children[i].iter().rev() {
                if !self.visited[child] {
                    stack.push((child, depth + 1, false));
                }
            }
        }
    }
}

pub(crate) fn find_integrity_issues(nodes: &[TreeNode]) -> Vec<IntegrityFinding> {
    let mut findings = Vec::new();

    for node in nodes {
        if node.left >= node.right {
            findings.push(IntegrityFinding::InvalidBounds {
                id: node.id.clone(),
                left: node.left,
                right: node.right,
            });
        }
    }

    // Overlap sweep: intervals sorted by left (widest first); the stack
    // holds the currently open intervals, most recent on top. Flagged nodes
    // are pushed as well so a chain of overlaps is reported link by link.
    // Only the top is compared, so an overlap hidden under it can go unlisted.
    let mut sorted: Vec<&TreeNode> = nodes.iter().filter(|n| n.left < n.right).collect();
    sorted.sort_by_key(|n| (n.left, Reverse(n.right)));
    let mut open: Vec<&TreeNode> = Vec::new();
    for node in sorted {
        while open.last().is_some_and(|top| top.right < node.left) {
            open.pop();
        }
        if let Some(top) = open.last().filter(|top| !top.contains(node)) {
            findings.push(IntegrityFinding::OverlappingIntervals {
                first_id: top.id.clone(),
                second_id: node.id.clone(),
            });
        }
        open.push(node);
    }

    let by_id: HashMap<&str, &TreeNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    for node in nodes {
        match node.parent_id.as_deref() {
            None if node.depth != 0 => findings.push(IntegrityFinding::DepthMismatch {
                id: node.id.clone(),
                depth: node.depth,
                expected: 0,
            }),
            None => {}
            Some(parent_id) => match by_id.get(parent_id) {
                None => findings.push(IntegrityFinding::DanglingParent {
                    id: node.id.clone(),
                    parent_id: parent_id.to_string(),
                }),
                Some(parent) => {
                    if node.depth != parent.depth + 1 {
                        findings.push(IntegrityFinding::DepthMismatch {
                            id: node.id.clone(),
                            depth: node.depth,
                            expected: parent.depth + 1,
                        });
                    }
                    if !parent.contains(node) {
                        findings.push(IntegrityFinding::ParentNotEnclosing {
                            id: node.id.clone(),
                            parent_id: parent_id.to_string(),
                        });
                    }
                }
            },
        }
    }

    findings
}

pub(crate) fn compute_statistics(kind: TreeKind, nodes: &[TreeNode], deleted: u64) -> TreeStatistics {
    let mut levels: BTreeMap<u32, u64> = BTreeMap::new();
    for node in nodes {
        *levels.entry(node.depth).or_insert(0) += 1;
    }

    // BTreeMap iterates shallowest first; keep the first maximum
    let (widest_level, max_level_width) = levels
        .iter()
        .fold((None, 0), |(level, width), (&depth, &count)| {
            if count > width {
                (Some(depth), count)
            } else {
                (level, width)
            }
        });

    let total_nodes = nodes.len() as u64;
    let depth_sum: u64 = nodes.iter().map(|n| u64::from(n.depth)).sum();

    TreeStatistics {
        kind,
        total_nodes,
        tree_height: nodes.iter().map(|n| n.depth).max().unwrap_or(0),
        root_count: nodes.iter().filter(|n| n.is_root()).count() as u64,
        leaf_count: nodes.iter().filter(|n| n.is_leaf()).count() as u64,
        average_depth: if total_nodes == 0 {
            0.0
        } else {
            depth_sum as f64 / total_nodes as f64
        },
        max_level_width,
        widest_level,
        deleted_nodes: deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn node(id: &str, parent: Option<&str>, left: u64, right: u64, depth: u32) -> TreeNode {
        TreeNode {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            left,
            right,
            depth,
            ordering: 0,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            deleted_at: None,
        }
    }

    fn bounds(plan: &RebuildPlan, id: &str) -> (u64, u64, u32) {
        let node = plan.nodes.iter().find(|n| n.id == id).unwrap();
        (node.left, node.right, node.depth)
    }

    #[test]
    fn test_rebuild_keeps_sibling_order_from_old_bounds() {
        // All bounds zeroed except the left hints that order the siblings
        let nodes = vec![
            node("b", Some("r"), 5, 0, 9),
            node("r", None, 1, 0, 9),
            node("a", Some("r"), 2, 0, 9),
            node("a1", Some("a"), 3, 0, 9),
        ];

        let plan = plan_rebuild(&nodes);
        assert_eq!(bounds(&plan, "r"), (1, 8, 0));
        assert_eq!(bounds(&plan, "a"), (2, 5, 1));
        assert_eq!(bounds(&plan, "a1"), (3, 4, 2));
        assert_eq!(bounds(&plan, "b"), (6, 7, 1));
        assert_eq!(plan.roots, 1);
        assert!(plan.detached.is_empty());
    }

    #[test]
    fn test_rebuild_orders_siblings_by_creation_first() {
        let mut late = node("late", Some("r"), 2, 3, 1);
        late.created_at += Duration::seconds(5);
        let nodes = vec![node("r", None, 1, 6, 0), late, node("early", Some("r"), 4, 5, 1)];

        let plan = plan_rebuild(&nodes);
        assert_eq!(bounds(&plan, "early"), (2, 3, 1));
        assert_eq!(bounds(&plan, "late"), (4, 5, 1));
    }

    #[test]
    fn test_rebuild_detaches_orphans_and_cycles() {
        let nodes = vec![
            node("r", None, 1, 2, 0),
            node("orphan", Some("gone"), 3, 4, 1),
            node("x", Some("y"), 5, 6, 1),
            node("y", Some("x"), 7, 8, 1),
        ];

        let plan = plan_rebuild(&nodes);
        assert_eq!(plan.roots, 3);
        assert_eq!(plan.detached, vec!["orphan".to_string(), "x".to_string()]);

        let x = plan.nodes.iter().find(|n| n.id == "x").unwrap();
        let y = plan.nodes.iter().find(|n| n.id == "y").unwrap();
        assert_eq!(x.parent_id, None);
        assert_eq!(y.parent_id.as_deref(), Some("x"));
        assert!(x.contains(y));
        assert!(find_integrity_issues(&plan.nodes).is_empty());
    }

    #[test]
    fn test_valid_tree_has_no_findings() {
        let nodes = vec![
            node("r", None, 1, 8, 0),
            node("a", Some("r"), 2, 5, 1),
            node("a1", Some("a"), 3, 4, 2),
            node("b", Some("r"), 6, 7, 1),
        ];
        assert!(find_integrity_issues(&nodes).is_empty());
    }

    #[test]
    fn test_findings_for_damaged_rows() {
        let nodes = vec![
            node("r", None, 1, 8, 0),
            node("a", Some("r"), 2, 6, 1),
            node("b", Some("r"), 5, 7, 2),
            node("bad", Some("r"), 9, 9, 1),
            node("lost", Some("ghost"), 10, 11, 1),
        ];

        let findings = find_integrity_issues(&nodes);
        assert!(findings.contains(&IntegrityFinding::InvalidBounds {
            id: "bad".into(),
            left: 9,
            right: 9,
        }));
        assert!(findings.contains(&IntegrityFinding::OverlappingIntervals {
            first_id: "a".into(),
            second_id: "b".into(),
        }));
        assert!(findings.contains(&IntegrityFinding::DepthMismatch {
            id: "b".into(),
            depth: 2,
            expected: 1,
        }));
        assert!(findings.contains(&IntegrityFinding::ParentNotEnclosing {
            id: "bad".into(),
            parent_id: "r".into(),
        }));
        assert!(findings.contains(&IntegrityFinding::DanglingParent {
            id: "lost".into(),
            parent_id: "ghost".into(),
        }));
    }

    #[test]
    fn test_overlap_chain_is_reported_per_link() {
        let nodes = vec![
            node("a", None, 1, 6, 0),
            node("b", None, 4, 9, 0),
            node("c", None, 8, 12, 0),
        ];

        let findings = find_integrity_issues(&nodes);
        assert_eq!(
            findings,
            vec![
                IntegrityFinding::OverlappingIntervals {
                    first_id: "a".into(),
                    second_id: "b".into(),
                },
                IntegrityFinding::OverlappingIntervals {
                    first_id: "b".into(),
                    second_id: "c".into(),
                },
            ]
        );
    }

    #[test]
    fn test_statistics_shape() {
        let nodes = vec![
            node("r", None, 1, 8, 0),
            node("a", Some("r"), 2, 5, 1),
            node("a1", Some("a"), 3, 4, 2),
            node("b", Some("r"), 6, 7, 1),
            node("s", None, 9, 10, 0),
        ];

        let stats = compute_statistics(TreeKind::Taxonomy, &nodes, 3);
        assert_eq!(stats.total_nodes, 5);
        assert_eq!(stats.tree_height, 2);
        assert_eq!(stats.root_count, 2);
        assert_eq!(stats.leaf_count, 3);
        assert_eq!(stats.max_level_width, 2);
        assert_eq!(stats.widest_level, Some(0));
        assert_eq!(stats.deleted_nodes, 3);
        assert!((stats.average_depth - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_statistics_of_empty_tree() {
        let stats = compute_statistics(TreeKind::Comment, &[], 0);
        assert_eq!(stats.tree_height, 0);
        assert_eq!(stats.widest_level, None);
        assert_eq!(stats.average_depth, 0.0);
    }
}

#[cfg(test)]
#[path = "tree_integrity_test.rs"]
mod tree_integrity_test;
