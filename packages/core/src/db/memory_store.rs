//! MemoryTreeStore - In-Memory TreeStore Implementation
//!
//! A transactional fake used by the engine's unit tests, benchmarks and
//! tooling dry runs. It mirrors the libsql store's semantics:
//!
//! - one writer at a time (an async mutex held for the life of a transaction,
//!   like `BEGIN IMMEDIATE`)
//! - transactions work on a private copy of the tables and publish it on
//!   commit; rollback simply discards the copy
//! - readers see the last committed state
//! - querying a table that was never created through `ensure_schema` fails
//!   the same way a missing SQL table would

use crate::db::tree_store::{
    NodeFilter, NodeOrder, NodeQuery, ShiftPlan, TreeReader, TreeStore, TreeTransaction,
};
use crate::db::DatabaseError;
use crate::models::{TreeNode, TreeSchema};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

type Tables = HashMap<&'static str, Vec<TreeNode>>;

/// In-memory TreeStore with copy-on-begin transactions
#[derive(Clone, Default)]
pub struct MemoryTreeStore {
    committed: Arc<RwLock<Tables>>,
    writer: Arc<Mutex<()>>,
    fail_next_shift: Arc<AtomicBool>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `shift_bounds` call fail with a storage error
    ///
    /// Used to prove that a failure halfway through a mutation leaves the
    /// committed tree untouched.
    pub fn inject_shift_failure(&self) {
        self.fail_next_shift.store(true, Ordering::SeqCst);
    }

    /// All committed rows of a table, tombstones included, sorted by `left`
    pub async fn snapshot(&self, schema: &TreeSchema) -> Vec<TreeNode> {
        let tables = self.committed.read().await;
        let mut rows = tables.get(schema.table).cloned().unwrap_or_default();
        rows.sort_by(|a, b| a.left.cmp(&b.left).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    /// Overwrite (or add) a committed row without any tree maintenance
    ///
    /// Lets repair tests start from a deliberately corrupted table.
    pub async fn force_node(&self, schema: &TreeSchema, node: TreeNode) {
        let _writer = self.writer.lock().await;
        let mut tables = self.committed.write().await;
        let rows = tables.entry(schema.table).or_default();
        match rows.iter_mut().find(|row| row.id == node.id) {
            Some(row) => *row = node,
            None => rows.push(node),
        }
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn ensure_schema(&self, schema: &TreeSchema) -> Result<(), DatabaseError> {
        let _writer = self.writer.lock().await;
        self.committed
            .write()
            .await
            .entry(schema.table)
            .or_default();
        Ok(())
    }

    async fn reader(&self) -> Result<Box<dyn TreeReader>, DatabaseError> {
        Ok(Box::new(MemoryReader {
            committed: Arc::clone(&self.committed),
        }))
    }

    async fn begin(&self) -> Result<Box<dyn TreeTransaction>, DatabaseError> {
        let guard = Arc::clone(&self.writer).lock_owned().await;
        let working = self.committed.read().await.clone();
        Ok(Box::new(MemoryTransaction {
            committed: Arc::clone(&self.committed),
            working,
            fail_next_shift: Arc::clone(&self.fail_next_shift),
            _guard: guard,
        }))
    }
}

struct MemoryReader {
    committed: Arc<RwLock<Tables>>,
}

struct MemoryTransaction {
    committed: Arc<RwLock<Tables>>,
    working: Tables,
    fail_next_shift: Arc<AtomicBool>,
    _guard: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    fn rows_mut(&mut self, schema: &TreeSchema) -> Result<&mut Vec<TreeNode>, DatabaseError> {
        self.working
            .get_mut(schema.table)
            .ok_or_else(|| missing_table(schema))
    }

    fn live_mut<'a>(
        &'a mut self,
        schema: &TreeSchema,
        id: &str,
    ) -> Result<Option<&'a mut TreeNode>, DatabaseError> {
        Ok(self
            .rows_mut(schema)?
            .iter_mut()
            .find(|row| row.id == id && row.deleted_at.is_none()))
    }
}

fn missing_table(schema: &TreeSchema) -> DatabaseError {
    DatabaseError::sql_execution(format!("no such table: {}", schema.table))
}

fn rows_of<'a>(tables: &'a Tables, schema: &TreeSchema) -> Result<&'a [TreeNode], DatabaseError> {
    tables
        .get(schema.table)
        .map(Vec::as_slice)
        .ok_or_else(|| missing_table(schema))
}

fn fetch(rows: &[TreeNode], id: &str) -> Option<TreeNode> {
    rows.iter()
        .find(|row| row.id == id && row.deleted_at.is_none())
        .cloned()
}

fn max_right(rows: &[TreeNode]) -> u64 {
    rows.iter()
        .filter(|row| row.deleted_at.is_none())
        .map(|row| row.right)
        .max()
        .unwrap_or(0)
}

fn max_depth(rows: &[TreeNode]) -> Option<u32> {
    rows.iter()
        .filter(|row| row.deleted_at.is_none())
        .map(|row| row.depth)
        .max()
}

fn list(rows: &[TreeNode], query: &NodeQuery) -> Vec<TreeNode> {
    let mut matched: Vec<TreeNode> = rows
        .iter()
        .filter(|row| query.filter.matches(row))
        .cloned()
        .collect();

    match query.order {
        NodeOrder::Left => matched.sort_by(|a, b| a.left.cmp(&b.left).then_with(|| a.id.cmp(&b.id))),
        NodeOrder::Ordering => matched.sort_by(|a, b| {
            a.ordering
                .cmp(&b.ordering)
                .then_with(|| a.left.cmp(&b.left))
                .then_with(|| a.id.cmp(&b.id))
        }),
    }

    match query.page {
        Some(page) => matched
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect(),
        None => matched,
    }
}

fn count(rows: &[TreeNode], filter: &NodeFilter) -> u64 {
    rows.iter().filter(|row| filter.matches(row)).count() as u64
}

#[async_trait]
impl TreeReader for MemoryReader {
    async fn fetch_node(
        &self,
        schema: &TreeSchema,
        id: &str,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        let tables = self.committed.read().await;
        Ok(fetch(rows_of(&tables, schema)?, id))
    }

    async fn max_right(&self, schema: &TreeSchema) -> Result<u64, DatabaseError> {
        let tables = self.committed.read().await;
        Ok(max_right(rows_of(&tables, schema)?))
    }

    async fn max_depth(&self, schema: &TreeSchema) -> Result<Option<u32>, DatabaseError> {
        let tables = self.committed.read().await;
        Ok(max_depth(rows_of(&tables, schema)?))
    }

    async fn list_nodes(
        &self,
        schema: &TreeSchema,
        query: &NodeQuery,
    ) -> Result<Vec<TreeNode>, DatabaseError> {
        let tables = self.committed.read().await;
        Ok(list(rows_of(&tables, schema)?, query))
    }

    async fn count_nodes(
        &self,
        schema: &TreeSchema,
        filter: &NodeFilter,
    ) -> Result<u64, DatabaseError> {
        let tables = self.committed.read().await;
        Ok(count(rows_of(&tables, schema)?, filter))
    }
}

#[async_trait]
impl TreeReader for MemoryTransaction {
    async fn fetch_node(
        &self,
        schema: &TreeSchema,
        id: &str,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        Ok(fetch(rows_of(&self.working, schema)?, id))
    }

    async fn max_right(&self, schema: &TreeSchema) -> Result<u64, DatabaseError> {
        Ok(max_right(rows_of(&self.working, schema)?))
    }

    async fn max_depth(&self, schema: &TreeSchema) -> Result<Option<u32>, DatabaseError> {
        Ok(max_depth(rows_of(&self.working, schema)?))
    }

    async fn list_nodes(
        &self,
        schema: &TreeSchema,
        query: &NodeQuery,
    ) -> Result<Vec<TreeNode>, DatabaseError> {
        Ok(list(rows_of(&self.working, schema)?, query))
    }

    async fn count_nodes(
        &self,
        schema: &TreeSchema,
        filter: &NodeFilter,
    ) -> Result<u64, DatabaseError> {
        Ok(count(rows_of(&self.working, schema)?, filter))
    }
}

#[async_trait]
impl TreeTransaction for MemoryTransaction {
    async fn insert_node(
        &mut self,
        schema: &TreeSchema,
        node: &TreeNode,
    ) -> Result<(), DatabaseError> {
        let rows = self.rows_mut(schema)?;
        if rows.iter().any(|row| row.id == node.id) {
            return Err(DatabaseError::conflict(format!(
                "UNIQUE constraint failed: {}.{} ({})",
                schema.table, schema.columns.id, node.id
            )));
        }
        rows.push(node.clone());
        Ok(())
    }

    async fn shift_bounds(
        &mut self,
        schema: &TreeSchema,
        plan: &ShiftPlan,
    ) -> Result<u64, DatabaseError> {
        if self.fail_next_shift.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::sql_execution("injected shift failure"));
        }

        let mut touched = 0;
        for row in self.rows_mut(schema)?.iter_mut() {
            if row.deleted_at.is_some() {
                continue;
            }
            let covered = plan
                .bounds
                .iter()
                .any(|shift| shift.covers(row.left) || shift.covers(row.right));
            if !covered {
                continue;
            }
            // Depth keys off the pre-shift left, so compute it first
            row.depth = plan.map_depth(row.left, row.depth);
            row.left = plan.map_bound(row.left);
            row.right = plan.map_bound(row.right);
            touched += 1;
        }
        Ok(touched)
    }

    async fn set_parent(
        &mut self,
        schema: &TreeSchema,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        Ok(match self.live_mut(schema, id)? {
            Some(row) => {
                row.parent_id = parent_id.map(str::to_string);
                1
            }
            None => 0,
        })
    }

    async fn set_ordering(
        &mut self,
        schema: &TreeSchema,
        id: &str,
        ordering: u32,
    ) -> Result<u64, DatabaseError> {
        Ok(match self.live_mut(schema, id)? {
            Some(row) => {
                row.ordering = ordering;
                1
            }
            None => 0,
        })
    }

    async fn mark_deleted(
        &mut self,
        schema: &TreeSchema,
        left: u64,
        right: u64,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let mut tombstoned = 0;
        for row in self.rows_mut(schema)?.iter_mut() {
            if row.deleted_at.is_none() && row.left >= left && row.right <= right {
                row.deleted_at = Some(deleted_at);
                tombstoned += 1;
            }
        }
        Ok(tombstoned)
    }

    async fn write_position(
        &mut self,
        schema: &TreeSchema,
        node: &TreeNode,
    ) -> Result<(), DatabaseError> {
        if let Some(row) = self.live_mut(schema, &node.id)? {
            row.parent_id = node.parent_id.clone();
            row.left = node.left;
            row.right = node.right;
            row.depth = node.depth;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let this = *self;
        *this.committed.write().await = this.working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TreeKind;

    fn node(id: &str, left: u64, right: u64) -> TreeNode {
        TreeNode {
            id: id.to_string(),
            parent_id: None,
            left,
            right,
            depth: 0,
            ordering: 0,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible_to_readers() {
        let store = MemoryTreeStore::new();
        let schema = TreeSchema::for_kind(TreeKind::Comment);
        store.ensure_schema(&schema).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_node(&schema, &node("a", 1, 2)).await.unwrap();
        assert!(tx.fetch_node(&schema, "a").await.unwrap().is_some());

        let reader = store.reader().await.unwrap();
        assert!(reader.fetch_node(&schema, "a").await.unwrap().is_none());

        tx.commit().await.unwrap();
        assert!(reader.fetch_node(&schema, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_discards_working_copy() {
        let store = MemoryTreeStore::new();
        let schema = TreeSchema::for_kind(TreeKind::Comment);
        store.ensure_schema(&schema).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_node(&schema, &node("a", 1, 2)).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(store.snapshot(&schema).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_conflict() {
        let store = MemoryTreeStore::new();
        let schema = TreeSchema::for_kind(TreeKind::OrgUnit);
        store.ensure_schema(&schema).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.insert_node(&schema, &node("a", 1, 2)).await.unwrap();
        let err = tx.insert_node(&schema, &node("a", 3, 4)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_unknown_table_fails_like_sql() {
        let store = MemoryTreeStore::new();
        let schema = TreeSchema::for_kind(TreeKind::MediaFolder);
        let reader = store.reader().await.unwrap();
        let err = reader.max_right(&schema).await.unwrap_err();
        assert!(err.to_string().contains("no such table: media_folders"));
    }

    #[tokio::test]
    async fn test_shift_skips_tombstones() {
        let store = MemoryTreeStore::new();
        let schema = TreeSchema::for_kind(TreeKind::Comment);
        store.ensure_schema(&schema).await.unwrap();

        let mut tombstone = node("gone", 3, 4);
        tombstone.deleted_at = Some(Utc::now());
        store.force_node(&schema, node("a", 1, 2)).await;
        store.force_node(&schema, tombstone).await;
        store.force_node(&schema, node("b", 5, 6)).await;

        let mut tx = store.begin().await.unwrap();
        let touched = tx
            .shift_bounds(&schema, &ShiftPlan::open_ended(3, -2))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(touched, 1);
        let rows = store.snapshot(&schema).await;
        let gone = rows.iter().find(|row| row.id == "gone").unwrap();
        let b = rows.iter().find(|row| row.id == "b").unwrap();
        assert_eq!((gone.left, gone.right), (3, 4));
        assert_eq!((b.left, b.right), (3, 4));
    }
}
