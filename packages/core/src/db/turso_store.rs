//! TursoTreeStore - TreeStore Implementation for Turso/libsql Backend
//!
//! Translates the typed store primitives into SQL against one libsql
//! database. Identifiers come from the static [`TreeSchema`]; every value is
//! a bound parameter.
//!
//! # Design Principles
//!
//! 1. **One connection per session**: readers and transactions each take a
//!    fresh `connect_with_timeout()` connection
//! 2. **Immediate write locks**: transactions start with `BEGIN IMMEDIATE`
//!    so two writers never interleave their shift statements
//! 3. **Single-statement shifts**: a [`ShiftPlan`] becomes one `UPDATE` with
//!    `CASE` expressions, which SQLite evaluates against pre-update values
//! 4. **Row Conversion**: `libsql::Row` → `TreeNode` in one place
//!
//! # Examples
//!
//! ```rust,no_run
//! use nestedset_core::db::{DatabaseService, TreeStore, TursoTreeStore};
//! use nestedset_core::models::{TreeKind, TreeSchema};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Arc::new(DatabaseService::new(PathBuf::from("./data/trees.db")).await?);
//!     let store = TursoTreeStore::new(db);
//!     store.ensure_schema(&TreeSchema::for_kind(TreeKind::Comment)).await?;
//!     Ok(())
//! }
//! ```

use crate::db::tree_store::{
    NodeFilter, NodeOrder, NodeQuery, ShiftPlan, TreeReader, TreeStore, TreeTransaction,
};
use crate::db::{DatabaseError, DatabaseService};
use crate::models::{TreeNode, TreeSchema};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Row, Value};
use std::sync::Arc;

/// TreeStore backed by a libsql database
pub struct TursoTreeStore {
    db: Arc<DatabaseService>,
}

impl TursoTreeStore {
    pub fn new(db: Arc<DatabaseService>) -> Self {
        Self { db }
    }

    /// Underlying database service
    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }
}

#[async_trait]
impl TreeStore for TursoTreeStore {
    async fn ensure_schema(&self, schema: &TreeSchema) -> Result<(), DatabaseError> {
        self.db.ensure_tree_table(schema).await
    }

    async fn reader(&self) -> Result<Box<dyn TreeReader>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        Ok(Box::new(TursoSession { conn }))
    }

    async fn begin(&self) -> Result<Box<dyn TreeTransaction>, DatabaseError> {
        let conn = self.db.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to begin transaction", e))?;
        Ok(Box::new(TursoSession { conn }))
    }
}

/// One libsql connection, used either as an autocommit reader or inside an
/// open transaction
struct TursoSession {
    conn: libsql::Connection,
}

impl TursoSession {
    async fn query_nodes(&self, sql: &str, params: Vec<Value>) -> Result<Vec<TreeNode>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to execute node query", e))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            nodes.push(row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn query_scalar(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to execute aggregate query", e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::sql_execution(e.to_string()))?
        {
            Some(row) => row
                .get::<Option<i64>>(0)
                .map_err(|e| DatabaseError::invalid_data(format!("Failed to read aggregate: {}", e))),
            None => Ok(None),
        }
    }

    async fn execute(
        &self,
        context: &str,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<u64, DatabaseError> {
        self.conn
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::from_statement(context, e))
    }
}

#[async_trait]
impl TreeReader for TursoSession {
    async fn fetch_node(
        &self,
        schema: &TreeSchema,
        id: &str,
    ) -> Result<Option<TreeNode>, DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} = ? AND {} IS NULL",
            c.select_list(),
            schema.table,
            c.id,
            c.deleted_at
        );
        let mut nodes = self.query_nodes(&sql, vec![text(id)]).await?;
        Ok(nodes.pop())
    }

    async fn max_right(&self, schema: &TreeSchema) -> Result<u64, DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "SELECT MAX({}) FROM {} WHERE {} IS NULL",
            c.right, schema.table, c.deleted_at
        );
        match self.query_scalar(&sql, Vec::new()).await? {
            Some(value) => to_u64(value, c.right),
            None => Ok(0),
        }
    }

    async fn max_depth(&self, schema: &TreeSchema) -> Result<Option<u32>, DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "SELECT MAX({}) FROM {} WHERE {} IS NULL",
            c.depth, schema.table, c.deleted_at
        );
        self.query_scalar(&sql, Vec::new())
            .await?
            .map(|value| to_u32(value, c.depth))
            .transpose()
    }

    async fn list_nodes(
        &self,
        schema: &TreeSchema,
        query: &NodeQuery,
    ) -> Result<Vec<TreeNode>, DatabaseError> {
        let c = &schema.columns;
        let (predicate, mut params) = filter_clause(schema, &query.filter)?;
        let order = match query.order {
            NodeOrder::Left => format!("{} ASC", c.left),
            NodeOrder::Ordering => format!("{} ASC, {} ASC", c.ordering, c.left),
        };

        let mut sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            c.select_list(),
            schema.table,
            predicate,
            order
        );
        if let Some(page) = query.page {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(Value::Integer(i64::from(page.limit)));
            params.push(Value::Integer(i64::from(page.offset)));
        }

        self.query_nodes(&sql, params).await
    }

    async fn count_nodes(
        &self,
        schema: &TreeSchema,
        filter: &NodeFilter,
    ) -> Result<u64, DatabaseError> {
        let (predicate, params) = filter_clause(schema, filter)?;
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", schema.table, predicate);
        match self.query_scalar(&sql, params).await? {
            Some(count) => to_u64(count, "COUNT(*)"),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl TreeTransaction for TursoSession {
    async fn insert_node(
        &mut self,
        schema: &TreeSchema,
        node: &TreeNode,
    ) -> Result<(), DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            schema.table,
            c.select_list()
        );
        let params = vec![
            text(&node.id),
            optional_text(node.parent_id.as_deref()),
            int(node.left)?,
            int(node.right)?,
            Value::Integer(i64::from(node.depth)),
            Value::Integer(i64::from(node.ordering)),
            Value::Text(format_timestamp(&node.created_at)),
            node.deleted_at
                .as_ref()
                .map_or(Value::Null, |at| Value::Text(format_timestamp(at))),
        ];

        self.execute(&format!("Failed to insert node {}", node.id), &sql, params)
            .await?;
        Ok(())
    }

    async fn shift_bounds(
        &mut self,
        schema: &TreeSchema,
        plan: &ShiftPlan,
    ) -> Result<u64, DatabaseError> {
        if plan.bounds.is_empty() {
            return Ok(0);
        }
        let c = &schema.columns;
        let mut assignments = Vec::new();
        let mut params = Vec::new();

        if let Some(depth) = plan.depth {
            assignments.push(format!(
                "{depth} = CASE WHEN {left} BETWEEN ? AND ? THEN {depth} + ? ELSE {depth} END",
                depth = c.depth,
                left = c.left
            ));
            params.push(int(depth.left_from)?);
            params.push(int(depth.left_to)?);
            params.push(Value::Integer(depth.delta));
        }

        for column in [c.left, c.right] {
            let mut arms = String::new();
            for shift in &plan.bounds {
                arms.push_str(&format!(" WHEN {} THEN {} + ?", range_test(column, shift.to), column));
                params.push(int(shift.from)?);
                if let Some(to) = shift.to {
                    params.push(int(to)?);
                }
                params.push(Value::Integer(shift.delta));
            }
            assignments.push(format!("{col} = CASE{arms} ELSE {col} END", col = column, arms = arms));
        }

        let mut touched = Vec::new();
        for column in [c.left, c.right] {
            for shift in &plan.bounds {
                touched.push(range_test(column, shift.to));
                params.push(int(shift.from)?);
                if let Some(to) = shift.to {
                    params.push(int(to)?);
                }
            }
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} IS NULL AND ({})",
            schema.table,
            assignments.join(", "),
            c.deleted_at,
            touched.join(" OR ")
        );

        self.execute("Failed to shift bounds", &sql, params).await
    }

    async fn set_parent(
        &mut self,
        schema: &TreeSchema,
        id: &str,
        parent_id: Option<&str>,
    ) -> Result<u64, DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ? AND {} IS NULL",
            schema.table, c.parent_id, c.id, c.deleted_at
        );
        self.execute(
            &format!("Failed to update parent of node {}", id),
            &sql,
            vec![optional_text(parent_id), text(id)],
        )
        .await
    }

    async fn set_ordering(
        &mut self,
        schema: &TreeSchema,
        id: &str,
        ordering: u32,
    ) -> Result<u64, DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ? AND {} IS NULL",
            schema.table, c.ordering, c.id, c.deleted_at
        );
        self.execute(
            &format!("Failed to update ordering of node {}", id),
            &sql,
            vec![Value::Integer(i64::from(ordering)), text(id)],
        )
        .await
    }

    async fn mark_deleted(
        &mut self,
        schema: &TreeSchema,
        left: u64,
        right: u64,
        deleted_at: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} IS NULL AND {} >= ? AND {} <= ?",
            schema.table, c.deleted_at, c.deleted_at, c.left, c.right
        );
        self.execute(
            "Failed to tombstone subtree",
            &sql,
            vec![
                Value::Text(format_timestamp(&deleted_at)),
                int(left)?,
                int(right)?,
            ],
        )
        .await
    }

    async fn write_position(
        &mut self,
        schema: &TreeSchema,
        node: &TreeNode,
    ) -> Result<(), DatabaseError> {
        let c = &schema.columns;
        let sql = format!(
            "UPDATE {} SET {} = ?, {} = ?, {} = ?, {} = ? WHERE {} = ? AND {} IS NULL",
            schema.table, c.parent_id, c.left, c.right, c.depth, c.id, c.deleted_at
        );
        self.execute(
            &format!("Failed to write position of node {}", node.id),
            &sql,
            vec![
                optional_text(node.parent_id.as_deref()),
                int(node.left)?,
                int(node.right)?,
                Value::Integer(i64::from(node.depth)),
                text(&node.id),
            ],
        )
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .execute("COMMIT", ())
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to commit transaction", e))?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to roll back transaction", e))?;
        Ok(())
    }
}

/// `column BETWEEN ? AND ?`, or `column >= ?` for an open-ended range
fn range_test(column: &str, to: Option<u64>) -> String {
    match to {
        Some(_) => format!("{} BETWEEN ? AND ?", column),
        None => format!("{} >= ?", column),
    }
}

/// Empty parent ids read back as roots, so they filter as roots too
fn root_predicate(schema: &TreeSchema) -> String {
    format!("({0} IS NULL OR {0} = '')", schema.columns.parent_id)
}

/// WHERE predicate and its parameters for a filter
fn filter_clause(
    schema: &TreeSchema,
    filter: &NodeFilter,
) -> Result<(String, Vec<Value>), DatabaseError> {
    let c = &schema.columns;
    let live = format!("{} IS NULL", c.deleted_at);

    let clause = match filter {
        NodeFilter::All => (live, Vec::new()),
        NodeFilter::Roots => (format!("{} AND {}", live, root_predicate(schema)), Vec::new()),
        NodeFilter::Within { left, right } => (
            format!("{} AND {} > ? AND {} < ?", live, c.left, c.right),
            vec![int(*left)?, int(*right)?],
        ),
        NodeFilter::Enclosing { left, right } => (
            format!("{} AND {} < ? AND {} > ?", live, c.left, c.right),
            vec![int(*left)?, int(*right)?],
        ),
        NodeFilter::Path { left, right } => (
            format!("{} AND {} <= ? AND {} >= ?", live, c.left, c.right),
            vec![int(*left)?, int(*right)?],
        ),
        NodeFilter::Children { parent_id } => (
            format!("{} AND {} = ?", live, c.parent_id),
            vec![text(parent_id)],
        ),
        NodeFilter::Siblings {
            parent_id: Some(parent_id),
            exclude_id,
        } => (
            format!("{} AND {} = ? AND {} <> ?", live, c.parent_id, c.id),
            vec![text(parent_id), text(exclude_id)],
        ),
        NodeFilter::Siblings {
            parent_id: None,
            exclude_id,
        } => (
            format!("{} AND {} AND {} <> ?", live, root_predicate(schema), c.id),
            vec![text(exclude_id)],
        ),
        NodeFilter::AtDepth(depth) => (
            format!("{} AND {} = ?", live, c.depth),
            vec![Value::Integer(i64::from(*depth))],
        ),
        NodeFilter::Deleted => (format!("{} IS NOT NULL", c.deleted_at), Vec::new()),
    };

    Ok(clause)
}

/// Convert libsql::Row to TreeNode
///
/// # Row Format
///
/// Columns in [`TreeColumns::select_list`](crate::models::TreeColumns::select_list) order:
/// id, parent_id, left, right, depth, ordering, created_at, deleted_at
fn row_to_node(row: &Row) -> Result<TreeNode, DatabaseError> {
    let column = |name: &str, e: libsql::Error| {
        DatabaseError::invalid_data(format!("Failed to get {}: {}", name, e))
    };

    let id: String = row.get(0).map_err(|e| column("id", e))?;
    let parent_id: Option<String> = row.get(1).map_err(|e| column("parent_id", e))?;
    let left: i64 = row.get(2).map_err(|e| column("left", e))?;
    let right: i64 = row.get(3).map_err(|e| column("right", e))?;
    let depth: i64 = row.get(4).map_err(|e| column("depth", e))?;
    let ordering: i64 = row.get(5).map_err(|e| column("ordering", e))?;
    let created_at: String = row.get(6).map_err(|e| column("created_at", e))?;
    let deleted_at: Option<String> = row.get(7).map_err(|e| column("deleted_at", e))?;

    Ok(TreeNode {
        left: to_u64(left, "left")?,
        right: to_u64(right, "right")?,
        depth: to_u32(depth, "depth")?,
        ordering: to_u32(ordering, "ordering")?,
        created_at: parse_timestamp(&created_at)?,
        deleted_at: deleted_at.as_deref().map(parse_timestamp).transpose()?,
        parent_id: parent_id.filter(|parent| !parent.is_empty()),
        id,
    })
}

/// Parse timestamp from database - handles both SQLite and RFC3339 formats
///
/// SQLite CURRENT_TIMESTAMP returns: "YYYY-MM-DD HH:MM:SS"
/// The engine writes RFC3339 with microseconds: "YYYY-MM-DDTHH:MM:SS.ffffffZ"
pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    Err(DatabaseError::invalid_data(format!(
        "Unable to parse timestamp '{}' as SQLite or RFC3339 format",
        s
    )))
}

pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

fn int(value: u64) -> Result<Value, DatabaseError> {
    i64::try_from(value)
        .map(Value::Integer)
        .map_err(|_| DatabaseError::invalid_data(format!("Bound {} exceeds INTEGER range", value)))
}

fn to_u64(value: i64, column: &str) -> Result<u64, DatabaseError> {
    u64::try_from(value)
        .map_err(|_| DatabaseError::invalid_data(format!("Negative value {} in {}", value, column)))
}

fn to_u32(value: i64, column: &str) -> Result<u32, DatabaseError> {
    u32::try_from(value).map_err(|_| {
        DatabaseError::invalid_data(format!("Value {} out of range in {}", value, column))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tree_store::BoundShift;
    use crate::models::TreeKind;

    #[test]
    fn test_parse_timestamp_accepts_both_formats() {
        let sqlite = parse_timestamp("2025-01-03 10:20:30").unwrap();
        let rfc = parse_timestamp("2025-01-03T10:20:30.000000Z").unwrap();
        assert_eq!(sqlite, rfc);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_format_timestamp_round_trips() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(&now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }

    #[test]
    fn test_root_siblings_match_null_and_empty_parent() {
        let schema = TreeSchema::for_kind(TreeKind::Taxonomy);
        let (sql, params) = filter_clause(
            &schema,
            &NodeFilter::Siblings {
                parent_id: None,
                exclude_id: "a".to_string(),
            },
        )
        .unwrap();
        assert_eq!(
            sql,
            "deleted_at IS NULL AND (parent_id IS NULL OR parent_id = '') AND id <> ?"
        );
        assert_eq!(params.len(), 1);

        let (sql, params) = filter_clause(&schema, &NodeFilter::Roots).unwrap();
        assert_eq!(sql, "deleted_at IS NULL AND (parent_id IS NULL OR parent_id = '')");
        assert!(params.is_empty());
    }

    #[test]
    fn test_child_siblings_compare_by_value() {
        let schema = TreeSchema::for_kind(TreeKind::Taxonomy);
        let (sql, params) = filter_clause(
            &schema,
            &NodeFilter::Siblings {
                parent_id: Some("p".to_string()),
                exclude_id: "a".to_string(),
            },
        )
        .unwrap();
        assert_eq!(sql, "deleted_at IS NULL AND parent_id = ? AND id <> ?");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_range_test_open_and_closed() {
        assert_eq!(range_test("record_left", Some(4)), "record_left BETWEEN ? AND ?");
        assert_eq!(range_test("record_left", None), "record_left >= ?");
        let shift = BoundShift {
            from: 1,
            to: None,
            delta: 2,
        };
        assert!(shift.covers(100));
    }
}
