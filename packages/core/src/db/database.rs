//! Database Connection Management
//!
//! This module provides the libsql connection and table bootstrap used by
//! [`TursoTreeStore`](crate::db::TursoTreeStore).
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **WAL mode**: Write-Ahead Logging so readers don't block the writer
//! - **Busy timeout**: Concurrent writers wait up to 5s instead of failing
//! - **Idempotent bootstrap**: `CREATE TABLE/INDEX IF NOT EXISTS` per tree kind
//!
//! # Database Connection Patterns
//!
//! **ALWAYS use `connect_with_timeout()` in async functions**. Nested-set
//! mutations shift large row ranges inside `BEGIN IMMEDIATE` transactions;
//! without the busy timeout a second writer fails immediately with
//! `SQLITE_BUSY` instead of queueing behind the first.
//!
//! ```no_run
//! # use nestedset_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/trees.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::db::error::DatabaseError;
use crate::models::TreeSchema;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Busy timeout applied to every async connection, in milliseconds
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// Database service for managing the libsql connection and tree tables
#[derive(Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl DatabaseService {
    /// Open (or create) the database at `db_path`
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Enable WAL mode and foreign keys
    ///
    /// Tree tables are created separately through [`ensure_tree_table`]
    /// since each caller decides which kinds it uses.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - A pragma cannot be applied
    ///
    /// [`ensure_tree_table`]: DatabaseService::ensure_tree_table
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize().await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    async fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(())
    }

    /// Get a raw connection
    ///
    /// Only for synchronous setup code; async callers use
    /// [`connect_with_timeout`](DatabaseService::connect_with_timeout).
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout configured
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(&conn, &format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT_MS))
            .await?;

        Ok(conn)
    }

    /// Create the nested-set table for `schema` and its indexes
    ///
    /// Safe to call repeatedly. Entity repositories add their own columns
    /// with their own migrations; the engine only needs the positional
    /// contract.
    pub async fn ensure_tree_table(&self, schema: &TreeSchema) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        let c = &schema.columns;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    {id} TEXT PRIMARY KEY,
                    {parent} TEXT,
                    {left} INTEGER NOT NULL,
                    {right} INTEGER NOT NULL,
                    {depth} INTEGER NOT NULL DEFAULT 0,
                    {ordering} INTEGER NOT NULL DEFAULT 0,
                    {created} TEXT NOT NULL,
                    {deleted} TEXT
                )",
                table = schema.table,
                id = c.id,
                parent = c.parent_id,
                left = c.left,
                right = c.right,
                depth = c.depth,
                ordering = c.ordering,
                created = c.created_at,
                deleted = c.deleted_at,
            ),
            (),
        )
        .await
        .map_err(|e| {
            DatabaseError::initialization_failed(format!(
                "Failed to create table '{}': {}",
                schema.table, e
            ))
        })?;

        // Bounds are not UNIQUE; rows pass through transient duplicates
        // while a shift rewrites them.
        let indexes = [
            ("parent", c.parent_id),
            ("left", c.left),
            ("right", c.right),
            ("depth", c.depth),
            ("deleted", c.deleted_at),
        ];
        for (suffix, column) in indexes {
            let name = format!("idx_{}_{}", schema.table, suffix);
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                    name, schema.table, column
                ),
                (),
            )
            .await
            .map_err(|e| {
                DatabaseError::initialization_failed(format!(
                    "Failed to create index '{}': {}",
                    name, e
                ))
            })?;
        }

        Ok(())
    }
}
