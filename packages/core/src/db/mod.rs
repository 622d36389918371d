//! Database Layer
//!
//! This module handles all store interactions for the nested-set engine:
//!
//! - The `TreeStore` / `TreeReader` / `TreeTransaction` abstraction
//! - libsql connection management and table bootstrap (`DatabaseService`)
//! - `TursoTreeStore`, the libsql-backed store
//! - `MemoryTreeStore`, an in-memory transactional fake
//!
//! # Architecture
//!
//! The engine never sees SQL. It expresses every mutation as typed
//! primitives (shift plans, range tombstoning, positioned inserts) and lets
//! the store evaluate them inside one transaction, so the same interval
//! arithmetic runs unchanged against libsql and against the in-memory fake.

mod database;
mod error;
mod memory_store;
mod tree_store;
mod turso_store;

pub use database::{DatabaseService, BUSY_TIMEOUT_MS};
pub use error::DatabaseError;
pub use memory_store::MemoryTreeStore;
pub use tree_store::{
    BoundShift, DepthShift, NodeFilter, NodeOrder, NodeQuery, ShiftPlan, TreeReader, TreeStore,
    TreeTransaction,
};
pub use turso_store::TursoTreeStore;
