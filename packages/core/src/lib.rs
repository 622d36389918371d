//! Nested-Set Tree Engine
//!
//! This crate stores tree-shaped entity data (threaded comments, navigation
//! menus, taxonomies, media folders, organization charts) inside flat
//! relational tables using the nested set model, so subtree, ancestor and
//! path queries are single range scans instead of recursive joins.
//!
//! # Architecture
//!
//! - **Typed schemas**: Each entity kind maps to a static table/column descriptor
//! - **Store abstraction**: The engine talks to a transactional `TreeStore`
//! - **libsql/Turso**: Embedded SQLite-compatible backend for production use
//! - **In-memory store**: Transactional fake for tests and tooling
//!
//! # Modules
//!
//! - [`models`] - Data structures (TreeNode, TreeSchema, reports)
//! - [`db`] - Store abstraction, libsql store and in-memory store
//! - [`services`] - The nested-set engine and its configuration

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use services::*;
