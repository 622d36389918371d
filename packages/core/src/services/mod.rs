//! Business Services
//!
//! This module contains the nested-set engine:
//!
//! - `NestedSetEngine` - Create, move, delete and reorder nodes
//! - Traversal queries - Descendants, ancestors, paths, siblings, counts
//! - Integrity - Rebuild from parent links, validation, statistics
//! - `EngineConfig` - Paging limits, overridable from the environment
//!
//! The engine coordinates between the store layer and entity repositories:
//! repositories own their entity columns, the engine owns the positional
//! ones and keeps them consistent.

pub mod config;
pub mod error;
pub mod nested_set_engine;
mod tree_integrity;
mod tree_queries;

pub use config::EngineConfig;
pub use error::TreeError;
pub use nested_set_engine::NestedSetEngine;
