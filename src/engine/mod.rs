//! Engine module - the embedded engine and the handles onto it.
//!
//! This module provides:
//! - `native`: traits the connection layer programs against
//! - `DuckDbDriver`: DuckDB implementation of those traits
//! - `EngineRegistry`: the single running engine and its reference count

pub mod duckdb_driver;
pub mod native;
pub mod registry;

pub use duckdb_driver::{DuckDbConnection, DuckDbDatabase, DuckDbDriver};
pub use native::{EngineDriver, EngineOptions, NativeConnection, NativeDatabase, ResultSet};
pub use registry::{EngineInstance, EngineRegistry, EngineRegistrySnapshot};
