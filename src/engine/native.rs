//! Interface between the connection layer and a native in-process engine.
//!
//! The lifecycle code only ever talks to these traits; the DuckDB binding in
//! `duckdb_driver` is one implementation.

use duckdb::arrow::datatypes::SchemaRef;
use duckdb::arrow::record_batch::RecordBatch;
use serde::Serialize;

use crate::error::EngineError;
use crate::location::StorageLocation;

/// Startup flags handed to the engine untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineOptions {
    /// Suppress startup diagnostics.
    pub silent: bool,
    /// Sequential execution mode. Interpretation is left to the driver.
    pub sequential: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            silent: true,
            sequential: false,
        }
    }
}

/// Materialized result of a query, registered under `id` until closed.
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub id: i32,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub total_rows: usize,
}

/// Starts engine instances.
pub trait EngineDriver: Send + Sync {
    fn start(
        &self,
        location: &StorageLocation,
        options: EngineOptions,
    ) -> Result<Box<dyn NativeDatabase>, EngineError>;
}

/// A running engine instance.
pub trait NativeDatabase: Send + Sync {
    /// Open a new logical connection.
    fn connect(&self) -> Result<Box<dyn NativeConnection>, EngineError>;

    /// Stop the engine. Called once, after every logical connection closed.
    fn shutdown(&self) -> Result<(), EngineError>;
}

/// One logical session inside a running engine.
pub trait NativeConnection: Send {
    /// Execute a statement and return the number of affected rows.
    ///
    /// A statement that answers with rows, including `RETURNING`, still runs
    /// but fails with [`EngineError::ResultSetProduced`].
    fn execute(&mut self, sql: &str) -> Result<usize, EngineError>;

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), EngineError>;

    fn is_auto_commit(&self) -> bool;

    /// Prepare a statement and return its resource id.
    fn prepare(&mut self, sql: &str) -> Result<i32, EngineError>;

    fn execute_prepared(&mut self, id: i32) -> Result<usize, EngineError>;

    /// Release a prepared statement.
    fn release(&mut self, id: i32) -> Result<(), EngineError>;

    /// Run a query and keep its result open until [`NativeConnection::close_resource`].
    fn query(&mut self, sql: &str) -> Result<ResultSet, EngineError>;

    /// Close an open result set.
    fn close_resource(&mut self, id: i32) -> Result<(), EngineError>;

    /// Close the logical connection. Later calls fail with
    /// [`EngineError::ConnectionClosed`].
    fn close(&mut self) -> Result<(), EngineError>;
}
