//! DuckDB binding for the native engine traits.
//!
//! One `DuckDbDatabase` owns the root connection opened at startup. Logical
//! connections are clones of it, so they all share the same database
//! instance and catalog.

use std::collections::HashMap;
use std::sync::Mutex;

use duckdb::arrow::datatypes::{DataType, SchemaRef};
use duckdb::arrow::record_batch::RecordBatch;
use duckdb::{Config, Connection, Statement};
use tracing::{debug, info, instrument, warn};

use crate::config::EmbeddedConfig;
use crate::engine::native::{
    EngineDriver, EngineOptions, NativeConnection, NativeDatabase, ResultSet,
};
use crate::error::EngineError;
use crate::location::StorageLocation;

pub const DEFAULT_DATABASE_FILE: &str = "swanlake.duckdb";

/// Starts DuckDB databases in memory or inside a directory.
#[derive(Debug, Clone)]
pub struct DuckDbDriver {
    database_file: String,
}

impl Default for DuckDbDriver {
    fn default() -> Self {
        Self {
            database_file: DEFAULT_DATABASE_FILE.to_string(),
        }
    }
}

impl DuckDbDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &EmbeddedConfig) -> Self {
        Self {
            database_file: config.database_file.clone(),
        }
    }

    fn engine_config(options: EngineOptions) -> Result<Config, EngineError> {
        let config = Config::default();
        if options.sequential {
            return Ok(config.threads(1)?);
        }
        Ok(config)
    }
}

impl EngineDriver for DuckDbDriver {
    #[instrument(skip(self), fields(location = %location))]
    fn start(
        &self,
        location: &StorageLocation,
        options: EngineOptions,
    ) -> Result<Box<dyn NativeDatabase>, EngineError> {
        let config = Self::engine_config(options)?;
        let root = match location {
            StorageLocation::InMemory => Connection::open_in_memory_with_flags(config)?,
            StorageLocation::Directory(dir) => {
                std::fs::create_dir_all(dir)?;
                Connection::open_with_flags(dir.join(&self.database_file), config)?
            }
        };

        if options.silent {
            debug!(sequential = options.sequential, "DuckDB engine started");
        } else {
            info!(
                sequential = options.sequential,
                database_file = %self.database_file,
                "DuckDB engine started"
            );
        }

        Ok(Box::new(DuckDbDatabase {
            root: Mutex::new(Some(root)),
        }))
    }
}

/// A running DuckDB database.
pub struct DuckDbDatabase {
    root: Mutex<Option<Connection>>,
}

impl NativeDatabase for DuckDbDatabase {
    fn connect(&self) -> Result<Box<dyn NativeConnection>, EngineError> {
        let guard = self
            .root
            .lock()
            .map_err(|_| EngineError::Internal("root connection mutex poisoned".to_string()))?;
        let root = guard
            .as_ref()
            .ok_or_else(|| EngineError::Internal("the DuckDB engine is shut down".to_string()))?;
        let conn = root.try_clone()?;
        debug!("opened DuckDB logical connection");
        Ok(Box::new(DuckDbConnection::new(conn)))
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let root = self
            .root
            .lock()
            .map_err(|_| EngineError::Internal("root connection mutex poisoned".to_string()))?
            .take();
        match root {
            Some(conn) => {
                conn.close().map_err(|(_, err)| EngineError::DuckDb(err))?;
                info!("DuckDB engine shut down");
                Ok(())
            }
            None => Err(EngineError::Internal(
                "the DuckDB engine is not running".to_string(),
            )),
        }
    }
}

/// Logical DuckDB connection with its prepared statements and open results.
///
/// Auto-commit off is emulated with an explicit transaction. The client may
/// end that transaction itself with `COMMIT` or `ROLLBACK`; ending it again
/// when auto-commit is switched back on or the connection closes is then a
/// no-op.
pub struct DuckDbConnection {
    conn: Option<Connection>,
    auto_commit: bool,
    next_resource_id: i32,
    prepared: HashMap<i32, String>,
    open_results: HashMap<i32, usize>,
}

impl DuckDbConnection {
    fn new(conn: Connection) -> Self {
        Self {
            conn: Some(conn),
            auto_commit: true,
            next_resource_id: 1,
            prepared: HashMap::new(),
            open_results: HashMap::new(),
        }
    }

    fn conn(&self) -> Result<&Connection, EngineError> {
        self.conn.as_ref().ok_or(EngineError::ConnectionClosed)
    }

    fn check_sql(sql: &str) -> Result<(), EngineError> {
        if sql.contains('\0') {
            return Err(EngineError::InvalidStatement(
                "SQL contains null bytes".to_string(),
            ));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> Result<i32, EngineError> {
        let id = self.next_resource_id;
        self.next_resource_id = id
            .checked_add(1)
            .ok_or_else(|| EngineError::Internal("resource ids exhausted".to_string()))?;
        Ok(id)
    }

    /// Run `COMMIT` or `ROLLBACK`. Returns false when no transaction was
    /// open, which DuckDB reports as an error.
    fn end_transaction(conn: &Connection, sql: &str) -> Result<bool, EngineError> {
        match conn.execute_batch(sql) {
            Ok(()) => Ok(true),
            Err(err) if is_no_transaction_error(&err) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// DuckDB reports a missing transaction only through the message. The failed
/// statement runs in its own auto-commit transaction, so nothing is lost.
fn is_no_transaction_error(err: &duckdb::Error) -> bool {
    err.to_string().contains("no transaction is active")
}

/// DuckDB answers statements without a result set with one status column:
/// `Count` for row-changing statements, `Success` for everything else.
fn is_status_schema(schema: &SchemaRef) -> bool {
    match schema.fields().as_ref() {
        [field] => matches!(
            (field.name().as_str(), field.data_type()),
            ("Count", DataType::Int64) | ("Success", DataType::Boolean)
        ),
        _ => false,
    }
}

/// Execute a prepared statement and return the rows it changed.
fn run_update(stmt: &mut Statement<'_>) -> Result<usize, EngineError> {
    let changed = stmt.execute([])?;
    let schema = stmt.schema();
    if !is_status_schema(&schema) {
        return Err(EngineError::ResultSetProduced {
            columns: schema.fields().len(),
        });
    }
    Ok(changed)
}

impl NativeConnection for DuckDbConnection {
    fn execute(&mut self, sql: &str) -> Result<usize, EngineError> {
        Self::check_sql(sql)?;
        let mut stmt = self.conn()?.prepare(sql)?;
        let affected = run_update(&mut stmt)?;
        debug!(affected, "executed statement");
        Ok(affected)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), EngineError> {
        let conn = self.conn()?;
        if enabled == self.auto_commit {
            return Ok(());
        }
        if enabled {
            if !Self::end_transaction(conn, "COMMIT")? {
                debug!("transaction already ended by the client");
            }
        } else {
            conn.execute_batch("BEGIN TRANSACTION")?;
        }
        self.auto_commit = enabled;
        debug!(auto_commit = enabled, "changed auto-commit mode");
        Ok(())
    }

    fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    fn prepare(&mut self, sql: &str) -> Result<i32, EngineError> {
        Self::check_sql(sql)?;
        self.conn()?.prepare_cached(sql)?;
        let id = self.allocate_id()?;
        self.prepared.insert(id, sql.to_string());
        debug!(id, "prepared statement");
        Ok(id)
    }

    fn execute_prepared(&mut self, id: i32) -> Result<usize, EngineError> {
        let sql = self
            .prepared
            .get(&id)
            .ok_or(EngineError::UnknownPreparedStatement(id))?;
        let mut stmt = self.conn()?.prepare_cached(sql)?;
        run_update(&mut stmt)
    }

    fn release(&mut self, id: i32) -> Result<(), EngineError> {
        self.conn()?;
        self.prepared
            .remove(&id)
            .ok_or(EngineError::UnknownPreparedStatement(id))?;
        debug!(id, "released prepared statement");
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<ResultSet, EngineError> {
        Self::check_sql(sql)?;
        let (schema, batches) = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(sql)?;
            let arrow = stmt.query_arrow([])?;
            let schema = arrow.get_schema();
            let batches: Vec<RecordBatch> = arrow.collect();
            (schema, batches)
        };
        let total_rows = batches.iter().map(|b| b.num_rows()).sum();
        let id = self.allocate_id()?;
        self.open_results.insert(id, total_rows);
        debug!(id, total_rows, "opened result set");
        Ok(ResultSet {
            id,
            schema,
            batches,
            total_rows,
        })
    }

    fn close_resource(&mut self, id: i32) -> Result<(), EngineError> {
        self.conn()?;
        self.open_results
            .remove(&id)
            .ok_or(EngineError::UnknownResultSet(id))?;
        debug!(id, "closed result set");
        Ok(())
    }

    fn close(&mut self) -> Result<(), EngineError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        if !self.auto_commit {
            if let Err(err) = Self::end_transaction(&conn, "ROLLBACK") {
                warn!(error = %err, "failed to roll back open transaction on close");
            }
        }
        self.prepared.clear();
        self.open_results.clear();
        conn.close().map_err(|(_, err)| EngineError::DuckDb(err))?;
        debug!("closed DuckDB logical connection");
        Ok(())
    }
}
