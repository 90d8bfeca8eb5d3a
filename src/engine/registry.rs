//! Engine handle registry - tracks the running embedded engine.
//!
//! The registry:
//! - Starts the engine on the first attach for a storage location
//! - Counts the logical connections attached to it
//! - Rejects attaches for a different location while an engine runs
//! - Shuts the engine down when the last connection detaches
//!
//! Only one engine may run per registry. Attach and detach are serialized by
//! a single mutex so the reference count can never lose an update.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::EmbeddedConfig;
use crate::engine::duckdb_driver::DuckDbDriver;
use crate::engine::native::{EngineDriver, EngineOptions, NativeDatabase};
use crate::error::RegistryError;
use crate::location::StorageLocation;

/// A running engine shared by every connection attached to its location.
pub struct EngineInstance {
    location: StorageLocation,
    options: EngineOptions,
    started_at: Instant,
    database: Box<dyn NativeDatabase>,
}

impl EngineInstance {
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    /// Flags the engine was started with.
    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn database(&self) -> &dyn NativeDatabase {
        self.database.as_ref()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineRegistrySnapshot {
    pub running_location: Option<StorageLocation>,
    pub ref_count: usize,
    pub uptime_ms: u64,
    pub engines_started: u64,
    pub total_attaches: u64,
}

struct RegistryEntry {
    instance: Arc<EngineInstance>,
    ref_count: usize,
}

#[derive(Default)]
struct RegistryInner {
    // At most one engine runs at a time, so the table holds zero or one entry.
    running: Option<RegistryEntry>,
    engines_started: u64,
    total_attaches: u64,
}

pub struct EngineRegistry {
    driver: Arc<dyn EngineDriver>,
    inner: Mutex<RegistryInner>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<EngineRegistry>> = OnceLock::new();

impl EngineRegistry {
    pub fn new(driver: Arc<dyn EngineDriver>) -> Self {
        Self {
            driver,
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Registry backed by DuckDB, storing directory databases under the
    /// configured file name.
    pub fn from_config(config: &EmbeddedConfig) -> Self {
        Self::new(Arc::new(DuckDbDriver::from_config(config)))
    }

    /// Process-wide registry backed by DuckDB. Configuration is read from the
    /// environment on first use; an invalid environment falls back to the
    /// defaults.
    pub fn global() -> Arc<EngineRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| {
                let config = EmbeddedConfig::load().unwrap_or_else(|err| {
                    warn!(error = ?err, "invalid embedded configuration; using defaults");
                    EmbeddedConfig::default()
                });
                Arc::new(EngineRegistry::from_config(&config))
            })
            .clone()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach to the engine at `location`, starting it if nothing runs.
    #[instrument(skip(self), fields(location = %location))]
    pub fn attach(
        &self,
        location: &StorageLocation,
        options: EngineOptions,
    ) -> Result<Arc<EngineInstance>, RegistryError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(entry) = inner.running.as_mut() {
            if entry.instance.location != *location {
                warn!(
                    running = %entry.instance.location,
                    "attach rejected: engine already running elsewhere"
                );
                return Err(RegistryError::ConflictingLocation {
                    running: entry.instance.location.clone(),
                    requested: location.clone(),
                });
            }
            if entry.instance.options != options {
                debug!(
                    running = ?entry.instance.options,
                    requested = ?options,
                    "engine already running; startup flags ignored"
                );
            }
            entry.ref_count += 1;
            let instance = entry.instance.clone();
            let ref_count = entry.ref_count;
            inner.total_attaches += 1;
            debug!(ref_count, "attached to running engine");
            return Ok(instance);
        }

        let database =
            self.driver
                .start(location, options)
                .map_err(|source| RegistryError::Startup {
                    location: location.clone(),
                    source,
                })?;
        let instance = Arc::new(EngineInstance {
            location: location.clone(),
            options,
            started_at: Instant::now(),
            database,
        });
        inner.running = Some(RegistryEntry {
            instance: instance.clone(),
            ref_count: 1,
        });
        inner.engines_started += 1;
        inner.total_attaches += 1;
        info!(
            silent = options.silent,
            sequential = options.sequential,
            "embedded engine started"
        );
        Ok(instance)
    }

    /// Drop one reference to `instance`, shutting the engine down at zero.
    #[instrument(skip(self, instance), fields(location = %instance.location))]
    pub fn detach(&self, instance: &Arc<EngineInstance>) -> Result<(), RegistryError> {
        let mut guard = self.lock();
        let inner = &mut *guard;

        let entry = match inner.running.as_mut() {
            Some(entry) if Arc::ptr_eq(&entry.instance, instance) => entry,
            _ => return Err(RegistryError::NotRunning),
        };

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            debug!(ref_count = entry.ref_count, "detached from engine");
            return Ok(());
        }

        // Shut down under the lock so no attach sees a half-stopped engine.
        let Some(entry) = inner.running.take() else {
            return Err(RegistryError::NotRunning);
        };
        let uptime_ms = entry.instance.uptime_ms();
        entry
            .instance
            .database
            .shutdown()
            .map_err(|source| RegistryError::Shutdown {
                location: entry.instance.location.clone(),
                source,
            })?;
        info!(uptime_ms, "last connection detached; embedded engine shut down");
        Ok(())
    }

    /// Connections attached to `location`; zero when it is not running.
    pub fn ref_count(&self, location: &StorageLocation) -> usize {
        match self.lock().running.as_ref() {
            Some(entry) if entry.instance.location == *location => entry.ref_count,
            _ => 0,
        }
    }

    pub fn running_location(&self) -> Option<StorageLocation> {
        self.lock()
            .running
            .as_ref()
            .map(|entry| entry.instance.location.clone())
    }

    pub fn is_running(&self) -> bool {
        self.lock().running.is_some()
    }

    pub fn snapshot(&self) -> EngineRegistrySnapshot {
        let inner = self.lock();
        let (running_location, ref_count, uptime_ms) = match inner.running.as_ref() {
            Some(entry) => (
                Some(entry.instance.location.clone()),
                entry.ref_count,
                entry.instance.uptime_ms(),
            ),
            None => (None, 0, 0),
        };
        EngineRegistrySnapshot {
            running_location,
            ref_count,
            uptime_ms,
            engines_started: inner.engines_started,
            total_attaches: inner.total_attaches,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine used by lifecycle tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use duckdb::arrow::datatypes::Schema;

    use crate::engine::native::{
        EngineDriver, EngineOptions, NativeConnection, NativeDatabase, ResultSet,
    };
    use crate::error::EngineError;
    use crate::location::StorageLocation;

    /// Counters shared between a fake driver and the test observing it.
    #[derive(Default)]
    pub struct FakeEngineState {
        pub starts: AtomicUsize,
        pub shutdowns: AtomicUsize,
        pub connects: AtomicUsize,
        pub closes: AtomicUsize,
        pub fail_start: AtomicBool,
        pub fail_connect: AtomicBool,
        pub fail_commands: AtomicBool,
        pub executed: std::sync::Mutex<Vec<String>>,
        pub last_options: std::sync::Mutex<Option<EngineOptions>>,
    }

    impl FakeEngineState {
        pub fn count(counter: &AtomicUsize) -> usize {
            counter.load(Ordering::SeqCst)
        }
    }

    pub struct FakeDriver {
        pub state: Arc<FakeEngineState>,
    }

    impl FakeDriver {
        pub fn new() -> (Arc<Self>, Arc<FakeEngineState>) {
            let state = Arc::new(FakeEngineState::default());
            (
                Arc::new(Self {
                    state: state.clone(),
                }),
                state,
            )
        }
    }

    impl EngineDriver for FakeDriver {
        fn start(
            &self,
            _location: &StorageLocation,
            options: EngineOptions,
        ) -> Result<Box<dyn NativeDatabase>, EngineError> {
            if self.state.fail_start.load(Ordering::SeqCst) {
                return Err(EngineError::Internal("disk full".to_string()));
            }
            self.state.starts.fetch_add(1, Ordering::SeqCst);
            *self
                .state
                .last_options
                .lock()
                .unwrap_or_else(|p| p.into_inner()) = Some(options);
            Ok(Box::new(FakeDatabase {
                state: self.state.clone(),
            }))
        }
    }

    struct FakeDatabase {
        state: Arc<FakeEngineState>,
    }

    impl NativeDatabase for FakeDatabase {
        fn connect(&self) -> Result<Box<dyn NativeConnection>, EngineError> {
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(EngineError::Internal("too many sessions".to_string()));
            }
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection {
                state: self.state.clone(),
                auto_commit: true,
            }))
        }

        fn shutdown(&self) -> Result<(), EngineError> {
            self.state.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Executes statements by looking at their text: anything containing
    /// `fail` errors, `rows=N` reports N affected rows.
    struct FakeConnection {
        state: Arc<FakeEngineState>,
        auto_commit: bool,
    }

    impl FakeConnection {
        fn command(&self) -> Result<(), EngineError> {
            if self.state.fail_commands.load(Ordering::SeqCst) {
                return Err(EngineError::Internal("engine rejected command".to_string()));
            }
            Ok(())
        }
    }

    impl NativeConnection for FakeConnection {
        fn execute(&mut self, sql: &str) -> Result<usize, EngineError> {
            self.state
                .executed
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(sql.to_string());
            if sql.contains("fail") {
                return Err(EngineError::InvalidStatement(format!("cannot run {sql}")));
            }
            if sql.contains("returning") {
                return Err(EngineError::ResultSetProduced { columns: 1 });
            }
            Ok(sql
                .split("rows=")
                .nth(1)
                .and_then(|n| n.trim().parse().ok())
                .unwrap_or(0))
        }

        fn set_auto_commit(&mut self, enabled: bool) -> Result<(), EngineError> {
            self.command()?;
            self.auto_commit = enabled;
            Ok(())
        }

        fn is_auto_commit(&self) -> bool {
            self.auto_commit
        }

        fn prepare(&mut self, _sql: &str) -> Result<i32, EngineError> {
            self.command()?;
            Ok(1)
        }

        fn execute_prepared(&mut self, _id: i32) -> Result<usize, EngineError> {
            self.command()?;
            Ok(0)
        }

        fn release(&mut self, _id: i32) -> Result<(), EngineError> {
            self.command()
        }

        fn query(&mut self, _sql: &str) -> Result<ResultSet, EngineError> {
            self.command()?;
            Ok(ResultSet {
                id: 1,
                schema: Arc::new(Schema::empty()),
                batches: Vec::new(),
                total_rows: 0,
            })
        }

        fn close_resource(&mut self, _id: i32) -> Result<(), EngineError> {
            self.command()
        }

        fn close(&mut self) -> Result<(), EngineError> {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
