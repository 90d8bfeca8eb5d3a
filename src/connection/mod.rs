//! Client-facing embedded connections.
//!
//! An `EmbeddedConnection` walks through `Unconnected → Connected → Closed`.
//! Connecting attaches to the engine registry and installs an
//! [`EmbeddedProtocol`]; closing tears the protocol down and detaches, which
//! stops the engine once the last connection is gone.

pub mod id;

pub use id::ConnectionHash;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, instrument, warn};

use crate::batch::{run_batch, BatchOutcome};
use crate::config::EmbeddedConfig;
use crate::engine::native::{EngineOptions, NativeConnection};
use crate::engine::registry::EngineRegistry;
use crate::error::{ConnectError, EmbeddedError, TimeoutOp};
use crate::location::StorageLocation;
use crate::protocol::{ControlCommand, EmbeddedProtocol};

/// Initial capacity for text buffers built from engine output. Matches the
/// block size networked transports use.
pub const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Everything needed to build an embedded connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub location: StorageLocation,
    pub engine: EngineOptions,
    /// Client properties, passed through untouched.
    pub properties: BTreeMap<String, String>,
    pub hash: ConnectionHash,
}

impl ConnectionOptions {
    /// Options for `directory`; `None` or `:memory:` selects in-memory mode.
    pub fn new(directory: Option<&str>) -> Self {
        Self {
            location: StorageLocation::from_directory(directory),
            engine: EngineOptions::default(),
            properties: BTreeMap::new(),
            hash: ConnectionHash::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    pub fn from_config(config: &EmbeddedConfig) -> Self {
        Self::new(config.directory.as_deref())
            .with_silent(config.silent)
            .with_sequential(config.sequential)
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.engine.silent = silent;
        self
    }

    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.engine.sequential = sequential;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_hash(mut self, hash: ConnectionHash) -> Self {
        self.hash = hash;
        self
    }
}

/// Observable lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unconnected,
    Connected,
    Closed,
}

enum ConnectionState {
    Unconnected,
    Connected(EmbeddedProtocol),
    Closed,
}

impl ConnectionState {
    fn lifecycle(&self) -> LifecycleState {
        match self {
            ConnectionState::Unconnected => LifecycleState::Unconnected,
            ConnectionState::Connected(_) => LifecycleState::Connected,
            ConnectionState::Closed => LifecycleState::Closed,
        }
    }
}

/// A connection to an engine running in this process.
pub struct EmbeddedConnection {
    options: ConnectionOptions,
    registry: Arc<EngineRegistry>,
    state: Mutex<ConnectionState>,
}

impl EmbeddedConnection {
    /// Create an unconnected connection using the process-wide registry.
    pub fn new(options: ConnectionOptions) -> Self {
        Self::with_registry(EngineRegistry::global(), options)
    }

    pub fn with_registry(registry: Arc<EngineRegistry>, options: ConnectionOptions) -> Self {
        Self {
            options,
            registry,
            state: Mutex::new(ConnectionState::Unconnected),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_protocol<T>(
        &self,
        f: impl FnOnce(&mut EmbeddedProtocol) -> Result<T, EmbeddedError>,
    ) -> Result<T, EmbeddedError> {
        let mut state = self.lock_state();
        match &mut *state {
            ConnectionState::Connected(protocol) => f(protocol),
            ConnectionState::Unconnected => Err(EmbeddedError::NotConnected),
            ConnectionState::Closed => Err(EmbeddedError::Closed),
        }
    }

    /// Attach to the engine, starting it when nothing runs yet.
    ///
    /// No authentication happens in-process, so `user` and `password` are
    /// ignored. There is no handshake either: the returned greeting is always
    /// empty.
    #[instrument(skip_all, fields(hash = %self.options.hash, location = %self.options.location))]
    pub fn connect(&self, _user: &str, _password: &str) -> Result<Vec<String>, EmbeddedError> {
        let mut state = self.lock_state();
        match *state {
            ConnectionState::Unconnected => {}
            ConnectionState::Connected(_) => return Err(EmbeddedError::AlreadyConnected),
            ConnectionState::Closed => return Err(EmbeddedError::Closed),
        }

        let engine = self
            .registry
            .attach(&self.options.location, self.options.engine)
            .map_err(|err| EmbeddedError::Connection(ConnectError::Registry(err)))?;

        let native = match engine.database().connect() {
            Ok(native) => native,
            Err(err) => {
                if let Err(detach_err) = self.registry.detach(&engine) {
                    warn!(error = ?detach_err, "failed to detach after connect failure");
                }
                return Err(EmbeddedError::Connection(ConnectError::Engine(err)));
            }
        };

        *state = ConnectionState::Connected(EmbeddedProtocol::new(native, engine));
        info!(
            properties = self.options.properties.len(),
            "embedded connection established"
        );
        Ok(Vec::new())
    }

    /// Close the connection. Closing twice is a no-op.
    #[instrument(skip_all, fields(hash = %self.options.hash))]
    pub fn close(&self) -> Result<(), EmbeddedError> {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, ConnectionState::Closed) {
            ConnectionState::Closed => {
                debug!("connection already closed");
                Ok(())
            }
            ConnectionState::Unconnected => {
                debug!("closed a connection that never connected");
                Ok(())
            }
            ConnectionState::Connected(protocol) => {
                let (engine, closed) = protocol.close();
                let detached = self.registry.detach(&engine);
                if let Err(err) = closed {
                    if let Err(detach_err) = &detached {
                        warn!(error = ?detach_err, "detach failed after native close failure");
                    }
                    return Err(EmbeddedError::Close(ConnectError::Engine(err)));
                }
                detached.map_err(|err| EmbeddedError::Close(ConnectError::Registry(err)))?;
                info!("embedded connection closed");
                Ok(())
            }
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lock_state().lifecycle()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == LifecycleState::Closed
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn location(&self) -> &StorageLocation {
        &self.options.location
    }

    /// Database directory; `None` when running in memory.
    pub fn directory(&self) -> Option<&Path> {
        self.options.location.directory()
    }

    pub fn is_running_in_memory(&self) -> bool {
        self.options.location.is_in_memory()
    }

    pub fn is_silent(&self) -> bool {
        self.options.engine.silent
    }

    pub fn is_sequential(&self) -> bool {
        self.options.engine.sequential
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.options.properties
    }

    pub fn hash(&self) -> &ConnectionHash {
        &self.options.hash
    }

    pub fn jdbc_url(&self) -> String {
        self.options.location.jdbc_url()
    }

    /// No transport, so no block size limit.
    pub fn block_size(&self) -> i32 {
        i32::MAX
    }

    /// No transport, so no fetch size limit.
    pub fn default_fetch_size(&self) -> i32 {
        i32::MAX
    }

    pub fn initial_buffer_capacity(&self) -> usize {
        INITIAL_BUFFER_CAPACITY
    }

    /// Always fails: embedded calls have no socket to time out.
    pub fn so_timeout(&self) -> Result<i32, EmbeddedError> {
        Err(EmbeddedError::TimeoutUnsupported(TimeoutOp::Get))
    }

    /// Always fails: embedded calls have no socket to time out.
    pub fn set_so_timeout(&self, _timeout_ms: i32) -> Result<(), EmbeddedError> {
        Err(EmbeddedError::TimeoutUnsupported(TimeoutOp::Set))
    }

    /// Send a control command by its client API identifier.
    pub fn send_control_command(&self, code: i32, payload: i32) -> Result<(), EmbeddedError> {
        self.with_protocol(|protocol| protocol.dispatch_raw(code, payload))
    }

    pub fn dispatch_control_command(&self, command: ControlCommand) -> Result<(), EmbeddedError> {
        self.with_protocol(|protocol| protocol.dispatch_control_command(command))
    }

    /// Execute one statement and return the affected row count.
    #[instrument(skip(self), fields(hash = %self.options.hash))]
    pub fn execute_update(&self, sql: &str) -> Result<usize, EmbeddedError> {
        self.with_protocol(|protocol| protocol.execute(sql).map_err(EmbeddedError::Execution))
    }

    /// Execute `statements` as a best-effort batch.
    ///
    /// The outer error only reports a connection that cannot run anything;
    /// statement failures are inside the returned [`BatchOutcome`].
    #[instrument(skip_all, fields(hash = %self.options.hash, statements = statements.len()))]
    pub fn execute_batch<S: AsRef<str>>(
        &self,
        statements: &[S],
    ) -> Result<BatchOutcome, EmbeddedError> {
        self.with_protocol(|protocol| Ok(run_batch(statements, |sql| protocol.execute(sql))))
    }

    /// Run `f` against the native engine connection.
    ///
    /// Non-portable: this exposes engine-specific capabilities (prepared
    /// statements, Arrow results) outside the connection API.
    pub fn with_native_connection<T>(
        &self,
        f: impl FnOnce(&mut dyn NativeConnection) -> T,
    ) -> Result<T, EmbeddedError> {
        self.with_protocol(|protocol| Ok(f(protocol.native_mut())))
    }
}

impl Drop for EmbeddedConnection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(hash = %self.options.hash, error = ?err, "failed to close dropped connection");
        }
    }
}
