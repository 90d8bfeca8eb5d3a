//! In-process connection bridge for an embedded DuckDB engine.
//!
//! Connections open a logical session on an engine running inside the
//! current process instead of talking to a server over a socket. The first
//! connection starts the engine, the last one to close shuts it down.

pub mod batch;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod location;
pub mod protocol;
pub mod sql_parser;

pub use batch::{run_batch, BatchError, BatchOutcome, UpdateCount, EXECUTE_FAILED};
pub use config::EmbeddedConfig;
pub use connection::{ConnectionHash, ConnectionOptions, EmbeddedConnection, LifecycleState};
pub use engine::{DuckDbDriver, EngineOptions, EngineRegistry};
pub use error::{ConnectError, EmbeddedError, EngineError, RegistryError};
pub use location::StorageLocation;
pub use protocol::{ControlCommand, ControlCommandKind, EmbeddedProtocol};
