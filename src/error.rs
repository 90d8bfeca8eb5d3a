use thiserror::Error;

use crate::location::StorageLocation;
use crate::protocol::ControlCommandKind;

/// Failures reported by the native engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    DuckDb(#[from] duckdb::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no prepared statement with id {0}")]
    UnknownPreparedStatement(i32),
    #[error("no open result set with id {0}")]
    UnknownResultSet(i32),
    #[error("engine connection is closed")]
    ConnectionClosed,
    #[error("statement produced a result set with {columns} columns instead of an update count")]
    ResultSetProduced { columns: usize },
    #[error("invalid statement: {0}")]
    InvalidStatement(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failures of the engine handle registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(
        "an embedded engine is already running at {running}; cannot attach to {requested}"
    )]
    ConflictingLocation {
        running: StorageLocation,
        requested: StorageLocation,
    },
    #[error("failed to start embedded engine at {location}")]
    Startup {
        location: StorageLocation,
        #[source]
        source: EngineError,
    },
    #[error("failed to shut down embedded engine at {location}")]
    Shutdown {
        location: StorageLocation,
        #[source]
        source: EngineError,
    },
    #[error("the embedded engine is not running")]
    NotRunning,
}

/// Cause of a failed `connect`.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Which half of the timeout API was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOp {
    Get,
    Set,
}

impl std::fmt::Display for TimeoutOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutOp::Get => f.write_str("get"),
            TimeoutOp::Set => f.write_str("set"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddedError {
    #[error("failed to open embedded connection")]
    Connection(#[source] ConnectError),
    #[error("cannot {0} a timeout on an embedded connection")]
    TimeoutUnsupported(TimeoutOp),
    #[error("control command {kind} failed")]
    CommandExecution {
        kind: ControlCommandKind,
        #[source]
        source: EngineError,
    },
    #[error("statement execution failed")]
    Execution(#[source] EngineError),
    #[error("failed to close embedded connection")]
    Close(#[source] ConnectError),
    #[error("connection is not connected")]
    NotConnected,
    #[error("connection is already connected")]
    AlreadyConnected,
    #[error("connection is closed")]
    Closed,
}

impl EmbeddedError {
    /// True when a connect failed because another location's engine is running.
    pub fn is_conflicting_location(&self) -> bool {
        matches!(
            self,
            EmbeddedError::Connection(ConnectError::Registry(
                RegistryError::ConflictingLocation { .. }
            ))
        )
    }

    pub fn is_timeout_unsupported(&self) -> bool {
        matches!(self, EmbeddedError::TimeoutUnsupported(_))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    /// Display of every error in the chain, outermost first.
    fn chain(err: &(dyn std::error::Error + 'static)) -> Vec<String> {
        let mut messages = vec![err.to_string()];
        let mut current = err.source();
        while let Some(cause) = current {
            messages.push(cause.to_string());
            current = cause.source();
        }
        messages
    }

    fn assert_each_cause_printed_once(err: &(dyn std::error::Error + 'static)) {
        let messages = chain(err);
        for pair in messages.windows(2) {
            assert!(
                !pair[0].contains(&pair[1]),
                "{:?} repeats its cause {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    fn io_failure() -> EngineError {
        EngineError::Io(std::io::Error::other("disk full"))
    }

    #[test]
    fn wrapped_causes_are_not_repeated() {
        let errors: Vec<Box<dyn std::error::Error + 'static>> = vec![
            Box::new(EmbeddedError::Execution(io_failure())),
            Box::new(EmbeddedError::CommandExecution {
                kind: ControlCommandKind::AutoCommit,
                source: io_failure(),
            }),
            Box::new(EmbeddedError::Connection(ConnectError::Registry(
                RegistryError::Startup {
                    location: StorageLocation::InMemory,
                    source: io_failure(),
                },
            ))),
            Box::new(EmbeddedError::Close(ConnectError::Registry(
                RegistryError::Shutdown {
                    location: StorageLocation::InMemory,
                    source: io_failure(),
                },
            ))),
        ];
        for err in &errors {
            assert_each_cause_printed_once(err.as_ref());
            assert!(chain(err.as_ref()).iter().any(|m| m == "disk full"));
        }
    }

    #[test]
    fn startup_error_names_the_location_once() {
        let err = EmbeddedError::Connection(ConnectError::Registry(RegistryError::Startup {
            location: StorageLocation::InMemory,
            source: io_failure(),
        }));
        let messages = chain(&err);
        assert_eq!(messages[0], "failed to open embedded connection");
        assert!(messages[1].starts_with("failed to start embedded engine at"));
        assert_eq!(messages.last().map(String::as_str), Some("disk full"));
    }
}
