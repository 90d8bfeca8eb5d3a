//! In-process replacement for the wire protocol.
//!
//! A networked client serializes control commands onto a socket. The
//! embedded protocol keeps a native logical connection instead and turns
//! each command into a direct engine call.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, trace};

use crate::engine::native::NativeConnection;
use crate::engine::registry::EngineInstance;
use crate::error::{EmbeddedError, EngineError};

/// Kinds of out-of-band control commands understood by the client API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCommandKind {
    /// Toggle auto-commit; a non-zero payload enables it.
    AutoCommit,
    /// Negotiate the reply block size. Only meaningful over a network.
    ReplySize,
    /// Release the prepared statement named by the payload.
    Release,
    /// Close the result set named by the payload.
    Close,
}

impl ControlCommandKind {
    /// Decode a client API command identifier.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::AutoCommit),
            2 => Some(Self::ReplySize),
            3 => Some(Self::Release),
            4 => Some(Self::Close),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::AutoCommit => 1,
            Self::ReplySize => 2,
            Self::Release => 3,
            Self::Close => 4,
        }
    }
}

impl fmt::Display for ControlCommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AutoCommit => "auto_commit",
            Self::ReplySize => "reply_size",
            Self::Release => "release",
            Self::Close => "close",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlCommand {
    pub kind: ControlCommandKind,
    pub payload: i32,
}

impl ControlCommand {
    pub fn new(kind: ControlCommandKind, payload: i32) -> Self {
        Self { kind, payload }
    }
}

/// Protocol object of an embedded connection.
pub struct EmbeddedProtocol {
    native: Box<dyn NativeConnection>,
    engine: Arc<EngineInstance>,
}

impl EmbeddedProtocol {
    pub fn new(native: Box<dyn NativeConnection>, engine: Arc<EngineInstance>) -> Self {
        Self { native, engine }
    }

    /// Run a control command as a direct engine call.
    #[instrument(skip(self), fields(kind = %command.kind, payload = command.payload))]
    pub fn dispatch_control_command(&mut self, command: ControlCommand) -> Result<(), EmbeddedError> {
        let result = match command.kind {
            ControlCommandKind::AutoCommit => self.native.set_auto_commit(command.payload != 0),
            ControlCommandKind::Release => self.native.release(command.payload),
            ControlCommandKind::Close => self.native.close_resource(command.payload),
            ControlCommandKind::ReplySize => {
                // Nothing to negotiate without a transport; ignoring is correct.
                trace!("reply size command ignored on embedded connection");
                return Ok(());
            }
        };
        result.map_err(|source| EmbeddedError::CommandExecution {
            kind: command.kind,
            source,
        })?;
        debug!("control command dispatched");
        Ok(())
    }

    /// Dispatch a command given by its raw identifier. Unknown identifiers
    /// are ignored the same way reply-size negotiation is.
    pub fn dispatch_raw(&mut self, code: i32, payload: i32) -> Result<(), EmbeddedError> {
        match ControlCommandKind::from_code(code) {
            Some(kind) => self.dispatch_control_command(ControlCommand::new(kind, payload)),
            None => {
                trace!(code, "unknown control command ignored");
                Ok(())
            }
        }
    }

    pub fn execute(&mut self, sql: &str) -> Result<usize, EngineError> {
        self.native.execute(sql)
    }

    /// The native engine connection.
    ///
    /// Non-portable: code using it depends on the engine binding rather than
    /// on the connection API.
    pub fn native(&self) -> &dyn NativeConnection {
        self.native.as_ref()
    }

    /// Mutable access to the native engine connection. Non-portable, see
    /// [`EmbeddedProtocol::native`].
    pub fn native_mut(&mut self) -> &mut dyn NativeConnection {
        self.native.as_mut()
    }

    /// Close the native connection, handing back the engine so the caller
    /// can detach from it whatever the outcome.
    pub fn close(mut self) -> (Arc<EngineInstance>, Result<(), EngineError>) {
        let result = self.native.close();
        (self.engine, result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use anyhow::Result;

    use super::*;
    use crate::engine::native::EngineOptions;
    use crate::engine::registry::testing::{FakeDriver, FakeEngineState};
    use crate::engine::registry::EngineRegistry;
    use crate::location::StorageLocation;

    fn fake_protocol() -> Result<(EmbeddedProtocol, Arc<FakeEngineState>)> {
        let (driver, state) = FakeDriver::new();
        let registry = EngineRegistry::new(driver);
        let engine = registry.attach(&StorageLocation::InMemory, EngineOptions::default())?;
        let native = engine.database().connect()?;
        Ok((EmbeddedProtocol::new(native, engine), state))
    }

    #[test]
    fn command_codes_round_trip() {
        for kind in [
            ControlCommandKind::AutoCommit,
            ControlCommandKind::ReplySize,
            ControlCommandKind::Release,
            ControlCommandKind::Close,
        ] {
            assert_eq!(ControlCommandKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(ControlCommandKind::from_code(0), None);
        assert_eq!(ControlCommandKind::from_code(99), None);
    }

    #[test]
    fn auto_commit_payload_is_treated_as_boolean() -> Result<()> {
        let (mut protocol, _) = fake_protocol()?;
        protocol.dispatch_control_command(ControlCommand::new(ControlCommandKind::AutoCommit, 0))?;
        assert!(!protocol.native().is_auto_commit());
        protocol.dispatch_control_command(ControlCommand::new(ControlCommandKind::AutoCommit, 5))?;
        assert!(protocol.native().is_auto_commit());
        Ok(())
    }

    #[test]
    fn reply_size_is_a_no_op_even_when_the_engine_fails() -> Result<()> {
        let (mut protocol, state) = fake_protocol()?;
        state.fail_commands.store(true, Ordering::SeqCst);

        protocol.dispatch_control_command(ControlCommand::new(ControlCommandKind::ReplySize, 250))?;
        protocol.dispatch_raw(42, 7)?;
        Ok(())
    }

    #[test]
    fn engine_failures_carry_the_command_kind() -> Result<()> {
        let (mut protocol, state) = fake_protocol()?;
        state.fail_commands.store(true, Ordering::SeqCst);

        for kind in [
            ControlCommandKind::AutoCommit,
            ControlCommandKind::Release,
            ControlCommandKind::Close,
        ] {
            let err = protocol
                .dispatch_raw(kind.code(), 1)
                .expect_err("engine failure must surface");
            match err {
                EmbeddedError::CommandExecution { kind: failed, source } => {
                    assert_eq!(failed, kind);
                    assert!(source.to_string().contains("engine rejected command"));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
        Ok(())
    }

    #[test]
    fn close_hands_back_the_engine() -> Result<()> {
        let (protocol, state) = fake_protocol()?;
        let (engine, result) = protocol.close();
        result?;
        assert!(engine.location().is_in_memory());
        assert_eq!(FakeEngineState::count(&state.closes), 1);
        Ok(())
    }
}
