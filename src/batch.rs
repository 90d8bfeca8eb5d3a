//! Best-effort batch execution.
//!
//! Every statement in a batch is attempted, in order, whatever happened to
//! the ones before it. The caller gets one count per statement and, when
//! anything failed, a single aggregate error raised after the whole batch ran.

use std::fmt;

use tracing::{debug, instrument, warn};

use crate::error::EngineError;

/// Integer marker conventionally reported for a failed batch entry.
pub const EXECUTE_FAILED: i64 = -3;

/// Outcome of one statement in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCount {
    Rows(usize),
    Failed,
}

impl UpdateCount {
    /// Integer form used by update-count arrays: the row count, or
    /// [`EXECUTE_FAILED`].
    pub fn as_raw(self) -> i64 {
        match self {
            UpdateCount::Rows(rows) => rows as i64,
            UpdateCount::Failed => EXECUTE_FAILED,
        }
    }
}

impl fmt::Display for UpdateCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateCount::Rows(rows) => write!(f, "{rows}"),
            UpdateCount::Failed => f.write_str("FAILED"),
        }
    }
}

#[derive(Debug)]
pub struct StatementFailure {
    /// Zero-based position in the batch.
    pub index: usize,
    pub statement: String,
    /// A statement that answers with rows fails with
    /// [`EngineError::ResultSetProduced`].
    pub cause: EngineError,
}

/// Aggregate error of a batch with at least one failed statement.
#[derive(Debug)]
pub struct BatchError {
    pub counts: Vec<UpdateCount>,
    pub failures: Vec<StatementFailure>,
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} batch statements failed",
            self.failures.len(),
            self.counts.len()
        )?;
        for failure in &self.failures {
            write!(f, "; statement {}: {}", failure.index + 1, failure.cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

#[derive(Debug)]
pub struct BatchOutcome {
    pub counts: Vec<UpdateCount>,
    pub error: Option<BatchError>,
}

impl BatchOutcome {
    pub fn has_failures(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Vec<UpdateCount>, BatchError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.counts),
        }
    }
}

/// Run `statements` through `execute` with best-effort semantics.
#[instrument(skip_all, fields(statements = statements.len()))]
pub fn run_batch<S, F>(statements: &[S], mut execute: F) -> BatchOutcome
where
    S: AsRef<str>,
    F: FnMut(&str) -> Result<usize, EngineError>,
{
    let mut counts = Vec::with_capacity(statements.len());
    let mut failures = Vec::new();

    for (index, statement) in statements.iter().enumerate() {
        let sql = statement.as_ref();
        match execute(sql) {
            Ok(rows) => counts.push(UpdateCount::Rows(rows)),
            Err(cause) => {
                warn!(index, error = %cause, "batch statement failed; continuing");
                counts.push(UpdateCount::Failed);
                failures.push(StatementFailure {
                    index,
                    statement: sql.to_string(),
                    cause,
                });
            }
        }
    }

    debug!(failed = failures.len(), "batch finished");
    if failures.is_empty() {
        return BatchOutcome {
            counts,
            error: None,
        };
    }
    BatchOutcome {
        error: Some(BatchError {
            counts: counts.clone(),
            failures,
        }),
        counts,
    }
}
