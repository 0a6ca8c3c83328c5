//! Error taxonomy shared by the log reducers and the process supervisor.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

/// Every failure the scoring engine and the supervisor can report.
///
/// Pipeline stages never surface these to the caller of
/// [`Evaluator::evaluate`](crate::evaluator::Evaluator::evaluate): they are turned into
/// artifacts. The summary functions return them as-is.
#[derive(Error, Debug)]
pub enum EvalError {
    /// A required external process could not be started.
    #[error("could not launch '{command}': {reason}")]
    Launch {
        /// Command line that failed.
        command: String,
        /// Why it failed.
        reason: String,
    },

    /// Readiness was not observed in time.
    #[error("Server logs did not appear before timeout of {timeout:?} (exit_code={exit_code:?})")]
    Timeout {
        /// Readiness budget that elapsed.
        timeout: Duration,
        /// Exit code of the supervised process, if it already exited.
        exit_code: Option<i32>,
    },

    /// A numeric token could not be parsed.
    #[error("unrecognized {kind} value: {token:?}")]
    Format {
        /// What the token was supposed to be (latency, throughput, ...).
        kind: &'static str,
        /// The offending token.
        token: String,
    },

    /// Required measurement fields were absent.
    #[error("missing fields: {}", .0.join(", "))]
    MissingField(Vec<&'static str>),

    /// Malformed section markers in an aggregated log.
    #[error("{0}")]
    Structure(String),

    /// A log or tabular artifact produced no record at all.
    #[error("{}: no records found", .0.display())]
    EmptyResult(PathBuf),

    /// No records were given to the scorer.
    #[error("no worker stats provided for scoring")]
    EmptyInput,

    /// Mean latency was zero.
    #[error("average latency is zero; cannot compute score")]
    Division,

    /// A failure tied to one log file or section.
    #[error("{location}: {source}")]
    InLog {
        /// File path, optionally followed by `[section]`.
        location: String,
        /// Underlying failure.
        #[source]
        source: Box<EvalError>,
    },

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tabular artifact failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EvalError {
    /// Wraps `self` with the file (or section) it came from.
    pub fn in_log(self, location: impl Into<String>) -> EvalError {
        EvalError::InLog {
            location: location.into(),
            source: Box::new(self),
        }
    }

    /// Strips every [`EvalError::InLog`] layer.
    pub fn root(&self) -> &EvalError {
        match self {
            EvalError::InLog { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Shorthand used across the crate.
pub type Result<T> = std::result::Result<T, EvalError>;
