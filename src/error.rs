//! Error type shared by every scan component.

use thiserror::Error;

/// Fatal failures of a scan build, forward run or gradient run.
///
/// Recoverable boundary conditions (length mismatches, missing history) are
/// not errors; they go to a [`DiagnosticSink`](crate::runtime::DiagnosticSink).
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid recurrence configuration: {0}")]
    Config(String),

    #[error("no tapped input sequence and no explicit step count: cannot infer how many steps to run")]
    MissingStepCount,

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("output is not differentiable: {0}")]
    NotDifferentiable(String),

    #[error("{what}: expected {expected} values, got {found}")]
    Arity {
        what: String,
        expected: usize,
        found: usize,
    },

    #[error("{what}: expected shape {expected:?}, got {found:?}")]
    Shape {
        what: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("step evaluator failed at step {step}: {source}")]
    Evaluator {
        step: usize,
        #[source]
        source: anyhow::Error,
    },
}

impl ScanError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ScanError::Config(msg.into())
    }

    pub(crate) fn shape(what: impl Into<String>, expected: &[usize], found: &[usize]) -> Self {
        ScanError::Shape {
            what: what.into(),
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    pub(crate) fn arity(what: impl Into<String>, expected: usize, found: usize) -> Self {
        ScanError::Arity {
            what: what.into(),
            expected,
            found,
        }
    }
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, ScanError>;
