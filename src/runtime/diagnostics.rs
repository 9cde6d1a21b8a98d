//! Diagnostics for recoverable boundary conditions.
//!
//! Executors never log directly; they report through an injected
//! [`DiagnosticSink`] and carry on with the documented fallback.

use std::cell::RefCell;
use std::fmt;

/// A recoverable condition met during a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Diagnostic {
    /// A sequence's usable length differs from the step count; the run is
    /// clipped to the shorter of the two.
    LengthMismatch {
        sequence: usize,
        usable: usize,
        n_steps: usize,
    },

    /// A seed provides fewer history rows than the deepest tap needs.
    ShortSeed {
        state: usize,
        provided: usize,
        required: usize,
    },

    /// A tap reached before the seed's first row; a zero slice was used.
    MissingHistory { state: usize, tap: i64, step: usize },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::LengthMismatch {
                sequence,
                usable,
                n_steps,
            } => write!(
                f,
                "sequence {} has usable length {} but {} steps were expected; clipping to {}",
                sequence,
                usable,
                n_steps,
                usable.min(n_steps)
            ),
            Diagnostic::ShortSeed {
                state,
                provided,
                required,
            } => write!(
                f,
                "seed for state {} has {} rows but taps reach back {}; missing rows read as zeros",
                state, provided, required
            ),
            Diagnostic::MissingHistory { state, tap, step } => write!(
                f,
                "past value at offset {} for state {} not given in seed (step {}); using zeros",
                tap, state, step
            ),
        }
    }
}

/// Receiver of run diagnostics.
pub trait DiagnosticSink {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Forwards every diagnostic to `tracing` at WARN level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        tracing::warn!(target: "tapscan", "{}", diagnostic);
    }
}

/// Keeps every diagnostic for later inspection.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: RefCell<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    pub fn count(&self, pred: impl Fn(&Diagnostic) -> bool) -> usize {
        self.events.borrow().iter().filter(|d| pred(d)).count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.events.borrow_mut().push(diagnostic);
    }
}

/// Any `Fn(&Diagnostic)` callback is a sink.
impl<F> DiagnosticSink for F
where
    F: Fn(&Diagnostic),
{
    fn emit(&self, diagnostic: Diagnostic) {
        self(&diagnostic)
    }
}
