//! Output retention policies and buffer planning.
//!
//! Each state decides how much of its per-step history is kept:
//!
//! ```text
//! All       → buffer (n, *row)      every step recorded
//! Last      → buffer row            only the final value
//! LastK(k)  → buffer (k, *row)      trailing window (planned, not written)
//! ```
//!
//! Shapes are fixed before the first step; nothing is reallocated mid-run.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// How many steps of a state's output the executor keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    #[default]
    All,
    Last,
    LastK(usize),
}

impl Retention {
    pub fn validate(&self, state: usize) -> Result<()> {
        if let Retention::LastK(0) = self {
            return Err(ScanError::config(format!(
                "state {} retains the last 0 steps; use at least 1",
                state
            )));
        }
        Ok(())
    }

    /// True if every step is kept, which is what the reverse pass needs.
    pub fn keeps_all(&self) -> bool {
        matches!(self, Retention::All)
    }
}

/// Buffer shape for one output given the step count and the shape of a
/// single step result.
pub fn plan_buffer_shape(retention: Retention, n_steps: usize, row_shape: &[usize]) -> Vec<usize> {
    let mut shape = Vec::with_capacity(row_shape.len() + 1);
    match retention {
        Retention::All => shape.push(n_steps),
        Retention::Last => {}
        Retention::LastK(k) => shape.push(k),
    }
    shape.extend_from_slice(row_shape);
    shape
}
