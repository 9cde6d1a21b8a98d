//! # tapscan
//!
//! A tap-indexed recurrence ("scan") engine.
//!
//! A per-step evaluator reads sliding windows ("taps") of input sequences and
//! of its own earlier outputs, and the engine drives it across the time axis:
//!
//! ```text
//! y_t = f(seq_0[t + a_0], seq_0[t + a_1], …, y[t - 1], y[t - k], …, params)
//! ```
//!
//! ## Components
//!
//! 1. **Tap resolver**: validates offsets, derives the step count
//! 2. **Retention planner**: sizes every output buffer ahead of the run
//! 3. **Forward executor**: ordered step evaluation with seed wraparound
//! 4. **Inplace optimizer**: safety-checked output/sequence buffer aliasing
//! 5. **Gradient executor**: truncated backpropagation through time
//! 6. **Configuration identity**: structural equality/hash for memoization
//!
//! Every run is strictly sequential: step `t` may depend on up to the
//! deepest state tap of earlier steps.

pub mod core;
pub mod error;
pub mod execution;
pub mod learning;
pub mod runtime;

use ndarray::{arr0, ArrayD, Axis};

pub use crate::core::{
    Direction, EvaluatorHandle, FnStep, RecurrenceBuilder, RecurrenceConfig, Retention,
    StepSource, TapSet, Truncation,
};
pub use crate::error::{Result, ScanError};
pub use crate::execution::{make_inplace, run_scan, ScanInputs, ScanOutputs};
pub use crate::learning::{numeric_gradient, run_gradient, GradientInputs, ScanGradients};
pub use crate::runtime::{CollectingSink, Diagnostic, DiagnosticSink, TracingSink};

/// Dense `f64` array with a dynamic number of axes.
///
/// Sequences and seeds use axis 0 as the time (history) axis.
pub type Tensor = ArrayD<f64>;

/// Lift a single value into a one-row container by prepending a length-1
/// axis. Used to turn a plain initial state into a seed with history axis.
pub fn lift_single(value: Tensor) -> Tensor {
    value.insert_axis(Axis(0))
}

/// A 0-dimensional tensor holding `value`.
pub fn scalar(value: f64) -> Tensor {
    arr0(value).into_dyn()
}

/// Crate-wide constants.
pub mod config {
    /// Tap offset a sequence gets when none is declared.
    pub const DEFAULT_SEQUENCE_TAP: i64 = 0;

    /// Tap offset a state gets when none is declared.
    pub const DEFAULT_STATE_TAP: i64 = -1;

    /// Truncation depth meaning "run the reverse pass down to step 0".
    pub const UNBOUNDED_TRUNCATION: i64 = -1;

    /// Central-difference step used by the numeric gradient check.
    pub const FINITE_DIFF_EPSILON: f64 = 1e-6;

    /// Absolute tolerance for comparing analytic and numeric gradients.
    pub const GRADIENT_TOLERANCE: f64 = 1e-4;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_lift_single_adds_history_axis() {
        let seed = lift_single(array![1.0, 2.0].into_dyn());
        assert_eq!(seed.shape(), &[1, 2]);

        let seed = lift_single(scalar(3.0));
        assert_eq!(seed.shape(), &[1]);
        assert_eq!(seed[[0]], 3.0);
    }

    #[test]
    fn test_scalar_is_zero_dimensional() {
        let s = scalar(4.5);
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.iter().next().copied(), Some(4.5));
    }
}
