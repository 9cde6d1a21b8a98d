//! Learning module: gradients of a scan.
//!
//! - **gradient**: truncated backpropagation through time over the recorded
//!   forward outputs
//! - **finite_diff**: central differences, used to check the reverse pass

pub mod finite_diff;
pub mod gradient;

pub use finite_diff::{max_abs_diff, numeric_gradient};
pub use gradient::{run_gradient, GradientConfig, GradientInputs, ScanGradients};
