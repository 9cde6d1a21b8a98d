//! Execution module: step-count resolution, the forward scan, in-place aliasing.

pub mod forward;
pub mod inplace;
pub mod resolver;
pub(crate) mod slices;

pub use forward::{run_scan, ScanInputs, ScanOutputs};
pub use inplace::{make_inplace, BufferSource};
pub use resolver::{resolve_steps, usable_length, Resolution};
