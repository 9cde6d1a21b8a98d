//! Core module: taps, retention, evaluator seams, configuration and its identity.

pub mod evaluator;
pub mod identity;
pub mod recurrence;
pub mod retention;
pub mod taps;

pub use evaluator::{
    BackwardArgs, BackwardEvaluator, EvaluatorHandle, FnStep, Slice, StepArgs, StepEvaluator,
    StepGradients,
};
pub use identity::{ConfigCache, ConfigValue, Field, Fingerprint};
pub use recurrence::{Direction, RecurrenceBuilder, RecurrenceConfig, StepSource, Truncation};
pub use retention::{plan_buffer_shape, Retention};
pub use taps::{TapKind, TapMap, TapSet};
