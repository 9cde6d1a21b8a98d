//! Step evaluator seams.
//!
//! The per-step computation and its derivative are built outside this crate;
//! the engine only sees them through [`StepEvaluator`] and
//! [`BackwardEvaluator`]. Arguments arrive in a fixed order:
//!
//! ```text
//! [seq 0 taps…][seq 1 taps…]…[state 0 taps…][state 1 taps…]…[params…]
//! ```

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayViewD, CowArray, IxDyn};

use crate::error::{Result, ScanError};
use crate::Tensor;

/// Slice handed to an evaluator: borrowed from a buffer, or owned when it
/// had to be synthesised (zero-filled missing history).
pub type Slice<'a> = CowArray<'a, f64, IxDyn>;

/// Per-step arguments in evaluator parameter order.
pub struct StepArgs<'a> {
    slices: Vec<Slice<'a>>,
    n_sequence: usize,
    n_state: usize,
}

impl<'a> StepArgs<'a> {
    pub(crate) fn new(slices: Vec<Slice<'a>>, n_sequence: usize, n_state: usize) -> Self {
        debug_assert!(n_sequence + n_state <= slices.len());
        Self {
            slices,
            n_sequence,
            n_state,
        }
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Argument at flat position `idx`.
    pub fn get(&self, idx: usize) -> Option<ArrayViewD<'_, f64>> {
        self.slices.get(idx).map(|s| s.view())
    }

    /// Sequence tap slices, sequence-major then tap order.
    pub fn sequences(&self) -> &[Slice<'a>] {
        &self.slices[..self.n_sequence]
    }

    /// State history slices, state-major then tap order.
    pub fn states(&self) -> &[Slice<'a>] {
        &self.slices[self.n_sequence..self.n_sequence + self.n_state]
    }

    /// Non-varying parameters in declaration order.
    pub fn params(&self) -> &[Slice<'a>] {
        &self.slices[self.n_sequence + self.n_state..]
    }

    /// Every slice in argument order.
    pub fn iter(&self) -> std::slice::Iter<'_, Slice<'a>> {
        self.slices.iter()
    }
}

/// Arguments of one reverse step.
pub struct BackwardArgs<'a> {
    /// Step index `i` being differentiated.
    pub step: usize,

    /// Upstream gradient of every output at step `i`, including what later
    /// steps already chained back into it.
    pub upstream: Vec<ArrayViewD<'a, f64>>,

    /// The exact forward arguments of step `i`.
    pub inputs: StepArgs<'a>,

    /// Forward result of every output at step `i`.
    pub outputs: Vec<ArrayViewD<'a, f64>>,
}

/// Per-tap gradient contributions returned by a backward evaluator.
///
/// Each list lines up one-to-one with the matching section of
/// [`StepArgs`]; every entry has that slice's shape.
#[derive(Clone, Debug, Default)]
pub struct StepGradients {
    pub sequences: Vec<Tensor>,
    pub states: Vec<Tensor>,
    pub params: Vec<Tensor>,
}

impl StepGradients {
    /// Split a flat contribution list in argument order.
    pub fn from_flat(mut flat: Vec<Tensor>, n_sequence: usize, n_state: usize) -> Result<Self> {
        if flat.len() < n_sequence + n_state {
            return Err(ScanError::arity(
                "flat gradient contributions",
                n_sequence + n_state,
                flat.len(),
            ));
        }
        let params = flat.split_off(n_sequence + n_state);
        let states = flat.split_off(n_sequence);
        Ok(Self {
            sequences: flat,
            states,
            params,
        })
    }
}

/// The forward per-step computation.
pub trait StepEvaluator: Send + Sync {
    /// Produce one new value per state, in state order.
    fn evaluate(&self, args: &StepArgs<'_>) -> anyhow::Result<Vec<Tensor>>;

    /// Derive the matching backward evaluator. Evaluators without a
    /// derivative keep the default and make every output non-differentiable.
    fn derive_backward(&self) -> Result<Arc<dyn BackwardEvaluator>> {
        Err(ScanError::NotDifferentiable(
            "step evaluator provides no backward evaluator".to_string(),
        ))
    }
}

/// The reverse per-step computation.
pub trait BackwardEvaluator: Send + Sync {
    fn evaluate(&self, args: &BackwardArgs<'_>) -> anyhow::Result<StepGradients>;
}

type StepFnBox = Box<dyn Fn(&StepArgs<'_>) -> anyhow::Result<Vec<Tensor>> + Send + Sync>;
type BackwardFnArc = Arc<dyn Fn(&BackwardArgs<'_>) -> anyhow::Result<StepGradients> + Send + Sync>;

/// Closure-backed evaluator, with an optional closure-backed derivative.
pub struct FnStep {
    step: StepFnBox,
    backward: Option<BackwardFnArc>,
}

impl FnStep {
    pub fn new<F>(step: F) -> Self
    where
        F: Fn(&StepArgs<'_>) -> anyhow::Result<Vec<Tensor>> + Send + Sync + 'static,
    {
        Self {
            step: Box::new(step),
            backward: None,
        }
    }

    pub fn with_backward<B>(mut self, backward: B) -> Self
    where
        B: Fn(&BackwardArgs<'_>) -> anyhow::Result<StepGradients> + Send + Sync + 'static,
    {
        self.backward = Some(Arc::new(backward));
        self
    }
}

impl StepEvaluator for FnStep {
    fn evaluate(&self, args: &StepArgs<'_>) -> anyhow::Result<Vec<Tensor>> {
        (self.step)(args)
    }

    fn derive_backward(&self) -> Result<Arc<dyn BackwardEvaluator>> {
        match &self.backward {
            Some(b) => Ok(Arc::new(FnBackward(Arc::clone(b)))),
            None => Err(ScanError::NotDifferentiable(
                "closure evaluator was built without a backward closure".to_string(),
            )),
        }
    }
}

struct FnBackward(BackwardFnArc);

impl BackwardEvaluator for FnBackward {
    fn evaluate(&self, args: &BackwardArgs<'_>) -> anyhow::Result<StepGradients> {
        (self.0)(args)
    }
}

/// A step evaluator together with the key that identifies it.
///
/// Two handles are the same evaluator iff their keys are equal; the external
/// compilation layer chooses keys (e.g. a digest of the traced graph).
#[derive(Clone)]
pub struct EvaluatorHandle {
    key: String,
    inner: Arc<dyn StepEvaluator>,
}

impl EvaluatorHandle {
    pub fn new(key: impl Into<String>, evaluator: impl StepEvaluator + 'static) -> Self {
        Self {
            key: key.into(),
            inner: Arc::new(evaluator),
        }
    }

    pub fn from_arc(key: impl Into<String>, evaluator: Arc<dyn StepEvaluator>) -> Self {
        Self {
            key: key.into(),
            inner: evaluator,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn evaluator(&self) -> &dyn StepEvaluator {
        self.inner.as_ref()
    }
}

impl fmt::Debug for EvaluatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorHandle")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl PartialEq for EvaluatorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for EvaluatorHandle {}
