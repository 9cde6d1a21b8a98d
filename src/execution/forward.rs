//! Forward scan executor.
//!
//! Runs the step evaluator `n` times in order, feeding each step the tapped
//! sequence rows, the tapped state history and the non-varying parameters,
//! and records every state's result according to its retention policy.

use ndarray::{Axis, IxDyn};

use super::inplace::{assign_buffers, check_aliased_buffer, BufferSource};
use super::resolver::resolve_steps;
use super::slices::{Assembler, History};
use crate::core::{plan_buffer_shape, RecurrenceConfig, Retention, StepSource, TapSet};
use crate::error::{Result, ScanError};
use crate::runtime::{Diagnostic, DiagnosticSink};
use crate::{lift_single, Tensor};

/// Concrete arrays for one run.
///
/// Sequences and seeds carry the time axis first. A seed holds the history
/// before step 0, oldest row first; use [`ScanInputs::with_seed_value`] for
/// a single initial value.
#[derive(Clone, Debug, Default)]
pub struct ScanInputs {
    pub n_steps: Option<usize>,
    pub sequences: Vec<Tensor>,
    pub seeds: Vec<Tensor>,
    pub params: Vec<Tensor>,
}

impl ScanInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(mut self, n_steps: usize) -> Self {
        self.n_steps = Some(n_steps);
        self
    }

    pub fn with_sequence(mut self, sequence: Tensor) -> Self {
        self.sequences.push(sequence);
        self
    }

    pub fn with_seed(mut self, seed: Tensor) -> Self {
        self.seeds.push(seed);
        self
    }

    /// Seed from one value (no time axis yet).
    pub fn with_seed_value(self, value: Tensor) -> Self {
        self.with_seed(lift_single(value))
    }

    pub fn with_param(mut self, param: Tensor) -> Self {
        self.params.push(param);
        self
    }

    /// Split a flat `[sequences… | seeds… | params…]` list by `config`'s counts.
    pub fn from_ordered(
        config: &RecurrenceConfig,
        n_steps: Option<usize>,
        mut args: Vec<Tensor>,
    ) -> Result<Self> {
        let n_seq = config.n_sequences();
        let n_state = config.n_states();
        let expected = n_seq + n_state + config.n_params();
        if args.len() != expected {
            return Err(ScanError::arity("ordered scan arguments", expected, args.len()));
        }
        let params = args.split_off(n_seq + n_state);
        let seeds = args.split_off(n_seq);
        Ok(Self {
            n_steps,
            sequences: args,
            seeds,
            params,
        })
    }
}

/// Recorded outputs, in state order.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanOutputs {
    pub outputs: Vec<Tensor>,
    pub n_steps: usize,
}

impl ScanOutputs {
    pub fn output(&self, state: usize) -> Option<&Tensor> {
        self.outputs.get(state)
    }

    pub fn into_outputs(self) -> Vec<Tensor> {
        self.outputs
    }
}

/// Run the forward recurrence.
///
/// Inputs are taken by value: an aliased sequence buffer is moved into the
/// output it backs and returned as that output.
pub fn run_scan(
    config: &RecurrenceConfig,
    inputs: ScanInputs,
    sink: &dyn DiagnosticSink,
) -> Result<ScanOutputs> {
    let ScanInputs {
        n_steps: explicit,
        mut sequences,
        seeds,
        params,
    } = inputs;

    check_arity(config, &sequences, &seeds, &params)?;
    match (config.step_source(), explicit) {
        (StepSource::Inferred, Some(n)) => {
            return Err(ScanError::config(format!(
                "step count {} supplied, but this configuration infers it from its sequences",
                n
            )))
        }
        (StepSource::Explicit, None) => return Err(ScanError::MissingStepCount),
        _ => {}
    }
    for (i, seq) in sequences.iter().enumerate() {
        if seq.ndim() == 0 {
            return Err(ScanError::config(format!("sequence {} has no time axis", i)));
        }
    }
    for (i, seed) in seeds.iter().enumerate() {
        if seed.ndim() == 0 {
            return Err(ScanError::config(format!(
                "seed of state {} has no history axis; wrap single values with lift_single",
                i
            )));
        }
    }

    let lengths: Vec<usize> = sequences.iter().map(|s| s.len_of(Axis(0))).collect();
    let resolution = resolve_steps(config, explicit, &lengths, sink)?;
    let n_steps = resolution.n_steps;

    check_retention(config)?;
    check_seeds(config, &seeds, sink);

    tracing::debug!(
        n_steps,
        direction = ?config.direction(),
        evaluator = config.evaluator().key(),
        "forward scan starting"
    );

    let row_shapes: Vec<Vec<usize>> = seeds.iter().map(|s| s.shape()[1..].to_vec()).collect();
    let mut buffers: Vec<Tensor> = Vec::with_capacity(config.n_states());
    let mut backing: Vec<Option<usize>> = vec![None; config.n_sequences()];
    for (i, source) in assign_buffers(config).into_iter().enumerate() {
        match source {
            BufferSource::Fresh => {
                let shape = plan_buffer_shape(config.retention(i), n_steps, &row_shapes[i]);
                buffers.push(Tensor::zeros(IxDyn(&shape)));
            }
            BufferSource::Sequence(s) => {
                check_aliased_buffer(i, s, &sequences[s], n_steps, &row_shapes[i])?;
                buffers.push(std::mem::replace(
                    &mut sequences[s],
                    Tensor::zeros(IxDyn(&[0])),
                ));
                backing[s] = Some(i);
            }
        }
    }

    let assembler = Assembler::new(config, n_steps, &resolution.sequence_min);
    let evaluator = config.step_evaluator();
    for step in 0..n_steps {
        let results = {
            let seq_refs: Vec<&Tensor> = sequences
                .iter()
                .zip(&backing)
                .map(|(seq, owner)| match owner {
                    Some(o) => &buffers[*o],
                    None => seq,
                })
                .collect();
            let history = history_views(config, &buffers);
            let args = assembler.assemble(step, &seq_refs, &seeds, &history, &params, sink);
            evaluator
                .evaluate(&args)
                .map_err(|source| ScanError::Evaluator { step, source })?
        };

        if results.len() != config.n_states() {
            return Err(ScanError::arity("step results", config.n_states(), results.len()));
        }
        for (i, result) in results.iter().enumerate() {
            if result.shape() != row_shapes[i].as_slice() {
                return Err(ScanError::shape(
                    format!("result of state {} at step {}", i, step),
                    &row_shapes[i],
                    result.shape(),
                ));
            }
            match config.retention(i) {
                Retention::All => buffers[i].index_axis_mut(Axis(0), step).assign(result),
                Retention::Last => buffers[i].assign(result),
                Retention::LastK(k) => {
                    return Err(ScanError::NotImplemented(format!(
                        "writes under last-{} retention",
                        k
                    )))
                }
            }
        }
    }

    tracing::debug!(n_steps, "forward scan complete");
    Ok(ScanOutputs {
        outputs: buffers,
        n_steps,
    })
}

/// Read views of each state's buffer under its retention.
pub(crate) fn history_views<'a>(config: &RecurrenceConfig, buffers: &'a [Tensor]) -> Vec<History<'a>> {
    buffers
        .iter()
        .enumerate()
        .map(|(i, b)| match config.retention(i) {
            Retention::All => History::Rows(b),
            _ => History::Latest(b),
        })
        .collect()
}

pub(crate) fn check_arity(
    config: &RecurrenceConfig,
    sequences: &[Tensor],
    seeds: &[Tensor],
    params: &[Tensor],
) -> Result<()> {
    if sequences.len() != config.n_sequences() {
        return Err(ScanError::arity("sequences", config.n_sequences(), sequences.len()));
    }
    if seeds.len() != config.n_states() {
        return Err(ScanError::arity("state seeds", config.n_states(), seeds.len()));
    }
    if params.len() != config.n_params() {
        return Err(ScanError::arity("non-varying parameters", config.n_params(), params.len()));
    }
    Ok(())
}

/// Warn once per state whose seed is shallower than its deepest tap.
pub(crate) fn check_seeds(config: &RecurrenceConfig, seeds: &[Tensor], sink: &dyn DiagnosticSink) {
    for (i, taps) in config.state_taps().used() {
        let required = taps.min().map_or(0, |m| m.unsigned_abs() as usize);
        let provided = seeds[i].len_of(Axis(0));
        if provided < required {
            sink.emit(Diagnostic::ShortSeed {
                state: i,
                provided,
                required,
            });
        }
    }
}

fn check_retention(config: &RecurrenceConfig) -> Result<()> {
    let latest_only = TapSet::single(crate::config::DEFAULT_STATE_TAP);
    for (i, taps) in config.state_taps().iter().enumerate() {
        match config.retention(i) {
            Retention::All => {}
            Retention::LastK(k) => {
                return Err(ScanError::NotImplemented(format!(
                    "state {} requests last-{} retention",
                    i, k
                )))
            }
            Retention::Last => {
                if taps.is_used() && *taps != latest_only {
                    return Err(ScanError::NotImplemented(format!(
                        "state {} keeps only its last value but taps {:?}",
                        i,
                        taps.offsets()
                    )));
                }
            }
        }
    }
    Ok(())
}
