//! Truncated backpropagation through time.
//!
//! The reverse pass walks steps `n-1, n-2, …` and, at each step, replays the
//! exact forward argument assembly, asks the backward evaluator for per-tap
//! contributions and scatters them:
//!
//! ```text
//! sequence tap  → row of the sequence gradient (same direction mapping)
//! state tap     → seed gradient row        when it read the seed
//!               → upstream carry at i+tap  when it read an earlier output
//! parameter     → summed over visited steps
//! ```
//!
//! Chaining into the carry is what propagates through time; a truncation
//! depth `d` stops the walk after `d` steps and leaves earlier
//! contributions at zero.

use std::sync::Arc;

use ndarray::{ArrayViewD, ArrayViewMutD, Axis};

use crate::core::{
    BackwardArgs, BackwardEvaluator, RecurrenceConfig, StepGradients, TapMap, TapSet, Truncation,
};
use crate::error::{Result, ScanError};
use crate::execution::forward::{check_arity, history_views};
use crate::execution::slices::{effective_index, history_row, sequence_row, Assembler, HistoryRow};
use crate::execution::{usable_length, ScanInputs, ScanOutputs};
use crate::runtime::DiagnosticSink;
use crate::Tensor;

/// Backward side of a configuration, derived once per configuration: the
/// backward evaluator with the tap sets and truncation it runs under.
pub struct GradientConfig {
    backward: Arc<dyn BackwardEvaluator>,
    sequence_taps: TapMap,
    state_taps: TapMap,
    truncation: Truncation,
}

impl GradientConfig {
    /// Refuse configurations whose outputs cannot be differentiated, then
    /// derive the backward evaluator.
    pub(crate) fn derive(config: &RecurrenceConfig) -> Result<Self> {
        if let Some((i, r)) = config
            .retentions()
            .iter()
            .enumerate()
            .find(|(_, r)| !r.keeps_all())
        {
            return Err(ScanError::NotDifferentiable(format!(
                "state {} is recorded with {:?} retention; the reverse pass needs every step",
                i, r
            )));
        }
        if let Some(aliases) = config.active_aliases() {
            return Err(ScanError::NotDifferentiable(format!(
                "in-place aliases {:?} overwrite the sequences the reverse pass reads",
                aliases
            )));
        }
        let backward = config.step_evaluator().derive_backward()?;
        Ok(Self {
            backward,
            sequence_taps: config.sequence_taps().clone(),
            state_taps: config.state_taps().clone(),
            truncation: config.truncation(),
        })
    }

    pub fn backward(&self) -> &dyn BackwardEvaluator {
        self.backward.as_ref()
    }

    pub fn sequence_taps(&self) -> &TapMap {
        &self.sequence_taps
    }

    pub fn state_taps(&self) -> &TapMap {
        &self.state_taps
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }
}

/// What the reverse pass reads: the forward run plus upstream gradients.
#[derive(Clone, Copy)]
pub struct GradientInputs<'a> {
    pub n_steps: usize,

    /// One per state, shaped like that state's full output.
    pub upstream: &'a [Tensor],
    pub sequences: &'a [Tensor],

    /// Forward outputs, every step retained.
    pub outputs: &'a [Tensor],
    pub seeds: &'a [Tensor],
    pub params: &'a [Tensor],
}

impl<'a> GradientInputs<'a> {
    /// Pair a forward run with its inputs.
    pub fn from_run(inputs: &'a ScanInputs, forward: &'a ScanOutputs, upstream: &'a [Tensor]) -> Self {
        Self {
            n_steps: forward.n_steps,
            upstream,
            sequences: &inputs.sequences,
            outputs: &forward.outputs,
            seeds: &inputs.seeds,
            params: &inputs.params,
        }
    }
}

/// Accumulated gradients, shaped like the arrays they differentiate.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanGradients {
    pub sequences: Vec<Tensor>,
    pub seeds: Vec<Tensor>,
    pub params: Vec<Tensor>,
    pub steps_visited: usize,
}

pub fn run_gradient(
    config: &RecurrenceConfig,
    inputs: GradientInputs<'_>,
    sink: &dyn DiagnosticSink,
) -> Result<ScanGradients> {
    let gradient = config.gradient_config()?;
    let n = inputs.n_steps;
    let row_shapes = check_inputs(config, &inputs)?;

    let mut g_seq: Vec<Tensor> = inputs.sequences.iter().map(|s| Tensor::zeros(s.raw_dim())).collect();
    let mut g_seed: Vec<Tensor> = inputs.seeds.iter().map(|s| Tensor::zeros(s.raw_dim())).collect();
    let mut g_param: Vec<Tensor> = inputs.params.iter().map(|p| Tensor::zeros(p.raw_dim())).collect();
    let mut carry: Vec<Tensor> = inputs.upstream.to_vec();

    let sequence_min: Vec<Option<i64>> = gradient.sequence_taps().iter().map(TapSet::min).collect();
    let assembler = Assembler::new(config, n, &sequence_min);
    let seq_refs: Vec<&Tensor> = inputs.sequences.iter().collect();
    let history = history_views(config, inputs.outputs);

    let lowest = (gradient.truncation().stop_before(n) + 1) as usize;
    tracing::debug!(
        n_steps = n,
        truncation = gradient.truncation().depth(),
        direction = ?config.direction(),
        "reverse pass starting"
    );

    for i in (lowest..n).rev() {
        let contributions = {
            let upstream: Vec<ArrayViewD<'_, f64>> =
                carry.iter().map(|c| c.index_axis(Axis(0), i)).collect();
            let outputs: Vec<ArrayViewD<'_, f64>> =
                inputs.outputs.iter().map(|o| o.index_axis(Axis(0), i)).collect();
            let args = BackwardArgs {
                step: i,
                upstream,
                inputs: assembler.assemble(i, &seq_refs, inputs.seeds, &history, inputs.params, sink),
                outputs,
            };
            gradient
                .backward()
                .evaluate(&args)
                .map_err(|source| ScanError::Evaluator { step: i, source })?
        };
        check_counts(gradient, config.n_params(), i, &contributions)?;

        let e = effective_index(config.direction(), i, n);
        let mut k = 0;
        for (j, taps) in gradient.sequence_taps().used() {
            let min = sequence_min[j].unwrap_or(0);
            for &tap in taps.offsets() {
                let row = sequence_row(e, min, tap);
                accumulate(
                    g_seq[j].index_axis_mut(Axis(0), row),
                    &contributions.sequences[k],
                    || format!("gradient of sequence {} tap {} at step {}", j, tap, i),
                )?;
                k += 1;
            }
        }

        let mut k = 0;
        for (j, taps) in gradient.state_taps().used() {
            let seed_rows = inputs.seeds[j].len_of(Axis(0));
            for &tap in taps.offsets() {
                let g = &contributions.states[k];
                k += 1;
                if g.shape() != row_shapes[j].as_slice() {
                    return Err(ScanError::shape(
                        format!("gradient of state {} tap {} at step {}", j, tap, i),
                        &row_shapes[j],
                        g.shape(),
                    ));
                }
                match history_row(i, tap, seed_rows) {
                    HistoryRow::Output(row) => {
                        let mut target = carry[j].index_axis_mut(Axis(0), row);
                        target += g;
                    }
                    HistoryRow::Seed(row) => {
                        let mut target = g_seed[j].index_axis_mut(Axis(0), row);
                        target += g;
                    }
                    // zero-substituted slice: nothing to differentiate
                    HistoryRow::Missing => {}
                }
            }
        }

        for (p, g) in contributions.params.iter().enumerate() {
            accumulate(g_param[p].view_mut(), g, || {
                format!("gradient of parameter {} at step {}", p, i)
            })?;
        }
    }

    let steps_visited = n - lowest;
    tracing::debug!(steps_visited, "reverse pass complete");
    Ok(ScanGradients {
        sequences: g_seq,
        seeds: g_seed,
        params: g_param,
        steps_visited,
    })
}

/// Validate shapes up front; returns each state's row shape.
fn check_inputs(config: &RecurrenceConfig, inputs: &GradientInputs<'_>) -> Result<Vec<Vec<usize>>> {
    check_arity(config, inputs.sequences, inputs.seeds, inputs.params)?;
    if inputs.outputs.len() != config.n_states() {
        return Err(ScanError::arity("forward outputs", config.n_states(), inputs.outputs.len()));
    }
    if inputs.upstream.len() != config.n_states() {
        return Err(ScanError::arity(
            "upstream gradients",
            config.n_states(),
            inputs.upstream.len(),
        ));
    }

    let mut row_shapes = Vec::with_capacity(config.n_states());
    for (i, seed) in inputs.seeds.iter().enumerate() {
        if seed.ndim() == 0 {
            return Err(ScanError::config(format!("seed of state {} has no history axis", i)));
        }
        let row = seed.shape()[1..].to_vec();
        let mut full = vec![inputs.n_steps];
        full.extend_from_slice(&row);
        if inputs.outputs[i].shape() != full.as_slice() {
            return Err(ScanError::shape(
                format!("forward output of state {}", i),
                &full,
                inputs.outputs[i].shape(),
            ));
        }
        if inputs.upstream[i].shape() != full.as_slice() {
            return Err(ScanError::shape(
                format!("upstream gradient of state {}", i),
                &full,
                inputs.upstream[i].shape(),
            ));
        }
        row_shapes.push(row);
    }

    for (i, taps) in config.sequence_taps().used() {
        let seq = &inputs.sequences[i];
        let usable = if seq.ndim() == 0 {
            0
        } else {
            usable_length(seq.len_of(Axis(0)), taps).unwrap_or(0)
        };
        if usable < inputs.n_steps {
            return Err(ScanError::config(format!(
                "sequence {} covers {} steps, the forward run took {}",
                i, usable, inputs.n_steps
            )));
        }
    }
    Ok(row_shapes)
}

fn check_counts(gradient: &GradientConfig, n_params: usize, step: usize, g: &StepGradients) -> Result<()> {
    let expected = [
        ("sequence", gradient.sequence_taps().slice_count(), g.sequences.len()),
        ("state", gradient.state_taps().slice_count(), g.states.len()),
        ("parameter", n_params, g.params.len()),
    ];
    for (what, want, got) in expected {
        if want != got {
            return Err(ScanError::arity(
                format!("{} gradient contributions at step {}", what, step),
                want,
                got,
            ));
        }
    }
    Ok(())
}

/// `target += g` without broadcasting.
fn accumulate(mut target: ArrayViewMutD<'_, f64>, g: &Tensor, what: impl FnOnce() -> String) -> Result<()> {
    if target.shape() != g.shape() {
        return Err(ScanError::shape(what(), target.shape(), g.shape()));
    }
    target += g;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FINITE_DIFF_EPSILON, GRADIENT_TOLERANCE};
    use crate::core::{Direction, EvaluatorHandle, FnStep, Retention, StepArgs, StepEvaluator, Truncation};
    use crate::execution::{make_inplace, run_scan};
    use crate::learning::finite_diff::{max_abs_diff, numeric_gradient};
    use crate::runtime::CollectingSink;
    use crate::scalar;
    use ndarray::Array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn vector(values: &[f64]) -> Tensor {
        Array::from(values.to_vec()).into_dyn()
    }

    fn values(t: &Tensor) -> Vec<f64> {
        t.iter().copied().collect()
    }

    /// y_t = y_{t-1} · x_t
    fn product_step() -> FnStep {
        FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] * &args.sequences()[0]])).with_backward(
            |b: &BackwardArgs<'_>| {
                let g = &b.upstream[0];
                Ok(StepGradients {
                    sequences: vec![g * &b.inputs.states()[0]],
                    states: vec![g * &b.inputs.sequences()[0]],
                    params: vec![],
                })
            },
        )
    }

    fn product(direction: Direction, truncation: Truncation) -> RecurrenceConfig {
        RecurrenceConfig::builder(EvaluatorHandle::new("product", product_step()))
            .sequences(1)
            .states(1)
            .direction(direction)
            .truncation(truncation)
            .build()
            .unwrap()
    }

    fn inputs_for(seq: &Tensor) -> ScanInputs {
        ScanInputs::new()
            .with_sequence(seq.clone())
            .with_seed_value(scalar(1.0))
    }

    /// Gradient of `sum(y)` through the engine.
    fn grad_of_sum(config: &RecurrenceConfig, seq: &Tensor) -> ScanGradients {
        let inputs = inputs_for(seq);
        let forward = run_scan(config, inputs.clone(), &CollectingSink::new()).unwrap();
        let upstream = vec![Tensor::ones(forward.outputs[0].raw_dim())];
        run_gradient(
            config,
            GradientInputs::from_run(&inputs, &forward, &upstream),
            &CollectingSink::new(),
        )
        .unwrap()
    }

    fn sum_of_outputs(config: &RecurrenceConfig, seq: &Tensor) -> Result<f64> {
        let out = run_scan(config, inputs_for(seq), &CollectingSink::new())?;
        Ok(out.outputs[0].sum())
    }

    #[test]
    fn test_product_gradient_worked_example() {
        let config = product(Direction::Forward, Truncation::Unbounded);
        let seq = vector(&[2.0, 3.0, 1.0, 4.0]);
        let g = grad_of_sum(&config, &seq);
        assert_eq!(values(&g.sequences[0]), vec![19.0, 12.0, 30.0, 6.0]);
        assert_eq!(values(&g.seeds[0]), vec![38.0]);
        assert_eq!(g.steps_visited, 4);
    }

    #[test]
    fn test_product_gradient_matches_finite_differences() {
        let config = product(Direction::Forward, Truncation::Unbounded);
        let seq = vector(&[2.0, 3.0, 1.0, 4.0]);
        let analytic = grad_of_sum(&config, &seq);
        let numeric =
            numeric_gradient(|x| sum_of_outputs(&config, x), &seq, FINITE_DIFF_EPSILON).unwrap();
        assert!(max_abs_diff(&analytic.sequences[0], &numeric).unwrap() < GRADIENT_TOLERANCE);
    }

    #[test]
    fn test_backward_direction_matches_finite_differences() {
        let config = product(Direction::Backward, Truncation::Unbounded);
        let seq = vector(&[0.5, -1.5, 2.0, 1.25, 0.75]);
        let analytic = grad_of_sum(&config, &seq);
        let numeric =
            numeric_gradient(|x| sum_of_outputs(&config, x), &seq, FINITE_DIFF_EPSILON).unwrap();
        assert!(max_abs_diff(&analytic.sequences[0], &numeric).unwrap() < GRADIENT_TOLERANCE);
    }

    #[test]
    fn test_truncation_zeroes_early_steps() {
        let seq = vector(&[2.0, 3.0, 1.0, 4.0]);
        let g = grad_of_sum(&product(Direction::Forward, Truncation::Steps(2)), &seq);
        assert_eq!(values(&g.sequences[0]), vec![0.0, 0.0, 30.0, 6.0]);
        assert_eq!(values(&g.seeds[0]), vec![0.0]);
        assert_eq!(g.steps_visited, 2);

        let none = grad_of_sum(&product(Direction::Forward, Truncation::Steps(0)), &seq);
        assert_eq!(none.steps_visited, 0);
        assert!(none.sequences[0].iter().all(|&v| v == 0.0));

        let deep = grad_of_sum(&product(Direction::Forward, Truncation::Steps(10)), &seq);
        let full = grad_of_sum(&product(Direction::Forward, Truncation::Unbounded), &seq);
        assert_eq!(deep, full);
    }

    #[test]
    fn test_depth_beyond_any_run_is_full_gradient() {
        let seq = vector(&[2.0, 3.0, 1.0, 4.0]);
        let g = grad_of_sum(&product(Direction::Forward, Truncation::Steps(usize::MAX)), &seq);
        assert_eq!(g.steps_visited, 4);
        assert_eq!(values(&g.sequences[0]), vec![19.0, 12.0, 30.0, 6.0]);
        assert_eq!(values(&g.seeds[0]), vec![38.0]);
    }

    #[test]
    fn test_gradient_config_carries_taps_and_truncation() {
        let config = product(Direction::Forward, Truncation::Steps(3))
            .to_builder()
            .state_taps(0, TapSet::new(vec![-2, -1]).unwrap())
            .build()
            .unwrap();
        let gradient = config.gradient_config().unwrap();
        assert_eq!(gradient.truncation(), Truncation::Steps(3));
        assert_eq!(gradient.state_taps(), config.state_taps());
        assert_eq!(gradient.sequence_taps().get(0).unwrap().offsets(), &[0]);
    }

    #[test]
    fn test_missing_history_contributions_are_dropped() {
        // y_t = y_{t-2} + 1 with a single seed row: step 0 reads zeros
        let step = FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] + 1.0]))
            .with_backward(|b: &BackwardArgs<'_>| {
                Ok(StepGradients {
                    sequences: vec![],
                    states: vec![b.upstream[0].to_owned()],
                    params: vec![],
                })
            });
        let config = RecurrenceConfig::builder(EvaluatorHandle::new("skip", step))
            .states(1)
            .state_taps(0, TapSet::single(-2))
            .step_source(crate::core::StepSource::Explicit)
            .build()
            .unwrap();
        let inputs = ScanInputs::new().with_steps(3).with_seed(vector(&[5.0]));
        let forward = run_scan(&config, inputs.clone(), &CollectingSink::new()).unwrap();
        assert_eq!(values(&forward.outputs[0]), vec![1.0, 6.0, 2.0]);

        let upstream = vec![Tensor::ones(forward.outputs[0].raw_dim())];
        let sink = CollectingSink::new();
        let g = run_gradient(
            &config,
            GradientInputs::from_run(&inputs, &forward, &upstream),
            &sink,
        )
        .unwrap();
        // step 1 read the seed; step 0's zero slice takes its carry of 2 nowhere
        assert_eq!(values(&g.seeds[0]), vec![1.0]);
        assert_eq!(g.steps_visited, 3);
        assert_eq!(
            sink.events(),
            vec![crate::runtime::Diagnostic::MissingHistory {
                state: 0,
                tap: -2,
                step: 0
            }]
        );
    }

    #[test]
    fn test_seed_gradient_through_two_taps() {
        // y_t = y_{t-2} + y_{t-1}; seed rows are y[-2], y[-1]
        let step = FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] + &args.states()[1]]))
            .with_backward(|b: &BackwardArgs<'_>| {
                let g = b.upstream[0].to_owned();
                Ok(StepGradients {
                    sequences: vec![],
                    states: vec![g.clone(), g],
                    params: vec![],
                })
            });
        let config = RecurrenceConfig::builder(EvaluatorHandle::new("fib", step))
            .states(1)
            .state_taps(0, TapSet::new(vec![-2, -1]).unwrap())
            .step_source(crate::core::StepSource::Explicit)
            .build()
            .unwrap();
        let inputs = ScanInputs::new().with_steps(3).with_seed(vector(&[0.0, 1.0]));
        let forward = run_scan(&config, inputs.clone(), &CollectingSink::new()).unwrap();
        // loss is the last output only: y_2 = 2·y[-2] + 3·y[-1]
        let upstream = vec![vector(&[0.0, 0.0, 1.0])];
        let g = run_gradient(
            &config,
            GradientInputs::from_run(&inputs, &forward, &upstream),
            &CollectingSink::new(),
        )
        .unwrap();
        assert_eq!(values(&g.seeds[0]), vec![2.0, 3.0]);
    }

    #[test]
    fn test_window_taps_scatter_to_rows() {
        let step = FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.sequences()[0] + &args.sequences()[1]]))
            .with_backward(|b: &BackwardArgs<'_>| {
                let g = b.upstream[0].to_owned();
                Ok(StepGradients {
                    sequences: vec![g.clone(), g],
                    states: vec![],
                    params: vec![],
                })
            });
        let config = RecurrenceConfig::builder(EvaluatorHandle::new("window", step))
            .sequences(1)
            .states(1)
            .sequence_taps(0, TapSet::new(vec![-1, 0]).unwrap())
            .state_taps(0, TapSet::unused())
            .build()
            .unwrap();
        let g = grad_of_sum(&config, &vector(&[1.0, 2.0, 3.0, 4.0, 5.0]));
        assert_eq!(values(&g.sequences[0]), vec![1.0, 2.0, 2.0, 2.0, 1.0]);
    }

    #[test]
    fn test_parameter_gradient_summed_over_steps() {
        // y_t = w · y_{t-1} + x_t
        let step = FnStep::new(|args: &StepArgs<'_>| {
            Ok(vec![&args.states()[0] * &args.params()[0] + &args.sequences()[0]])
        })
        .with_backward(|b: &BackwardArgs<'_>| {
            let g = &b.upstream[0];
            Ok(StepGradients {
                sequences: vec![g.to_owned()],
                states: vec![g * &b.inputs.params()[0]],
                params: vec![g * &b.inputs.states()[0]],
            })
        });
        let config = RecurrenceConfig::builder(EvaluatorHandle::new("affine", step))
            .sequences(1)
            .states(1)
            .params(1)
            .build()
            .unwrap();
        let seq = vector(&[1.0, -2.0, 0.5, 3.0]);
        let run = |w: &Tensor| -> Result<f64> {
            let inputs = ScanInputs::new()
                .with_sequence(seq.clone())
                .with_seed_value(scalar(0.25))
                .with_param(w.clone());
            Ok(run_scan(&config, inputs, &CollectingSink::new())?.outputs[0].sum())
        };

        let w = scalar(0.8);
        let inputs = ScanInputs::new()
            .with_sequence(seq.clone())
            .with_seed_value(scalar(0.25))
            .with_param(w.clone());
        let forward = run_scan(&config, inputs.clone(), &CollectingSink::new()).unwrap();
        let upstream = vec![Tensor::ones(forward.outputs[0].raw_dim())];
        let g = run_gradient(
            &config,
            GradientInputs::from_run(&inputs, &forward, &upstream),
            &CollectingSink::new(),
        )
        .unwrap();

        let numeric = numeric_gradient(run, &w, FINITE_DIFF_EPSILON).unwrap();
        assert!(max_abs_diff(&g.params[0], &numeric).unwrap() < GRADIENT_TOLERANCE);
    }

    #[test]
    fn test_not_differentiable_fails_fast() {
        let last = product(Direction::Forward, Truncation::Unbounded)
            .to_builder()
            .retention(0, Retention::Last)
            .build()
            .unwrap();
        assert!(matches!(
            last.gradient_config().err(),
            Some(ScanError::NotDifferentiable(_))
        ));

        let aliased = product(Direction::Forward, Truncation::Unbounded)
            .to_builder()
            .alias(0, 0)
            .build()
            .unwrap();
        assert!(aliased.gradient_config().is_ok());
        let inplace = make_inplace(&aliased).unwrap();
        assert!(matches!(
            inplace.gradient_config().err(),
            Some(ScanError::NotDifferentiable(_))
        ));

        let plain = RecurrenceConfig::builder(EvaluatorHandle::new(
            "plain",
            FnStep::new(|args: &StepArgs<'_>| Ok(vec![args.states()[0].to_owned()])),
        ))
        .states(1)
        .build()
        .unwrap();
        let err = run_gradient(
            &plain,
            GradientInputs {
                n_steps: 0,
                upstream: &[],
                sequences: &[],
                outputs: &[],
                seeds: &[],
                params: &[],
            },
            &CollectingSink::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::NotDifferentiable(_)));
    }

    struct CountingDerive {
        derived: Arc<AtomicUsize>,
    }

    impl StepEvaluator for CountingDerive {
        fn evaluate(&self, args: &StepArgs<'_>) -> anyhow::Result<Vec<Tensor>> {
            Ok(vec![args.states()[0].to_owned()])
        }

        fn derive_backward(&self) -> Result<Arc<dyn BackwardEvaluator>> {
            self.derived.fetch_add(1, Ordering::SeqCst);
            product_step().derive_backward()
        }
    }

    #[test]
    fn test_backward_evaluator_derived_once() {
        let derived = Arc::new(AtomicUsize::new(0));
        let config = RecurrenceConfig::builder(EvaluatorHandle::new(
            "counting",
            CountingDerive {
                derived: Arc::clone(&derived),
            },
        ))
        .sequences(1)
        .states(1)
        .build()
        .unwrap();
        let seq = vector(&[1.0, 2.0]);
        grad_of_sum(&config, &seq);
        grad_of_sum(&config, &seq);
        assert_eq!(derived.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_contributions_are_fatal() {
        let step = FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] * &args.sequences()[0]]))
            .with_backward(|_b: &BackwardArgs<'_>| {
                Ok(StepGradients {
                    sequences: vec![vector(&[1.0, 1.0])],
                    states: vec![scalar(0.0)],
                    params: vec![],
                })
            });
        let config = RecurrenceConfig::builder(EvaluatorHandle::new("bad", step))
            .sequences(1)
            .states(1)
            .build()
            .unwrap();
        let inputs = inputs_for(&vector(&[1.0, 2.0]));
        let forward = run_scan(&config, inputs.clone(), &CollectingSink::new()).unwrap();
        let upstream = vec![Tensor::ones(forward.outputs[0].raw_dim())];
        let err = run_gradient(
            &config,
            GradientInputs::from_run(&inputs, &forward, &upstream),
            &CollectingSink::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Shape { .. }));

        let short_upstream = vec![Tensor::ones(ndarray::IxDyn(&[1]))];
        let err = run_gradient(
            &config,
            GradientInputs::from_run(&inputs, &forward, &short_upstream),
            &CollectingSink::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScanError::Shape { .. }));
    }
}
