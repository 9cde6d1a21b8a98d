//! tapscan: tap-indexed recurrence engine
//!
//! Small demonstrations of the engine from the command line.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ndarray::Array;
use tracing_subscriber::EnvFilter;

use tapscan::core::{BackwardArgs, StepArgs, StepGradients};
use tapscan::learning::max_abs_diff;
use tapscan::runtime::ScanOptions;
use tapscan::{
    numeric_gradient, run_gradient, run_scan, scalar, EvaluatorHandle, FnStep, GradientInputs,
    RecurrenceConfig, ScanInputs, Tensor, TracingSink,
};

/// Tap-indexed recurrence CLI.
#[derive(Parser, Debug)]
#[command(name = "tapscan", about = "tapscan: tap-indexed recurrence engine", version)]
struct Cli {
    /// JSON scan options; their direction and truncation override the flags.
    #[arg(long, global = true)]
    options: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Count up from zero: y_t = y_{t-1} + 1.
    Accumulate {
        #[arg(short = 'n', long, default_value_t = 10)]
        steps: usize,
    },

    /// Running sum of VALUES.
    PrefixSum {
        #[arg(required = true, allow_hyphen_values = true)]
        values: Vec<f64>,

        /// Traverse the values from the end.
        #[arg(long, default_value_t = false)]
        backward: bool,
    },

    /// Gradient of sum(y) for y_t = y_{t-1} * x_t, analytic and numeric.
    ProductGrad {
        #[arg(required = true, allow_hyphen_values = true)]
        values: Vec<f64>,

        /// Reverse-pass depth; -1 is unbounded.
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        truncate: i64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let loaded = match &cli.options {
        Some(path) => Some(ScanOptions::load(path)?),
        None => None,
    };

    match cli.command {
        Command::Accumulate { steps } => accumulate(steps),
        Command::PrefixSum { values, backward } => {
            let backward = loaded.as_ref().map_or(backward, |o| o.go_backwards);
            prefix_sum(&values, backward)
        }
        Command::ProductGrad { values, truncate } => {
            let truncate = loaded.as_ref().map_or(truncate, |o| o.truncate_gradient);
            let backward = loaded.as_ref().is_some_and(|o| o.go_backwards);
            product_grad(&values, truncate, backward)
        }
    }
}

fn accumulate(steps: usize) -> anyhow::Result<()> {
    let handle = EvaluatorHandle::new(
        "accumulate",
        FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] + 1.0])),
    );
    let config = ScanOptions {
        states: 1,
        explicit_steps: true,
        ..Default::default()
    }
    .build(handle)?;

    let inputs = ScanInputs::new().with_steps(steps).with_seed_value(scalar(0.0));
    let out = run_scan(&config, inputs, &TracingSink)?;
    println!("{}", out.outputs[0]);
    Ok(())
}

fn prefix_sum(values: &[f64], backward: bool) -> anyhow::Result<()> {
    let handle = EvaluatorHandle::new(
        "prefix-sum",
        FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] + &args.sequences()[0]])),
    );
    let config = ScanOptions {
        sequences: 1,
        states: 1,
        go_backwards: backward,
        ..Default::default()
    }
    .build(handle)?;

    let inputs = ScanInputs::new()
        .with_sequence(Array::from(values.to_vec()).into_dyn())
        .with_seed_value(scalar(0.0));
    let out = run_scan(&config, inputs, &TracingSink)?;
    println!("{}", out.outputs[0]);
    Ok(())
}

fn product_grad(values: &[f64], truncate: i64, backward: bool) -> anyhow::Result<()> {
    let step = FnStep::new(|args: &StepArgs<'_>| Ok(vec![&args.states()[0] * &args.sequences()[0]]))
        .with_backward(|b: &BackwardArgs<'_>| {
            let g = &b.upstream[0];
            Ok(StepGradients {
                sequences: vec![g * &b.inputs.states()[0]],
                states: vec![g * &b.inputs.sequences()[0]],
                params: vec![],
            })
        });
    let config = ScanOptions {
        sequences: 1,
        states: 1,
        truncate_gradient: truncate,
        go_backwards: backward,
        ..Default::default()
    }
    .build(EvaluatorHandle::new("product", step))?;

    let seq: Tensor = Array::from(values.to_vec()).into_dyn();
    let inputs = ScanInputs::new()
        .with_sequence(seq.clone())
        .with_seed_value(scalar(1.0));
    let forward = run_scan(&config, inputs.clone(), &TracingSink)?;
    let upstream = vec![Tensor::ones(forward.outputs[0].raw_dim())];
    let grads = run_gradient(
        &config,
        GradientInputs::from_run(&inputs, &forward, &upstream),
        &TracingSink,
    )?;

    let numeric = numeric_gradient(
        |x| sum_of_outputs(&config, x),
        &seq,
        tapscan::config::FINITE_DIFF_EPSILON,
    )?;

    println!("outputs:  {}", forward.outputs[0]);
    println!("analytic: {}", grads.sequences[0]);
    println!("numeric:  {}", numeric);
    println!("seed:     {}", grads.seeds[0]);
    let diff = max_abs_diff(&grads.sequences[0], &numeric).context("gradient shapes differ")?;
    tracing::info!(
        steps_visited = grads.steps_visited,
        max_abs_diff = diff,
        "gradient check"
    );
    Ok(())
}

fn sum_of_outputs(config: &RecurrenceConfig, seq: &Tensor) -> tapscan::Result<f64> {
    let inputs = ScanInputs::new()
        .with_sequence(seq.clone())
        .with_seed_value(scalar(1.0));
    Ok(run_scan(config, inputs, &TracingSink)?.outputs[0].sum())
}
