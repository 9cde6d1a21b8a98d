//! Per-step argument assembly, shared by the forward and reverse passes.
//!
//! Both passes must hand the evaluators exactly the same slices for a given
//! step, including seed wraparound and zero substitution, so the row
//! arithmetic lives here once.

use ndarray::{Axis, CowArray, IxDyn};

use crate::core::{Direction, RecurrenceConfig, Slice, StepArgs};
use crate::runtime::{Diagnostic, DiagnosticSink};
use crate::Tensor;

/// Where a state tap reads from at a given step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HistoryRow {
    /// Row of the seed array (before step 0).
    Seed(usize),
    /// Row of the output buffer (an earlier step).
    Output(usize),
    /// Before the seed's first row.
    Missing,
}

/// Resolve state tap `tap` at `step` against a seed with `seed_rows` rows.
pub(crate) fn history_row(step: usize, tap: i64, seed_rows: usize) -> HistoryRow {
    let at = step as i64 + tap;
    if at >= 0 {
        return HistoryRow::Output(at as usize);
    }
    let wrapped = at + seed_rows as i64;
    if wrapped >= 0 {
        HistoryRow::Seed(wrapped as usize)
    } else {
        HistoryRow::Missing
    }
}

/// Index into the sequences for `step`; reversed for backward traversal.
pub(crate) fn effective_index(direction: Direction, step: usize, n_steps: usize) -> usize {
    match direction {
        Direction::Forward => step,
        Direction::Backward => n_steps - 1 - step,
    }
}

/// Physical row of a sequence tap.
pub(crate) fn sequence_row(effective: usize, min_tap: i64, tap: i64) -> usize {
    (effective as i64 - min_tap + tap) as usize
}

/// Read view of a state's recorded outputs.
#[derive(Clone, Copy)]
pub(crate) enum History<'a> {
    /// One row per step (ALL retention).
    Rows(&'a Tensor),
    /// Only the latest value (LAST retention).
    Latest(&'a Tensor),
}

impl<'a> History<'a> {
    fn read(self, row: usize) -> Slice<'a> {
        match self {
            History::Rows(t) => CowArray::from(t.index_axis(Axis(0), row)),
            History::Latest(t) => CowArray::from(t.view()),
        }
    }
}

/// Fixed context of one run.
pub(crate) struct Assembler<'c> {
    config: &'c RecurrenceConfig,
    n_steps: usize,
    sequence_min: &'c [Option<i64>],
}

impl<'c> Assembler<'c> {
    pub(crate) fn new(config: &'c RecurrenceConfig, n_steps: usize, sequence_min: &'c [Option<i64>]) -> Self {
        Self {
            config,
            n_steps,
            sequence_min,
        }
    }

    /// Build the evaluator arguments for `step`.
    pub(crate) fn assemble<'a>(
        &self,
        step: usize,
        sequences: &[&'a Tensor],
        seeds: &'a [Tensor],
        history: &[History<'a>],
        params: &'a [Tensor],
        sink: &dyn DiagnosticSink,
    ) -> StepArgs<'a> {
        let n_seq_slices = self.config.sequence_taps().slice_count();
        let n_state_slices = self.config.state_taps().slice_count();
        let mut slices: Vec<Slice<'a>> =
            Vec::with_capacity(n_seq_slices + n_state_slices + params.len());

        let e = effective_index(self.config.direction(), step, self.n_steps);
        for (j, taps) in self.config.sequence_taps().used() {
            let min = self.sequence_min[j].unwrap_or(0);
            let seq: &'a Tensor = sequences[j];
            for &tap in taps.offsets() {
                let row = sequence_row(e, min, tap);
                slices.push(CowArray::from(seq.index_axis(Axis(0), row)));
            }
        }

        for (j, taps) in self.config.state_taps().used() {
            let seed: &'a Tensor = &seeds[j];
            for &tap in taps.offsets() {
                let slice = match history_row(step, tap, seed.len_of(Axis(0))) {
                    HistoryRow::Output(row) => history[j].read(row),
                    HistoryRow::Seed(row) => CowArray::from(seed.index_axis(Axis(0), row)),
                    HistoryRow::Missing => {
                        sink.emit(Diagnostic::MissingHistory {
                            state: j,
                            tap,
                            step,
                        });
                        CowArray::from(Tensor::zeros(IxDyn(&seed.shape()[1..])))
                    }
                };
                slices.push(slice);
            }
        }

        slices.extend(params.iter().map(|p| CowArray::from(p.view())));
        StepArgs::new(slices, n_seq_slices, n_state_slices)
    }
}
