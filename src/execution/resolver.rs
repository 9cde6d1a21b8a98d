//! Tap resolver: how many steps a run can take.
//!
//! For a sequence of length `len` tapped at offsets `T`, step `e` reads row
//! `e - min(T) + t` for each `t ∈ T`, so the usable length is
//!
//! ```text
//! L = len + min(T) - max(0, max(T))
//! ```
//!
//! The step count is the smallest `L` over tapped sequences, or the explicit
//! count clipped down to it.

use crate::core::{RecurrenceConfig, TapSet};
use crate::error::{Result, ScanError};
use crate::runtime::{Diagnostic, DiagnosticSink};

/// Outcome of step-count resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub n_steps: usize,

    /// Smallest tap offset per sequence (`None` when unused).
    pub sequence_min: Vec<Option<i64>>,

    /// Smallest tap offset per state (`None` when unused).
    pub state_min: Vec<Option<i64>>,
}

/// Usable length of a sequence under `taps`; `None` when unused.
pub fn usable_length(len: usize, taps: &TapSet) -> Option<usize> {
    let (min, max) = (taps.min()?, taps.max()?);
    let usable = len as i64 + min - max.max(0);
    Some(usable.max(0) as usize)
}

/// Resolve the step count for one run.
pub fn resolve_steps(
    config: &RecurrenceConfig,
    explicit: Option<usize>,
    sequence_lengths: &[usize],
    sink: &dyn DiagnosticSink,
) -> Result<Resolution> {
    if sequence_lengths.len() != config.n_sequences() {
        return Err(ScanError::arity(
            "sequence inputs",
            config.n_sequences(),
            sequence_lengths.len(),
        ));
    }

    let sequence_min: Vec<Option<i64>> = config.sequence_taps().iter().map(TapSet::min).collect();
    let state_min: Vec<Option<i64>> = config.state_taps().iter().map(TapSet::min).collect();

    let mut n_steps = explicit;
    for (i, taps) in config.sequence_taps().used() {
        let Some(usable) = usable_length(sequence_lengths[i], taps) else {
            continue;
        };
        match n_steps {
            None => n_steps = Some(usable),
            Some(current) if usable != current => {
                sink.emit(Diagnostic::LengthMismatch {
                    sequence: i,
                    usable,
                    n_steps: current,
                });
                n_steps = Some(usable.min(current));
            }
            Some(_) => {}
        }
    }

    let n_steps = n_steps.ok_or(ScanError::MissingStepCount)?;
    Ok(Resolution {
        n_steps,
        sequence_min,
        state_min,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EvaluatorHandle, FnStep};
    use crate::runtime::CollectingSink;

    fn config(seq_taps: Vec<TapSet>, states: usize) -> RecurrenceConfig {
        let mut b = RecurrenceConfig::builder(EvaluatorHandle::new("r", FnStep::new(|_| Ok(vec![]))))
            .sequences(seq_taps.len())
            .states(states);
        for (i, t) in seq_taps.into_iter().enumerate() {
            b = b.sequence_taps(i, t);
        }
        b.build().unwrap()
    }

    #[test]
    fn test_usable_length_formula() {
        assert_eq!(usable_length(10, &TapSet::single(0)), Some(10));
        assert_eq!(usable_length(10, &TapSet::new(vec![-2, 0]).unwrap()), Some(8));
        assert_eq!(usable_length(10, &TapSet::new(vec![-1, 2]).unwrap()), Some(7));
        // positive-only taps are relative to their minimum
        assert_eq!(usable_length(10, &TapSet::new(vec![1, 3]).unwrap()), Some(8));
        assert_eq!(usable_length(1, &TapSet::new(vec![-3, 0]).unwrap()), Some(0));
        assert_eq!(usable_length(10, &TapSet::unused()), None);
    }

    #[test]
    fn test_min_over_sequences_with_warning() {
        let c = config(vec![TapSet::single(0), TapSet::new(vec![-1, 0]).unwrap()], 1);
        let sink = CollectingSink::new();
        let r = resolve_steps(&c, None, &[5, 5], &sink).unwrap();
        assert_eq!(r.n_steps, 4);
        assert_eq!(
            sink.events(),
            vec![Diagnostic::LengthMismatch {
                sequence: 1,
                usable: 4,
                n_steps: 5
            }]
        );
        assert_eq!(r.sequence_min, vec![Some(0), Some(-1)]);
        assert_eq!(r.state_min, vec![Some(-1)]);
    }

    #[test]
    fn test_explicit_count_clipped() {
        let c = config(vec![TapSet::single(0)], 1);
        let sink = CollectingSink::new();
        let r = resolve_steps(&c, Some(10), &[4], &sink).unwrap();
        assert_eq!(r.n_steps, 4);
        assert_eq!(sink.len(), 1);

        let sink = CollectingSink::new();
        let r = resolve_steps(&c, Some(3), &[4], &sink).unwrap();
        // longer sequence still warns, count stays
        assert_eq!(r.n_steps, 3);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_unused_sequences_do_not_count() {
        let c = config(vec![TapSet::unused()], 1);
        let sink = CollectingSink::new();
        let err = resolve_steps(&c, None, &[7], &sink).unwrap_err();
        assert!(matches!(err, ScanError::MissingStepCount));

        let r = resolve_steps(&c, Some(2), &[7], &sink).unwrap();
        assert_eq!(r.n_steps, 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_no_sequences_no_count_is_fatal() {
        let c = config(vec![], 1);
        let err = resolve_steps(&c, None, &[], &CollectingSink::new()).unwrap_err();
        assert!(matches!(err, ScanError::MissingStepCount));
    }

    #[test]
    fn test_wrong_sequence_arity() {
        let c = config(vec![TapSet::single(0)], 0);
        let err = resolve_steps(&c, None, &[], &CollectingSink::new()).unwrap_err();
        assert!(matches!(err, ScanError::Arity { .. }));
    }
}
