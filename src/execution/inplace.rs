//! In-place aliasing of outputs onto sequence buffers.
//!
//! With an alias `output o → sequence s`, step `t` writes output `o` into row
//! `t` of sequence `s`'s own buffer. That buffer keeps serving as the read
//! source for `s`, so the rewrite is sound only if no later step reads a row
//! an earlier step already overwrote:
//!
//! - `s` has no negative tap (step `t` never looks at rows `< t`)
//! - traversal is forward (backward traversal reads row `n-1-t`)
//! - `o` keeps every step (its row `t` is sequence row `t`)
//!
//! Anything else is rejected before a single step runs.

use std::collections::BTreeMap;

use ndarray::Axis;

use crate::core::{Direction, RecurrenceConfig, Retention, TapMap};
use crate::error::{Result, ScanError};
use crate::Tensor;

/// Where an output's buffer comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferSource {
    /// Freshly allocated from the retention plan.
    Fresh,
    /// The buffer of this input sequence, moved into the executor.
    Sequence(usize),
}

/// Check every requested alias; called when a configuration is built.
pub(crate) fn validate_aliases(
    aliases: &BTreeMap<usize, usize>,
    sequence_taps: &TapMap,
    retention: &[Retention],
    direction: Direction,
) -> Result<()> {
    let mut claimed: BTreeMap<usize, usize> = BTreeMap::new();
    for (&output, &sequence) in aliases {
        if output >= retention.len() {
            return Err(ScanError::config(format!(
                "inplace map refers to nonexistent output {}",
                output
            )));
        }
        let Some(taps) = sequence_taps.get(sequence) else {
            return Err(ScanError::config(format!(
                "inplace map refers to nonexistent input sequence {}",
                sequence
            )));
        };
        if taps.reads_past() {
            return Err(ScanError::config(format!(
                "input sequence {} uses past values that would be overwritten by output {}",
                sequence, output
            )));
        }
        if !retention[output].keeps_all() {
            return Err(ScanError::config(format!(
                "output {} must keep every step to be written into sequence {}",
                output, sequence
            )));
        }
        if direction == Direction::Backward {
            return Err(ScanError::config(format!(
                "output {} cannot be written into sequence {} while traversing backwards",
                output, sequence
            )));
        }
        if let Some(prev) = claimed.insert(sequence, output) {
            return Err(ScanError::config(format!(
                "outputs {} and {} both alias sequence {}",
                prev, output, sequence
            )));
        }
    }
    Ok(())
}

/// The in-place rewrite: same configuration, aliases enabled.
///
/// Re-validates the alias map, so an unsafe request fails here rather than
/// during a run.
pub fn make_inplace(config: &RecurrenceConfig) -> Result<RecurrenceConfig> {
    validate_aliases(
        config.aliases(),
        config.sequence_taps(),
        config.retentions(),
        config.direction(),
    )?;
    tracing::debug!(aliases = config.aliases().len(), "enabling in-place execution");
    config.to_builder().inplace(true).build()
}

/// Buffer source per output for one run.
pub(crate) fn assign_buffers(config: &RecurrenceConfig) -> Vec<BufferSource> {
    let mut sources = vec![BufferSource::Fresh; config.n_states()];
    if let Some(aliases) = config.active_aliases() {
        for (&output, &sequence) in aliases {
            sources[output] = BufferSource::Sequence(sequence);
        }
    }
    sources
}

/// Run-time check that `sequence` can hold `n_steps` rows of `row_shape`.
pub(crate) fn check_aliased_buffer(
    output: usize,
    sequence: usize,
    buffer: &Tensor,
    n_steps: usize,
    row_shape: &[usize],
) -> Result<()> {
    if buffer.ndim() == 0 || &buffer.shape()[1..] != row_shape {
        let found = if buffer.ndim() == 0 { &[][..] } else { &buffer.shape()[1..] };
        return Err(ScanError::shape(
            format!("rows of sequence {} backing output {}", sequence, output),
            row_shape,
            found,
        ));
    }
    if buffer.len_of(Axis(0)) < n_steps {
        return Err(ScanError::config(format!(
            "sequence {} has {} rows, too few to hold {} steps of output {}",
            sequence,
            buffer.len_of(Axis(0)),
            n_steps,
            output
        )));
    }
    Ok(())
}
