//! Tap sets and tap maps.
//!
//! A tap is a signed offset relative to the current step selecting which row
//! of a sequence (or of a state's history) the step evaluator receives.
//! Sequence taps may look ahead (`+k`) or behind (`-k`); state taps must be
//! strictly negative because the current value is what the step produces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ScanError};

/// Ordered list of tap offsets for one sequence or state.
///
/// An empty set means "unused": the entity contributes no per-step argument.
/// Build it with [`TapSet::unused`] or [`TapSet::new`]; the latter rejects an
/// empty list so "unused" is always stated explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TapSet {
    offsets: Vec<i64>,
}

impl TapSet {
    /// Taps used with the given offsets, in argument order.
    pub fn new(offsets: impl Into<Vec<i64>>) -> Result<Self> {
        let offsets = offsets.into();
        if offsets.is_empty() {
            return Err(ScanError::config(
                "tap offset list is empty; use TapSet::unused() to drop an input",
            ));
        }
        Ok(Self { offsets })
    }

    /// A single-offset tap set.
    pub fn single(offset: i64) -> Self {
        Self {
            offsets: vec![offset],
        }
    }

    /// Excludes the entity from the per-step arguments.
    pub fn unused() -> Self {
        Self {
            offsets: Vec::new(),
        }
    }

    pub fn is_used(&self) -> bool {
        !self.offsets.is_empty()
    }

    pub fn offsets(&self) -> &[i64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Smallest offset, `None` if unused.
    pub fn min(&self) -> Option<i64> {
        self.offsets.iter().copied().min()
    }

    /// Largest offset, `None` if unused.
    pub fn max(&self) -> Option<i64> {
        self.offsets.iter().copied().max()
    }

    /// True if any offset reads a row before the current step.
    pub fn reads_past(&self) -> bool {
        self.offsets.iter().any(|&o| o < 0)
    }
}

/// Which kind of entity a [`TapMap`] describes; drives defaults and checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TapKind {
    Sequence,
    State,
}

impl TapKind {
    fn default_taps(self) -> TapSet {
        match self {
            TapKind::Sequence => TapSet::single(crate::config::DEFAULT_SEQUENCE_TAP),
            TapKind::State => TapSet::single(crate::config::DEFAULT_STATE_TAP),
        }
    }

    fn label(self) -> &'static str {
        match self {
            TapKind::Sequence => "sequence",
            TapKind::State => "state",
        }
    }
}

/// Immutable, validated tap sets for every sequence or every state.
///
/// Entries not mentioned in the overrides get the default (`[0]` for
/// sequences, `[-1]` for states).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TapMap {
    kind: TapKind,
    entries: Vec<TapSet>,
}

impl TapMap {
    /// Build the map for `count` entities of `kind` from explicit overrides.
    pub fn build(kind: TapKind, count: usize, overrides: &BTreeMap<usize, TapSet>) -> Result<Self> {
        if let Some(&idx) = overrides.keys().find(|&&idx| idx >= count) {
            return Err(ScanError::config(format!(
                "tap map refers to nonexistent {} {} (only {} declared)",
                kind.label(),
                idx,
                count
            )));
        }

        let entries: Vec<TapSet> = (0..count)
            .map(|i| overrides.get(&i).cloned().unwrap_or_else(|| kind.default_taps()))
            .collect();

        if kind == TapKind::State {
            for (i, taps) in entries.iter().enumerate() {
                if let Some(max) = taps.max() {
                    if max > -1 {
                        return Err(ScanError::config(format!(
                            "state {} cannot read current or future value (offset {})",
                            i, max
                        )));
                    }
                }
            }
        }

        Ok(Self { kind, entries })
    }

    pub fn kind(&self) -> TapKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&TapSet> {
        self.entries.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TapSet> {
        self.entries.iter()
    }

    /// Number of per-step slices this map contributes.
    pub fn slice_count(&self) -> usize {
        self.entries.iter().map(TapSet::len).sum()
    }

    /// Indices of entities with a used tap set.
    pub fn used(&self) -> impl Iterator<Item = (usize, &TapSet)> {
        self.entries.iter().enumerate().filter(|(_, t)| t.is_used())
    }
}
