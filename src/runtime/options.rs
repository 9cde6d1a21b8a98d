//! Plain-data scan options, loadable from JSON.
//!
//! This is the loose external surface: tap lists where `[]` means "unused",
//! integer truncation depth with `-1` for unbounded, a backwards flag. It is
//! lowered into the strict, validated [`RecurrenceConfig`].

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::{
    Direction, EvaluatorHandle, RecurrenceBuilder, RecurrenceConfig, Retention, StepSource,
    TapSet, Truncation,
};
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Number of input sequences.
    pub sequences: usize,

    /// Number of recurrent states (outputs).
    pub states: usize,

    /// Number of non-varying parameters.
    pub params: usize,

    /// Sequence index → offsets (`[]` = unused). Missing entries use `[0]`.
    pub sequence_taps: BTreeMap<usize, Vec<i64>>,

    /// State index → offsets (`[]` = unused). Missing entries use `[-1]`.
    pub state_taps: BTreeMap<usize, Vec<i64>>,

    /// State index → retention. Missing entries keep everything.
    pub retention: BTreeMap<usize, Retention>,

    /// Output index → sequence index.
    pub inplace: BTreeMap<usize, usize>,

    /// Reverse-pass depth; `-1` = unbounded.
    pub truncate_gradient: i64,

    pub go_backwards: bool,

    /// Require an explicit step count with every run.
    pub explicit_steps: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            sequences: 0,
            states: 0,
            params: 0,
            sequence_taps: BTreeMap::new(),
            state_taps: BTreeMap::new(),
            retention: BTreeMap::new(),
            inplace: BTreeMap::new(),
            truncate_gradient: crate::config::UNBOUNDED_TRUNCATION,
            go_backwards: false,
            explicit_steps: false,
        }
    }
}

impl ScanOptions {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("failed to parse scan options")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scan options from {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialise scan options")
    }

    pub fn direction(&self) -> Direction {
        if self.go_backwards {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    /// Lower into a builder; fails on malformed truncation only, the rest is
    /// checked by [`RecurrenceBuilder::build`].
    pub fn builder(&self, evaluator: EvaluatorHandle) -> Result<RecurrenceBuilder> {
        let mut b = RecurrenceConfig::builder(evaluator)
            .sequences(self.sequences)
            .states(self.states)
            .params(self.params)
            .direction(self.direction())
            .truncation(Truncation::from_depth(self.truncate_gradient)?)
            .step_source(if self.explicit_steps {
                StepSource::Explicit
            } else {
                StepSource::Inferred
            });
        for (&i, offsets) in &self.sequence_taps {
            b = b.sequence_taps(i, lift_taps(offsets));
        }
        for (&i, offsets) in &self.state_taps {
            b = b.state_taps(i, lift_taps(offsets));
        }
        for (&i, &r) in &self.retention {
            b = b.retention(i, r);
        }
        for (&o, &s) in &self.inplace {
            b = b.alias(o, s);
        }
        Ok(b)
    }

    pub fn build(&self, evaluator: EvaluatorHandle) -> Result<RecurrenceConfig> {
        self.builder(evaluator)?.build()
    }
}

/// `[]` means unused; it is the only list `TapSet::new` rejects.
fn lift_taps(offsets: &[i64]) -> TapSet {
    TapSet::new(offsets.to_vec()).unwrap_or_else(|_| TapSet::unused())
}
