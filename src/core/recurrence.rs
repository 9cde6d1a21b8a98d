//! The immutable recurrence configuration and its builder.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::evaluator::{EvaluatorHandle, StepEvaluator};
use super::identity::{ConfigValue, Field, Fingerprint};
use super::retention::Retention;
use super::taps::{TapKind, TapMap, TapSet};
use crate::error::{Result, ScanError};
use crate::learning::gradient::GradientConfig;

/// Sequence traversal order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    /// Sequences are read from the end; outputs are still recorded 0..n.
    Backward,
}

/// Where the step count comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepSource {
    /// Derived from the tapped sequences' usable lengths.
    #[default]
    Inferred,
    /// Supplied with every run; sequences may only clip it down.
    Explicit,
}

/// How far back in time the reverse pass goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Truncation {
    #[default]
    Unbounded,
    /// Visit at most this many steps, counting back from the last.
    Steps(usize),
}

impl Truncation {
    /// Parse the external encoding: `-1` is unbounded, `d >= 0` is a depth.
    pub fn from_depth(depth: i64) -> Result<Self> {
        match depth {
            crate::config::UNBOUNDED_TRUNCATION => Ok(Truncation::Unbounded),
            d if d >= 0 => Ok(Truncation::Steps(d as usize)),
            d => Err(ScanError::config(format!(
                "truncation depth must be -1 (unbounded) or >= 0, got {}",
                d
            ))),
        }
    }

    pub fn depth(&self) -> i64 {
        match self {
            Truncation::Unbounded => crate::config::UNBOUNDED_TRUNCATION,
            Truncation::Steps(d) => i64::try_from(*d).unwrap_or(i64::MAX),
        }
    }

    /// Exclusive lower bound of the reverse loop `n-1 ..= bound+1`.
    pub fn stop_before(&self, n_steps: usize) -> i64 {
        let last = n_steps as i64 - 1;
        match self {
            Truncation::Unbounded => -1,
            Truncation::Steps(d) => (last - (*d).min(n_steps) as i64).max(-1),
        }
    }
}

/// Everything that defines a scan, fixed at build time.
pub struct RecurrenceConfig {
    sequence_taps: TapMap,
    state_taps: TapMap,
    retention: Vec<Retention>,
    params: usize,
    step_source: StepSource,
    direction: Direction,
    truncation: Truncation,
    aliases: BTreeMap<usize, usize>,
    inplace: bool,
    evaluator: EvaluatorHandle,
    fingerprint: Fingerprint,
    gradient: OnceCell<GradientConfig>,
}

impl RecurrenceConfig {
    pub fn builder(evaluator: EvaluatorHandle) -> RecurrenceBuilder {
        RecurrenceBuilder::new(evaluator)
    }

    pub fn sequence_taps(&self) -> &TapMap {
        &self.sequence_taps
    }

    pub fn state_taps(&self) -> &TapMap {
        &self.state_taps
    }

    pub fn n_sequences(&self) -> usize {
        self.sequence_taps.len()
    }

    pub fn n_states(&self) -> usize {
        self.state_taps.len()
    }

    pub fn n_params(&self) -> usize {
        self.params
    }

    pub fn retention(&self, state: usize) -> Retention {
        self.retention.get(state).copied().unwrap_or_default()
    }

    pub fn retentions(&self) -> &[Retention] {
        &self.retention
    }

    pub fn step_source(&self) -> StepSource {
        self.step_source
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn truncation(&self) -> Truncation {
        self.truncation
    }

    /// Requested output → sequence aliases (honoured only when in-place
    /// execution is enabled).
    pub fn aliases(&self) -> &BTreeMap<usize, usize> {
        &self.aliases
    }

    pub fn inplace(&self) -> bool {
        self.inplace
    }

    /// Aliases the forward executor will actually apply.
    pub fn active_aliases(&self) -> Option<&BTreeMap<usize, usize>> {
        (self.inplace && !self.aliases.is_empty()).then_some(&self.aliases)
    }

    pub fn evaluator(&self) -> &EvaluatorHandle {
        &self.evaluator
    }

    pub fn step_evaluator(&self) -> &dyn StepEvaluator {
        self.evaluator.evaluator()
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    /// Backward configuration, derived on first use and cached.
    pub fn gradient_config(&self) -> Result<&GradientConfig> {
        self.gradient.get_or_try_init(|| {
            tracing::debug!(evaluator = self.evaluator.key(), "deriving backward evaluator");
            GradientConfig::derive(self)
        })
    }

    /// Builder pre-filled with this configuration's content.
    pub fn to_builder(&self) -> RecurrenceBuilder {
        let mut b = RecurrenceBuilder::new(self.evaluator.clone())
            .sequences(self.n_sequences())
            .states(self.n_states())
            .params(self.params)
            .step_source(self.step_source)
            .direction(self.direction)
            .truncation(self.truncation)
            .inplace(self.inplace);
        for (i, taps) in self.sequence_taps.iter().enumerate() {
            b = b.sequence_taps(i, taps.clone());
        }
        for (i, taps) in self.state_taps.iter().enumerate() {
            b = b.state_taps(i, taps.clone());
        }
        for (i, r) in self.retention.iter().enumerate() {
            b = b.retention(i, *r);
        }
        for (&o, &s) in &self.aliases {
            b = b.alias(o, s);
        }
        b
    }
}

impl fmt::Debug for RecurrenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurrenceConfig")
            .field("sequence_taps", &self.sequence_taps)
            .field("state_taps", &self.state_taps)
            .field("retention", &self.retention)
            .field("params", &self.params)
            .field("step_source", &self.step_source)
            .field("direction", &self.direction)
            .field("truncation", &self.truncation)
            .field("aliases", &self.aliases)
            .field("inplace", &self.inplace)
            .field("evaluator", &self.evaluator)
            .finish()
    }
}

impl PartialEq for RecurrenceConfig {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for RecurrenceConfig {}

impl Hash for RecurrenceConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

/// Collects the configuration surface and validates it in [`build`].
///
/// [`build`]: RecurrenceBuilder::build
pub struct RecurrenceBuilder {
    evaluator: EvaluatorHandle,
    sequences: usize,
    states: usize,
    params: usize,
    sequence_taps: BTreeMap<usize, TapSet>,
    state_taps: BTreeMap<usize, TapSet>,
    retention: BTreeMap<usize, Retention>,
    aliases: BTreeMap<usize, usize>,
    step_source: StepSource,
    direction: Direction,
    truncation: Truncation,
    inplace: bool,
}

impl RecurrenceBuilder {
    pub fn new(evaluator: EvaluatorHandle) -> Self {
        Self {
            evaluator,
            sequences: 0,
            states: 0,
            params: 0,
            sequence_taps: BTreeMap::new(),
            state_taps: BTreeMap::new(),
            retention: BTreeMap::new(),
            aliases: BTreeMap::new(),
            step_source: StepSource::default(),
            direction: Direction::default(),
            truncation: Truncation::default(),
            inplace: false,
        }
    }

    pub fn sequences(mut self, count: usize) -> Self {
        self.sequences = count;
        self
    }

    pub fn states(mut self, count: usize) -> Self {
        self.states = count;
        self
    }

    pub fn params(mut self, count: usize) -> Self {
        self.params = count;
        self
    }

    pub fn sequence_taps(mut self, sequence: usize, taps: TapSet) -> Self {
        self.sequence_taps.insert(sequence, taps);
        self
    }

    pub fn state_taps(mut self, state: usize, taps: TapSet) -> Self {
        self.state_taps.insert(state, taps);
        self
    }

    pub fn retention(mut self, state: usize, retention: Retention) -> Self {
        self.retention.insert(state, retention);
        self
    }

    /// Request that `output` be written into `sequence`'s buffer.
    pub fn alias(mut self, output: usize, sequence: usize) -> Self {
        self.aliases.insert(output, sequence);
        self
    }

    pub fn step_source(mut self, source: StepSource) -> Self {
        self.step_source = source;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn truncation(mut self, truncation: Truncation) -> Self {
        self.truncation = truncation;
        self
    }

    pub(crate) fn inplace(mut self, enabled: bool) -> Self {
        self.inplace = enabled;
        self
    }

    pub fn build(self) -> Result<RecurrenceConfig> {
        let sequence_taps = TapMap::build(TapKind::Sequence, self.sequences, &self.sequence_taps)?;
        let state_taps = TapMap::build(TapKind::State, self.states, &self.state_taps)?;

        if let Some(&idx) = self.retention.keys().find(|&&i| i >= self.states) {
            return Err(ScanError::config(format!(
                "retention directive for nonexistent state {}",
                idx
            )));
        }
        let retention: Vec<Retention> = (0..self.states)
            .map(|i| self.retention.get(&i).copied().unwrap_or_default())
            .collect();
        for (i, r) in retention.iter().enumerate() {
            r.validate(i)?;
        }

        crate::execution::inplace::validate_aliases(
            &self.aliases,
            &sequence_taps,
            &retention,
            self.direction,
        )?;

        let fingerprint = Fingerprint::new(vec![
            (Field::Sequences, ConfigValue::Count(self.sequences)),
            (Field::States, ConfigValue::Count(self.states)),
            (Field::Params, ConfigValue::Count(self.params)),
            (Field::SequenceTaps, keyed_offsets(&sequence_taps)),
            (Field::StateTaps, keyed_offsets(&state_taps)),
            (
                Field::Retention,
                ConfigValue::Keyed(
                    retention
                        .iter()
                        .enumerate()
                        .map(|(i, r)| (i, ConfigValue::Retention(*r)))
                        .collect(),
                ),
            ),
            (Field::StepSource, ConfigValue::StepSource(self.step_source)),
            (Field::Direction, ConfigValue::Direction(self.direction)),
            (Field::Truncation, ConfigValue::Truncation(self.truncation)),
            (Field::Aliases, ConfigValue::AliasMap(self.aliases.clone())),
            (Field::Inplace, ConfigValue::Flag(self.inplace)),
            (
                Field::Evaluator,
                ConfigValue::Evaluator(self.evaluator.key().to_string()),
            ),
        ]);

        Ok(RecurrenceConfig {
            sequence_taps,
            state_taps,
            retention,
            params: self.params,
            step_source: self.step_source,
            direction: self.direction,
            truncation: self.truncation,
            aliases: self.aliases,
            inplace: self.inplace,
            evaluator: self.evaluator,
            fingerprint,
            gradient: OnceCell::new(),
        })
    }
}

fn keyed_offsets(map: &TapMap) -> ConfigValue {
    ConfigValue::Keyed(
        map.iter()
            .enumerate()
            .map(|(i, t)| (i, ConfigValue::Offsets(t.offsets().to_vec())))
            .collect(),
    )
}
