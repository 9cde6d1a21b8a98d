//! Structural identity of a recurrence configuration.
//!
//! A configuration is flattened once, at build time, into a list of tagged
//! [`ConfigValue`]s. Equality compares that list deeply; the hash is a digest
//! computed from it in the same pass and cached. Map-valued fields (tap maps,
//! retention directives, alias map) are digested with an order-insensitive
//! combinator so insertion order never changes identity.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::recurrence::{Direction, RecurrenceConfig, StepSource, Truncation};
use super::retention::Retention;

/// Which configuration field a value belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Sequences,
    States,
    Params,
    SequenceTaps,
    StateTaps,
    Retention,
    StepSource,
    Direction,
    Truncation,
    Aliases,
    Inplace,
    Evaluator,
}

/// Tagged value of one configuration field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigValue {
    Count(usize),
    /// Tap offsets; empty means unused.
    Offsets(Vec<i64>),
    Retention(Retention),
    StepSource(StepSource),
    Direction(Direction),
    Truncation(Truncation),
    Flag(bool),
    /// Output index → sequence index.
    AliasMap(BTreeMap<usize, usize>),
    /// Evaluator key.
    Evaluator(String),
    /// Per-entity values keyed by index.
    Keyed(Vec<(usize, ConfigValue)>),
}

impl ConfigValue {
    /// Structural hash of this value.
    pub fn digest(&self) -> u64 {
        match self {
            ConfigValue::AliasMap(map) => {
                unordered(map.iter().map(|(k, v)| hash_of(&(0u8, k, v))))
            }
            ConfigValue::Keyed(entries) => {
                unordered(entries.iter().map(|(k, v)| hash_of(&(1u8, k, v.digest()))))
            }
            ConfigValue::Count(c) => hash_of(&(2u8, c)),
            ConfigValue::Offsets(o) => hash_of(&(3u8, o)),
            ConfigValue::Retention(r) => hash_of(&(4u8, r)),
            ConfigValue::StepSource(s) => hash_of(&(5u8, s)),
            ConfigValue::Direction(d) => hash_of(&(6u8, d)),
            ConfigValue::Truncation(t) => hash_of(&(7u8, t)),
            ConfigValue::Flag(b) => hash_of(&(8u8, b)),
            ConfigValue::Evaluator(k) => hash_of(&(9u8, k)),
        }
    }
}

fn hash_of<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Order-insensitive combination of entry hashes.
fn unordered(hashes: impl Iterator<Item = u64>) -> u64 {
    hashes.fold(0u64, |acc, h| acc.wrapping_add(h.rotate_left(17) ^ h))
}

/// Flattened configuration content plus its cached digest.
#[derive(Clone, Debug)]
pub struct Fingerprint {
    entries: Vec<(Field, ConfigValue)>,
    digest: u64,
}

impl Fingerprint {
    pub fn new(entries: Vec<(Field, ConfigValue)>) -> Self {
        let mut hasher = DefaultHasher::new();
        for (field, value) in &entries {
            field.hash(&mut hasher);
            value.digest().hash(&mut hasher);
        }
        Self {
            digest: hasher.finish(),
            entries,
        }
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }

    pub fn entries(&self) -> &[(Field, ConfigValue)] {
        &self.entries
    }

    pub fn get(&self, field: Field) -> Option<&ConfigValue> {
        self.entries.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        // digest first: cheap reject
        self.digest == other.digest && self.entries == other.entries
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.digest);
    }
}

/// Interns built configurations by structural identity so an external
/// caller can reuse a previously built (and compiled) one.
#[derive(Default)]
pub struct ConfigCache {
    entries: HashMap<Fingerprint, Arc<RecurrenceConfig>>,
    hits: u64,
}

impl ConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached configuration equal to `config`, inserting it if
    /// it is new.
    pub fn intern(&mut self, config: RecurrenceConfig) -> Arc<RecurrenceConfig> {
        if let Some(existing) = self.entries.get(config.fingerprint()) {
            self.hits += 1;
            tracing::debug!(digest = config.fingerprint().digest(), "configuration cache hit");
            return Arc::clone(existing);
        }
        let key = config.fingerprint().clone();
        let shared = Arc::new(config);
        self.entries.insert(key, Arc::clone(&shared));
        shared
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_map_digest_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert(0, 1);
        a.insert(2, 0);
        let mut b = BTreeMap::new();
        b.insert(2, 0);
        b.insert(0, 1);
        assert_eq!(ConfigValue::AliasMap(a).digest(), ConfigValue::AliasMap(b).digest());
    }

    #[test]
    fn test_keyed_digest_ignores_entry_order() {
        let x = ConfigValue::Keyed(vec![
            (0, ConfigValue::Offsets(vec![-1])),
            (1, ConfigValue::Offsets(vec![-2, -1])),
        ]);
        let y = ConfigValue::Keyed(vec![
            (1, ConfigValue::Offsets(vec![-2, -1])),
            (0, ConfigValue::Offsets(vec![-1])),
        ]);
        assert_eq!(x.digest(), y.digest());
    }

    #[test]
    fn test_keyed_digest_sees_values() {
        let x = ConfigValue::Keyed(vec![(0, ConfigValue::Offsets(vec![-1]))]);
        let y = ConfigValue::Keyed(vec![(0, ConfigValue::Offsets(vec![-2]))]);
        assert_ne!(x.digest(), y.digest());
    }

    #[test]
    fn test_fingerprint_equality() {
        let a = Fingerprint::new(vec![
            (Field::Sequences, ConfigValue::Count(1)),
            (Field::Truncation, ConfigValue::Truncation(Truncation::Unbounded)),
        ]);
        let b = a.clone();
        let c = Fingerprint::new(vec![
            (Field::Sequences, ConfigValue::Count(1)),
            (Field::Truncation, ConfigValue::Truncation(Truncation::Steps(3))),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a, c);
        assert_eq!(a.get(Field::Sequences), Some(&ConfigValue::Count(1)));
        assert!(a.get(Field::Evaluator).is_none());
    }
}
