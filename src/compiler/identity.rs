//! Step Identity Resolution
//!
//! Two module occurrences are the same computation when they share a
//! [`CanonicalStep`]: the module name, the modules preceding it in its
//! sequence, and its immediate dependencies. The first occurrence of an
//! identity owns it; every later occurrence is mapped to that owner through
//! the [`StepMap`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};
use crate::workflow::{sequence_label, Module, WorkflowSet};

/// Separator used when displaying a flow signature.
pub const FLOW_SEPARATOR: &str = "+";

/// Deduplication identity of a module occurrence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalStep {
    pub module: String,

    /// Names of the modules preceding this one in its sequence, in order
    pub flow: Vec<String>,

    /// Immediate dependency module names, sorted and de-duplicated
    pub depends: Vec<String>,
}

impl CanonicalStep {
    /// Computes the identity of `module` given the names preceding it.
    pub fn new(module: &Module, preceding: &[String]) -> Self {
        let depends: BTreeSet<&str> = module.depends.iter().map(|d| d.module.as_str()).collect();
        Self {
            module: module.name.clone(),
            flow: preceding.to_vec(),
            depends: depends.into_iter().map(String::from).collect(),
        }
    }

    pub fn flow_signature(&self) -> String {
        self.flow.join(FLOW_SEPARATOR)
    }

    pub fn dependency_signature(&self) -> String {
        self.depends.join(",")
    }
}

/// The canonical `(module, owning sequence)` pair of a Canonical Step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepKey {
    pub module: String,
    pub sequence: usize,
}

impl StepKey {
    pub fn new(module: impl Into<String>, sequence: usize) -> Self {
        Self {
            module: module.into(),
            sequence,
        }
    }
}

impl fmt::Display for StepKey {
    /// Renders as `{sequence label}_{module}`, e.g. `a_simulate`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}",
            sequence_label(self.sequence).to_lowercase(),
            self.module
        )
    }
}

/// Per-sequence lookup from module name to its canonical step key.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StepMap {
    #[serde(with = "sequence_keys")]
    sequences: IndexMap<usize, IndexMap<String, StepKey>>,
}

/// Sequence-id map keys as text, the form the engine indexes by.
mod sequence_keys {
    use indexmap::IndexMap;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<V, S>(map: &IndexMap<usize, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        V: Serialize,
        S: Serializer,
    {
        serializer.collect_map(map.iter().map(|(id, value)| (id.to_string(), value)))
    }

    pub fn deserialize<'de, V, D>(deserializer: D) -> Result<IndexMap<usize, V>, D::Error>
    where
        V: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let raw: IndexMap<String, V> = IndexMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(id, value)| {
                id.parse()
                    .map(|id| (id, value))
                    .map_err(|_| D::Error::custom(format!("invalid sequence id '{}'", id)))
            })
            .collect()
    }
}

impl StepMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, sequence: usize, module: &str, key: StepKey) {
        self.sequences
            .entry(sequence)
            .or_default()
            .insert(module.to_string(), key);
    }

    /// Canonical key for `module` as it appears in `sequence`.
    pub fn get(&self, sequence: usize, module: &str) -> Option<&StepKey> {
        self.sequences.get(&sequence)?.get(module)
    }

    /// Module-to-key mapping of one sequence, in sequence order.
    pub fn sequence(&self, sequence: usize) -> Option<&IndexMap<String, StepKey>> {
        self.sequences.get(&sequence)
    }

    /// True if the occurrence `key` is its own canonical representative.
    pub fn is_canonical(&self, key: &StepKey) -> bool {
        self.get(key.sequence, &key.module) == Some(key)
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

/// One raw module occurrence within a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    /// The occurrence itself: module name and the sequence it appears in
    pub key: StepKey,
    pub identity: CanonicalStep,
    /// Owner of the identity; equals `key` on first encounter
    pub canonical: StepKey,
}

impl Occurrence {
    /// True if this occurrence introduced its identity.
    pub fn is_first(&self) -> bool {
        self.key == self.canonical
    }
}

/// Result of the identity pass over a workflow set.
#[derive(Debug, Clone, Default)]
pub struct IdentityResolution {
    pub step_map: StepMap,
    /// Every module occurrence, sequence by sequence
    pub occurrences: Vec<Occurrence>,
}

impl IdentityResolution {
    /// Number of distinct Canonical Steps.
    pub fn distinct_steps(&self) -> usize {
        self.occurrences.iter().filter(|o| o.is_first()).count()
    }
}

/// Builds canonical identities and the step map in a single pass.
pub fn resolve_identities(set: &WorkflowSet) -> Result<IdentityResolution> {
    let mut processed: HashMap<CanonicalStep, StepKey> = HashMap::new();
    let mut resolution = IdentityResolution::default();

    for (id, sequence) in set.sequences() {
        for (position, name) in sequence.steps.iter().enumerate() {
            let module = set
                .get_module(name)
                .ok_or_else(|| CompileError::UnknownModule {
                    sequence: id,
                    module: name.clone(),
                })?;

            let identity = CanonicalStep::new(module, &sequence.steps[..position]);
            let key = StepKey::new(name.clone(), id);
            let canonical = processed
                .entry(identity.clone())
                .or_insert_with(|| key.clone())
                .clone();

            if canonical != key {
                debug!("Step '{}' in sequence {} reuses {}", name, id, canonical);
            }

            resolution.step_map.insert(id, name, canonical.clone());
            resolution.occurrences.push(Occurrence {
                key,
                identity,
                canonical,
            });
        }
    }

    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Sequence;

    fn chain_set(sequences: &[&[&str]]) -> WorkflowSet {
        let mut set = WorkflowSet::new();
        set.add_module(Module::new("A", "a.R")).unwrap();
        set.add_module(Module::new("B", "b.R").depends_on("A")).unwrap();
        set.add_module(Module::new("C", "c.R").depends_on("B")).unwrap();
        set.add_module(Module::new("D", "d.R").depends_on("B")).unwrap();
        set.add_module(Module::new("E", "e.R")).unwrap();
        for steps in sequences {
            set.add_sequence(Sequence::new(steps.iter().copied()));
        }
        set
    }

    #[test]
    fn test_identity_of_first_position_has_empty_flow() {
        let identity = CanonicalStep::new(&Module::new("A", "a.R"), &[]);
        assert!(identity.flow.is_empty());
        assert!(identity.depends.is_empty());
        assert_eq!(identity.flow_signature(), "");
        assert_eq!(identity.dependency_signature(), "");
    }

    #[test]
    fn test_dependency_signature_sorted_and_deduplicated() {
        let module = Module::new("m", "m.R")
            .depends_on("zeta")
            .depends_on("alpha")
            .depends_on("zeta");
        let identity = CanonicalStep::new(&module, &["alpha".into(), "zeta".into()]);

        assert_eq!(identity.depends, vec!["alpha", "zeta"]);
        assert_eq!(identity.flow_signature(), "alpha+zeta");
    }

    #[test]
    fn test_shared_prefix_maps_to_first_sequence() {
        let set = chain_set(&[&["A", "B", "C"], &["A", "B", "D"]]);
        let resolution = resolve_identities(&set).unwrap();

        assert_eq!(resolution.distinct_steps(), 4);
        assert_eq!(resolution.step_map.get(2, "A"), Some(&StepKey::new("A", 1)));
        assert_eq!(resolution.step_map.get(2, "B"), Some(&StepKey::new("B", 1)));
        assert_eq!(resolution.step_map.get(2, "D"), Some(&StepKey::new("D", 2)));
    }

    #[test]
    fn test_different_flow_is_different_step() {
        let set = chain_set(&[&["A", "E"], &["E"]]);
        let resolution = resolve_identities(&set).unwrap();

        assert_eq!(resolution.distinct_steps(), 3);
        assert_eq!(resolution.step_map.get(1, "E"), Some(&StepKey::new("E", 1)));
        assert_eq!(resolution.step_map.get(2, "E"), Some(&StepKey::new("E", 2)));
    }

    #[test]
    fn test_is_canonical() {
        let set = chain_set(&[&["A", "B"], &["A", "B", "C"]]);
        let resolution = resolve_identities(&set).unwrap();

        assert!(resolution.step_map.is_canonical(&StepKey::new("B", 1)));
        assert!(!resolution.step_map.is_canonical(&StepKey::new("B", 2)));
        assert!(resolution.step_map.is_canonical(&StepKey::new("C", 2)));
    }

    #[test]
    fn test_occurrences_recorded_in_order() {
        let set = chain_set(&[&["A", "B"], &["A", "B"]]);
        let resolution = resolve_identities(&set).unwrap();

        let firsts: Vec<bool> = resolution.occurrences.iter().map(|o| o.is_first()).collect();
        assert_eq!(firsts, vec![true, true, false, false]);
    }

    #[test]
    fn test_step_key_display() {
        assert_eq!(StepKey::new("simulate", 1).to_string(), "a_simulate");
        assert_eq!(StepKey::new("fit", 27).to_string(), "aa_fit");
    }

    #[test]
    fn test_unknown_module_is_error() {
        let mut set = chain_set(&[]);
        set.add_sequence(Sequence::new(["ghost"]));
        assert!(matches!(
            resolve_identities(&set),
            Err(CompileError::UnknownModule { .. })
        ));
    }
}
