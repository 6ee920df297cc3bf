//! Output Namer
//!
//! Content-addressed naming of every artifact a module produces.
//!
//! # Ordering Contract
//!
//! Parameter combinations are enumerated in declaration order: the first
//! declared parameter is the outermost loop and the last declared one varies
//! fastest. Within a combination, values are hashed in the same order.
//!
//! # Identifier Format
//!
//! `"{module}:{sha256}"`, where the digest covers these length-prefixed
//! fields in order: module name, executable signature, flow signature,
//! dependency signature, one `key=kind:value` per parameter, then each
//! consumed upstream identifier in dependency-signature order. The kind tag
//! keeps `1` and `"1"` apart.

use indexmap::IndexMap;
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::identity::CanonicalStep;
use crate::error::{CompileError, Result};
use crate::workflow::{Filter, Module, ParamGrid, ParamValue};

/// One value per declared parameter, in declaration order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(transparent)]
pub struct Combination(IndexMap<String, ParamValue>);

impl Combination {
    /// Starts a combination checked against `schema`.
    pub fn builder(schema: &ParamGrid) -> CombinationBuilder<'_> {
        CombinationBuilder {
            schema,
            values: IndexMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrowed view used for filter evaluation.
    fn bindings(&self) -> IndexMap<&str, &ParamValue> {
        self.iter().collect()
    }
}

/// Builds a [`Combination`], rejecting undeclared names and values outside
/// the declared candidates.
#[derive(Debug)]
pub struct CombinationBuilder<'a> {
    schema: &'a ParamGrid,
    values: IndexMap<String, ParamValue>,
}

impl CombinationBuilder<'_> {
    pub fn set(
        mut self,
        name: &str,
        value: impl Into<ParamValue>,
    ) -> std::result::Result<Self, String> {
        let value = value.into();
        let candidates = self
            .schema
            .get(name)
            .ok_or_else(|| format!("undeclared parameter '{}'", name))?;
        if !is_candidate(candidates, &value) {
            return Err(format!("'{}' is not a candidate value of '{}'", value, name));
        }
        self.values.insert(name.to_string(), value);
        Ok(self)
    }

    /// Finishes the combination, ordered by the schema.
    pub fn build(mut self) -> std::result::Result<Combination, String> {
        let mut ordered = IndexMap::with_capacity(self.schema.len());
        for name in self.schema.keys() {
            let value = self
                .values
                .swap_remove(name)
                .ok_or_else(|| format!("missing parameter '{}'", name))?;
            ordered.insert(name.clone(), value);
        }
        Ok(Combination(ordered))
    }
}

/// True if `value` is one of `candidates`. NaN matches NaN.
fn is_candidate(candidates: &[ParamValue], value: &ParamValue) -> bool {
    candidates.iter().any(|candidate| match (candidate, value) {
        (ParamValue::Float(a), ParamValue::Float(b)) if a.is_nan() => b.is_nan(),
        _ => candidate == value,
    })
}

/// Cartesian product of the grid in declaration order.
///
/// An empty grid yields one empty combination.
pub fn enumerate(grid: &ParamGrid) -> std::result::Result<Vec<Combination>, String> {
    let mut assignments: Vec<Vec<(&str, &ParamValue)>> = vec![Vec::new()];
    for (name, values) in grid {
        assignments = assignments
            .iter()
            .flat_map(|prefix| {
                values.iter().map(move |value| {
                    let mut next = prefix.clone();
                    next.push((name.as_str(), value));
                    next
                })
            })
            .collect();
    }

    assignments
        .into_iter()
        .map(|assignment| {
            assignment
                .into_iter()
                .try_fold(Combination::builder(grid), |builder, (name, value)| {
                    builder.set(name, value.clone())
                })?
                .build()
        })
        .collect()
}

/// Grid combinations of `module` retained by its filter.
pub fn filtered_combinations(module: &Module) -> Result<Vec<Combination>> {
    let all = enumerate(&module.params).map_err(|reason| CompileError::InvalidParameter {
        module: module.name.clone(),
        reason,
    })?;
    let Some(expression) = &module.filter else {
        return Ok(all);
    };

    let invalid = |reason: String| CompileError::InvalidFilter {
        module: module.name.clone(),
        expression: expression.clone(),
        reason,
    };
    let filter = Filter::parse(expression).map_err(invalid)?;

    let mut kept = Vec::new();
    for combination in all {
        if filter.evaluate(&combination.bindings()).map_err(invalid)? {
            kept.push(combination);
        }
    }
    debug!(
        "Filter '{}' keeps {} combinations of '{}'",
        expression,
        kept.len(),
        module.name
    );
    Ok(kept)
}

/// One named output of a job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputRecord {
    pub id: String,
    pub combination: Combination,
    /// Upstream identifiers consumed to produce this output
    pub inputs: Vec<String>,
}

fn update_field(hasher: &mut Sha256, field: &[u8]) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field);
}

/// Content-addressed identifier of one output.
pub fn output_identifier(
    identity: &CanonicalStep,
    exe_signature: &str,
    combination: &Combination,
    inputs: &[String],
) -> String {
    let mut hasher = Sha256::new();
    update_field(&mut hasher, identity.module.as_bytes());
    update_field(&mut hasher, exe_signature.as_bytes());
    update_field(&mut hasher, identity.flow_signature().as_bytes());
    update_field(&mut hasher, identity.dependency_signature().as_bytes());
    for (name, value) in combination.iter() {
        update_field(
            &mut hasher,
            format!("{}={}:{}", name, value.kind(), value).as_bytes(),
        );
    }
    for input in inputs {
        update_field(&mut hasher, input.as_bytes());
    }
    format!("{}:{:x}", identity.module, hasher.finalize())
}

/// Groups upstream outputs into the input tuples consumed per output.
///
/// `upstream` lists each dependency's identifiers in dependency-signature
/// order. One dependency gives one single-element tuple per upstream
/// output; several dependencies are zipped by position.
pub fn group_inputs(module: &str, upstream: &[(&str, &[String])]) -> Result<Vec<Vec<String>>> {
    match upstream {
        [] => Ok(vec![Vec::new()]),
        [(_, ids)] => Ok(ids.iter().map(|id| vec![id.clone()]).collect()),
        [(first, first_ids), rest @ ..] => {
            let width = first_ids.len();
            if let Some((name, ids)) = rest.iter().find(|(_, ids)| ids.len() != width) {
                return Err(CompileError::UpstreamShape {
                    module: module.to_string(),
                    detail: format!(
                        "'{}' has {} outputs but '{}' has {}",
                        first,
                        width,
                        name,
                        ids.len()
                    ),
                });
            }
            Ok((0..width)
                .map(|i| upstream.iter().map(|(_, ids)| ids[i].clone()).collect())
                .collect())
        }
    }
}

/// Names every output of a module occurrence.
///
/// Records are ordered by combination first, then by input tuple.
pub fn name_outputs(
    module: &Module,
    identity: &CanonicalStep,
    exe_signature: &str,
    upstream: &[(&str, &[String])],
) -> Result<Vec<OutputRecord>> {
    let combinations = filtered_combinations(module)?;
    let tuples = group_inputs(&module.name, upstream)?;

    let mut records = Vec::with_capacity(combinations.len() * tuples.len());
    for combination in &combinations {
        for inputs in &tuples {
            records.push(OutputRecord {
                id: output_identifier(identity, exe_signature, combination, inputs),
                combination: combination.clone(),
                inputs: inputs.clone(),
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(module: &Module) -> CanonicalStep {
        CanonicalStep::new(module, &[])
    }

    fn ids(records: &[OutputRecord]) -> Vec<String> {
        records.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_enumerate_declaration_order() {
        let module = Module::new("m", "m.R")
            .with_param("a", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .with_param("b", vec![ParamValue::from("x"), ParamValue::from("y")]);

        let rendered: Vec<String> = enumerate(&module.params)
            .unwrap()
            .iter()
            .map(|c| {
                c.iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect();

        assert_eq!(rendered, vec!["a=1,b=x", "a=1,b=y", "a=2,b=x", "a=2,b=y"]);
    }

    #[test]
    fn test_enumerate_matches_builder() {
        let module = Module::new("m", "m.R")
            .with_param("a", vec![ParamValue::Int(1), ParamValue::Float(f64::NAN)])
            .with_param("b", vec![ParamValue::from("x")]);

        let combinations = enumerate(&module.params).unwrap();
        assert_eq!(combinations.len(), 2);

        let built = Combination::builder(&module.params)
            .set("b", "x")
            .and_then(|b| b.set("a", 1i64))
            .and_then(|b| b.build())
            .unwrap();
        assert_eq!(combinations[0], built);
        assert!(matches!(combinations[1].get("a"), Some(ParamValue::Float(x)) if x.is_nan()));
    }

    #[test]
    fn test_enumerate_empty_candidate_list() {
        let module = Module::new("m", "m.R")
            .with_param("a", vec![ParamValue::Int(1)])
            .with_param("b", Vec::new());
        assert!(enumerate(&module.params).unwrap().is_empty());
    }

    #[test]
    fn test_enumerate_empty_grid() {
        let combinations = enumerate(&ParamGrid::new()).unwrap();
        assert_eq!(combinations.len(), 1);
        assert!(combinations[0].is_empty());
    }

    #[test]
    fn test_filter_keeps_matching_combination() {
        let module = Module::new("X", "x.R")
            .with_param("alpha", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .with_filter("alpha>1");

        let records = name_outputs(&module, &identity(&module), "sig", &[]).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].combination.get("alpha"), Some(&ParamValue::Int(2)));
        assert!(records[0].id.starts_with("X:"));
    }

    #[test]
    fn test_filter_evaluation_error_names_module() {
        let module = Module::new("X", "x.R")
            .with_param("method", vec![ParamValue::from("lasso")])
            .with_filter("method > 1");

        match filtered_combinations(&module) {
            Err(CompileError::InvalidFilter { module, .. }) => assert_eq!(module, "X"),
            other => panic!("expected InvalidFilter, got {:?}", other),
        }
    }

    #[test]
    fn test_identifier_is_deterministic() {
        let module = Module::new("m", "m.R").with_param("n", vec![ParamValue::Int(10)]);
        let first = name_outputs(&module, &identity(&module), "sig", &[]).unwrap();
        let second = name_outputs(&module, &identity(&module), "sig", &[]).unwrap();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_identifier_depends_on_every_input() {
        let module = Module::new("m", "m.R").with_param("n", vec![ParamValue::Int(10)]);
        let base = identity(&module);
        let combination = enumerate(&module.params).unwrap().remove(0);
        let id = output_identifier(&base, "sig", &combination, &[]);

        assert_ne!(id, output_identifier(&base, "sig2", &combination, &[]));
        assert_ne!(id, output_identifier(&base, "sig", &combination, &["up:1".into()]));

        let shifted = CanonicalStep::new(&module, &["other".to_string()]);
        assert_ne!(id, output_identifier(&shifted, "sig", &combination, &[]));

        let float = Module::new("m", "m.R").with_param("n", vec![ParamValue::Float(10.0)]);
        let float_combination = enumerate(&float.params).unwrap().remove(0);
        assert_ne!(id, output_identifier(&base, "sig", &float_combination, &[]));
    }

    #[test]
    fn test_values_with_equal_text_get_distinct_identifiers() {
        let grids = [
            vec![ParamValue::Int(1), ParamValue::from("1")],
            vec![ParamValue::Null, ParamValue::from("NULL")],
            vec![ParamValue::Bool(true), ParamValue::from("true")],
        ];
        for values in grids {
            let module = Module::new("m", "m.R").with_param("n", values);
            let records = name_outputs(&module, &identity(&module), "sig", &[]).unwrap();
            assert_eq!(records.len(), 2);
            assert_ne!(records[0].id, records[1].id);
        }
    }

    #[test]
    fn test_length_prefix_separates_fields() {
        let a = Module::new("ab", "m.R");
        let b = Module::new("a", "m.R");
        let empty = Combination::default();
        assert_ne!(
            output_identifier(&identity(&a), "c", &empty, &[]),
            output_identifier(&identity(&b), "bc", &empty, &[])
        );
    }

    #[test]
    fn test_single_dependency_composes_each_upstream() {
        let module = Module::new("fit", "fit.R")
            .with_param("alpha", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .depends_on("sim");
        let upstream = vec!["sim:1".to_string(), "sim:2".to_string(), "sim:3".to_string()];

        let records = name_outputs(
            &module,
            &identity(&module),
            "sig",
            &[("sim", upstream.as_slice())],
        )
        .unwrap();

        assert_eq!(records.len(), 6);
        assert_eq!(records[0].inputs, vec!["sim:1"]);
        assert_eq!(records[2].inputs, vec!["sim:3"]);
        assert_eq!(records[3].combination.get("alpha"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn test_multiple_dependencies_zip_by_position() {
        let a = vec!["a:1".to_string(), "a:2".to_string()];
        let b = vec!["b:1".to_string(), "b:2".to_string()];

        let tuples = group_inputs("score", &[("a", a.as_slice()), ("b", b.as_slice())]).unwrap();
        assert_eq!(tuples, vec![vec!["a:1", "b:1"], vec!["a:2", "b:2"]]);
    }

    #[test]
    fn test_multiple_dependencies_unequal_lengths() {
        let a = vec!["a:1".to_string(), "a:2".to_string()];
        let b = vec!["b:1".to_string()];

        assert!(matches!(
            group_inputs("score", &[("a", a.as_slice()), ("b", b.as_slice())]),
            Err(CompileError::UpstreamShape { ref module, .. }) if module == "score"
        ));
    }

    #[test]
    fn test_combination_builder_validates_schema() {
        let module = Module::new("m", "m.R")
            .with_param("a", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .with_param("b", vec![ParamValue::from("x")]);

        let built = Combination::builder(&module.params)
            .set("b", "x")
            .and_then(|b| b.set("a", 2i64))
            .and_then(|b| b.build())
            .unwrap();
        let keys: Vec<&str> = built.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);

        assert!(Combination::builder(&module.params).set("c", 1i64).is_err());
        assert!(Combination::builder(&module.params).set("a", 3i64).is_err());
        assert!(Combination::builder(&module.params)
            .set("a", 1i64)
            .and_then(|b| b.build())
            .is_err());
    }
}
