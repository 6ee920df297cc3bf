//! Job Pool Builder & Terminal Filter
//!
//! Compiles one job per Canonical Step, walking sequences in order, then
//! prunes duplicate occurrences to find each sequence's terminal step.

use indexmap::IndexMap;
use log::{debug, info};

use super::blob::{assemble, ConfigBlob};
use super::identity::{resolve_identities, IdentityResolution, StepKey, StepMap};
use super::job::{Job, JobCompiler, ScriptLibrary};
use super::plugin::EmitterRegistry;
use crate::config::CompileConfig;
use crate::error::{CompileError, Result};
use crate::workflow::WorkflowSet;

/// Deduplicated jobs plus the scripts they share.
#[derive(Debug, Clone, Default)]
pub struct JobPool {
    jobs: IndexMap<StepKey, Job>,
    scripts: ScriptLibrary,
}

impl JobPool {
    pub fn get(&self, key: &StepKey) -> Option<&Job> {
        self.jobs.get(key)
    }

    pub fn contains(&self, key: &StepKey) -> bool {
        self.jobs.contains_key(key)
    }

    /// Jobs in compilation order; upstream jobs always come first.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn scripts(&self) -> &ScriptLibrary {
        &self.scripts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Canonical last steps per sequence id.
pub type TerminalSet = IndexMap<usize, Vec<StepKey>>;

/// Everything one compilation pass produces.
#[derive(Debug, Clone)]
pub struct CompiledWorkflow {
    pub pool: JobPool,
    pub step_map: StepMap,
    pub terminals: TerminalSet,
    pub blob: ConfigBlob,
}

impl CompiledWorkflow {
    /// Output identifiers of a sequence's terminal steps.
    pub fn terminal_outputs(&self, sequence: usize) -> Vec<&str> {
        self.terminals
            .get(&sequence)
            .into_iter()
            .flatten()
            .filter_map(|key| self.pool.get(key))
            .flat_map(|job| job.output_ids())
            .collect()
    }

    /// Terminal steps of every sequence, flattened without duplicates.
    pub fn terminal_steps(&self) -> Vec<&StepKey> {
        let mut steps: Vec<&StepKey> = Vec::new();
        for key in self.terminals.values().flatten() {
            if !steps.contains(&key) {
                steps.push(key);
            }
        }
        steps
    }
}

/// Keeps only the raw last steps the step map names as canonical.
pub fn filter_terminals(resolution: &IdentityResolution) -> TerminalSet {
    let mut raw_last: IndexMap<usize, StepKey> = IndexMap::new();
    for occurrence in &resolution.occurrences {
        raw_last.insert(occurrence.key.sequence, occurrence.key.clone());
    }

    raw_last
        .into_iter()
        .map(|(sequence, key)| {
            let kept: Vec<StepKey> = if resolution.step_map.is_canonical(&key) {
                vec![key]
            } else {
                debug!(
                    "Last step of sequence {} duplicates an earlier job; no terminal output",
                    sequence
                );
                Vec::new()
            };
            (sequence, kept)
        })
        .collect()
}

/// Builds the job pool, terminal set and configuration blob.
pub fn build_pool(
    set: &WorkflowSet,
    config: &CompileConfig,
    emitters: &EmitterRegistry,
) -> Result<CompiledWorkflow> {
    let resolution = resolve_identities(set)?;
    info!(
        "Resolved {} occurrences into {} distinct steps",
        resolution.occurrences.len(),
        resolution.distinct_steps()
    );

    let mut compiler = JobCompiler::new(config, emitters);
    let mut jobs: IndexMap<StepKey, Job> = IndexMap::new();

    for occurrence in &resolution.occurrences {
        if !occurrence.is_first() {
            debug!("{} resolved to {}", occurrence.key, occurrence.canonical);
            continue;
        }
        let module = set
            .get_module(&occurrence.key.module)
            .ok_or_else(|| CompileError::UnknownModule {
                sequence: occurrence.key.sequence,
                module: occurrence.key.module.clone(),
            })?;
        let job = compiler.compile(module, occurrence, &resolution.step_map, &jobs)?;
        jobs.insert(job.key.clone(), job);
    }

    let pool = JobPool {
        jobs,
        scripts: compiler.into_scripts(),
    };
    let terminals = filter_terminals(&resolution);
    let blob = assemble(set, &resolution, &pool)?;

    info!("Job pool holds {} jobs", pool.len());
    Ok(CompiledWorkflow {
        pool,
        step_map: resolution.step_map,
        terminals,
        blob,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::blob::encode;
    use crate::compiler::job::InputResolution;
    use crate::workflow::{Module, ParamValue, Sequence};
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn fixture(modules: Vec<Module>, sequences: &[&[&str]]) -> (TempDir, CompileConfig, WorkflowSet) {
        let dir = tempdir().unwrap();
        let mut set = WorkflowSet::new();
        for module in modules {
            fs::write(dir.path().join(module.exec_path()), format!("run {}\n", module.name))
                .unwrap();
            set.add_module(module).unwrap();
        }
        for steps in sequences {
            set.add_sequence(Sequence::new(steps.iter().copied()));
        }
        let mut config = CompileConfig::new(dir.path().join("out"));
        config.set_search_path(dir.path());
        (dir, config, set)
    }

    fn chain() -> Vec<Module> {
        vec![
            Module::new("A", "a.R").with_param("n", vec![ParamValue::Int(1), ParamValue::Int(2)]),
            Module::new("B", "b.R").depends_on("A"),
            Module::new("C", "c.R").depends_on("B"),
            Module::new("D", "d.R").depends_on("B"),
        ]
    }

    fn compile(config: &CompileConfig, set: &WorkflowSet) -> CompiledWorkflow {
        build_pool(set, config, &EmitterRegistry::new()).unwrap()
    }

    #[test]
    fn test_shared_prefix_compiles_four_jobs() {
        let (_dir, config, set) = fixture(chain(), &[&["A", "B", "C"], &["A", "B", "D"]]);
        let compiled = compile(&config, &set);

        assert_eq!(compiled.pool.len(), 4);
        assert_eq!(compiled.terminals[&1], vec![StepKey::new("C", 1)]);
        assert_eq!(compiled.terminals[&2], vec![StepKey::new("D", 2)]);

        let c_outputs = compiled.terminal_outputs(1);
        assert_eq!(c_outputs.len(), 2);
        assert!(c_outputs.iter().all(|id| id.starts_with("C:")));
        assert!(compiled.terminal_outputs(2).iter().all(|id| id.starts_with("D:")));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let (_dir, config, set) = fixture(chain(), &[&["A", "B", "C"], &["A", "B", "D"]]);
        let first = compile(&config, &set);
        let second = compile(&config, &set);

        assert_eq!(encode(&first.blob).unwrap(), encode(&second.blob).unwrap());
        let ids = |c: &CompiledWorkflow| -> Vec<String> {
            c.pool.jobs().flat_map(|j| j.output_ids()).map(String::from).collect()
        };
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_duplicates_share_job_and_outputs() {
        let (_dir, config, set) = fixture(chain(), &[&["A", "B", "C"], &["A", "B", "D"]]);
        let compiled = compile(&config, &set);

        assert_eq!(compiled.blob["1"]["A"].output, compiled.blob["2"]["A"].output);
        assert_eq!(compiled.blob["1"]["B"].output, compiled.blob["2"]["B"].output);
        assert_eq!(compiled.blob["2"]["B"].depends, vec![StepKey::new("A", 1)]);
        assert_eq!(compiled.blob["2"]["D"].input, compiled.blob["1"]["B"].output);
    }

    #[test]
    fn test_same_name_different_flow_never_collides() {
        let modules = vec![
            Module::new("A", "a.R"),
            Module::new("E", "e.R").with_param("k", vec![ParamValue::Int(3)]),
        ];
        let (_dir, config, set) = fixture(modules, &[&["A", "E"], &["E"]]);
        let compiled = compile(&config, &set);

        assert_eq!(compiled.pool.len(), 3);
        let first: Vec<&str> = compiled.pool.get(&StepKey::new("E", 1)).unwrap().output_ids().collect();
        let second: Vec<&str> = compiled.pool.get(&StepKey::new("E", 2)).unwrap().output_ids().collect();
        assert!(first.iter().all(|id| !second.contains(id)));
    }

    #[test]
    fn test_duplicate_last_step_has_no_terminal() {
        let (_dir, config, set) = fixture(chain(), &[&["A", "B", "C"], &["A", "B"]]);
        let compiled = compile(&config, &set);

        assert_eq!(compiled.pool.len(), 3);
        assert_eq!(compiled.terminals[&1], vec![StepKey::new("C", 1)]);
        assert!(compiled.terminals[&2].is_empty());
        assert!(compiled.terminal_outputs(2).is_empty());
        assert_eq!(compiled.terminal_steps(), vec![&StepKey::new("C", 1)]);
    }

    #[test]
    fn test_filter_reduces_outputs() {
        let modules = vec![Module::new("X", "x.R")
            .with_param("alpha", vec![ParamValue::Int(1), ParamValue::Int(2)])
            .with_filter("alpha>1")];
        let (_dir, config, set) = fixture(modules, &[&["X"]]);
        let compiled = compile(&config, &set);

        let job = compiled.pool.get(&StepKey::new("X", 1)).unwrap();
        assert_eq!(job.outputs.len(), 1);
        assert_eq!(job.outputs[0].combination.get("alpha"), Some(&ParamValue::Int(2)));
        assert_eq!(compiled.blob["1"]["X"].output.len(), 1);
    }

    #[test]
    fn test_blob_metadata() {
        let (_dir, config, set) = fixture(chain(), &[&["A", "B", "C"], &["A", "B", "D"]]);
        let compiled = compile(&config, &set);

        let meta = &compiled.blob["2"]["D"].meta;
        assert_eq!(meta.pipeline_id, "2");
        assert_eq!(meta.pipeline_name, "a_A+a_B+b_D");
        assert_eq!(meta.module, "D");
    }

    fn converging(b_values: Vec<ParamValue>) -> Vec<Module> {
        vec![
            Module::new("A", "a.R").with_param("n", vec![ParamValue::Int(1), ParamValue::Int(2)]),
            Module::new("B", "b.R")
                .with_param("k", b_values)
                .depends_on("A"),
            Module::new("C", "c.R").depends_on("B").depends_on("A"),
        ]
    }

    #[test]
    fn test_multiple_dependencies_group_in_signature_order() {
        let (_dir, config, set) = fixture(converging(vec![ParamValue::Int(7)]), &[&["A", "B", "C"]]);
        let compiled = compile(&config, &set);

        let a: Vec<&str> = compiled.pool.get(&StepKey::new("A", 1)).unwrap().output_ids().collect();
        let b: Vec<&str> = compiled.pool.get(&StepKey::new("B", 1)).unwrap().output_ids().collect();
        let c = compiled.pool.get(&StepKey::new("C", 1)).unwrap();

        assert_eq!(
            c.inputs,
            InputResolution::Grouped {
                steps: vec![StepKey::new("A", 1), StepKey::new("B", 1)]
            }
        );
        assert_eq!(c.inputs.group_size(), 2);
        assert_eq!(c.outputs.len(), 2);
        assert_eq!(c.outputs[0].inputs, vec![a[0], b[0]]);
        assert_eq!(c.outputs[1].inputs, vec![a[1], b[1]]);
        assert_eq!(compiled.blob["1"]["C"].input, vec![a[0], b[0], a[1], b[1]]);
        assert_eq!(
            compiled.blob["1"]["C"].depends,
            vec![StepKey::new("A", 1), StepKey::new("B", 1)]
        );
    }

    #[test]
    fn test_multiple_dependencies_unequal_output_counts() {
        let (_dir, config, set) = fixture(
            converging(vec![ParamValue::Int(7), ParamValue::Int(8)]),
            &[&["A", "B", "C"]],
        );

        assert!(matches!(
            build_pool(&set, &config, &EmitterRegistry::new()),
            Err(CompileError::UpstreamShape { ref module, .. }) if module == "C"
        ));
    }

    #[test]
    fn test_failure_leaves_no_partial_pool() {
        let mut modules = chain();
        modules[2] = Module::new("C", "c.R")
            .depends_on("B")
            .with_output_file("x", "rds")
            .with_output_file("y", "csv");
        let (_dir, config, set) = fixture(modules, &[&["A", "B", "C"]]);

        assert!(matches!(
            build_pool(&set, &config, &EmitterRegistry::new()),
            Err(CompileError::UnsupportedOutputShape { ref module, .. }) if module == "C"
        ));
    }
}
