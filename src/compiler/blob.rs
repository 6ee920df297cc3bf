//! Configuration Blob
//!
//! The nested `[sequence id][module name]` mapping the execution engine
//! loads at run time, encoded as msgpack with named fields. Sequence ids
//! are string keys (`IO_DB['1']['simulate']`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::identity::{IdentityResolution, StepKey, StepMap, FLOW_SEPARATOR};
use super::pool::JobPool;
use crate::error::{CompileError, Result};
use crate::workflow::WorkflowSet;

/// Per-step metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepMeta {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub module: String,
    pub out_vars: Vec<String>,
}

/// Blob entry of one module occurrence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub output: Vec<String>,
    pub input: Vec<String>,
    pub depends: Vec<StepKey>,
    pub meta: StepMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
}

/// Blob keyed by sequence id text, then module name.
pub type ConfigBlob = IndexMap<String, IndexMap<String, StepRecord>>;

/// `{label}_{module}` of every step of a sequence, joined with `+`.
pub fn pipeline_name(step_map: &StepMap, sequence: usize) -> String {
    step_map
        .sequence(sequence)
        .map(|steps| {
            steps
                .values()
                .map(StepKey::to_string)
                .collect::<Vec<_>>()
                .join(FLOW_SEPARATOR)
        })
        .unwrap_or_default()
}

/// Builds one record per raw occurrence, pointing duplicates at the job of
/// their canonical step.
pub fn assemble(
    set: &WorkflowSet,
    resolution: &IdentityResolution,
    pool: &JobPool,
) -> Result<ConfigBlob> {
    let mut blob = ConfigBlob::new();

    for occurrence in &resolution.occurrences {
        let sequence = occurrence.key.sequence;
        let job = pool
            .get(&occurrence.canonical)
            .ok_or_else(|| CompileError::UnknownModule {
                sequence,
                module: occurrence.key.module.clone(),
            })?;
        let out_vars = set
            .get_module(&occurrence.key.module)
            .map(|m| m.output_vars.clone())
            .unwrap_or_default();

        let record = StepRecord {
            output: job.output_ids().map(String::from).collect(),
            input: job.input_ids().into_iter().map(String::from).collect(),
            depends: job.depends.clone(),
            meta: StepMeta {
                pipeline_id: sequence.to_string(),
                pipeline_name: pipeline_name(&resolution.step_map, sequence),
                module: occurrence.key.module.clone(),
                out_vars,
            },
            ext: job.ext.clone(),
        };

        blob.entry(sequence.to_string())
            .or_default()
            .insert(occurrence.key.module.clone(), record);
    }

    Ok(blob)
}

/// Msgpack encoding with named struct fields.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec_named(value)?)
}
