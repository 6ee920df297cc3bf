//! Job Compiler
//!
//! Turns the first occurrence of a Canonical Step into a [`Job`]: the
//! engine-agnostic description of what to run, on which inputs, producing
//! which named outputs.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::identity::{CanonicalStep, Occurrence, StepKey, StepMap};
use super::namer::{name_outputs, OutputRecord};
use super::plugin::{wrap_script, EmitterRegistry};
use crate::config::CompileConfig;
use crate::error::{CompileError, Result};
use crate::workflow::{Module, ParamGrid};

/// How a job receives upstream outputs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InputResolution {
    /// Root step
    None,
    /// Each output consumes one output of a single upstream job
    Single { step: StepKey },
    /// Each output consumes one position-aligned tuple across upstream jobs
    Grouped { steps: Vec<StepKey> },
}

impl InputResolution {
    /// Upstream identifiers consumed per output.
    pub fn group_size(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Single { .. } => 1,
            Self::Grouped { steps } => steps.len(),
        }
    }
}

/// Compiled form of one Canonical Step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub key: StepKey,
    pub identity: CanonicalStep,

    /// Parameter declarations in declared order
    pub parameters: ParamGrid,

    pub inputs: InputResolution,

    /// Named outputs, one per retained combination and input tuple
    pub outputs: Vec<OutputRecord>,

    /// Extension of the declared output file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,

    pub output_vars: Vec<String>,

    /// Module name keying the shared wrapped script
    pub script: String,

    pub exe_signature: String,

    /// Language tag of the wrapped script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Safe to run alongside sibling jobs
    pub concurrent: bool,

    /// Upstream canonical steps, in dependency-signature order
    pub depends: Vec<StepKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,
}

impl Job {
    pub fn output_ids(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.id.as_str())
    }

    /// Upstream identifiers consumed by this job, first-use order.
    pub fn input_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.outputs.iter().flat_map(|o| &o.inputs) {
            if !ids.contains(&id.as_str()) {
                ids.push(id);
            }
        }
        ids
    }
}

/// Wrapped scripts keyed by module name, shared by all jobs of a module.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(transparent)]
pub struct ScriptLibrary(IndexMap<String, String>);

impl ScriptLibrary {
    pub fn get(&self, module: &str) -> Option<&str> {
        self.0.get(module).map(String::as_str)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.0.contains_key(module)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Locates an executable the way a shell would.
fn find_command(command: &str, config: &CompileConfig) -> Option<PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) || command.contains('/') {
        let path = config.resolve_script(command);
        return path.is_file().then_some(path);
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}

fn short_digest(content: &[u8]) -> String {
    let digest = format!("{:x}", Sha256::digest(content));
    digest[..16].to_string()
}

/// Script body and executable signature of a module.
struct Executable {
    body: String,
    signature: String,
}

fn load_executable(module: &Module, config: &CompileConfig) -> Result<Executable> {
    let missing = |path: &Path| CompileError::MissingScript {
        module: module.name.clone(),
        path: path.display().to_string(),
    };

    if module.shell_run {
        let command = module.exec_path();
        find_command(command, config).ok_or_else(|| missing(Path::new(command)))?;
        return Ok(Executable {
            body: module.exec.clone(),
            signature: module.exec.clone(),
        });
    }

    let path = config.resolve_script(module.exec_path());
    if !path.is_file() {
        return Err(missing(&path));
    }
    let content = fs::read(&path).map_err(|e| CompileError::io(&path, e))?;

    let mut signature = vec![short_digest(&content)];
    signature.extend(module.exec_args().into_iter().map(String::from));

    Ok(Executable {
        body: String::from_utf8_lossy(&content).into_owned(),
        signature: signature.join(" "),
    })
}

/// Compiles jobs, loading and wrapping each module's script once.
pub struct JobCompiler<'a> {
    config: &'a CompileConfig,
    emitters: &'a EmitterRegistry,
    scripts: ScriptLibrary,
    signatures: HashMap<String, String>,
}

impl<'a> JobCompiler<'a> {
    pub fn new(config: &'a CompileConfig, emitters: &'a EmitterRegistry) -> Self {
        Self {
            config,
            emitters,
            scripts: ScriptLibrary::default(),
            signatures: HashMap::new(),
        }
    }

    /// Executable signature of `module`, wrapping its script on first use.
    fn prepare(&mut self, module: &Module) -> Result<String> {
        if let Some(signature) = self.signatures.get(&module.name) {
            return Ok(signature.clone());
        }

        let executable = load_executable(module, self.config)?;
        let emitter = self.emitters.get(module.plugin.as_deref());
        let wrapped = wrap_script(module, &executable.body, emitter, self.config.try_catch());
        debug!(
            "Wrapped script for '{}' with emitter '{}'",
            module.name,
            emitter.name()
        );

        self.scripts.0.insert(module.name.clone(), wrapped);
        self.signatures
            .insert(module.name.clone(), executable.signature.clone());
        Ok(executable.signature)
    }

    /// Compiles the first occurrence of a Canonical Step.
    ///
    /// Upstream jobs must already be in `compiled`.
    pub fn compile(
        &mut self,
        module: &Module,
        occurrence: &Occurrence,
        step_map: &StepMap,
        compiled: &IndexMap<StepKey, Job>,
    ) -> Result<Job> {
        if module.output_files.len() > 1 {
            return Err(CompileError::UnsupportedOutputShape {
                module: module.name.clone(),
                count: module.output_files.len(),
            });
        }

        let exe_signature = self.prepare(module)?;
        let sequence = occurrence.key.sequence;

        let mut depends = Vec::with_capacity(occurrence.identity.depends.len());
        let mut upstream_ids: Vec<Vec<String>> = Vec::new();
        for name in &occurrence.identity.depends {
            let unresolved = || CompileError::UnresolvedDependency {
                sequence,
                module: module.name.clone(),
                dependency: name.clone(),
            };
            let key = step_map.get(sequence, name).ok_or_else(unresolved)?;
            let job = compiled.get(key).ok_or_else(unresolved)?;
            upstream_ids.push(job.output_ids().map(String::from).collect());
            depends.push(key.clone());
        }
        let upstream: Vec<(&str, &[String])> = occurrence
            .identity
            .depends
            .iter()
            .zip(&upstream_ids)
            .map(|(name, ids)| (name.as_str(), ids.as_slice()))
            .collect();

        let outputs = name_outputs(module, &occurrence.identity, &exe_signature, &upstream)?;

        let inputs = match depends.as_slice() {
            [] => InputResolution::None,
            [single] => InputResolution::Single {
                step: single.clone(),
            },
            many => InputResolution::Grouped {
                steps: many.to_vec(),
            },
        };

        info!(
            "Compiled job {} ({} outputs)",
            occurrence.key,
            outputs.len()
        );

        Ok(Job {
            key: occurrence.key.clone(),
            identity: occurrence.identity.clone(),
            parameters: module.params.clone(),
            inputs,
            outputs,
            ext: module.output_files.values().next().cloned(),
            output_vars: module.output_vars.clone(),
            script: module.name.clone(),
            exe_signature,
            plugin: module.plugin.clone(),
            concurrent: !module.exclusive,
            depends,
            workdir: module.workdir.clone(),
        })
    }

    /// Wrapped scripts of every module compiled so far.
    pub fn into_scripts(self) -> ScriptLibrary {
        self.scripts
    }
}
