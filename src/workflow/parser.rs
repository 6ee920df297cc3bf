//! Workflow Set Loader
//!
//! Loads a pre-parsed workflow set (modules with expanded parameter grids
//! plus sequences) from YAML and validates it.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::WorkflowSet;
use super::validator::validate_workflow_set;
use crate::error::{CompileError, Result};

/// Loads a workflow set from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Normalizes module and step names
/// 3. Validates the structure
///
/// # Example
///
/// ```rust,no_run
/// use pipeweave::workflow::load_workflow_set;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let set = load_workflow_set("benchmark.yaml")?;
///     println!("Loaded {} modules", set.modules.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow_set(path: impl AsRef<Path>) -> Result<WorkflowSet> {
    let path = path.as_ref();
    info!("Loading workflow set from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let mut set = parse_workflow_set(&yaml_content)?;
    normalize_names(&mut set);

    info!(
        "Parsed {} modules, {} sequences",
        set.modules.len(),
        set.sequences.len()
    );

    validate_workflow_set(&set)?;
    Ok(set)
}

/// Parses a workflow set from YAML text without validating it.
pub fn parse_workflow_set(yaml: &str) -> Result<WorkflowSet> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Trims surrounding whitespace from executables, dependency and step names.
fn normalize_names(set: &mut WorkflowSet) {
    for module in set.modules.values_mut() {
        module.exec = module.exec.trim().to_string();
        for dep in &mut module.depends {
            dep.module = dep.module.trim().to_string();
        }
    }
    for sequence in &mut set.sequences {
        for step in &mut sequence.steps {
            *step = step.trim().to_string();
        }
    }
}

/// Saves a workflow set to a YAML file.
pub fn save_workflow_set(set: &WorkflowSet, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(set)?;
    fs::write(path, yaml_content).map_err(|e| CompileError::io(path, e))?;
    info!("Workflow set saved to: {}", path.display());
    Ok(())
}
