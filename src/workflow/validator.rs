//! Workflow Set Validation
//!
//! Structural checks run before compilation:
//! - Sequence references point to defined modules
//! - Module names are unique within a sequence
//! - Every dependency runs earlier in the same sequence
//! - Filter expressions parse and only name declared parameters

use std::collections::HashSet;

use log::{debug, info, warn};

use super::filter::Filter;
use super::model::{Module, WorkflowSet};
use crate::error::{CompileError, Result};

/// Validates a module's filter expression against its parameter grid.
fn validate_filter(module: &Module) -> Result<()> {
    let Some(expression) = &module.filter else {
        return Ok(());
    };

    let invalid = |reason: String| CompileError::InvalidFilter {
        module: module.name.clone(),
        expression: expression.clone(),
        reason,
    };

    let filter = Filter::parse(expression).map_err(invalid)?;
    for ident in filter.identifiers() {
        if !module.params.contains_key(ident) {
            return Err(invalid(format!("unknown parameter '{}'", ident)));
        }
    }
    Ok(())
}

/// Validates the workflow set.
///
/// Performs the following checks:
/// 1. At least one sequence exists
/// 2. Sequences only name defined modules, each at most once
/// 3. Dependencies of each module run before it in every sequence using it
/// 4. Filter expressions are well formed
pub fn validate_workflow_set(set: &WorkflowSet) -> Result<()> {
    info!(
        "Validating workflow set with {} modules and {} sequences",
        set.modules.len(),
        set.sequences.len()
    );

    if set.sequences.is_empty() {
        return Err(CompileError::EmptyWorkflow);
    }

    for module in set.modules.values() {
        validate_filter(module)?;
    }

    let mut used: HashSet<&str> = HashSet::new();
    for (id, sequence) in set.sequences() {
        if sequence.steps.is_empty() {
            warn!("Sequence {} has no steps", id);
        }

        let mut preceding: HashSet<&str> = HashSet::new();
        for name in &sequence.steps {
            let module = set
                .get_module(name)
                .ok_or_else(|| CompileError::UnknownModule {
                    sequence: id,
                    module: name.clone(),
                })?;

            if preceding.contains(name.as_str()) {
                return Err(CompileError::DuplicateStep {
                    sequence: id,
                    module: name.clone(),
                });
            }

            for upstream in module.upstream_modules() {
                if !preceding.contains(upstream) {
                    return Err(CompileError::UnresolvedDependency {
                        sequence: id,
                        module: name.clone(),
                        dependency: upstream.to_string(),
                    });
                }
            }

            if module.depends.is_empty() {
                debug!("Module '{}' is a root step in sequence {}", name, id);
            }

            preceding.insert(name.as_str());
            used.insert(name.as_str());
        }
    }

    for module in set.modules.values() {
        if !used.contains(module.name.as_str()) {
            warn!("Module '{}' is not used by any sequence", module.name);
        }
    }

    info!("Workflow set validated");
    Ok(())
}

/// Quick validation that returns every problem found as a message.
pub fn quick_validate(set: &WorkflowSet) -> Vec<String> {
    let mut errors = Vec::new();

    if set.sequences.is_empty() {
        errors.push(CompileError::EmptyWorkflow.to_string());
    }

    for module in set.modules.values() {
        if module.exec.trim().is_empty() {
            errors.push(format!("Module '{}': missing executable", module.name));
        }
        if let Err(e) = validate_filter(module) {
            errors.push(e.to_string());
        }
    }

    for (id, sequence) in set.sequences() {
        for (position, name) in sequence.steps.iter().enumerate() {
            let Some(module) = set.get_module(name) else {
                errors.push(format!("Sequence {}: unknown module '{}'", id, name));
                continue;
            };
            let before = &sequence.steps[..position];
            for upstream in module.upstream_modules() {
                if !before.iter().any(|s| s == upstream) {
                    errors.push(format!(
                        "Sequence {}: '{}' needs '{}' to run first",
                        id, name, upstream
                    ));
                }
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{ParamValue, Sequence};

    fn two_step_set() -> WorkflowSet {
        let mut set = WorkflowSet::new();
        set.add_module(Module::new("a", "a.R")).unwrap();
        set.add_module(Module::new("b", "b.R").depends_on("a")).unwrap();
        set.add_sequence(Sequence::new(["a", "b"]));
        set
    }

    #[test]
    fn test_valid_workflow_set() {
        assert!(validate_workflow_set(&two_step_set()).is_ok());
    }

    #[test]
    fn test_empty_workflow_set() {
        let set = WorkflowSet::new();
        assert!(matches!(
            validate_workflow_set(&set),
            Err(CompileError::EmptyWorkflow)
        ));
    }

    #[test]
    fn test_unknown_module_in_sequence() {
        let mut set = two_step_set();
        set.add_sequence(Sequence::new(["a", "ghost"]));

        match validate_workflow_set(&set) {
            Err(CompileError::UnknownModule { sequence, module }) => {
                assert_eq!(sequence, 2);
                assert_eq!(module, "ghost");
            }
            other => panic!("expected UnknownModule, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_step_in_sequence() {
        let mut set = two_step_set();
        set.sequences[0] = Sequence::new(["a", "b", "a"]);

        assert!(matches!(
            validate_workflow_set(&set),
            Err(CompileError::DuplicateStep { module, .. }) if module == "a"
        ));
    }

    #[test]
    fn test_dependency_must_run_first() {
        let mut set = two_step_set();
        set.add_sequence(Sequence::new(["b", "a"]));

        assert!(matches!(
            validate_workflow_set(&set),
            Err(CompileError::UnresolvedDependency { sequence: 2, ref dependency, .. }) if dependency == "a"
        ));
    }

    #[test]
    fn test_filter_unknown_parameter() {
        let mut set = WorkflowSet::new();
        set.add_module(
            Module::new("x", "x.R")
                .with_param("alpha", vec![ParamValue::Int(1)])
                .with_filter("beta > 1"),
        )
        .unwrap();
        set.add_sequence(Sequence::new(["x"]));

        let err = validate_workflow_set(&set).unwrap_err();
        assert!(matches!(err, CompileError::InvalidFilter { .. }));
        assert!(err.to_string().contains("beta"));
    }

    #[test]
    fn test_filter_syntax_error() {
        let mut set = WorkflowSet::new();
        set.add_module(
            Module::new("x", "x.R")
                .with_param("alpha", vec![ParamValue::Int(1)])
                .with_filter("alpha >"),
        )
        .unwrap();
        set.add_sequence(Sequence::new(["x"]));

        assert!(validate_workflow_set(&set).is_err());
    }

    #[test]
    fn test_quick_validate_collects_all() {
        let mut set = WorkflowSet::new();
        set.add_module(Module::new("b", "").depends_on("a")).unwrap();
        set.add_sequence(Sequence::new(["b", "ghost"]));

        let errors = quick_validate(&set);
        assert!(errors.iter().any(|e| e.contains("missing executable")));
        assert!(errors.iter().any(|e| e.contains("unknown module 'ghost'")));
        assert!(errors.iter().any(|e| e.contains("needs 'a'")));
    }

    #[test]
    fn test_quick_validate_clean() {
        assert!(quick_validate(&two_step_set()).is_empty());
    }
}
