//! Compilation Errors
//!
//! Every failure aborts the whole compilation: no partial job pool is ever
//! written as final output.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors raised while compiling a workflow set.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Workflow set has no sequences")]
    EmptyWorkflow,

    #[error("Module '{0}' is defined more than once")]
    DuplicateModule(String),

    #[error("Sequence {sequence} references undefined module '{module}'")]
    UnknownModule { sequence: usize, module: String },

    #[error("Sequence {sequence} lists module '{module}' more than once")]
    DuplicateStep { sequence: usize, module: String },

    #[error(
        "Module '{module}' depends on '{dependency}', which does not run before it in sequence {sequence}"
    )]
    UnresolvedDependency {
        sequence: usize,
        module: String,
        dependency: String,
    },

    #[error("Module '{module}' declares {count} output files; multiple output files are not supported")]
    UnsupportedOutputShape { module: String, count: usize },

    #[error("Cannot find script or executable '{path}' for module '{module}'")]
    MissingScript { module: String, path: String },

    #[error("Invalid library type '{tag}' for requirement '{name}' (expected R_library or Python_Module)")]
    InvalidRequirementTag { tag: String, name: String },

    #[error("Automatic installation of {requirement} failed: {reason}. Please login and install it manually.")]
    InstallFailed { requirement: String, reason: String },

    #[error("Module '{module}': invalid filter '{expression}': {reason}")]
    InvalidFilter {
        module: String,
        expression: String,
        reason: String,
    },

    #[error("Module '{module}': invalid parameter combination: {reason}")]
    InvalidParameter { module: String, reason: String },

    #[error("Module '{module}': upstream outputs cannot be grouped ({detail})")]
    UpstreamShape { module: String, detail: String },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid cache record pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("Failed to parse workflow YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to encode configuration blob: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to serialize job plan: {0}")]
    Json(#[from] serde_json::Error),
}

impl CompileError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
