//! Workflow Compiler
//!
//! Turns a validated workflow set into a deduplicated job pool and the
//! artifacts the execution engine consumes.
//!
//! # Structure
//!
//! - [`identity`]: Canonical Step identities and the step map
//! - [`namer`]: Content-addressed output identifiers
//! - [`job`]: Job compilation and the shared script library
//! - [`plugin`]: Script emitter interface
//! - [`pool`]: Job pool assembly and terminal filtering
//! - [`blob`]: Configuration blob layout and encoding
//! - [`render`]: Engine-specific plan renderers
//!
//! # Example
//!
//! ```rust,no_run
//! use pipeweave::compiler::{compile, render::SosRenderer, write_artifacts, EmitterRegistry};
//! use pipeweave::config::CompileConfig;
//! use pipeweave::workflow::load_workflow_set;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let set = load_workflow_set("benchmark.yaml")?;
//!     let config = CompileConfig::new("dsc_result");
//!
//!     let compiled = compile(&set, &config, &EmitterRegistry::new())?;
//!     write_artifacts(&compiled, &config, &SosRenderer)?;
//!     Ok(())
//! }
//! ```

pub mod blob;
pub mod identity;
pub mod job;
pub mod namer;
pub mod plugin;
pub mod pool;
pub mod render;

use std::path::PathBuf;

use log::info;

pub use identity::{CanonicalStep, StepKey, StepMap};
pub use job::{InputResolution, Job, ScriptLibrary};
pub use namer::{Combination, OutputRecord};
pub use plugin::{EmitterRegistry, PassthroughEmitter, ScriptContext, ScriptEmitter};
pub use pool::{CompiledWorkflow, JobPool, TerminalSet};
pub use render::Renderer;

use crate::config::CompileConfig;
use crate::environment::{InstallReport, Installer, LibraryCache};
use crate::error::Result;
use crate::persist::write_atomic;
use crate::workflow::{validate_workflow_set, WorkflowSet};

/// Validates and compiles a workflow set. Nothing is written to disk.
pub fn compile(
    set: &WorkflowSet,
    config: &CompileConfig,
    emitters: &EmitterRegistry,
) -> Result<CompiledWorkflow> {
    validate_workflow_set(set)?;
    pool::build_pool(set, config, emitters)
}

/// Verifies the libraries every module requires.
pub fn resolve_libraries(
    set: &WorkflowSet,
    config: &CompileConfig,
    installer: &mut dyn Installer,
) -> Result<InstallReport> {
    let cache = LibraryCache::new(config.cache_dir(), config.db_name())
        .with_mode(config.install_mode());
    cache.resolve(&set.library_requirements(), installer)
}

/// Writes the configuration blob, the step map and the rendered plan.
///
/// Returns the written paths.
pub fn write_artifacts(
    compiled: &CompiledWorkflow,
    config: &CompileConfig,
    renderer: &dyn Renderer,
) -> Result<Vec<PathBuf>> {
    let db = config.db_name();
    let dir = config.output_dir();

    let plan = renderer.render(compiled, config)?;
    let artifacts = [
        (dir.join(format!("{}.conf.mpk", db)), blob::encode(&compiled.blob)?),
        (dir.join(format!("{}.map.mpk", db)), blob::encode(&compiled.step_map)?),
        (
            dir.join(format!("{}.{}", db, renderer.extension())),
            plan.into_bytes(),
        ),
    ];

    let mut written = Vec::with_capacity(artifacts.len());
    for (path, bytes) in artifacts {
        write_atomic(&path, bytes)?;
        info!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
