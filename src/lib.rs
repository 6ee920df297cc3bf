//! Pipeweave - Memoizing Workflow Compiler
//!
//! Compiles a multi-step benchmark pipeline (modules with parameter grids,
//! chained into sequences) into a deduplicated job plan and a configuration
//! blob for an external execution engine.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`workflow`]: Workflow set model, YAML loading and validation
//! - [`compiler`]: Step identity, output naming, job pool and renderers
//! - [`environment`]: Library requirement cache and installers
//! - [`config`]: Settings shared by a compilation pass
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use pipeweave::compiler::render::SosRenderer;
//! use pipeweave::environment::CommandInstaller;
//! use pipeweave::{compile, load_workflow_set, resolve_libraries, write_artifacts};
//! use pipeweave::{CompileConfig, EmitterRegistry};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let set = load_workflow_set("benchmark.yaml")?;
//!     let config = CompileConfig::new("dsc_result");
//!
//!     let compiled = compile(&set, &config, &EmitterRegistry::new())?;
//!     let mut installer = CommandInstaller::new(config.install_mode());
//!     resolve_libraries(&set, &config, &mut installer)?;
//!     write_artifacts(&compiled, &config, &SosRenderer)?;
//!     Ok(())
//! }
//! ```

pub mod compiler;
pub mod config;
pub mod environment;
pub mod error;
pub mod persist;
pub mod workflow;

// Re-export commonly used types
pub use compiler::{compile, resolve_libraries, write_artifacts, CompiledWorkflow, EmitterRegistry};
pub use config::CompileConfig;
pub use error::{CompileError, Result};
pub use workflow::parser::load_workflow_set;
pub use workflow::WorkflowSet;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Pipeweave";
