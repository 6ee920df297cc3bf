//! Workflow Definition Module
//!
//! Data structures for the pre-parsed workflow set consumed by the compiler.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Module, Sequence, WorkflowSet)
//! - [`parser`]: YAML loading and saving
//! - [`validator`]: Structural validation
//! - [`filter`]: Parameter filter predicates

pub mod filter;
pub mod model;
pub mod parser;
pub mod validator;

pub use filter::Filter;
pub use model::{
    sequence_label, Dependency, DependencyKind, Module, ParamGrid, ParamValue, Requirement,
    Sequence, WorkflowSet,
};
pub use parser::{load_workflow_set, parse_workflow_set, save_workflow_set};
pub use validator::{quick_validate, validate_workflow_set};
