//! Workflow Data Model
//!
//! Pre-parsed structures describing modules and the sequences that chain
//! them. The compiler treats a [`WorkflowSet`] as immutable input.
//!
//! # Example YAML Format
//!
//! ```yaml
//! modules:
//!   - name: simulate
//!     exec: simulate.R
//!     plugin: R
//!     params:
//!       n: [100, 1000]
//!       seed: 1
//!     output_vars: [x, y]
//!     output_files:
//!       data: rds
//!
//!   - name: fit
//!     exec: fit.py
//!     plugin: python
//!     params:
//!       alpha: [0.1, 0.5]
//!     filter: alpha > 0.2
//!     depends:
//!       - module: simulate
//!         variable: x
//!         kind: var
//!     output_files:
//!       fitted: pkl
//!     requires:
//!       - ecosystem: Python_Module
//!         name: numpy
//!
//! sequences:
//!   - steps: [simulate, fit]
//! ```

use std::fmt;

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

use crate::error::{CompileError, Result};

/// A single candidate value in a parameter grid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Null,
}

impl ParamValue {
    /// Type tag distinguishing values whose text forms coincide.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for ParamValue {
    /// Text form as rendered into scripts. Floats keep their decimal point.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(s) => write!(f, "{}", s),
            Self::Null => write!(f, "NULL"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

/// Ordered parameter grid: declaration order is part of the identity contract.
pub type ParamGrid = IndexMap<String, Vec<ParamValue>>;

/// Deserializes a grid whose values are either a scalar or a list of scalars.
fn scalar_or_list_grid<'de, D>(deserializer: D) -> std::result::Result<ParamGrid, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        Many(Vec<ParamValue>),
        One(ParamValue),
    }

    let raw: IndexMap<String, OneOrMany> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| match value {
            OneOrMany::Many(values) => (key, values),
            OneOrMany::One(value) => (key, vec![value]),
        })
        .collect())
}

/// How a module consumes an upstream module's output.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    File,
    Var,
}

/// A dependency on another module's output.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Dependency {
    /// Name of the producing module
    pub module: String,

    /// Variable or file read from the producer
    #[serde(default)]
    pub variable: String,

    #[serde(default)]
    pub kind: DependencyKind,
}

/// An external library a module needs at run time.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Requirement {
    /// Ecosystem tag, e.g. `R_library` or `Python_Module`
    pub ecosystem: String,

    pub name: String,

    /// Minimal acceptable version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Requirement {
    pub fn new(ecosystem: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ecosystem: ecosystem.into(),
            name: name.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {} (>={})", self.ecosystem, self.name, version),
            None => write!(f, "{} {}", self.ecosystem, self.name),
        }
    }
}

/// A named computational unit with a parameter grid and dependencies.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Module {
    /// Unique module name
    pub name: String,

    /// Executable descriptor: script path (or command) followed by arguments
    pub exec: String,

    /// Parameter grid in declaration order
    #[serde(default, deserialize_with = "scalar_or_list_grid")]
    pub params: ParamGrid,

    /// Upstream outputs this module consumes
    #[serde(default)]
    pub depends: Vec<Dependency>,

    /// Names of variables returned by the module
    #[serde(default)]
    pub output_vars: Vec<String>,

    /// Output file variables mapped to their extension
    #[serde(default)]
    pub output_files: IndexMap<String, String>,

    /// Boolean predicate over parameter names restricting the grid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Language tag selecting the script emitter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,

    /// Run `exec` as a command instead of reading it as a script
    #[serde(default)]
    pub shell_run: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    /// Extra library search paths handed to the script emitter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libpath: Vec<String>,

    /// External libraries this module requires
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Requirement>,

    /// Module touches shared mutable state and must not run alongside siblings
    #[serde(default)]
    pub exclusive: bool,
}

impl Module {
    /// Creates a module with an empty grid and no dependencies.
    ///
    /// # Example
    ///
    /// ```
    /// use pipeweave::workflow::{Module, ParamValue};
    ///
    /// let module = Module::new("fit", "fit.R")
    ///     .with_param("alpha", vec![ParamValue::Int(1), ParamValue::Int(2)])
    ///     .with_filter("alpha > 1")
    ///     .with_output_file("fitted", "rds")
    ///     .depends_on("simulate");
    /// ```
    pub fn new(name: impl Into<String>, exec: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            exec: exec.into().trim().to_string(),
            params: ParamGrid::new(),
            depends: Vec::new(),
            output_vars: Vec::new(),
            output_files: IndexMap::new(),
            filter: None,
            plugin: None,
            shell_run: false,
            workdir: None,
            libpath: Vec::new(),
            requires: Vec::new(),
            exclusive: false,
        }
    }

    /// Appends a parameter to the grid, keeping declaration order.
    pub fn with_param(mut self, name: impl Into<String>, values: Vec<ParamValue>) -> Self {
        self.params.insert(name.into(), values);
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_output_var(mut self, name: impl Into<String>) -> Self {
        self.output_vars.push(name.into());
        self
    }

    pub fn with_output_file(mut self, name: impl Into<String>, extension: impl Into<String>) -> Self {
        self.output_files.insert(name.into(), extension.into());
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requires.push(requirement);
        self
    }

    /// Marks `exec` as a command to run directly.
    pub fn shell(mut self) -> Self {
        self.shell_run = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Adds a file-valued dependency on another module.
    pub fn depends_on(self, module: impl Into<String>) -> Self {
        self.depends_on_kind(module, DependencyKind::File)
    }

    /// Adds a dependency of the given kind on another module.
    pub fn depends_on_kind(mut self, module: impl Into<String>, kind: DependencyKind) -> Self {
        self.depends.push(Dependency {
            module: module.into(),
            variable: String::new(),
            kind,
        });
        self
    }

    /// Immediate upstream module names, de-duplicated, in declaration order.
    pub fn upstream_modules(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for dep in &self.depends {
            if !seen.contains(&dep.module.as_str()) {
                seen.push(dep.module.as_str());
            }
        }
        seen
    }

    /// True if any dependency passes variables rather than files.
    pub fn has_var_dependency(&self) -> bool {
        self.depends.iter().any(|d| d.kind == DependencyKind::Var)
    }

    /// Script path (or command) part of the executable descriptor.
    pub fn exec_path(&self) -> &str {
        self.exec.split_whitespace().next().unwrap_or("")
    }

    /// Argument tokens following the script path.
    pub fn exec_args(&self) -> Vec<&str> {
        self.exec.split_whitespace().skip(1).collect()
    }
}

/// One ordered path through the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Sequence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Module names in execution order
    pub steps: Vec<String>,
}

impl Sequence {
    pub fn new<I, S>(steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }

    /// Display label: the declared name, else the joined steps.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.steps.join("+"),
        }
    }
}

/// Module definitions plus every sequence combining them.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct WorkflowSet {
    /// Modules keyed by name, listed in YAML as a sequence
    #[serde(with = "module_list")]
    pub modules: IndexMap<String, Module>,
    pub sequences: Vec<Sequence>,
}

mod module_list {
    use indexmap::IndexMap;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Module;

    pub fn serialize<S: Serializer>(
        modules: &IndexMap<String, Module>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(modules.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IndexMap<String, Module>, D::Error> {
        let list: Vec<Module> = Vec::deserialize(deserializer)?;
        let mut modules = IndexMap::with_capacity(list.len());
        for mut module in list {
            module.name = module.name.trim().to_string();
            if modules.contains_key(&module.name) {
                return Err(D::Error::custom(format!(
                    "module '{}' is defined more than once",
                    module.name
                )));
            }
            modules.insert(module.name.clone(), module);
        }
        Ok(modules)
    }
}

impl WorkflowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module definition.
    pub fn add_module(&mut self, module: Module) -> Result<()> {
        if self.modules.contains_key(&module.name) {
            return Err(CompileError::DuplicateModule(module.name));
        }
        self.modules.insert(module.name.clone(), module);
        Ok(())
    }

    /// Adds a sequence and returns its 1-based id.
    pub fn add_sequence(&mut self, sequence: Sequence) -> usize {
        self.sequences.push(sequence);
        self.sequences.len()
    }

    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// Sequence by 1-based id.
    pub fn sequence(&self, id: usize) -> Option<&Sequence> {
        id.checked_sub(1).and_then(|index| self.sequences.get(index))
    }

    /// Iterates sequences with their 1-based ids.
    pub fn sequences(&self) -> impl Iterator<Item = (usize, &Sequence)> {
        self.sequences.iter().enumerate().map(|(i, s)| (i + 1, s))
    }

    /// Library requirements aggregated over all modules, first-seen order,
    /// without duplicates.
    pub fn library_requirements(&self) -> Vec<Requirement> {
        let mut requirements: Vec<Requirement> = Vec::new();
        for requirement in self.modules.values().flat_map(|m| &m.requires) {
            if !requirements.contains(requirement) {
                requirements.push(requirement.clone());
            }
        }
        requirements
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

/// Letter label for a 1-based sequence id: 1 → `A`, 26 → `Z`, 27 → `AA`.
pub fn sequence_label(id: usize) -> String {
    let mut n = id;
    let mut label = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        label.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    label.reverse();
    String::from_utf8(label).unwrap_or_default()
}
