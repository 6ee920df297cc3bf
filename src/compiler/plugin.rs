//! Script Emitters
//!
//! Language plugins contribute the generated code surrounding a module's
//! own script: the preamble binding parameters and inputs, the epilogue
//! saving output variables, and an optional error handler. Only the
//! interface and a pass-through emitter live here.

use std::collections::HashMap;

use crate::workflow::Module;

/// Marker opening a generated block inside a wrapped script.
pub const BEGIN_MARKER: &str = "## BEGIN generated code";

/// Marker closing a generated block.
pub const END_MARKER: &str = "## END generated code";

/// What an emitter sees of the module it wraps.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptContext<'a> {
    pub module: &'a str,
    /// Parameter names in declaration order
    pub params: Vec<&'a str>,
    /// Number of upstream modules feeding the script
    pub input_count: usize,
    /// Extra library search paths
    pub libpath: &'a [String],
    /// Arguments following the script path
    pub args: Vec<&'a str>,
    /// Some upstream passes variables rather than files
    pub var_inputs: bool,
    pub output_vars: &'a [String],
}

impl<'a> ScriptContext<'a> {
    pub fn of(module: &'a Module) -> Self {
        Self {
            module: &module.name,
            params: module.params.keys().map(String::as_str).collect(),
            input_count: module.upstream_modules().len(),
            libpath: &module.libpath,
            args: module.exec_args(),
            var_inputs: module.has_var_dependency(),
            output_vars: &module.output_vars,
        }
    }
}

/// Produces language-specific code around a module script.
pub trait ScriptEmitter {
    /// Plugin tag this emitter answers to.
    fn name(&self) -> &str;

    /// Code run before the module body.
    fn preamble(&self, context: &ScriptContext<'_>) -> String;

    /// Code run after the body to save `context.output_vars`.
    fn epilogue(&self, context: &ScriptContext<'_>) -> String;

    /// Wraps the assembled script in the language's error handler.
    fn wrap_try_catch(&self, script: &str) -> String {
        script.to_string()
    }
}

/// Emitter for modules without a plugin: adds nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEmitter;

impl ScriptEmitter for PassthroughEmitter {
    fn name(&self) -> &str {
        "plain"
    }

    fn preamble(&self, _context: &ScriptContext<'_>) -> String {
        String::new()
    }

    fn epilogue(&self, _context: &ScriptContext<'_>) -> String {
        String::new()
    }
}

/// Emitters keyed by plugin tag.
#[derive(Default)]
pub struct EmitterRegistry {
    emitters: HashMap<String, Box<dyn ScriptEmitter>>,
    fallback: PassthroughEmitter,
}

impl EmitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an emitter under its own name, replacing any previous one.
    pub fn register(&mut self, emitter: Box<dyn ScriptEmitter>) {
        self.emitters.insert(emitter.name().to_string(), emitter);
    }

    /// Emitter for a plugin tag; unknown or absent tags get the pass-through.
    pub fn get(&self, tag: Option<&str>) -> &dyn ScriptEmitter {
        tag.and_then(|t| self.emitters.get(t))
            .map(|e| e.as_ref())
            .unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.emitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty()
    }
}

/// Drops blank lines and `#` comment lines from a script body.
pub fn strip_script(body: &str) -> String {
    body.lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Assembles the script shared by every job of `module`.
///
/// The error handler, when requested, encloses the generated blocks and the
/// body; the header line stays outside it.
pub fn wrap_script(
    module: &Module,
    body: &str,
    emitter: &dyn ScriptEmitter,
    try_catch: bool,
) -> String {
    let context = ScriptContext::of(module);
    let mut parts = Vec::new();

    let preamble = emitter.preamble(&context);
    if !preamble.is_empty() {
        parts.extend([BEGIN_MARKER.to_string(), preamble, END_MARKER.to_string()]);
    }

    parts.push(strip_script(body));

    if !context.output_vars.is_empty() {
        let epilogue = emitter.epilogue(&context);
        if !epilogue.is_empty() {
            parts.extend([BEGIN_MARKER.to_string(), epilogue, END_MARKER.to_string()]);
        }
    }

    let mut script = parts.join("\n");
    if try_catch {
        script = emitter.wrap_try_catch(&script);
    }

    let tag = module.plugin.as_deref().unwrap_or(emitter.name());
    format!("## {} script UUID: ${{DSC_STEP_ID_}}\n{}", tag, script)
}
