//! Plan Renderers
//!
//! A renderer turns the engine-agnostic job pool into the text one
//! execution engine understands. Identity, naming and caching never depend
//! on which renderer runs.

use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::Serialize;

use super::identity::StepKey;
use super::job::{Job, ScriptLibrary};
use super::pool::CompiledWorkflow;
use crate::config::CompileConfig;
use crate::error::Result;
use crate::VERSION;

/// Renders a compiled workflow for one execution engine.
pub trait Renderer {
    /// Dialect name accepted on the command line.
    fn dialect(&self) -> &str;

    /// File extension of the rendered plan.
    fn extension(&self) -> &str;

    fn render(&self, compiled: &CompiledWorkflow, config: &CompileConfig) -> Result<String>;
}

/// Renderer for a dialect name, if one exists.
pub fn renderer_for(dialect: &str) -> Option<Box<dyn Renderer>> {
    match dialect {
        "sos" => Some(Box::new(SosRenderer)),
        "json" => Some(Box::new(JsonRenderer)),
        _ => None,
    }
}

fn io_db(key: &StepKey, field: &str) -> String {
    format!("IO_DB['{}']['{}']['{}']", key.sequence, key.module, field)
}

fn sos_step(key: &StepKey) -> String {
    format!("sos_step('{}')", key)
}

fn python_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// SoS workflow script reading its IO from the configuration blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct SosRenderer;

impl SosRenderer {
    fn header(&self, config: &CompileConfig) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "#!/usr/bin/env sos-runner");
        let _ = writeln!(out, "#fileformat=SOS1.0");
        let _ = writeln!(
            out,
            "# pipeweave {}: rerun = {}, jobs = {}",
            VERSION,
            python_bool(config.rerun()),
            config.jobs()
        );
        let _ = writeln!(out, "import msgpack");
        let _ = writeln!(
            out,
            "IO_DB = msgpack.unpackb(open('{}/{}.conf.mpk', 'rb').read(), raw = False, strict_map_key = False)",
            config.output_dir().display(),
            config.db_name()
        );
        out
    }

    /// Reusable section running one module's script.
    fn module_section(&self, job: &Job, script: &str) -> String {
        let name = &job.script;
        let mut out = String::new();
        let _ = writeln!(out, "\n[{}]", name);
        let _ = writeln!(out, "parameter: DSC_STEP_ID_ = None");
        let _ = writeln!(out, "parameter: {}_output_files = list", name);
        let _ = writeln!(out, "parameter: {}_input_files = list", name);

        let group = job.inputs.group_size();
        if group > 0 {
            let _ = writeln!(
                out,
                "input: {}_input_files, group_by = {}, concurrent = {}",
                name,
                group,
                python_bool(job.concurrent)
            );
        }
        let _ = writeln!(out, "output: {}_output_files, group_by = 1", name);

        let mut task = format!("task: concurrent = {}", python_bool(job.concurrent));
        if let Some(workdir) = &job.workdir {
            let _ = write!(task, ", workdir = '{}'", workdir);
        }
        let _ = writeln!(out, "{}", task);

        let action = match job.plugin.as_deref() {
            Some(tag) => tag,
            None => "bash",
        };
        let _ = writeln!(out, "{}: expand = \"${{ }}\"", action);
        for line in script.lines() {
            let _ = writeln!(out, "  {}", line);
        }
        out
    }

    /// Section running one canonical job.
    fn job_section(&self, job: &Job) -> String {
        let key = &job.key;
        let module = &key.module;
        let mut out = String::new();
        let _ = writeln!(out, "\n[{} ({})]", key, module);
        let _ = writeln!(out, "script_signature = {:?}", job.exe_signature);
        if !job.depends.is_empty() {
            let steps: Vec<String> = job.depends.iter().map(sos_step).collect();
            let _ = writeln!(out, "depends: {}", steps.join(", "));
        }
        let _ = writeln!(out, "output: {}", io_db(key, "output"));
        let _ = writeln!(
            out,
            "sos_run('{m}', {m}_output_files = {}, {m}_input_files = {}, DSC_STEP_ID_ = script_signature)",
            io_db(key, "output"),
            io_db(key, "input"),
            m = module
        );
        out
    }
}

impl Renderer for SosRenderer {
    fn dialect(&self) -> &str {
        "sos"
    }

    fn extension(&self) -> &str {
        "sos"
    }

    fn render(&self, compiled: &CompiledWorkflow, config: &CompileConfig) -> Result<String> {
        let mut out = self.header(config);

        let mut seen_modules: Vec<&str> = Vec::new();
        for job in compiled.pool.jobs() {
            if seen_modules.contains(&job.script.as_str()) {
                continue;
            }
            seen_modules.push(&job.script);
            let script = compiled.pool.scripts().get(&job.script).unwrap_or_default();
            out.push_str(&self.module_section(job, script));
        }

        for job in compiled.pool.jobs() {
            out.push_str(&self.job_section(job));
        }

        let terminals = compiled.terminal_steps();
        let depends: Vec<String> = terminals.iter().map(|k| sos_step(k)).collect();
        let outputs: Vec<String> = terminals.iter().map(|k| io_db(k, "output")).collect();
        let _ = writeln!(out, "\n[DSC]");
        let _ = writeln!(out, "depends: {}", depends.join(", "));
        let _ = writeln!(out, "output: {}", outputs.join(", "));

        Ok(out)
    }
}

/// Engine-agnostic plan as pretty JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

#[derive(Serialize)]
struct JsonPlan<'a> {
    version: &'a str,
    db: String,
    rerun: bool,
    jobs: Vec<&'a Job>,
    scripts: &'a ScriptLibrary,
    terminals: IndexMap<usize, Vec<&'a str>>,
}

impl Renderer for JsonRenderer {
    fn dialect(&self) -> &str {
        "json"
    }

    fn extension(&self) -> &str {
        "json"
    }

    fn render(&self, compiled: &CompiledWorkflow, config: &CompileConfig) -> Result<String> {
        let plan = JsonPlan {
            version: VERSION,
            db: config.db_name(),
            rerun: config.rerun(),
            jobs: compiled.pool.jobs().collect(),
            scripts: compiled.pool.scripts(),
            terminals: compiled
                .terminals
                .keys()
                .map(|&sequence| (sequence, compiled.terminal_outputs(sequence)))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&plan)?)
    }
}
