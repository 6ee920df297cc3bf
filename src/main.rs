//! Pipeweave CLI Entry Point
//!
//! Compiles a workflow set into a job plan and its configuration blob.
//!
//! # Usage
//!
//! ```bash
//! # Compile into ./dsc_result
//! pipeweave benchmark.yaml
//!
//! # Emit the engine-agnostic JSON plan instead of SoS
//! pipeweave benchmark.yaml --dialect json
//!
//! # Non-interactive host: any library failure aborts
//! pipeweave benchmark.yaml --managed --output /scratch/bench
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use log::{error, info, warn};

use pipeweave::compiler::render::renderer_for;
use pipeweave::config::DEFAULT_OUTPUT_DIR;
use pipeweave::environment::{CommandInstaller, InstallMode};
use pipeweave::workflow::Sequence;
use pipeweave::{
    compile, load_workflow_set, resolve_libraries, write_artifacts, CompileConfig,
    EmitterRegistry, APP_NAME, VERSION,
};

/// Compile benchmark pipelines into deduplicated job plans
#[derive(Parser, Debug)]
#[command(name = "pipeweave")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the workflow set YAML file
    workflow: PathBuf,

    /// Directory receiving the compiled artifacts
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output: PathBuf,

    /// Directory holding library cache records
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Directory module scripts are resolved against
    #[arg(long)]
    search_path: Option<PathBuf>,

    /// Plan dialect to render (sos or json)
    #[arg(long, default_value = "sos")]
    dialect: String,

    /// Treat library install failures as fatal
    #[arg(long)]
    managed: bool,

    /// Wrap module scripts in the language error handler
    #[arg(long)]
    try_catch: bool,

    /// Ignore previously computed outputs when the plan runs
    #[arg(long)]
    rerun: bool,

    /// Do not verify library requirements
    #[arg(long)]
    skip_libraries: bool,

    /// Maximum concurrent jobs recorded in the plan
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn build_config(args: &Args) -> CompileConfig {
    let mut config = CompileConfig::new(&args.output);
    if let Some(dir) = &args.cache_dir {
        config.set_cache_dir(dir);
    }
    match &args.search_path {
        Some(dir) => config.set_search_path(dir),
        None => {
            let parent = args.workflow.parent().filter(|p| !p.as_os_str().is_empty());
            if let Some(dir) = parent {
                config.set_search_path(dir);
            }
        }
    }
    if args.managed {
        config.set_install_mode(InstallMode::Managed);
    }
    if let Some(jobs) = args.jobs {
        config.set_jobs(jobs);
    }
    config.set_try_catch(args.try_catch);
    config.set_rerun(args.rerun);
    config
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let renderer = renderer_for(&args.dialect)
        .ok_or_else(|| format!("Unknown plan dialect '{}' (expected sos or json)", args.dialect))?;
    let config = build_config(&args);

    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!();

    let set = load_workflow_set(&args.workflow).map_err(|e| {
        error!("Failed to load workflow set: {}", e);
        e
    })?;

    let compiled = compile(&set, &config, &EmitterRegistry::new())?;

    if args.skip_libraries {
        info!("Skipping library verification");
    } else {
        let mut installer = CommandInstaller::new(config.install_mode());
        let report = resolve_libraries(&set, &config, &mut installer)?;
        info!(
            "Libraries: {} verified, {} installed",
            report.verified.len(),
            report.install_count()
        );
        if !report.is_complete() {
            for (requirement, reason) in &report.failed {
                warn!("{} needs manual installation: {}", requirement, reason);
            }
        }
    }

    let written = write_artifacts(&compiled, &config, renderer.as_ref())?;

    println!();
    println!(
        "{} {} jobs from {} sequences",
        "Compiled".green().bold(),
        compiled.pool.len(),
        set.sequences.len()
    );
    for (sequence, steps) in &compiled.terminals {
        let outputs = compiled.terminal_outputs(*sequence);
        let label = match steps.first() {
            Some(key) => key.to_string(),
            None => "(shared with an earlier sequence)".dimmed().to_string(),
        };
        let name = set.sequence(*sequence).map(Sequence::label).unwrap_or_default();
        println!(
            "  sequence {} [{}]: {} ({} outputs)",
            sequence,
            name,
            label,
            outputs.len()
        );
    }
    for path in written {
        println!("  {} {}", "wrote".cyan(), path.display());
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
