//! Compilation Context
//!
//! All settings a compilation pass needs, built once (usually from the
//! command line) and passed by reference to each component.

use std::path::{Path, PathBuf};

use crate::environment::InstallMode;

/// Default directory receiving compiled artifacts.
pub const DEFAULT_OUTPUT_DIR: &str = "dsc_result";

/// Default directory holding library cache records.
pub const DEFAULT_CACHE_DIR: &str = ".sos/.dsc";

/// Settings shared by every stage of a compilation pass.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    output_dir: PathBuf,
    cache_dir: PathBuf,
    search_path: PathBuf,
    install_mode: InstallMode,
    try_catch: bool,
    rerun: bool,
    jobs: usize,
}

impl CompileConfig {
    /// Creates a configuration writing artifacts to `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            search_path: PathBuf::from("."),
            install_mode: InstallMode::Local,
            try_catch: false,
            rerun: false,
            jobs: num_cpus::get(),
        }
    }

    /// Sets the directory holding library cache records.
    pub fn set_cache_dir(&mut self, dir: impl Into<PathBuf>) {
        self.cache_dir = dir.into();
    }

    /// Sets the directory module scripts are resolved against.
    pub fn set_search_path(&mut self, dir: impl Into<PathBuf>) {
        self.search_path = dir.into();
    }

    pub fn set_install_mode(&mut self, mode: InstallMode) {
        self.install_mode = mode;
    }

    /// Wraps generated scripts in the emitter's error handler.
    pub fn set_try_catch(&mut self, enabled: bool) {
        self.try_catch = enabled;
    }

    /// Asks the execution engine to ignore previously computed outputs.
    pub fn set_rerun(&mut self, rerun: bool) {
        self.rerun = rerun;
    }

    pub fn set_jobs(&mut self, jobs: usize) {
        self.jobs = jobs.max(1);
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn search_path(&self) -> &Path {
        &self.search_path
    }

    pub fn install_mode(&self) -> InstallMode {
        self.install_mode
    }

    pub fn try_catch(&self) -> bool {
        self.try_catch
    }

    pub fn rerun(&self) -> bool {
        self.rerun
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Artifact base name: the last component of the output directory.
    pub fn db_name(&self) -> String {
        self.output_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_OUTPUT_DIR)
            .to_string()
    }

    /// Resolves a script path against the search path.
    pub fn resolve_script(&self, script: &str) -> PathBuf {
        let path = Path::new(script);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.search_path.join(path)
        }
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CompileConfig::default();
        assert_eq!(config.output_dir(), Path::new("dsc_result"));
        assert_eq!(config.cache_dir(), Path::new(".sos/.dsc"));
        assert_eq!(config.install_mode(), InstallMode::Local);
        assert!(!config.try_catch());
        assert!(!config.rerun());
        assert!(config.jobs() >= 1);
    }

    #[test]
    fn test_db_name_from_output_dir() {
        let config = CompileConfig::new("/data/results/bench_v2");
        assert_eq!(config.db_name(), "bench_v2");
    }

    #[test]
    fn test_configuration_setters() {
        let mut config = CompileConfig::new("out");
        config.set_cache_dir("/tmp/cache");
        config.set_search_path("/opt/scripts");
        config.set_install_mode(InstallMode::Managed);
        config.set_try_catch(true);
        config.set_rerun(true);
        config.set_jobs(0);

        assert_eq!(config.cache_dir(), Path::new("/tmp/cache"));
        assert_eq!(config.install_mode(), InstallMode::Managed);
        assert!(config.try_catch());
        assert!(config.rerun());
        assert_eq!(config.jobs(), 1);
    }

    #[test]
    fn test_resolve_script() {
        let mut config = CompileConfig::new("out");
        config.set_search_path("/opt/scripts");

        assert_eq!(
            config.resolve_script("fit.R"),
            PathBuf::from("/opt/scripts/fit.R")
        );
        assert_eq!(config.resolve_script("/abs/fit.R"), PathBuf::from("/abs/fit.R"));
    }
}
