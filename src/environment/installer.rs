//! External library installer.
//!
//! Shells out to `Rscript` or the Python interpreter. In managed mode the
//! installer only checks that a library loads; it never changes the host.

use std::process::{Command, Output};

use log::{debug, info};

use super::library::{Ecosystem, InstallMode, Installer};
use crate::workflow::Requirement;

/// Installer backed by the language runtimes found on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandInstaller {
    mode: InstallMode,
    rscript: String,
    python: String,
}

impl CommandInstaller {
    pub fn new(mode: InstallMode) -> Self {
        Self {
            mode,
            rscript: "Rscript".to_string(),
            python: "python3".to_string(),
        }
    }

    /// Overrides the R front-end binary.
    pub fn with_rscript(mut self, binary: impl Into<String>) -> Self {
        self.rscript = binary.into();
        self
    }

    /// Overrides the Python interpreter binary.
    pub fn with_python(mut self, binary: impl Into<String>) -> Self {
        self.python = binary.into();
        self
    }

    fn command(&self, ecosystem: Ecosystem, requirement: &Requirement) -> Command {
        match ecosystem {
            Ecosystem::RLibrary => {
                let mut cmd = Command::new(&self.rscript);
                cmd.arg("-e").arg(r_script(requirement, self.mode));
                cmd
            }
            Ecosystem::PythonModule => {
                let mut cmd = Command::new(&self.python);
                match self.mode {
                    InstallMode::Managed => {
                        cmd.arg("-c").arg(format!("import {}", requirement.name));
                    }
                    InstallMode::Local => {
                        cmd.args(["-m", "pip", "install", "--user"])
                            .arg(pip_spec(requirement));
                    }
                }
                cmd
            }
        }
    }
}

impl Default for CommandInstaller {
    fn default() -> Self {
        Self::new(InstallMode::Local)
    }
}

impl Installer for CommandInstaller {
    fn install(
        &mut self,
        ecosystem: Ecosystem,
        requirement: &Requirement,
    ) -> std::result::Result<(), String> {
        let mut cmd = self.command(ecosystem, requirement);
        debug!("Running {:?}", cmd);

        let output = cmd
            .output()
            .map_err(|e| format!("cannot run {:?}: {}", cmd.get_program(), e))?;
        check_output(&output)?;

        info!("Library available: {}", requirement);
        Ok(())
    }
}

fn check_output(output: &Output) -> std::result::Result<(), String> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
    Err(format!("{} {}", output.status, last.trim()).trim().to_string())
}

/// R expression loading (and in local mode, first installing) a package.
fn r_script(requirement: &Requirement, mode: InstallMode) -> String {
    let name = &requirement.name;
    let load = format!("suppressMessages(library('{}'))", name);
    let version_check = requirement
        .version
        .as_ref()
        .map(|v| {
            format!(
                "; if (packageVersion('{}') < '{}') quit(status = 1)",
                name, v
            )
        })
        .unwrap_or_default();

    match mode {
        InstallMode::Managed => format!("{}{}", load, version_check),
        InstallMode::Local => format!(
            "if (!requireNamespace('{name}', quietly = TRUE)) \
             install.packages('{name}', repos = 'https://cloud.r-project.org'); {load}{version_check}"
        ),
    }
}

fn pip_spec(requirement: &Requirement) -> String {
    match &requirement.version {
        Some(version) => format!("{}>={}", requirement.name, version),
        None => requirement.name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pip_spec() {
        let plain = Requirement::new("Python_Module", "numpy");
        let pinned = plain.clone().with_version("1.24");
        assert_eq!(pip_spec(&plain), "numpy");
        assert_eq!(pip_spec(&pinned), "numpy>=1.24");
    }

    #[test]
    fn test_r_script_managed_only_loads() {
        let req = Requirement::new("R_library", "MASS");
        let script = r_script(&req, InstallMode::Managed);
        assert!(script.contains("library('MASS')"));
        assert!(!script.contains("install.packages"));
    }

    #[test]
    fn test_r_script_local_installs_with_version_check() {
        let req = Requirement::new("R_library", "ggplot2").with_version("3.0");
        let script = r_script(&req, InstallMode::Local);
        assert!(script.contains("install.packages('ggplot2'"));
        assert!(script.contains("packageVersion('ggplot2') < '3.0'"));
    }

    #[test]
    fn test_missing_binary_reports_failure() {
        let mut installer = CommandInstaller::new(InstallMode::Managed)
            .with_python("pipeweave-no-such-python");
        let req = Requirement::new("Python_Module", "numpy");

        let err = installer.install(Ecosystem::PythonModule, &req).unwrap_err();
        assert!(err.contains("pipeweave-no-such-python"));
    }
}
