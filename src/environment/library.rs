//! Library Dependency Cache
//!
//! Records which external libraries have been verified, so repeated
//! compilations only install what changed.
//!
//! # Record Layout
//!
//! One text file per requirement set under the cache directory:
//!
//! ```text
//! <cache_dir>/<namespace>.<digest>.lib-info
//! ```
//!
//! `digest` is the first 16 hex chars of the SHA-256 of the sorted
//! requirement texts joined by newlines. Each line holds one verified
//! requirement (`R_library MASS`). Records of other digests in the same
//! namespace are stale: their still-wanted entries are harvested and the
//! files removed.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use glob::{glob, Pattern};
use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};

use crate::error::{CompileError, Result};
use crate::persist::write_if_changed;
use crate::workflow::Requirement;

/// File extension of cache records.
pub const RECORD_EXTENSION: &str = "lib-info";

/// Hex chars of the requirement digest kept in record names.
const DIGEST_LEN: usize = 16;

/// Recognized library ecosystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ecosystem {
    RLibrary,
    PythonModule,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RLibrary => "R_library",
            Self::PythonModule => "Python_Module",
        }
    }

    /// Resolves the ecosystem of a requirement, rejecting unknown tags.
    pub fn of(requirement: &Requirement) -> Result<Self> {
        requirement
            .ecosystem
            .parse()
            .map_err(|_| CompileError::InvalidRequirementTag {
                tag: requirement.ecosystem.clone(),
                name: requirement.name.clone(),
            })
    }
}

impl FromStr for Ecosystem {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "R_library" => Ok(Self::RLibrary),
            "Python_Module" => Ok(Self::PythonModule),
            other => Err(format!("unknown library type '{}'", other)),
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where compilation runs, which decides how install failures propagate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    /// Interactive host: failures are reported for manual remediation
    #[default]
    Local,
    /// Non-interactive host: any failure aborts compilation
    Managed,
}

/// Installs (or verifies) one library.
pub trait Installer {
    /// Returns a failure reason if the library is not usable afterwards.
    fn install(
        &mut self,
        ecosystem: Ecosystem,
        requirement: &Requirement,
    ) -> std::result::Result<(), String>;
}

/// Outcome of one cache resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstallReport {
    /// Record covering the current requirement set
    pub record: Option<PathBuf>,
    /// Requirements found in a record and skipped
    pub verified: Vec<String>,
    /// Requirements installed during this resolution
    pub installed: Vec<String>,
    /// Requirements that failed to install, with the reason
    pub failed: Vec<(String, String)>,
    /// Stale records deleted
    pub removed: Vec<PathBuf>,
    /// Whether the record file was (re)written
    pub written: bool,
}

impl InstallReport {
    pub fn install_count(&self) -> usize {
        self.installed.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Cache of verified libraries for one namespace.
#[derive(Debug, Clone)]
pub struct LibraryCache {
    dir: PathBuf,
    namespace: String,
    mode: InstallMode,
}

impl LibraryCache {
    pub fn new(dir: impl Into<PathBuf>, namespace: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            namespace: namespace.into(),
            mode: InstallMode::Local,
        }
    }

    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for a requirement set with the given digest.
    pub fn record_path(&self, digest: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}.{}", self.namespace, digest, RECORD_EXTENSION))
    }

    /// Records of this namespace currently on disk, sorted by path.
    fn records(&self) -> Result<Vec<PathBuf>> {
        let pattern = format!(
            "{}/{}.{}.{}",
            Pattern::escape(&self.dir.to_string_lossy()),
            Pattern::escape(&self.namespace),
            "[0-9a-f]".repeat(DIGEST_LEN),
            RECORD_EXTENSION
        );

        let mut records = Vec::new();
        for entry in glob(&pattern)? {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                CompileError::io(path, e.into_error())
            })?;
            if path.is_file() {
                records.push(path);
            }
        }
        records.sort();
        Ok(records)
    }

    /// Verifies the requirement set, installing only what no record lists.
    pub fn resolve(
        &self,
        requirements: &[Requirement],
        installer: &mut dyn Installer,
    ) -> Result<InstallReport> {
        let mut report = InstallReport::default();
        if requirements.is_empty() {
            debug!("No library requirements for '{}'", self.namespace);
            return Ok(report);
        }

        // Sorted and de-duplicated by text form.
        let mut wanted: BTreeMap<String, (Ecosystem, &Requirement)> = BTreeMap::new();
        for requirement in requirements {
            let ecosystem = Ecosystem::of(requirement)?;
            wanted.insert(requirement.to_string(), (ecosystem, requirement));
        }

        let digest = requirement_digest(wanted.keys().map(String::as_str));
        let record = self.record_path(&digest);
        info!(
            "Resolving {} library requirements (record {})",
            wanted.len(),
            record.display()
        );

        let mut recorded: HashSet<String> = HashSet::new();
        let mut stale = Vec::new();
        for path in self.records()? {
            let content = fs::read_to_string(&path).map_err(|e| CompileError::io(&path, e))?;
            recorded.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|line| wanted.contains_key(*line))
                    .map(String::from),
            );
            if path != record {
                stale.push(path);
            }
        }

        for (text, (ecosystem, requirement)) in &wanted {
            if recorded.contains(text) {
                debug!("Library already verified: {}", text);
                report.verified.push(text.clone());
                continue;
            }

            info!("Installing {}", text);
            match installer.install(*ecosystem, requirement) {
                Ok(()) => report.installed.push(text.clone()),
                Err(reason) if self.mode == InstallMode::Managed => {
                    error!("Installation of {} failed: {}", text, reason);
                    return Err(CompileError::InstallFailed {
                        requirement: text.clone(),
                        reason,
                    });
                }
                Err(reason) => {
                    warn!(
                        "Installation of {} failed: {}. Please install it manually.",
                        text, reason
                    );
                    report.failed.push((text.clone(), reason));
                }
            }
        }

        let lines: Vec<&str> = wanted
            .keys()
            .filter(|text| recorded.contains(*text) || report.installed.contains(*text))
            .map(String::as_str)
            .collect();
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        report.written = write_if_changed(&record, content)?;

        for path in stale {
            warn!("Removing stale library record {}", path.display());
            fs::remove_file(&path).map_err(|e| CompileError::io(&path, e))?;
            report.removed.push(path);
        }

        report.record = Some(record);
        Ok(report)
    }
}

/// Truncated SHA-256 over the sorted, de-duplicated requirement texts
/// joined by newlines.
pub fn requirement_digest<'a>(texts: impl IntoIterator<Item = &'a str>) -> String {
    let mut texts: Vec<&str> = texts.into_iter().collect();
    texts.sort_unstable();
    texts.dedup();
    let joined = texts.join("\n");
    let digest = format!("{:x}", Sha256::digest(joined.as_bytes()));
    digest[..DIGEST_LEN].to_string()
}
