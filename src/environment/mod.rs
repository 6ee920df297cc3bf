//! Environment Management Module
//!
//! Verifies and installs the external libraries modules require, caching
//! what has already been checked.

pub mod installer;
pub mod library;

pub use installer::CommandInstaller;
pub use library::{
    requirement_digest, Ecosystem, InstallMode, InstallReport, Installer, LibraryCache,
};
