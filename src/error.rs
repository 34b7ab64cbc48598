//! Typed failures that callers need to tell apart.
//!
//! Everything is still surfaced as `anyhow::Error`; use `downcast_ref::<ReleaseError>()`
//! to match on a specific case.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("circular dependency detected between '{first}' and '{second}'")]
    CircularDependency { first: String, second: String },

    #[error("package '{name}' is declared more than once in the workspace")]
    DuplicatePackage { name: String },

    #[error("package '{name}' is not a member of the workspace")]
    PackageNotFound { name: String },

    #[error("workspace member has no manifest at {}", path.display())]
    MissingManifest { path: PathBuf },

    #[error("environment variable {name} is not set")]
    MissingEnvVar { name: String },

    #[error("environment variable {name} has invalid value '{value}': {reason}")]
    InvalidEnvVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("more than one publishable package, pass one of: {}", candidates.join(", "))]
    AmbiguousTarget { candidates: Vec<String> },

    #[error("workspace has no publishable packages")]
    NoPublishablePackages,

    #[error("file didn't change: {}", path.display())]
    ManifestUnchanged { path: PathBuf },

    #[error("manifest {} is already being edited", path.display())]
    ManifestEditInProgress { path: PathBuf },

    #[error("failed to publish {name} {version} after {attempts} attempt(s)")]
    PublishFailed {
        name: String,
        version: String,
        attempts: u32,
    },

    #[error("`{program}` exited with {status}:\n{stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },
}
