//! Release automation for Cargo workspaces.
//!
//! This crate bumps versions across a workspace, works out the order in which
//! members have to be published so that every package's dependencies are already
//! on the registry, publishes them, and tags and announces the release.

pub mod cargo;
pub mod config;
pub mod error;
pub mod git;
pub mod github;
pub mod graph;
pub mod notes;
pub mod process;
pub mod publish;
pub mod registry;
pub mod release;
pub mod version;
pub mod workspace;

#[cfg(test)]
mod testing;

pub use cargo::{CargoManifest, Dependency, DependencyKind};
pub use config::{Config, RetryPolicy};
pub use error::ReleaseError;
pub use git::{CommitSummary, Git};
pub use github::{GitHubClient, GitHubRepo, NewRelease, ReleaseHost};
pub use graph::{DependencyEdge, DependencyGraph};
pub use publish::{CargoPublish, PublishCommand, PublishOutcome, PublishReport, Publisher};
pub use registry::{publish_status, CratesIo, PublishStatus, Registry};
pub use release::{
    commit_bump, CommitOptions, ReleaseOptions, ReleasePlan, ReleaseReport, Releaser,
};
pub use version::{BumpReport, BumpType, VersionManager};
pub use workspace::{Package, RequirementMismatch, Workspace};
