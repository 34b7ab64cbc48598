//! Version management and bumping utilities.

use anyhow::{Context, Result};
use colored::Colorize;
use semver::{BuildMetadata, Prerelease, Version};
use std::path::PathBuf;
use tracing::info;

use crate::graph::DependencyGraph;
use crate::workspace::Workspace;

/// Type of version bump to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BumpType {
    Major,
    Minor,
    Patch,
    Prerelease,
}

impl BumpType {
    /// The version following `current`.
    pub fn apply(self, current: &Version) -> Result<Version> {
        let mut new_version = current.clone();
        new_version.build = BuildMetadata::EMPTY;

        match self {
            BumpType::Major => {
                new_version.major += 1;
                new_version.minor = 0;
                new_version.patch = 0;
                new_version.pre = Prerelease::EMPTY;
            }
            BumpType::Minor => {
                new_version.minor += 1;
                new_version.patch = 0;
                new_version.pre = Prerelease::EMPTY;
            }
            BumpType::Patch => {
                new_version.patch += 1;
                new_version.pre = Prerelease::EMPTY;
            }
            BumpType::Prerelease => {
                let pre = current.pre.as_str();
                let next = if pre.is_empty() {
                    "alpha.1".to_string()
                } else {
                    match pre.rsplit_once('.') {
                        // "alpha.1" -> "alpha.2"
                        Some((prefix, num)) if num.parse::<u64>().is_ok() => {
                            format!("{}.{}", prefix, num.parse::<u64>()? + 1)
                        }
                        _ => format!("{}.1", pre),
                    }
                };
                new_version.pre = Prerelease::new(&next)
                    .with_context(|| format!("Invalid pre-release '{}'", next))?;
            }
        }

        Ok(new_version)
    }
}

/// Applies version bumps to a workspace.
pub struct VersionManager<'w> {
    workspace: &'w mut Workspace,
}

impl<'w> VersionManager<'w> {
    pub fn new(workspace: &'w mut Workspace) -> Self {
        Self { workspace }
    }

    /// Bump `package` and point its in-workspace dependents at the new version.
    ///
    /// Dependents that only reference the package by path are left untouched.
    pub fn bump(&mut self, package: &str, bump_type: BumpType, dry_run: bool) -> Result<BumpReport> {
        let target = self.workspace.get(package)?;
        let old_version = target.version.clone();
        let new_version = bump_type.apply(&old_version)?;

        let mut report = BumpReport {
            package: target.package_name.clone(),
            path: target.path.clone(),
            old_version,
            new_version: new_version.clone(),
            dependents: Vec::new(),
            dry_run,
        };

        let graph = DependencyGraph::new(self.workspace);
        let dependents: Vec<String> = graph
            .dependents(package)
            .into_iter()
            .filter(|p| p.dependencies_on(package).any(|d| d.req.is_some()))
            .map(|p| p.package_name.clone())
            .collect();

        if !dry_run {
            self.workspace
                .package_mut(package)
                .context("Bumped package disappeared from workspace")?
                .set_version(&new_version)?;
            info!(package, version = %new_version, "bumped version");
        }

        for dependent in dependents {
            if !dry_run {
                self.workspace
                    .package_mut(&dependent)
                    .context("Dependent disappeared from workspace")?
                    .set_dependency_version(package, &new_version)?;
                info!(package = %dependent, dependency = package, "updated requirement");
            }
            report.dependents.push(dependent);
        }

        Ok(report)
    }
}

/// Outcome of a version bump.
#[derive(Debug, Clone)]
pub struct BumpReport {
    pub package: String,
    pub path: PathBuf,
    pub old_version: Version,
    pub new_version: Version,
    /// Dependents whose requirement was (or would be) rewritten.
    pub dependents: Vec<String>,
    pub dry_run: bool,
}

impl BumpReport {
    pub fn print(&self) {
        if self.dry_run {
            println!("{}", "Dry run mode: no files were changed".yellow().bold());
        }
        println!(
            "{} {} {} → {}",
            "✓".green().bold(),
            self.package.bright_white().bold(),
            self.old_version.to_string().dimmed(),
            self.new_version.to_string().green()
        );
        for dependent in &self.dependents {
            println!(
                "  {} requirement updated in {}",
                "•".dimmed(),
                dependent.bright_white()
            );
        }
    }
}

#[cfg(test)]
#[path = "version_tests.rs"]
mod tests;
