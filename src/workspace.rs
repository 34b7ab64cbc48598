//! Workspace loading and member discovery.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use semver::VersionReq;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use toml_edit::{DocumentMut, Item};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cargo::CargoManifest;
use crate::error::ReleaseError;

/// A workspace package. Each member manifest is one package.
pub type Package = CargoManifest;

/// The packages of a Cargo workspace, indexed by name.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    packages: Vec<Package>,
}

impl Workspace {
    /// Load the workspace rooted at `root`.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let root_manifest = root.join("Cargo.toml");
        let content = std::fs::read_to_string(&root_manifest)
            .with_context(|| format!("Failed to read {}", root_manifest.display()))?;
        let document: DocumentMut = content
            .parse()
            .with_context(|| format!("Failed to parse {}", root_manifest.display()))?;

        let mut manifest_paths = Vec::new();
        if document.get("package").is_some() {
            manifest_paths.push(root_manifest.clone());
        }

        if let Some(workspace) = document.get("workspace") {
            let members = string_list(workspace.get("members"));
            let exclude = string_list(workspace.get("exclude"));
            manifest_paths.extend(MemberScanner::new(&root, &members, &exclude)?.scan()?);
        }

        manifest_paths.sort();
        manifest_paths.dedup();

        let packages = manifest_paths
            .iter()
            .map(CargoManifest::load)
            .collect::<Result<Vec<_>>>()?;

        debug!(root = %root.display(), packages = packages.len(), "loaded workspace");
        Self::from_packages(root, packages)
    }

    /// Build a workspace from already loaded packages.
    pub fn from_packages(root: impl AsRef<Path>, packages: Vec<Package>) -> Result<Self> {
        let mut seen = HashSet::new();
        for package in &packages {
            if !seen.insert(package.package_name.as_str()) {
                return Err(ReleaseError::DuplicatePackage {
                    name: package.package_name.clone(),
                }
                .into());
            }
        }

        Ok(Self {
            root: root.as_ref().to_path_buf(),
            packages,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.package_name == name)
    }

    pub fn package_mut(&mut self, name: &str) -> Option<&mut Package> {
        self.packages.iter_mut().find(|p| p.package_name == name)
    }

    /// Look up a member, failing if it is not part of the workspace.
    pub fn get(&self, name: &str) -> Result<&Package> {
        self.package(name).ok_or_else(|| {
            ReleaseError::PackageNotFound {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.package(name).is_some()
    }

    pub fn publishable(&self) -> impl Iterator<Item = &Package> {
        self.packages.iter().filter(|p| p.publish)
    }

    /// Resolve the package a command should act on.
    ///
    /// An explicit name always wins. Otherwise the workspace must have exactly one
    /// publishable package.
    pub fn select_target(&self, name: Option<&str>) -> Result<&Package> {
        if let Some(name) = name {
            return self.get(name);
        }

        let candidates: Vec<&Package> = self.publishable().collect();
        match candidates.as_slice() {
            [] => Err(ReleaseError::NoPublishablePackages.into()),
            [only] => Ok(only),
            many => Err(ReleaseError::AmbiguousTarget {
                candidates: many.iter().map(|p| p.package_name.clone()).collect(),
            }
            .into()),
        }
    }

    /// Find in-workspace requirements that no longer accept the member's current version.
    pub fn check_requirements(&self) -> Vec<RequirementMismatch> {
        let mut mismatches = Vec::new();

        for package in &self.packages {
            for dep in &package.dependencies {
                let (Some(req), Some(target)) = (&dep.req, self.package(&dep.name)) else {
                    continue;
                };

                let matches = match VersionReq::parse(req) {
                    Ok(parsed) => parsed.matches(&target.version),
                    Err(e) => {
                        warn!(package = %package.package_name, dependency = %dep.name, "unparseable requirement '{}': {}", req, e);
                        false
                    }
                };

                if !matches {
                    mismatches.push(RequirementMismatch {
                        package: package.package_name.clone(),
                        dependency: dep.name.clone(),
                        requirement: req.clone(),
                        actual: target.version.clone(),
                    });
                }
            }
        }

        mismatches
    }
}

/// A dependent whose requirement does not accept the current version of a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequirementMismatch {
    pub package: String,
    pub dependency: String,
    pub requirement: String,
    pub actual: semver::Version,
}

/// Walks the tree for manifests matching the workspace `members` patterns.
struct MemberScanner<'a> {
    root: &'a Path,
    literal: Vec<PathBuf>,
    members: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl<'a> MemberScanner<'a> {
    fn new(root: &'a Path, members: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p.trim_end_matches('/'))
                        .with_context(|| format!("Invalid workspace pattern '{}'", p))
                })
                .collect()
        };

        let literal = members
            .iter()
            .filter(|m| !m.contains(['*', '?', '[']))
            .map(|m| root.join(m.trim_end_matches('/')))
            .collect();

        Ok(Self {
            root,
            literal,
            members: compile(members)?,
            exclude: compile(exclude)?,
        })
    }

    fn scan(&self) -> Result<Vec<PathBuf>> {
        for dir in &self.literal {
            let manifest = dir.join("Cargo.toml");
            if !manifest.is_file() {
                return Err(ReleaseError::MissingManifest { path: manifest }.into());
            }
        }

        let mut manifests = Vec::new();

        for entry in WalkDir::new(self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                // Skip target, .git, and other build directories
                !matches!(name.as_ref(), "target" | ".git" | "node_modules" | ".cargo")
            })
        {
            let entry = entry.context("Failed to read directory entry")?;
            if !entry.file_type().is_file() || entry.file_name() != "Cargo.toml" {
                continue;
            }

            let Some(dir) = entry.path().parent() else {
                continue;
            };
            let Ok(relative) = dir.strip_prefix(self.root) else {
                continue;
            };
            if relative.as_os_str().is_empty() {
                continue;
            }

            let options = MatchOptions {
                require_literal_separator: true,
                ..MatchOptions::new()
            };
            if self.members.iter().any(|p| p.matches_path_with(relative, options))
                && !self.exclude.iter().any(|p| p.matches_path_with(relative, options))
            {
                manifests.push(entry.path().to_path_buf());
            }
        }

        Ok(manifests)
    }
}

fn string_list(item: Option<&Item>) -> Vec<String> {
    item.and_then(Item::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
