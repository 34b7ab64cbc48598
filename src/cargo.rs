//! Cargo.toml parsing and guarded, must-change rewriting.

use anyhow::{Context, Result};
use semver::Version;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use toml_edit::{value, DocumentMut, Item, Table};

use crate::error::ReleaseError;

const DEPENDENCY_SECTIONS: [(&str, DependencyKind); 3] = [
    ("dependencies", DependencyKind::Normal),
    ("dev-dependencies", DependencyKind::Dev),
    ("build-dependencies", DependencyKind::Build),
];

/// A package manifest loaded from disk.
#[derive(Debug)]
pub struct CargoManifest {
    pub path: PathBuf,
    pub package_name: String,
    pub version: Version,
    /// `false` when the manifest says `publish = false` (or an empty registry list).
    pub publish: bool,
    pub dependencies: Vec<Dependency>,
    editing: EditLock,
}

/// A dependency as declared in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Name of the depended-upon package (after `package = "..."` renames).
    pub name: String,
    /// Key the dependency is declared under.
    pub key: String,
    /// Version requirement string, if the declaration has one.
    pub req: Option<String>,
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Normal,
    Dev,
    Build,
}

impl DependencyKind {
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }
}

impl CargoManifest {
    /// Load a Cargo.toml file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let document: DocumentMut = content
            .parse()
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let package = document
            .get("package")
            .ok_or_else(|| anyhow::anyhow!("Missing [package] table in {}", path.display()))?;

        let package_name = package
            .get("name")
            .and_then(Item::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing package.name in {}", path.display()))?
            .to_string();

        let version_str = package
            .get("version")
            .and_then(Item::as_str)
            .ok_or_else(|| anyhow::anyhow!("Missing package.version in {}", path.display()))?;

        let version = Version::parse(version_str)
            .with_context(|| format!("Invalid version '{}' in {}", version_str, path.display()))?;

        let publish = match package.get("publish") {
            Some(item) => match item.as_bool() {
                Some(flag) => flag,
                None => item.as_array().map(|a| !a.is_empty()).unwrap_or(true),
            },
            None => true,
        };

        Ok(Self {
            path: path.to_path_buf(),
            package_name,
            version,
            publish,
            dependencies: collect_dependencies(&document),
            editing: EditLock::default(),
        })
    }

    /// Directory containing the manifest.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Rewrite the manifest on disk.
    ///
    /// The manifest is locked for the duration of the call; a nested `edit` of the same
    /// manifest fails with [`ReleaseError::ManifestEditInProgress`]. A rewrite that
    /// leaves the text untouched fails with [`ReleaseError::ManifestUnchanged`].
    pub fn edit<F>(&self, rewrite: F) -> Result<()>
    where
        F: FnOnce(&str) -> Result<String>,
    {
        let _guard = self.editing.acquire(&self.path)?;

        let current = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let updated = apply_rewrite(&self.path, &current, rewrite)?;

        std::fs::write(&self.path, updated)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Update the package version.
    pub fn set_version(&mut self, new_version: &Version) -> Result<()> {
        let rendered = new_version.to_string();
        self.edit(|text| {
            let mut doc = parse_document(text)?;
            let package = doc
                .get_mut("package")
                .and_then(Item::as_table_mut)
                .context("Missing [package] table")?;
            package["version"] = value(rendered);
            Ok(doc.to_string())
        })?;

        self.version = new_version.clone();
        Ok(())
    }

    /// Point every versioned declaration of `dep_name` at `new_version`.
    ///
    /// Declarations without a version requirement (path-only, `workspace = true`)
    /// are left alone. Fails if no declaration was changed.
    pub fn set_dependency_version(&mut self, dep_name: &str, new_version: &Version) -> Result<()> {
        let mut reparsed = None;
        self.edit(|text| {
            let mut doc = parse_document(text)?;
            for_each_dependency_table_mut(&mut doc, |deps, _| {
                for (key, item) in deps.iter_mut() {
                    if declared_package_name(key.get(), item) == dep_name {
                        update_requirement(item, new_version);
                    }
                }
            });
            reparsed = Some(collect_dependencies(&doc));
            Ok(doc.to_string())
        })?;

        if let Some(dependencies) = reparsed {
            self.dependencies = dependencies;
        }
        Ok(())
    }

    /// Dependencies on `name`, in declaration order.
    pub fn dependencies_on<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Dependency> {
        self.dependencies.iter().filter(move |d| d.name == name)
    }
}

/// Apply `rewrite` to `current`, rejecting rewrites that change nothing.
pub fn apply_rewrite<F>(path: &Path, current: &str, rewrite: F) -> Result<String>
where
    F: FnOnce(&str) -> Result<String>,
{
    let updated = rewrite(current)?;
    if updated == current {
        return Err(ReleaseError::ManifestUnchanged {
            path: path.to_path_buf(),
        }
        .into());
    }
    Ok(updated)
}

fn parse_document(text: &str) -> Result<DocumentMut> {
    text.parse::<DocumentMut>()
        .context("Failed to parse manifest")
}

fn collect_dependencies(document: &DocumentMut) -> Vec<Dependency> {
    let mut dependencies = Vec::new();

    let mut collect = |table: &Table, kind: DependencyKind| {
        for (key, item) in table.iter() {
            dependencies.push(Dependency {
                name: declared_package_name(key, item).to_string(),
                key: key.to_string(),
                req: requirement(item).map(str::to_string),
                kind,
            });
        }
    };

    for (section, kind) in DEPENDENCY_SECTIONS {
        if let Some(table) = document.get(section).and_then(Item::as_table) {
            collect(table, kind);
        }
    }

    // [target.'cfg(..)'.dependencies] and friends
    if let Some(targets) = document.get("target").and_then(Item::as_table) {
        for (_, target) in targets.iter() {
            for (section, kind) in DEPENDENCY_SECTIONS {
                if let Some(table) = target.get(section).and_then(Item::as_table) {
                    collect(table, kind);
                }
            }
        }
    }

    dependencies
}

fn for_each_dependency_table_mut<F>(document: &mut DocumentMut, mut f: F)
where
    F: FnMut(&mut Table, DependencyKind),
{
    for (section, kind) in DEPENDENCY_SECTIONS {
        if let Some(table) = document.get_mut(section).and_then(Item::as_table_mut) {
            f(table, kind);
        }
    }

    if let Some(targets) = document.get_mut("target").and_then(Item::as_table_mut) {
        for (_, target) in targets.iter_mut() {
            for (section, kind) in DEPENDENCY_SECTIONS {
                if let Some(table) = target.get_mut(section).and_then(Item::as_table_mut) {
                    f(table, kind);
                }
            }
        }
    }
}

fn declared_package_name<'a>(key: &'a str, item: &'a Item) -> &'a str {
    item.get("package").and_then(Item::as_str).unwrap_or(key)
}

fn requirement(item: &Item) -> Option<&str> {
    if let Some(req) = item.as_str() {
        return Some(req);
    }
    item.get("version").and_then(Item::as_str)
}

fn update_requirement(item: &mut Item, new_version: &Version) {
    if let Some(old) = item.as_str() {
        let req = format_requirement(old, new_version);
        *item = value(req);
        return;
    }

    if let Some(version_item) = item.get_mut("version") {
        if let Some(old) = version_item.as_str() {
            let req = format_requirement(old, new_version);
            *version_item = value(req);
        }
    }
}

/// Keep the comparison operator of an existing requirement (`=`, `^`, `~`).
fn format_requirement(old: &str, new_version: &Version) -> String {
    let operator: String = old
        .trim_start()
        .chars()
        .take_while(|c| matches!(c, '=' | '^' | '~'))
        .collect();
    format!("{}{}", operator, new_version)
}

/// Per-manifest edit flag, held through an RAII guard.
#[derive(Debug, Default)]
struct EditLock(AtomicBool);

impl EditLock {
    fn acquire(&self, path: &Path) -> Result<EditGuard<'_>> {
        if self.0.swap(true, Ordering::AcqRel) {
            return Err(ReleaseError::ManifestEditInProgress {
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(EditGuard(&self.0))
    }
}

struct EditGuard<'a>(&'a AtomicBool);

impl Drop for EditGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "cargo_tests.rs"]
mod tests;
