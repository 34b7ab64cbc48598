//! Cutting a release: publish in dependency order, tag, then announce on the host.

use anyhow::{Context, Result};
use colored::Colorize;
use semver::Version;
use tracing::{info, warn};

use crate::git::Git;
use crate::github::{NewRelease, ReleaseHost};
use crate::graph::DependencyGraph;
use crate::notes;
use crate::publish::{PublishReport, Publisher};
use crate::registry::is_owned_by;
use crate::version::BumpReport;
use crate::workspace::{Package, Workspace};

#[derive(Debug, Clone)]
pub struct ReleaseOptions {
    pub publish: bool,
    pub skip_release: bool,
    pub draft: bool,
    pub dry_run: bool,
    pub remote: String,
    /// Registry login; crates that already exist under other owners are not published.
    pub owner: Option<String>,
}

impl Default for ReleaseOptions {
    fn default() -> Self {
        Self {
            publish: false,
            skip_release: false,
            draft: false,
            dry_run: false,
            remote: "origin".to_string(),
            owner: None,
        }
    }
}

/// What a release of one package involves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleasePlan {
    pub package: String,
    pub version: Version,
    pub tag: String,
    /// The package and every member it normally depends on, in publish order.
    /// Dev-only helpers are left out.
    pub order: Vec<String>,
}

impl ReleasePlan {
    pub fn new(workspace: &Workspace, target: Option<&str>) -> Result<Self> {
        let target = workspace.select_target(target)?;
        let graph = DependencyGraph::new(workspace);

        let mut members = graph.normal_descendants(target);
        members.push(target);
        let order = graph
            .resolve_publish_order(members)?
            .into_iter()
            .map(|p| p.package_name.clone())
            .collect();

        Ok(Self {
            package: target.package_name.clone(),
            version: target.version.clone(),
            tag: tag_name(workspace, target),
            order,
        })
    }

    pub fn print(&self) {
        println!(
            "{} {} {} ({})",
            "Release:".blue().bold(),
            self.package.bright_white().bold(),
            self.version.to_string().green(),
            self.tag.dimmed()
        );
        for (i, name) in self.order.iter().enumerate() {
            println!("  {}. {}", i + 1, name);
        }
    }
}

/// `v1.2.3` when the workspace publishes a single package, `name-v1.2.3` otherwise.
pub fn tag_name(workspace: &Workspace, package: &Package) -> String {
    if workspace.publishable().count() <= 1 {
        format!("v{}", package.version)
    } else {
        format!("{}-v{}", package.package_name, package.version)
    }
}

pub struct Releaser<'a> {
    workspace: &'a Workspace,
    git: &'a Git,
    publisher: Publisher<'a>,
    host: Option<&'a dyn ReleaseHost>,
}

impl<'a> Releaser<'a> {
    pub fn new(workspace: &'a Workspace, git: &'a Git, publisher: Publisher<'a>) -> Self {
        Self {
            workspace,
            git,
            publisher,
            host: None,
        }
    }

    pub fn with_host(mut self, host: &'a dyn ReleaseHost) -> Self {
        self.host = Some(host);
        self
    }

    /// Carry out `plan`.
    ///
    /// Steps run strictly in sequence and nothing is undone on failure: packages
    /// published before an error stay published. A dry run stops after publishing
    /// (which the publish command itself is expected to simulate).
    pub async fn run(&self, plan: &ReleasePlan, options: &ReleaseOptions) -> Result<ReleaseReport> {
        let mut report = ReleaseReport {
            plan: plan.clone(),
            published: None,
            not_owned: Vec::new(),
            tagged: false,
            release_url: None,
            dry_run: options.dry_run,
        };

        if !options.dry_run && self.git.has_local_changes()? {
            anyhow::bail!(
                "Working tree has uncommitted changes; commit or stash them before releasing"
            );
        }

        if options.publish {
            let mut packages = Vec::new();
            for name in &plan.order {
                let package = self.workspace.get(name)?;
                if let Some(login) = &options.owner {
                    if package.publish && !self.is_ours(package, login).await? {
                        warn!(package = %name, owner = %login, "owned by someone else, not publishing");
                        report.not_owned.push(name.clone());
                        continue;
                    }
                }
                packages.push(package);
            }
            report.published = Some(self.publisher.publish_all(&packages).await?);
        }

        if options.dry_run {
            info!(tag = %plan.tag, "dry run, not tagging");
            return Ok(report);
        }

        // Shallow CI checkouts lack the history and tags the notes are built from.
        if self.git.remotes()?.contains(&options.remote) {
            self.git.fetch_history(&options.remote).await?;
            self.git.fetch_tags(&options.remote).await?;
        }
        let previous = self.git.latest_tag()?;

        if self.git.tags()?.contains(&plan.tag) {
            warn!(tag = %plan.tag, "tag already exists, leaving it in place");
        } else {
            let message = format!("Release {} {}", plan.package, plan.version);
            self.git.tag(&plan.tag, &message).await?;
            self.git
                .push_tag(&options.remote, &plan.tag)
                .await
                .with_context(|| format!("Failed to push tag {}", plan.tag))?;
            report.tagged = true;
        }

        if options.skip_release {
            return Ok(report);
        }

        let host = self
            .host
            .context("Creating a release needs a hosting client")?;
        let since = previous.as_deref().filter(|tag| *tag != plan.tag);
        let body = notes::render(&self.git.commits_since(since)?);

        let release = host
            .create_release(&NewRelease {
                tag_name: plan.tag.clone(),
                name: plan.tag.clone(),
                body,
                draft: options.draft,
            })
            .await?;
        report.release_url = Some(release.html_url);

        Ok(report)
    }

    /// A crate nobody owns yet (never published) counts as ours.
    async fn is_ours(&self, package: &Package, login: &str) -> Result<bool> {
        let owners = self
            .publisher
            .registry()
            .owners(&package.package_name)
            .await?;
        Ok(owners.is_empty() || is_owned_by(&owners, login))
    }
}

#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// Branch to commit on, created if it does not exist yet.
    pub branch: Option<String>,
    pub push: bool,
    pub remote: String,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            branch: None,
            push: false,
            remote: "origin".to_string(),
        }
    }
}

/// Commit the manifests a version bump rewrote.
pub async fn commit_bump(
    git: &Git,
    workspace: &Workspace,
    report: &BumpReport,
    options: &CommitOptions,
) -> Result<()> {
    if let Some(branch) = &options.branch {
        if git.branch_exists(branch)? {
            git.switch_branch(branch).await?;
        } else {
            git.create_branch(branch).await?;
        }
    }

    let mut paths = vec![report.path.as_path()];
    for dependent in &report.dependents {
        paths.push(workspace.get(dependent)?.path.as_path());
    }
    git.add(&paths).await?;
    git.commit(&format!(
        "chore: bump {} to {}",
        report.package, report.new_version
    ))
    .await
    .context("Failed to commit version bump")?;

    if options.push {
        let branch = git
            .current_branch()?
            .context("Cannot push from a detached HEAD")?;
        git.push(&options.remote, &branch).await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ReleaseReport {
    pub plan: ReleasePlan,
    pub published: Option<PublishReport>,
    /// Packages left alone because another account owns them.
    pub not_owned: Vec<String>,
    pub tagged: bool,
    pub release_url: Option<String>,
    pub dry_run: bool,
}

impl ReleaseReport {
    pub fn print(&self) {
        if self.dry_run {
            println!("{}", "Dry run mode: nothing was tagged or released".yellow().bold());
        }
        self.plan.print();

        if let Some(published) = &self.published {
            println!();
            published.print();
        }
        for name in &self.not_owned {
            println!("{} {} is owned by another account, skipped", "!".yellow().bold(), name);
        }
        if self.tagged {
            println!("{} Tagged {}", "✓".green().bold(), self.plan.tag.bright_white());
        }
        if let Some(url) = &self.release_url {
            println!("{} Release created: {}", "✓".green().bold(), url.cyan());
        }
    }
}

#[cfg(test)]
#[path = "release_tests.rs"]
mod tests;
