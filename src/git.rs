//! Version control.
//!
//! Queries go through `git2`; anything that changes the repository or talks to a
//! remote runs the `git` binary so that the user's credentials and hooks apply.

use anyhow::{Context, Result};
use git2::{BranchType, Oid, Repository, Sort, StatusOptions};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

use crate::process;

/// One commit, as shown in release notes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub id: String,
    pub summary: String,
    pub is_merge: bool,
}

#[derive(Debug, Clone)]
pub struct Git {
    root: PathBuf,
}

impl Git {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn open(&self) -> Result<Repository> {
        Repository::discover(&self.root)
            .with_context(|| format!("No git repository at {}", self.root.display()))
    }

    /// The checked out branch, or `None` on a detached HEAD.
    pub fn current_branch(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let head = repo.head().context("Failed to get HEAD")?;
        if !head.is_branch() {
            return Ok(None);
        }
        Ok(head.shorthand().map(String::from))
    }

    pub fn branch_exists(&self, name: &str) -> Result<bool> {
        let repo = self.open()?;
        let exists = repo.find_branch(name, BranchType::Local).is_ok();
        Ok(exists)
    }

    /// Modified, staged or untracked files.
    pub fn has_local_changes(&self) -> Result<bool> {
        let repo = self.open()?;
        let mut options = StatusOptions::new();
        options.include_untracked(true).include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut options))
            .context("Failed to read repository status")?;
        Ok(!statuses.is_empty())
    }

    pub fn is_shallow(&self) -> Result<bool> {
        Ok(self.open()?.is_shallow())
    }

    pub fn remotes(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let remotes = repo.remotes().context("Failed to list remotes")?;
        Ok(remotes.iter().flatten().map(String::from).collect())
    }

    pub fn tags(&self) -> Result<Vec<String>> {
        let repo = self.open()?;
        let names = repo.tag_names(None).context("Failed to list tags")?;
        let mut tags: Vec<String> = names.iter().flatten().map(String::from).collect();
        tags.sort();
        Ok(tags)
    }

    /// The tag closest to HEAD in history.
    ///
    /// When one commit carries several tags the greatest name wins.
    pub fn latest_tag(&self) -> Result<Option<String>> {
        let repo = self.open()?;
        let tagged = tagged_commits(&repo)?;
        if tagged.is_empty() {
            return Ok(None);
        }

        for oid in history(&repo)? {
            let oid = oid?;
            if let Some(names) = tagged.get(&oid) {
                return Ok(names.iter().max().cloned());
            }
        }
        Ok(None)
    }

    /// Commits reachable from HEAD but not from `since`, newest first.
    pub fn commits_since(&self, since: Option<&str>) -> Result<Vec<CommitSummary>> {
        let repo = self.open()?;
        let mut walk = history(&repo)?;
        if let Some(rev) = since {
            let base = repo
                .revparse_single(rev)
                .and_then(|object| object.peel_to_commit())
                .with_context(|| format!("Unknown revision '{}'", rev))?;
            walk.hide(base.id())?;
        }

        let mut commits = Vec::new();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            let id = commit.id().to_string();
            commits.push(CommitSummary {
                id: id[..7.min(id.len())].to_string(),
                summary: commit.summary().unwrap_or_default().to_string(),
                is_merge: commit.parent_count() > 1,
            });
        }
        Ok(commits)
    }

    pub async fn switch_branch(&self, name: &str) -> Result<()> {
        info!(branch = name, "switching branch");
        self.git(&["switch", name]).await?;
        Ok(())
    }

    pub async fn create_branch(&self, name: &str) -> Result<()> {
        info!(branch = name, "creating branch");
        self.git(&["switch", "-c", name]).await?;
        Ok(())
    }

    pub async fn add(&self, paths: &[&Path]) -> Result<()> {
        let mut command = self.command();
        command.arg("add").arg("--").args(paths);
        process::run(&mut command).await?;
        Ok(())
    }

    pub async fn commit(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-m", message]).await?;
        Ok(())
    }

    /// Create an annotated tag on HEAD.
    pub async fn tag(&self, name: &str, message: &str) -> Result<()> {
        info!(tag = name, "tagging");
        self.git(&["tag", "-a", name, "-m", message]).await?;
        Ok(())
    }

    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.git(&["push", "--set-upstream", remote, branch]).await?;
        Ok(())
    }

    pub async fn push_tag(&self, remote: &str, tag: &str) -> Result<()> {
        let refspec = format!("refs/tags/{}", tag);
        self.git(&["push", remote, refspec.as_str()]).await?;
        Ok(())
    }

    /// Fetch complete history, deepening a shallow clone first.
    pub async fn fetch_history(&self, remote: &str) -> Result<()> {
        if self.is_shallow()? {
            self.git(&["fetch", "--unshallow", remote]).await?;
        } else {
            self.git(&["fetch", remote]).await?;
        }
        Ok(())
    }

    pub async fn fetch_tags(&self, remote: &str) -> Result<()> {
        self.git(&["fetch", "--tags", "--force", remote]).await?;
        Ok(())
    }

    fn command(&self) -> Command {
        let mut command = Command::new("git");
        command.current_dir(&self.root);
        command
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let mut command = self.command();
        command.args(args);
        process::run(&mut command).await
    }
}

fn history(repo: &Repository) -> Result<git2::Revwalk<'_>> {
    let mut walk = repo.revwalk().context("Failed to walk history")?;
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    walk.push_head().context("Repository has no commits")?;
    Ok(walk)
}

fn tagged_commits(repo: &Repository) -> Result<HashMap<Oid, Vec<String>>> {
    let mut tagged: HashMap<Oid, Vec<String>> = HashMap::new();
    for reference in repo.references_glob("refs/tags/*")? {
        let reference = reference?;
        let Some(name) = reference.shorthand().map(String::from) else {
            continue;
        };
        // Tags on trees or blobs have no place in history.
        if let Ok(commit) = reference.peel_to_commit() {
            tagged.entry(commit.id()).or_default().push(name);
        }
    }
    Ok(tagged)
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
