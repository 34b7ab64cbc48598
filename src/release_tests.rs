use crate::config::RetryPolicy;
use crate::error::ReleaseError;
use crate::git::Git;
use crate::github::{NewRelease, Release, ReleaseHost};
use crate::publish::{PublishCommand, PublishOutcome, Publisher};
use crate::release::{commit_bump, CommitOptions, ReleaseOptions, ReleasePlan, Releaser};
use crate::testing::FakeRegistry;
use crate::version::{BumpType, VersionManager};
use crate::workspace::{Package, Workspace};
use anyhow::Result;
use async_trait::async_trait;
use git2::{IndexAddOption, Repository, Signature};
use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

struct UploadToFake<'r> {
    registry: &'r FakeRegistry,
}

#[async_trait]
impl PublishCommand for UploadToFake<'_> {
    async fn publish(&self, package: &Package) -> Result<()> {
        self.registry
            .add_version(&package.package_name, &package.version.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeHost {
    releases: Mutex<Vec<NewRelease>>,
}

#[async_trait]
impl ReleaseHost for FakeHost {
    async fn create_release(&self, release: &NewRelease) -> Result<Release> {
        self.releases.lock().unwrap().push(release.clone());
        Ok(Release {
            id: 1,
            tag_name: release.tag_name.clone(),
            html_url: format!(
                "https://github.com/acme/widgets/releases/tag/{}",
                release.tag_name
            ),
            draft: release.draft,
        })
    }
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn commit_all(repo: &Repository, message: &str) {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let sig = Signature::now("Release Bot", "release@example.com").unwrap();
    let parent = repo.head().ok().map(|h| h.peel_to_commit().unwrap());
    let parents: Vec<&git2::Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap();
}

/// A git-tracked workspace with `core` tagged at 0.1.0 and `app` added on top,
/// already pushed to a bare repository.
struct Fixture {
    work: TempDir,
    remote: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let work = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        Repository::init_bare(remote.path()).unwrap();

        let repo = Repository::init(work.path()).unwrap();
        {
            let mut config = repo.config().unwrap();
            config.set_str("user.name", "Release Bot").unwrap();
            config.set_str("user.email", "release@example.com").unwrap();
            config.set_bool("tag.gpgSign", false).unwrap();
            config.set_bool("commit.gpgSign", false).unwrap();
        }
        repo.remote("origin", remote.path().to_str().unwrap())
            .unwrap();

        let root = work.path();
        write(root, "Cargo.toml", "[workspace]\nmembers = [\"crates/*\"]\n");
        write(
            root,
            "crates/core/Cargo.toml",
            "[package]\nname = \"core\"\nversion = \"0.2.0\"\n",
        );
        write(
            root,
            "crates/internal/Cargo.toml",
            "[package]\nname = \"internal\"\nversion = \"0.1.0\"\npublish = false\n",
        );
        commit_all(&repo, "chore: initial workspace");

        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.tag_lightweight("core-v0.1.0", head.as_object(), false)
            .unwrap();

        write(
            root,
            "crates/app/Cargo.toml",
            "[package]\nname = \"app\"\nversion = \"0.2.0\"\n\n[dependencies]\ncore = { version = \"0.2.0\", path = \"../core\" }\n\n[dev-dependencies]\ninternal = { path = \"../internal\" }\n",
        );
        commit_all(&repo, "feat: app crate");
        git(root, &["push", "--quiet", "origin", "HEAD", "--tags"]);

        Self { work, remote }
    }

    fn remote_has_tag(&self, tag: &str) -> bool {
        self.remote_has_ref(&format!("refs/tags/{tag}"))
    }

    fn remote_has_ref(&self, name: &str) -> bool {
        Repository::open_bare(self.remote.path())
            .unwrap()
            .find_reference(name)
            .is_ok()
    }

    /// Depth-1 clone of the remote, the way CI checks a repository out.
    fn shallow_clone(&self, into: &Path) {
        let url = format!("file://{}", self.remote.path().display());
        let branch = Git::new(self.work.path()).current_branch().unwrap().unwrap();
        git(
            self.work.path(),
            &[
                "clone",
                "--quiet",
                "--depth",
                "1",
                "--branch",
                &branch,
                &url,
                into.to_str().unwrap(),
            ],
        );
        git(into, &["config", "user.name", "Release Bot"]);
        git(into, &["config", "user.email", "release@example.com"]);
        git(into, &["config", "tag.gpgSign", "false"]);
    }
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed");
}

#[test]
fn test_plan_orders_dependencies_first() {
    let fixture = Fixture::new();
    let workspace = Workspace::load(fixture.work.path()).unwrap();

    let plan = ReleasePlan::new(&workspace, Some("app")).unwrap();
    assert_eq!(plan.package, "app");
    assert_eq!(plan.tag, "app-v0.2.0");
    // `internal` is only a dev-dependency of `app`, so it is not part of the release.
    assert_eq!(plan.order, vec!["core", "app"]);

    let err = ReleasePlan::new(&workspace, None).unwrap_err();
    match err.downcast_ref::<ReleaseError>() {
        Some(ReleaseError::AmbiguousTarget { candidates }) => {
            assert_eq!(candidates, &["app", "core"]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_single_package_tag() {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "Cargo.toml",
        "[package]\nname = \"solo\"\nversion = \"1.4.0\"\n",
    );
    let workspace = Workspace::load(temp.path()).unwrap();

    let plan = ReleasePlan::new(&workspace, None).unwrap();
    assert_eq!(plan.tag, "v1.4.0");
    assert_eq!(plan.order, vec!["solo"]);
}

#[tokio::test]
async fn test_full_release() {
    let fixture = Fixture::new();
    let workspace = Workspace::load(fixture.work.path()).unwrap();
    let git = Git::new(fixture.work.path());

    let registry = FakeRegistry::default().with_crate("core", &["0.1.0", "0.2.0"]);
    let command = UploadToFake {
        registry: &registry,
    };
    let host = FakeHost::default();
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let releaser = Releaser::new(&workspace, &git, publisher).with_host(&host);

    let plan = ReleasePlan::new(&workspace, Some("app")).unwrap();
    let options = ReleaseOptions {
        publish: true,
        draft: true,
        ..ReleaseOptions::default()
    };
    let report = releaser.run(&plan, &options).await.unwrap();

    let published: Vec<(String, PublishOutcome)> = report
        .published
        .as_ref()
        .unwrap()
        .entries
        .iter()
        .map(|e| (e.package.clone(), e.outcome))
        .collect();
    assert_eq!(
        published,
        vec![
            ("core".to_string(), PublishOutcome::Skipped),
            ("app".to_string(), PublishOutcome::Published)
        ]
    );

    assert!(report.tagged);
    assert!(git.tags().unwrap().contains(&"app-v0.2.0".to_string()));
    assert!(fixture.remote_has_tag("app-v0.2.0"));

    let releases = host.releases.lock().unwrap();
    assert_eq!(releases.len(), 1);
    assert_eq!(releases[0].tag_name, "app-v0.2.0");
    assert!(releases[0].draft);
    assert!(releases[0].body.starts_with("- feat: app crate ("));
    assert!(!releases[0].body.contains("initial workspace"));
    assert_eq!(
        report.release_url.as_deref(),
        Some("https://github.com/acme/widgets/releases/tag/app-v0.2.0")
    );
}

#[tokio::test]
async fn test_dry_run_leaves_repository_alone() {
    let fixture = Fixture::new();
    let workspace = Workspace::load(fixture.work.path()).unwrap();
    let git = Git::new(fixture.work.path());

    let registry = FakeRegistry::default();
    let command = UploadToFake {
        registry: &registry,
    };
    let host = FakeHost::default();
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let releaser = Releaser::new(&workspace, &git, publisher).with_host(&host);

    let plan = ReleasePlan::new(&workspace, Some("core")).unwrap();
    let options = ReleaseOptions {
        dry_run: true,
        ..ReleaseOptions::default()
    };
    let report = releaser.run(&plan, &options).await.unwrap();

    assert!(report.published.is_none());
    assert!(!report.tagged);
    assert_eq!(git.tags().unwrap(), vec!["core-v0.1.0"]);
    assert!(host.releases.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_skip_release_still_tags_once() {
    let fixture = Fixture::new();
    let workspace = Workspace::load(fixture.work.path()).unwrap();
    let git = Git::new(fixture.work.path());

    let registry = FakeRegistry::default();
    let command = UploadToFake {
        registry: &registry,
    };
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let releaser = Releaser::new(&workspace, &git, publisher);

    let plan = ReleasePlan::new(&workspace, Some("core")).unwrap();
    let options = ReleaseOptions {
        skip_release: true,
        ..ReleaseOptions::default()
    };

    let first = releaser.run(&plan, &options).await.unwrap();
    assert!(first.tagged);
    assert!(first.release_url.is_none());
    assert!(fixture.remote_has_tag("core-v0.2.0"));

    let second = releaser.run(&plan, &options).await.unwrap();
    assert!(!second.tagged);

    // Without a host, asking for a release is an error.
    let err = releaser
        .run(&plan, &ReleaseOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("hosting client"));
}

#[tokio::test]
async fn test_dirty_tree_is_refused() {
    let fixture = Fixture::new();
    let workspace = Workspace::load(fixture.work.path()).unwrap();
    let git = Git::new(fixture.work.path());
    write(fixture.work.path(), "notes.txt", "wip");

    let registry = FakeRegistry::default();
    let command = UploadToFake {
        registry: &registry,
    };
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let releaser = Releaser::new(&workspace, &git, publisher);

    let plan = ReleasePlan::new(&workspace, Some("core")).unwrap();
    let options = ReleaseOptions {
        publish: true,
        skip_release: true,
        ..ReleaseOptions::default()
    };
    let err = releaser.run(&plan, &options).await.unwrap_err();
    assert!(err.to_string().contains("uncommitted changes"));
    assert!(registry.queries.lock().unwrap().is_empty());
    assert!(!fixture.remote_has_tag("core-v0.2.0"));

    // A dry run does not need a clean tree.
    let dry_run = ReleaseOptions {
        dry_run: true,
        ..options
    };
    assert!(releaser.run(&plan, &dry_run).await.is_ok());
}

#[tokio::test]
async fn test_crates_owned_by_others_are_not_published() {
    let fixture = Fixture::new();
    let workspace = Workspace::load(fixture.work.path()).unwrap();
    let git = Git::new(fixture.work.path());

    let registry = FakeRegistry::default()
        .with_crate("core", &["0.1.0"])
        .with_owners("core", &["someone-else"]);
    let command = UploadToFake {
        registry: &registry,
    };
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let releaser = Releaser::new(&workspace, &git, publisher);

    let plan = ReleasePlan::new(&workspace, Some("app")).unwrap();
    let options = ReleaseOptions {
        publish: true,
        dry_run: true,
        owner: Some("Release-Bot".to_string()),
        ..ReleaseOptions::default()
    };
    let report = releaser.run(&plan, &options).await.unwrap();

    assert_eq!(report.not_owned, vec!["core"]);
    let published: Vec<&str> = report
        .published
        .as_ref()
        .unwrap()
        .entries
        .iter()
        .map(|e| e.package.as_str())
        .collect();
    // `app` has never been published, so nobody owns it yet.
    assert_eq!(published, vec!["app"]);

    let registry = FakeRegistry::default().with_owners("core", &["someone-else", "release-bot"]);
    let command = UploadToFake {
        registry: &registry,
    };
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let report = Releaser::new(&workspace, &git, publisher)
        .run(&plan, &options)
        .await
        .unwrap();
    assert!(report.not_owned.is_empty());
    assert_eq!(report.published.unwrap().entries.len(), 2);
}

#[tokio::test]
async fn test_release_from_shallow_clone() {
    let fixture = Fixture::new();
    let temp = TempDir::new().unwrap();
    let clone = temp.path().join("clone");
    fixture.shallow_clone(&clone);

    let git = Git::new(&clone);
    assert!(git.is_shallow().unwrap());

    let workspace = Workspace::load(&clone).unwrap();
    let registry = FakeRegistry::default();
    let command = UploadToFake {
        registry: &registry,
    };
    let host = FakeHost::default();
    let publisher = Publisher::new(&registry, &command, RetryPolicy::immediate(1));
    let releaser = Releaser::new(&workspace, &git, publisher).with_host(&host);

    let plan = ReleasePlan::new(&workspace, Some("app")).unwrap();
    releaser
        .run(&plan, &ReleaseOptions::default())
        .await
        .unwrap();

    assert!(!git.is_shallow().unwrap());
    assert!(git.tags().unwrap().contains(&"core-v0.1.0".to_string()));
    assert!(fixture.remote_has_tag("app-v0.2.0"));

    let releases = host.releases.lock().unwrap();
    assert!(releases[0].body.starts_with("- feat: app crate ("));
    assert!(!releases[0].body.contains("initial workspace"));
}

#[tokio::test]
async fn test_commit_bump_on_release_branch() {
    let fixture = Fixture::new();
    let mut workspace = Workspace::load(fixture.work.path()).unwrap();
    let git = Git::new(fixture.work.path());

    let report = VersionManager::new(&mut workspace)
        .bump("core", BumpType::Minor, false)
        .unwrap();
    assert_eq!(report.dependents, vec!["app"]);
    assert!(git.has_local_changes().unwrap());

    let options = CommitOptions {
        branch: Some("release/core-v0.3.0".to_string()),
        push: true,
        ..CommitOptions::default()
    };
    commit_bump(&git, &workspace, &report, &options)
        .await
        .unwrap();

    assert!(!git.has_local_changes().unwrap());
    assert_eq!(
        git.current_branch().unwrap().as_deref(),
        Some("release/core-v0.3.0")
    );
    let head = &git.commits_since(None).unwrap()[0];
    assert_eq!(head.summary, "chore: bump core to 0.3.0");
    assert!(fixture.remote_has_ref("refs/heads/release/core-v0.3.0"));
}
