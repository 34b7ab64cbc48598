use anyhow::Result;
use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use workspace_publisher::{
    commit_bump, BumpType, CargoPublish, CommitOptions, Config, CratesIo, DependencyGraph, Git,
    GitHubClient, GitHubRepo, Publisher, ReleaseHost, ReleaseOptions, ReleasePlan, Releaser,
    VersionManager, Workspace,
};

/// Version bumping and dependency-ordered publishing for Cargo workspaces
#[derive(Parser, Debug)]
#[command(name = "workspace-publisher", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Workspace root
    #[arg(long, global = true, default_value = ".", value_name = "DIR")]
    root: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the order in which workspace members must be published
    Order,

    /// Bump a package version and update dependents' requirements
    Bump(BumpArgs),

    /// Publish, tag and create a hosting release for a package
    Release(ReleaseArgs),

    /// Fail if any in-workspace requirement no longer matches its member
    Check,
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("level")
        .required(true)
        .args(["major", "minor", "patch", "prerelease"])
))]
struct BumpArgs {
    /// Package to bump (required when several are publishable)
    package: Option<String>,

    #[arg(long)]
    major: bool,

    #[arg(long)]
    minor: bool,

    #[arg(long)]
    patch: bool,

    #[arg(long)]
    prerelease: bool,

    /// Show what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Commit the changed manifests
    #[arg(long, conflicts_with = "dry_run")]
    commit: bool,

    /// Commit on this branch, creating it if needed
    #[arg(long, requires = "commit", value_name = "NAME")]
    branch: Option<String>,

    /// Push the branch after committing
    #[arg(long, requires = "commit")]
    push: bool,

    /// Remote the branch is pushed to
    #[arg(long, default_value = "origin")]
    remote: String,
}

impl BumpArgs {
    fn bump_type(&self) -> BumpType {
        if self.major {
            BumpType::Major
        } else if self.minor {
            BumpType::Minor
        } else if self.prerelease {
            BumpType::Prerelease
        } else {
            BumpType::Patch
        }
    }
}

#[derive(Args, Debug)]
struct ReleaseArgs {
    /// Package to release (required when several are publishable)
    package: Option<String>,

    /// Publish the package and its workspace dependencies to the registry
    #[arg(long)]
    publish: bool,

    /// Do not create a hosting release
    #[arg(long)]
    skip_release: bool,

    /// Create the hosting release as a draft
    #[arg(long)]
    draft: bool,

    /// Simulate publishing; skip tagging and the hosting release
    #[arg(long)]
    dry_run: bool,

    /// Remote the tag is pushed to
    #[arg(long, default_value = "origin")]
    remote: String,

    /// Registry login; skip crates owned only by other accounts
    #[arg(long, value_name = "LOGIN")]
    owner: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,workspace_publisher={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Order => order(&cli.root),
        Command::Bump(args) => bump(&cli.root, args).await,
        Command::Release(args) => release(&cli.root, args).await,
        Command::Check => check(&cli.root),
    }
}

fn order(root: &Path) -> Result<()> {
    let workspace = Workspace::load(root)?;
    let order = DependencyGraph::new(&workspace).publish_order()?;

    println!("{}", "Publish order:".blue().bold());
    for (i, package) in order.iter().enumerate() {
        let note = if package.publish {
            String::new()
        } else {
            " (publish = false)".dimmed().to_string()
        };
        println!(
            "  {}. {} {}{}",
            i + 1,
            package.package_name.bright_white(),
            package.version.to_string().dimmed(),
            note
        );
    }
    Ok(())
}

async fn bump(root: &Path, args: BumpArgs) -> Result<()> {
    let mut workspace = Workspace::load(root)?;
    let target = workspace
        .select_target(args.package.as_deref())?
        .package_name
        .clone();

    let report = VersionManager::new(&mut workspace).bump(&target, args.bump_type(), args.dry_run)?;
    report.print();

    if args.commit {
        let git = Git::new(workspace.root());
        let options = CommitOptions {
            branch: args.branch,
            push: args.push,
            remote: args.remote,
        };
        commit_bump(&git, &workspace, &report, &options).await?;
        println!("{} Committed version bump", "✓".green().bold());
    }

    Ok(())
}

async fn release(root: &Path, args: ReleaseArgs) -> Result<()> {
    let workspace = Workspace::load(root)?;
    let plan = ReleasePlan::new(&workspace, args.package.as_deref())?;

    let config = Config::from_env();
    let registry = CratesIo::new(&config)?;
    let command = CargoPublish {
        dry_run: args.dry_run,
        allow_dirty: false,
    };
    let publisher = Publisher::new(&registry, &command, config.publish_retry);
    let git = Git::new(workspace.root());

    let host = if args.skip_release || args.dry_run {
        None
    } else {
        Some(GitHubClient::new(&config, GitHubRepo::from_env()?)?)
    };

    let mut releaser = Releaser::new(&workspace, &git, publisher);
    if let Some(host) = &host {
        releaser = releaser.with_host(host as &dyn ReleaseHost);
    }

    let options = ReleaseOptions {
        publish: args.publish,
        skip_release: args.skip_release,
        draft: args.draft,
        dry_run: args.dry_run,
        remote: args.remote,
        owner: args.owner,
    };
    let report = releaser.run(&plan, &options).await?;
    report.print();

    Ok(())
}

fn check(root: &Path) -> Result<()> {
    let workspace = Workspace::load(root)?;
    DependencyGraph::new(&workspace).publish_order()?;

    let mismatches = workspace.check_requirements();
    if mismatches.is_empty() {
        println!(
            "{} {} packages, requirements consistent",
            "✓".green().bold(),
            workspace.packages().len()
        );
        return Ok(());
    }

    for m in &mismatches {
        println!(
            "{} {} requires {} {} but the workspace has {}",
            "✗".red().bold(),
            m.package.bright_white(),
            m.dependency,
            m.requirement.yellow(),
            m.actual.to_string().green()
        );
    }
    anyhow::bail!("{} requirement(s) out of date", mismatches.len())
}
