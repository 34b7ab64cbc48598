//! Publishing packages to the registry in dependency order.

use anyhow::Result;
use async_trait::async_trait;
use colored::Colorize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::error::ReleaseError;
use crate::process;
use crate::registry::{publish_status, PublishStatus, Registry};
use crate::workspace::Package;

/// Uploads a single package.
#[async_trait]
pub trait PublishCommand: Send + Sync {
    async fn publish(&self, package: &Package) -> Result<()>;
}

/// `cargo publish` for the package's manifest.
#[derive(Debug, Clone, Default)]
pub struct CargoPublish {
    pub dry_run: bool,
    pub allow_dirty: bool,
}

#[async_trait]
impl PublishCommand for CargoPublish {
    async fn publish(&self, package: &Package) -> Result<()> {
        let mut command = Command::new("cargo");
        command
            .arg("publish")
            .arg("--manifest-path")
            .arg(&package.path)
            .current_dir(package.dir());
        if self.dry_run {
            command.arg("--dry-run");
        }
        if self.allow_dirty {
            command.arg("--allow-dirty");
        }

        process::run(&mut command).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The registry already had this exact version.
    Skipped,
}

/// Publishes packages, skipping versions the registry already has.
pub struct Publisher<'a> {
    registry: &'a dyn Registry,
    command: &'a dyn PublishCommand,
    retry: RetryPolicy,
}

impl<'a> Publisher<'a> {
    pub fn new(
        registry: &'a dyn Registry,
        command: &'a dyn PublishCommand,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            command,
            retry,
        }
    }

    pub fn registry(&self) -> &'a dyn Registry {
        self.registry
    }

    /// Publish one package.
    ///
    /// Failed uploads are retried with a fixed delay, mostly to wait for freshly
    /// published dependencies to show up in the registry index.
    pub async fn publish(&self, package: &Package) -> Result<PublishOutcome> {
        let name = package.package_name.as_str();
        let version = &package.version;

        if self.is_published(package).await? {
            info!(package = name, %version, "already published, skipping");
            return Ok(PublishOutcome::Skipped);
        }

        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            info!(package = name, %version, attempt, "publishing");
            match self.command.publish(package).await {
                Ok(()) => return Ok(PublishOutcome::Published),
                Err(e) if attempt >= attempts => {
                    return Err(e.context(ReleaseError::PublishFailed {
                        name: name.to_string(),
                        version: version.to_string(),
                        attempts,
                    }));
                }
                Err(e) => warn!(package = name, attempt, "publish failed, retrying: {:#}", e),
            }

            attempt += 1;
            tokio::time::sleep(self.retry.delay).await;

            // An earlier attempt may have gone through after all.
            if self.is_published(package).await? {
                info!(package = name, %version, "published by an earlier attempt");
                return Ok(PublishOutcome::Published);
            }
        }
    }

    /// Publish `packages` one at a time, in the given order.
    ///
    /// Packages marked `publish = false` are passed over. The first failure stops the
    /// run; whatever was published before it stays published.
    pub async fn publish_all(&self, packages: &[&Package]) -> Result<PublishReport> {
        let mut report = PublishReport::default();

        for package in packages.iter().filter(|p| p.publish) {
            let outcome = self.publish(package).await?;
            report.entries.push(PublishEntry {
                package: package.package_name.clone(),
                version: package.version.to_string(),
                outcome,
            });
        }

        Ok(report)
    }

    async fn is_published(&self, package: &Package) -> Result<bool> {
        let status =
            publish_status(self.registry, &package.package_name, &package.version).await?;
        Ok(status == PublishStatus::Published)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEntry {
    pub package: String,
    pub version: String,
    pub outcome: PublishOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub entries: Vec<PublishEntry>,
}

impl PublishReport {
    pub fn published(&self) -> impl Iterator<Item = &PublishEntry> {
        self.entries
            .iter()
            .filter(|e| e.outcome == PublishOutcome::Published)
    }

    pub fn print(&self) {
        if self.entries.is_empty() {
            println!("{} Nothing to publish", "Info:".blue().bold());
            return;
        }

        for entry in &self.entries {
            let marker = match entry.outcome {
                PublishOutcome::Published => "published".green(),
                PublishOutcome::Skipped => "skipped".dimmed(),
            };
            println!(
                "{} {} {} [{}]",
                "✓".green().bold(),
                entry.package.bright_white().bold(),
                entry.version,
                marker
            );
        }
    }
}

#[cfg(test)]
#[path = "publish_tests.rs"]
mod tests;
