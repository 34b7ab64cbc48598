//! Package registry queries (crates.io API).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use semver::Version;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

/// What the registry knows about a crate.
#[derive(Debug, Clone, Deserialize)]
pub struct CrateInfo {
    #[serde(rename = "crate")]
    pub krate: CrateSummary,
    #[serde(default)]
    pub versions: Vec<CrateVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrateSummary {
    pub name: String,
    #[serde(default)]
    pub max_stable_version: Option<String>,
    #[serde(default)]
    pub max_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrateVersion {
    pub num: String,
    #[serde(default)]
    pub yanked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CrateOwner {
    pub login: String,
    #[serde(default)]
    pub kind: Option<String>,
}

impl CrateInfo {
    /// The latest stable version, falling back to the latest of any kind.
    pub fn latest(&self) -> Option<&str> {
        self.krate
            .max_stable_version
            .as_deref()
            .or(self.krate.max_version.as_deref())
    }

    pub fn has_version(&self, version: &Version) -> bool {
        self.versions
            .iter()
            .any(|v| Version::parse(&v.num).is_ok_and(|num| &num == version))
    }
}

/// Whether a specific version of a crate is already on the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    /// The registry has no record of the crate at all.
    NeverPublished,
    /// The crate exists but not at this version.
    OtherVersions { latest: Option<String> },
    Published,
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// Crate metadata, or `None` if the registry has never seen the crate.
    async fn crate_info(&self, name: &str) -> Result<Option<CrateInfo>>;

    async fn owners(&self, name: &str) -> Result<Vec<CrateOwner>>;
}

pub async fn publish_status<R>(registry: &R, name: &str, version: &Version) -> Result<PublishStatus>
where
    R: Registry + ?Sized,
{
    let status = match registry.crate_info(name).await? {
        None => PublishStatus::NeverPublished,
        Some(info) if info.has_version(version) => PublishStatus::Published,
        Some(info) => PublishStatus::OtherVersions {
            latest: info.latest().map(str::to_string),
        },
    };
    debug!(crate_name = name, %version, ?status, "registry status");
    Ok(status)
}

/// Whether `login` is among a crate's owners. Crates owned by someone else are not
/// touched by automated updates.
pub fn is_owned_by(owners: &[CrateOwner], login: &str) -> bool {
    owners.iter().any(|o| o.login.eq_ignore_ascii_case(login))
}

#[derive(Debug, Deserialize)]
struct OwnersResponse {
    users: Vec<CrateOwner>,
}

/// Client for the crates.io HTTP API.
pub struct CratesIo {
    client: Client,
    base_url: String,
    courtesy_delay: Duration,
}

impl CratesIo {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.registry_api.clone(),
            courtesy_delay: config.courtesy_delay,
        })
    }

    async fn get(&self, path: &str) -> Result<Option<reqwest::Response>> {
        // crates.io asks API users to stay under one request per second.
        tokio::time::sleep(self.courtesy_delay).await;

        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "registry request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response)),
            status => anyhow::bail!("Registry request {} failed (HTTP {})", url, status),
        }
    }
}

#[async_trait]
impl Registry for CratesIo {
    async fn crate_info(&self, name: &str) -> Result<Option<CrateInfo>> {
        let Some(response) = self.get(&format!("/crates/{}", name)).await? else {
            return Ok(None);
        };
        let info = response
            .json::<CrateInfo>()
            .await
            .with_context(|| format!("Failed to parse registry metadata for {}", name))?;
        Ok(Some(info))
    }

    async fn owners(&self, name: &str) -> Result<Vec<CrateOwner>> {
        let Some(response) = self.get(&format!("/crates/{}/owners", name)).await? else {
            return Ok(Vec::new());
        };
        let owners = response
            .json::<OwnersResponse>()
            .await
            .with_context(|| format!("Failed to parse owners of {}", name))?;
        Ok(owners.users)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
