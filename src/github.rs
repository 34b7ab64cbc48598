//! GitHub releases.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::config::{non_empty_var, Config};
use crate::error::ReleaseError;

pub const REPOSITORY_VAR: &str = "GITHUB_REPOSITORY";

/// An `owner/repo` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRepo {
    pub owner: String,
    pub name: String,
}

impl GitHubRepo {
    /// Read the repository from `GITHUB_REPOSITORY`, as set by GitHub Actions.
    pub fn from_env() -> Result<Self> {
        let value = non_empty_var(REPOSITORY_VAR).ok_or_else(|| ReleaseError::MissingEnvVar {
            name: REPOSITORY_VAR.to_string(),
        })?;
        Self::parse(&value)
    }

    pub fn parse(value: &str) -> Result<Self> {
        let invalid = |reason: &str| ReleaseError::InvalidEnvVar {
            name: REPOSITORY_VAR.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (owner, name) = value
            .trim()
            .split_once('/')
            .ok_or_else(|| invalid("expected owner/repo"))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(invalid("expected owner/repo").into());
        }

        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for GitHubRepo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewRelease {
    pub tag_name: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub html_url: String,
    #[serde(default)]
    pub draft: bool,
}

/// Somewhere releases are published to.
#[async_trait]
pub trait ReleaseHost: Send + Sync {
    async fn create_release(&self, release: &NewRelease) -> Result<Release>;
}

pub struct GitHubClient {
    client: Client,
    api: String,
    token: String,
    repo: GitHubRepo,
}

impl GitHubClient {
    /// Fails with `MissingEnvVar` when no token is configured.
    pub fn new(config: &Config, repo: GitHubRepo) -> Result<Self> {
        let token = config
            .github_token
            .clone()
            .ok_or_else(|| ReleaseError::MissingEnvVar {
                name: "GITHUB_TOKEN".to_string(),
            })?;

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api: config.github_api.clone(),
            token,
            repo,
        })
    }

    pub fn repo(&self) -> &GitHubRepo {
        &self.repo
    }

    pub fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            self.api, self.repo.owner, self.repo.name
        )
    }
}

#[async_trait]
impl ReleaseHost for GitHubClient {
    async fn create_release(&self, release: &NewRelease) -> Result<Release> {
        let url = self.releases_url();
        info!(repo = %self.repo, tag = %release.tag_name, draft = release.draft, "creating release");

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(&self.token)
            .json(release)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Creating release {} on {} failed (HTTP {}): {}",
                release.tag_name,
                self.repo,
                status,
                body.trim()
            );
        }

        response
            .json::<Release>()
            .await
            .context("Failed to parse GitHub release response")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repository() {
        let repo = GitHubRepo::parse("acme/widgets").unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "widgets");
        assert_eq!(repo.to_string(), "acme/widgets");
    }

    #[test]
    fn test_malformed_repository() {
        for value in ["widgets", "/widgets", "acme/", "acme/widgets/extra"] {
            let err = GitHubRepo::parse(value).unwrap_err();
            assert!(
                matches!(
                    err.downcast_ref::<ReleaseError>(),
                    Some(ReleaseError::InvalidEnvVar { .. })
                ),
                "{value}: {err}"
            );
        }
    }

    #[test]
    fn test_client_needs_token() {
        let repo = GitHubRepo::parse("acme/widgets").unwrap();
        let err = GitHubClient::new(&Config::default(), repo.clone())
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "environment variable GITHUB_TOKEN is not set");

        let config = Config {
            github_token: Some("t0ken".to_string()),
            github_api: "http://localhost:9".to_string(),
            ..Config::default()
        };
        let client = GitHubClient::new(&config, repo).unwrap();
        assert_eq!(
            client.releases_url(),
            "http://localhost:9/repos/acme/widgets/releases"
        );
    }

    #[test]
    fn test_release_payload() {
        let release = NewRelease {
            tag_name: "v1.2.0".to_string(),
            name: "v1.2.0".to_string(),
            body: "- fix: things".to_string(),
            draft: true,
        };
        let json = serde_json::to_value(&release).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "tag_name": "v1.2.0",
                "name": "v1.2.0",
                "body": "- fix: things",
                "draft": true
            })
        );
    }
}
