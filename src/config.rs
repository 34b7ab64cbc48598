//! Runtime configuration gathered from the environment.

use std::time::Duration;

pub const DEFAULT_REGISTRY_API: &str = "https://crates.io/api/v1";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    /// Five attempts, ten seconds apart, to ride out registry index propagation.
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub registry_api: String,
    pub github_api: String,
    pub user_agent: String,
    /// Pause before every registry query.
    pub courtesy_delay: Duration,
    pub publish_retry: RetryPolicy,
    pub github_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_api: DEFAULT_REGISTRY_API.to_string(),
            github_api: DEFAULT_GITHUB_API.to_string(),
            user_agent: format!(
                "{}/{} ({})",
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_REPOSITORY")
            ),
            courtesy_delay: Duration::from_secs(1),
            publish_retry: RetryPolicy::default(),
            github_token: None,
        }
    }
}

impl Config {
    /// Defaults overridden by `REGISTRY_API_URL`, `GITHUB_API_URL` and
    /// `GITHUB_TOKEN` (or `GH_TOKEN`).
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = non_empty_var("REGISTRY_API_URL") {
            config.registry_api = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = non_empty_var("GITHUB_API_URL") {
            config.github_api = url.trim_end_matches('/').to_string();
        }
        config.github_token = non_empty_var("GITHUB_TOKEN").or_else(|| non_empty_var("GH_TOKEN"));

        config
    }
}

pub(crate) fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
