//! In-memory stand-ins for the registry, shared by unit tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::registry::{CrateInfo, CrateOwner, CrateSummary, CrateVersion, Registry};

#[derive(Debug, Default)]
pub struct FakeRegistry {
    crates: Mutex<HashMap<String, Vec<String>>>,
    owners: HashMap<String, Vec<String>>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeRegistry {
    pub fn with_crate(self, name: &str, versions: &[&str]) -> Self {
        self.crates.lock().unwrap().insert(
            name.to_string(),
            versions.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    pub fn with_owners(mut self, name: &str, logins: &[&str]) -> Self {
        self.owners.insert(
            name.to_string(),
            logins.iter().map(|l| l.to_string()).collect(),
        );
        self
    }

    /// Record a version as published, like the registry index eventually does.
    pub fn add_version(&self, name: &str, version: &str) {
        self.crates
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push(version.to_string());
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn crate_info(&self, name: &str) -> Result<Option<CrateInfo>> {
        self.queries.lock().unwrap().push(name.to_string());
        let crates = self.crates.lock().unwrap();
        Ok(crates.get(name).map(|versions| CrateInfo {
            krate: CrateSummary {
                name: name.to_string(),
                max_stable_version: versions.last().cloned(),
                max_version: versions.last().cloned(),
            },
            versions: versions
                .iter()
                .map(|num| CrateVersion {
                    num: num.clone(),
                    yanked: false,
                })
                .collect(),
        }))
    }

    async fn owners(&self, name: &str) -> Result<Vec<CrateOwner>> {
        Ok(self
            .owners
            .get(name)
            .map(|logins| {
                logins
                    .iter()
                    .map(|login| CrateOwner {
                        login: login.clone(),
                        kind: Some("user".to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
