// SPDX-License-Identifier: Apache-2.0
//! Incremental configuration discovery.

use anyhow::{Context, Result};
use async_trait::async_trait;
use key_keeper_resource::Resources;
use key_keeper_secrets::OpenBaoConfig;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A named backend connection declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerDeclaration {
    pub name: String,
    pub vault: OpenBaoConfig,
}

/// Declarations found in one discovery pass.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub issuers: Vec<IssuerDeclaration>,

    #[serde(flatten)]
    pub resources: Resources,
}

impl Config {
    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty() && self.resources.is_empty()
    }

    pub fn extend(&mut self, other: Config) {
        self.issuers.extend(other.issuers);
        self.resources.extend(other.resources);
    }
}

/// Supplier of configuration the caller has not seen yet.
#[async_trait]
pub trait ConfigSource: Send {
    /// Declarations that were not returned by an earlier call.
    async fn next_config(&mut self) -> Result<Config>;
}

/// Configuration files in a directory, each consumed once.
pub struct DirectorySource {
    dir: PathBuf,
    pattern: Regex,
    seen: HashSet<PathBuf>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, pattern: Regex) -> Self {
        Self {
            dir: dir.into(),
            pattern,
            seen: HashSet::new(),
        }
    }

    async fn candidates(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("read config dir {:?}", self.dir))?;
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let matches = entry
                .file_name()
                .to_str()
                .map(|name| self.pattern.is_match(name))
                .unwrap_or(false);
            if matches && entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ConfigSource for DirectorySource {
    async fn next_config(&mut self) -> Result<Config> {
        let mut config = Config::default();
        for path in self.candidates().await? {
            if self.seen.contains(&path) {
                continue;
            }
            match load_file(&path).await {
                Ok(found) => {
                    info!(
                        path = ?path,
                        issuers = found.issuers.len(),
                        resources = found.resources.len(),
                        "configuration file loaded"
                    );
                    config.extend(found);
                    self.seen.insert(path);
                }
                Err(e) => {
                    warn!(path = ?path, error = %format!("{:#}", e), "configuration file skipped, retrying next pass");
                }
            }
        }
        if config.is_empty() {
            debug!(dir = ?self.dir, "no new configuration");
        }
        Ok(config)
    }
}

async fn load_file(path: &Path) -> Result<Config> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {:?}", path))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parse {:?}", path))
}
