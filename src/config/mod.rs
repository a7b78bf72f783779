//! Tracker configuration.
//!
//! Consumed, never produced: a JSON file with camelCase keys matching the
//! historical layout. Repositories are either listed explicitly or
//! discovered as immediate subdirectories of `repositoriesFolder` that
//! contain a `.git` entry. A bad repository entry is reported and dropped;
//! it never stops the remaining repositories from being tracked.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const DEFAULT_STATE_FILE: &str = "worklog-state.json";
pub const DEFAULT_LOG_FILE: &str = "worklog.csv";

/// One git working tree to watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    pub path: PathBuf,
    /// Base branch to compare against. When absent (or absent from the
    /// repo), the default-base search tries `master`, then `main`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_branch: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorklogConfig {
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
    #[serde(default)]
    pub repositories_folder: Option<PathBuf>,
    /// Poll cadence and per-branch logging granularity, in minutes.
    pub tracking_interval_minutes: u64,
    #[serde(default)]
    pub task_id_reg_ex: Option<String>,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl WorklogConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tracking_interval_minutes == 0 {
            bail!("trackingIntervalMinutes must be positive");
        }
        if self.repositories.is_empty() && self.repositories_folder.is_none() {
            bail!("No repositories configured: set repositories or repositoriesFolder");
        }
        Ok(())
    }

    /// Explicit entries plus discovered ones, with invalid paths reported
    /// and dropped.
    pub fn resolved_repositories(&self) -> Vec<RepositoryConfig> {
        let mut repos = self.repositories.clone();
        if let Some(folder) = &self.repositories_folder {
            repos.extend(discover_repositories(folder));
        }

        repos
            .into_iter()
            .filter(|repo| {
                if is_git_work_tree(&repo.path) {
                    true
                } else {
                    tracing::error!(
                        "Skipping configured repository {}: not an existing git working tree",
                        repo.path.display()
                    );
                    false
                }
            })
            .collect()
    }

    /// State file location, resolved against the config file's directory.
    pub fn state_path(&self, base: &Path) -> PathBuf {
        resolve_path(self.state_file.as_deref(), base, DEFAULT_STATE_FILE)
    }

    /// Activity log location, resolved against the config file's directory.
    pub fn log_path(&self, base: &Path) -> PathBuf {
        resolve_path(self.log_file.as_deref(), base, DEFAULT_LOG_FILE)
    }
}

fn resolve_path(configured: Option<&Path>, base: &Path, default_name: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => base.join(path),
        None => base.join(default_name),
    }
}

pub fn is_git_work_tree(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Immediate subdirectories of `folder` that contain a `.git` entry,
/// sorted by name for a deterministic tick order.
pub fn discover_repositories(folder: &Path) -> Vec<RepositoryConfig> {
    if !folder.is_dir() {
        tracing::warn!(
            "repositoriesFolder {} is not an existing directory; nothing discovered",
            folder.display()
        );
        return Vec::new();
    }

    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir() && is_git_work_tree(entry.path()))
        .map(|entry| RepositoryConfig {
            path: entry.path().to_path_buf(),
            main_branch: None,
        })
        .collect()
}
