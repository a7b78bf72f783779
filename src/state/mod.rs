//! Persisted per-branch tracking state.
//!
//! Layout on disk is `{ repoPath: { branchName: BranchState } }`, written as
//! a whole-file atomic rewrite. A corrupted file is backed up aside and
//! treated as empty, which reverts every branch to first-sight semantics on
//! the next tick.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::snapshot::BranchSnapshot;

/// A branch's last-observed snapshot plus the last time it caused a log
/// entry. Serialized flat so the snapshot fields and `lastLogTimestamp`
/// share one JSON object, matching the historical layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchState {
    #[serde(flatten)]
    pub snapshot: BranchSnapshot,
    /// Epoch millis of the last logging event for this branch.
    pub last_log_timestamp: i64,
}

pub type RepoStateMap = BTreeMap<String, BTreeMap<String, BranchState>>;

pub struct StateStore {
    path: PathBuf,
    state: RepoStateMap,
}

impl StateStore {
    /// Load state from `path`, falling back to empty on absence or
    /// corruption. A corrupted file is renamed aside for inspection.
    pub fn load(path: PathBuf) -> Result<Self> {
        let state = Self::load_or_default(&path)?;
        Ok(Self { path, state })
    }

    fn load_or_default(path: &Path) -> Result<RepoStateMap> {
        if !path.exists() {
            return Ok(RepoStateMap::new());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;

        match serde_json::from_str(&contents) {
            Ok(state) => Ok(state),
            Err(e) => {
                let backup = path.with_extension(format!("corrupted.{}", Utc::now().timestamp()));
                fs::rename(path, &backup).with_context(|| {
                    format!("Failed to back up corrupted state file {}", path.display())
                })?;
                tracing::warn!(
                    "State file corrupted ({}), backed up to {} and starting empty",
                    e,
                    backup.display()
                );
                Ok(RepoStateMap::new())
            }
        }
    }

    pub fn get(&self, repo: &str, branch: &str) -> Option<&BranchState> {
        self.state.get(repo).and_then(|branches| branches.get(branch))
    }

    pub fn branches_for(&self, repo: &str) -> BTreeMap<String, BranchState> {
        self.state.get(repo).cloned().unwrap_or_default()
    }

    pub fn insert(&mut self, repo: &str, branch: &str, state: BranchState) {
        self.state
            .entry(repo.to_string())
            .or_default()
            .insert(branch.to_string(), state);
    }

    pub fn snapshot_map(&self) -> RepoStateMap {
        self.state.clone()
    }

    pub fn restore(&mut self, state: RepoStateMap) {
        self.state = state;
    }

    /// Atomic whole-file rewrite: serialize to a temp file, then rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create state directory {}", parent.display())
                })?;
            }
        }

        let temp_file = self.path.with_extension("json.tmp");
        let json =
            serde_json::to_string_pretty(&self.state).context("Failed to serialize state")?;
        fs::write(&temp_file, json)
            .with_context(|| format!("Failed to write temp state file {}", temp_file.display()))?;
        fs::rename(&temp_file, &self.path)
            .with_context(|| format!("Failed to rename state file {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn snapshot(head: &str) -> BranchSnapshot {
        BranchSnapshot {
            working_tree_status: String::new(),
            head_commit_hash: Some(head.to_string()),
            base_commit_hash: Some("base".to_string()),
            files_changed_vs_base: Some(vec!["src/lib.rs".to_string()]),
            commits_ahead_of_base: Some(vec!["c1".to_string()]),
            commit_count_ahead_of_base: Some(1),
            committed_diff_stats: None,
            working_tree_diff_stats: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut store = StateStore::load(path.clone()).unwrap();
        store.insert(
            "/r",
            "DFO-42-fix",
            BranchState {
                snapshot: snapshot("abc"),
                last_log_timestamp: 1_700_000_000_000,
            },
        );
        store.save().unwrap();

        let reloaded = StateStore::load(path).unwrap();
        let state = reloaded.get("/r", "DFO-42-fix").unwrap();
        assert_eq!(state.last_log_timestamp, 1_700_000_000_000);
        assert_eq!(state.snapshot.head_commit_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::load(dir.path().join("state.json")).unwrap();
        assert!(store.get("/r", "main").is_none());
    }

    #[test]
    fn test_corrupted_file_backed_up_and_reset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json at all").unwrap();

        let store = StateStore::load(path.clone()).unwrap();
        assert!(store.get("/r", "main").is_none());
        // Original file was moved aside, not silently deleted.
        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .contains("corrupted")
            })
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_lastlog_serializes_camel_case_and_flat() {
        let state = BranchState {
            snapshot: snapshot("abc"),
            last_log_timestamp: 42,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lastLogTimestamp"], 42);
        assert_eq!(json["headCommitHash"], "abc");
        assert!(json.get("snapshot").is_none());
    }
}
