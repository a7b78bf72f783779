//! Point-in-time observation of one (repository, branch) pair.
//!
//! The collector runs the full battery of git queries and never fails as a
//! whole: each query is independently fallible, and a failure degrades only
//! the field it feeds. Missing refs yield `None`; a broken status query
//! stores a sentinel string so "could not read" stays distinguishable from
//! "clean" when snapshots are compared.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::git::{GitError, GitInspector, NumstatEntry};

/// Stored in place of the porcelain status when the query itself failed.
/// Compares unequal to any real status text, so a transition into or out of
/// the error state registers as a change.
pub const STATUS_UNAVAILABLE: &str = "<status unavailable>";

/// Added/deleted line counts for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    pub added: u64,
    pub deleted: u64,
}

/// Observable state of one branch at a point in time.
///
/// Field names serialize in camelCase to match the historical state-file
/// layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchSnapshot {
    /// Raw `git status --porcelain` text, empty when clean, or
    /// [`STATUS_UNAVAILABLE`] when the query failed.
    pub working_tree_status: String,
    pub head_commit_hash: Option<String>,
    pub base_commit_hash: Option<String>,
    /// Files differing between base and head, in git output order.
    pub files_changed_vs_base: Option<Vec<String>>,
    /// Commits reachable from head but not base.
    pub commits_ahead_of_base: Option<Vec<String>>,
    pub commit_count_ahead_of_base: Option<usize>,
    /// Per-file counts for the committed range base..head.
    pub committed_diff_stats: Option<BTreeMap<String, FileStat>>,
    /// Per-file counts merged from unstaged, staged and untracked sources.
    pub working_tree_diff_stats: Option<BTreeMap<String, FileStat>>,
}

pub struct SnapshotCollector {
    git: Arc<dyn GitInspector>,
}

impl SnapshotCollector {
    pub fn new(git: Arc<dyn GitInspector>) -> Self {
        Self { git }
    }

    /// Collect a snapshot of `branch` in `repo`, compared against `base`.
    pub async fn collect(&self, repo: &Path, branch: &str, base: &str) -> BranchSnapshot {
        let working_tree_status = match self.git.status_porcelain(repo).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!("Status query failed for {}: {}", repo.display(), e);
                STATUS_UNAVAILABLE.to_string()
            }
        };

        let branch_ok = self.ref_exists(repo, branch).await;
        let base_ok = self.ref_exists(repo, base).await;

        let head_commit_hash = if branch_ok {
            self.try_query("rev-parse head", self.git.rev_parse(repo, branch).await)
        } else {
            None
        };
        let base_commit_hash = if base_ok {
            self.try_query("rev-parse base", self.git.rev_parse(repo, base).await)
        } else {
            None
        };

        let (files_changed_vs_base, commits_ahead_of_base, committed_diff_stats) =
            if branch_ok && base_ok {
                (
                    self.try_query(
                        "diff --name-only",
                        self.git.changed_files(repo, base, branch).await,
                    ),
                    self.try_query("rev-list", self.git.commits_ahead(repo, base, branch).await),
                    self.try_query(
                        "diff --numstat range",
                        self.git.numstat_range(repo, base, branch).await,
                    )
                    .map(|entries| merge_numstat([entries], Vec::new())),
                )
            } else {
                (None, None, None)
            };

        let commit_count_ahead_of_base = commits_ahead_of_base.as_ref().map(Vec::len);
        let working_tree_diff_stats = self.collect_working_stats(repo).await;

        BranchSnapshot {
            working_tree_status,
            head_commit_hash,
            base_commit_hash,
            files_changed_vs_base,
            commits_ahead_of_base,
            commit_count_ahead_of_base,
            committed_diff_stats,
            working_tree_diff_stats,
        }
    }

    /// Merge unstaged, staged and untracked stats into one map.
    ///
    /// Returns `None` only when every source failed; a partial read still
    /// produces a map from the sources that answered.
    async fn collect_working_stats(&self, repo: &Path) -> Option<BTreeMap<String, FileStat>> {
        let unstaged = self.try_query("diff --numstat", self.git.numstat_working(repo).await);
        let staged = self.try_query(
            "diff --numstat --cached",
            self.git.numstat_staged(repo).await,
        );
        let untracked = self.try_query(
            "ls-files --others",
            self.git.untracked_files(repo).await,
        );

        if unstaged.is_none() && staged.is_none() && untracked.is_none() {
            return None;
        }

        let mut untracked_counts = Vec::new();
        if let Some(paths) = untracked {
            for path in paths {
                let lines = count_file_lines(&repo.join(&path)).await;
                untracked_counts.push((path, lines));
            }
        }

        Some(merge_numstat(
            [
                unstaged.unwrap_or_default(),
                staged.unwrap_or_default(),
            ],
            untracked_counts,
        ))
    }

    async fn ref_exists(&self, repo: &Path, reference: &str) -> bool {
        match self.git.branch_exists(repo, reference).await {
            Ok(exists) => exists,
            Err(e) => {
                tracing::warn!(
                    "Ref check for '{}' failed in {}: {}",
                    reference,
                    repo.display(),
                    e
                );
                false
            }
        }
    }

    fn try_query<T>(&self, operation: &str, result: Result<T, GitError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Query '{}' failed: {}", operation, e);
                None
            }
        }
    }
}

/// Accumulate numstat entries from multiple sources into one map keyed by
/// destination path. A file hit by several sources (staged rename plus a
/// further working-tree edit) sums its counts rather than being overwritten.
pub fn merge_numstat<const N: usize>(
    sources: [Vec<NumstatEntry>; N],
    untracked: Vec<(String, u64)>,
) -> BTreeMap<String, FileStat> {
    let mut merged: BTreeMap<String, FileStat> = BTreeMap::new();

    for entry in sources.into_iter().flatten() {
        let stat = merged.entry(entry.path).or_default();
        stat.added += entry.added;
        stat.deleted += entry.deleted;
    }

    for (path, lines) in untracked {
        let stat = merged.entry(path).or_default();
        stat.added += lines;
    }

    merged
}

/// Full line count of an untracked file; binary or unreadable files count
/// as zero.
async fn count_file_lines(path: &Path) -> u64 {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            if bytes.contains(&0) {
                return 0;
            }
            let newlines = bytes.iter().filter(|b| **b == b'\n').count() as u64;
            if bytes.is_empty() || bytes.ends_with(b"\n") {
                newlines
            } else {
                newlines + 1
            }
        }
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitInspectorImpl;
    use crate::subprocess::MockProcessRunner;

    fn entry(path: &str, added: u64, deleted: u64) -> NumstatEntry {
        NumstatEntry {
            path: path.to_string(),
            added,
            deleted,
        }
    }

    #[test]
    fn test_merge_accumulates_across_sources() {
        let merged = merge_numstat(
            [
                vec![entry("src/lib.rs", 4, 1)],
                vec![entry("src/lib.rs", 2, 0), entry("src/new.rs", 7, 0)],
            ],
            vec![("notes.txt".to_string(), 12)],
        );

        assert_eq!(merged["src/lib.rs"], FileStat { added: 6, deleted: 1 });
        assert_eq!(merged["src/new.rs"], FileStat { added: 7, deleted: 0 });
        assert_eq!(merged["notes.txt"], FileStat { added: 12, deleted: 0 });
    }

    #[test]
    fn test_merge_untracked_joins_existing_path() {
        // A staged rename plus an untracked remnant on the same destination
        // path accumulates instead of overwriting.
        let merged = merge_numstat(
            [vec![entry("renamed.rs", 3, 3)]],
            vec![("renamed.rs".to_string(), 5)],
        );
        assert_eq!(merged["renamed.rs"], FileStat { added: 8, deleted: 3 });
    }

    fn expect_ref(mock: &mut MockProcessRunner, name: &str, exists: bool) {
        let reference = format!("refs/heads/{name}");
        mock.expect_command("git")
            .with_args(move |args| {
                args.len() == 4
                    && args[..3] == ["rev-parse", "--verify", "--quiet"]
                    && args[3] == reference
            })
            .returns_exit_code(if exists { 0 } else { 1 })
            .finish();
    }

    #[tokio::test]
    async fn test_missing_base_nulls_range_fields_only() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["status", "--porcelain"])
            .returns_stdout(" M src/lib.rs\n")
            .finish();
        expect_ref(&mut mock, "topic", true);
        expect_ref(&mut mock, "main", false);
        mock.expect_command("git")
            .with_args(|args| args == ["rev-parse", "topic"])
            .returns_stdout("abc123\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat"])
            .returns_stdout("1\t0\tsrc/lib.rs\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat", "--cached"])
            .returns_stdout("")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["ls-files", "--others", "--exclude-standard"])
            .returns_stdout("")
            .finish();

        let collector = SnapshotCollector::new(Arc::new(GitInspectorImpl::new(Arc::new(mock))));
        let snapshot = collector
            .collect(Path::new("/r"), "topic", "main")
            .await;

        assert_eq!(snapshot.working_tree_status, " M src/lib.rs\n");
        assert_eq!(snapshot.head_commit_hash.as_deref(), Some("abc123"));
        assert!(snapshot.base_commit_hash.is_none());
        assert!(snapshot.files_changed_vs_base.is_none());
        assert!(snapshot.commits_ahead_of_base.is_none());
        assert!(snapshot.commit_count_ahead_of_base.is_none());
        assert!(snapshot.committed_diff_stats.is_none());
        assert!(snapshot.working_tree_diff_stats.is_some());
    }

    #[tokio::test]
    async fn test_status_failure_stores_sentinel() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["status", "--porcelain"])
            .returns_stderr("fatal: unable to read tree")
            .returns_exit_code(128)
            .finish();
        expect_ref(&mut mock, "topic", false);
        expect_ref(&mut mock, "main", false);
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat"])
            .returns_exit_code(128)
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat", "--cached"])
            .returns_exit_code(128)
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["ls-files", "--others", "--exclude-standard"])
            .returns_exit_code(128)
            .finish();

        let collector = SnapshotCollector::new(Arc::new(GitInspectorImpl::new(Arc::new(mock))));
        let snapshot = collector
            .collect(Path::new("/r"), "topic", "main")
            .await;

        assert_eq!(snapshot.working_tree_status, STATUS_UNAVAILABLE);
        assert!(snapshot.head_commit_hash.is_none());
        // Every working-stat source failed, so the field is null rather
        // than an empty map.
        assert!(snapshot.working_tree_diff_stats.is_none());
    }

    #[tokio::test]
    async fn test_full_battery_with_base_and_head() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["status", "--porcelain"])
            .returns_stdout("")
            .finish();
        expect_ref(&mut mock, "DFO-42-fix", true);
        expect_ref(&mut mock, "main", true);
        mock.expect_command("git")
            .with_args(|args| args == ["rev-parse", "DFO-42-fix"])
            .returns_stdout("headhash\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["rev-parse", "main"])
            .returns_stdout("basehash\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--name-only", "main...DFO-42-fix"])
            .returns_stdout("src/a.rs\nsrc/b.rs\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["rev-list", "main..DFO-42-fix"])
            .returns_stdout("c1\nc2\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat", "main...DFO-42-fix"])
            .returns_stdout("5\t1\tsrc/a.rs\n2\t0\tsrc/b.rs\n")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat"])
            .returns_stdout("")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--numstat", "--cached"])
            .returns_stdout("")
            .finish();
        mock.expect_command("git")
            .with_args(|args| args == ["ls-files", "--others", "--exclude-standard"])
            .returns_stdout("")
            .finish();

        let collector = SnapshotCollector::new(Arc::new(GitInspectorImpl::new(Arc::new(mock))));
        let snapshot = collector
            .collect(Path::new("/r"), "DFO-42-fix", "main")
            .await;

        assert_eq!(snapshot.head_commit_hash.as_deref(), Some("headhash"));
        assert_eq!(snapshot.base_commit_hash.as_deref(), Some("basehash"));
        assert_eq!(
            snapshot.files_changed_vs_base.as_deref(),
            Some(["src/a.rs".to_string(), "src/b.rs".to_string()].as_slice())
        );
        assert_eq!(snapshot.commit_count_ahead_of_base, Some(2));
        let committed = snapshot.committed_diff_stats.unwrap();
        assert_eq!(committed["src/a.rs"], FileStat { added: 5, deleted: 1 });
        assert_eq!(
            snapshot.working_tree_diff_stats,
            Some(BTreeMap::new())
        );
    }
}
