//! Read-only git query layer.
//!
//! Every fact the tracker knows about a repository comes from one of these
//! queries, shelled out through the [`ProcessRunner`](crate::subprocess::ProcessRunner)
//! seam. The snapshot collector decides what a failed query means; this
//! layer only reports success or failure per invocation.

pub mod error;
pub mod parsers;
pub mod types;

pub use error::GitError;
pub use types::NumstatEntry;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::subprocess::{ExitStatus, ProcessCommandBuilder, ProcessOutput, ProcessRunner};

/// Ceiling for a single git invocation. A repository on a dead network
/// mount should stall one query, not the whole tick.
const GIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait GitInspector: Send + Sync {
    /// Name of the currently checked-out branch, empty on detached HEAD.
    async fn current_branch(&self, repo: &Path) -> Result<String, GitError>;

    /// Whether `branch` resolves to a local ref.
    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError>;

    /// Raw `git status --porcelain` text for the whole working tree.
    async fn status_porcelain(&self, repo: &Path) -> Result<String, GitError>;

    /// Commit hash for an arbitrary ref.
    async fn rev_parse(&self, repo: &Path, reference: &str) -> Result<String, GitError>;

    /// Files differing between the merge base of `base` and `head`, in git's
    /// own output order.
    async fn changed_files(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, GitError>;

    /// Commits reachable from `head` but not `base`.
    async fn commits_ahead(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, GitError>;

    /// Per-file added/deleted counts for the committed range `base...head`.
    async fn numstat_range(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<NumstatEntry>, GitError>;

    /// Per-file counts for unstaged working-tree changes.
    async fn numstat_working(&self, repo: &Path) -> Result<Vec<NumstatEntry>, GitError>;

    /// Per-file counts for staged changes.
    async fn numstat_staged(&self, repo: &Path) -> Result<Vec<NumstatEntry>, GitError>;

    /// Untracked, non-ignored files.
    async fn untracked_files(&self, repo: &Path) -> Result<Vec<String>, GitError>;
}

pub struct GitInspectorImpl {
    runner: Arc<dyn ProcessRunner>,
}

impl GitInspectorImpl {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    async fn run_git(&self, repo: &Path, args: &[&str]) -> Result<ProcessOutput, GitError> {
        let output = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(args)
                    .current_dir(repo)
                    .timeout(GIT_COMMAND_TIMEOUT)
                    .build(),
            )
            .await?;
        Ok(output)
    }

    async fn run_git_checked(
        &self,
        repo: &Path,
        operation: &str,
        args: &[&str],
    ) -> Result<String, GitError> {
        let output = self.run_git(repo, args).await?;
        check_success(operation, &output)?;
        Ok(output.stdout)
    }
}

fn check_success(operation: &str, output: &ProcessOutput) -> Result<(), GitError> {
    match &output.status {
        ExitStatus::Success => Ok(()),
        status => Err(GitError::CommandFailed {
            operation: operation.to_string(),
            code: status.code().unwrap_or(-1),
            stderr: output.stderr.trim().to_string(),
        }),
    }
}

#[async_trait]
impl GitInspector for GitInspectorImpl {
    async fn current_branch(&self, repo: &Path) -> Result<String, GitError> {
        let stdout = self
            .run_git_checked(repo, "branch --show-current", &["branch", "--show-current"])
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, GitError> {
        let reference = format!("refs/heads/{branch}");
        let output = self
            .run_git(repo, &["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        // Exit code 1 is the documented "ref does not exist" answer.
        Ok(output.status.success())
    }

    async fn status_porcelain(&self, repo: &Path) -> Result<String, GitError> {
        self.run_git_checked(repo, "status", &["status", "--porcelain"])
            .await
    }

    async fn rev_parse(&self, repo: &Path, reference: &str) -> Result<String, GitError> {
        let stdout = self
            .run_git_checked(repo, "rev-parse", &["rev-parse", reference])
            .await?;
        Ok(stdout.trim().to_string())
    }

    async fn changed_files(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, GitError> {
        let range = format!("{base}...{head}");
        let stdout = self
            .run_git_checked(repo, "diff --name-only", &["diff", "--name-only", &range])
            .await?;
        Ok(parsers::parse_line_list(&stdout))
    }

    async fn commits_ahead(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<String>, GitError> {
        let range = format!("{base}..{head}");
        let stdout = self
            .run_git_checked(repo, "rev-list", &["rev-list", &range])
            .await?;
        Ok(parsers::parse_line_list(&stdout))
    }

    async fn numstat_range(
        &self,
        repo: &Path,
        base: &str,
        head: &str,
    ) -> Result<Vec<NumstatEntry>, GitError> {
        let range = format!("{base}...{head}");
        let stdout = self
            .run_git_checked(repo, "diff --numstat", &["diff", "--numstat", &range])
            .await?;
        Ok(parsers::parse_numstat(&stdout))
    }

    async fn numstat_working(&self, repo: &Path) -> Result<Vec<NumstatEntry>, GitError> {
        let stdout = self
            .run_git_checked(repo, "diff --numstat", &["diff", "--numstat"])
            .await?;
        Ok(parsers::parse_numstat(&stdout))
    }

    async fn numstat_staged(&self, repo: &Path) -> Result<Vec<NumstatEntry>, GitError> {
        let stdout = self
            .run_git_checked(
                repo,
                "diff --numstat --cached",
                &["diff", "--numstat", "--cached"],
            )
            .await?;
        Ok(parsers::parse_numstat(&stdout))
    }

    async fn untracked_files(&self, repo: &Path) -> Result<Vec<String>, GitError> {
        let stdout = self
            .run_git_checked(
                repo,
                "ls-files --others",
                &["ls-files", "--others", "--exclude-standard"],
            )
            .await?;
        Ok(parsers::parse_line_list(&stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;

    fn inspector(mock: MockProcessRunner) -> GitInspectorImpl {
        GitInspectorImpl::new(Arc::new(mock))
    }

    #[tokio::test]
    async fn test_current_branch_trims_newline() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["branch", "--show-current"])
            .returns_stdout("DFO-42-fix\n")
            .finish();

        let branch = inspector(mock)
            .current_branch(Path::new("/r"))
            .await
            .unwrap();
        assert_eq!(branch, "DFO-42-fix");
    }

    #[tokio::test]
    async fn test_branch_exists_maps_exit_codes() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args.len() == 4 && args[..3] == ["rev-parse", "--verify", "--quiet"])
            .returns_exit_code(1)
            .finish();

        let exists = inspector(mock)
            .branch_exists(Path::new("/r"), "missing")
            .await
            .unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    async fn test_status_failure_carries_stderr() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["status", "--porcelain"])
            .returns_stderr("fatal: not a git repository")
            .returns_exit_code(128)
            .finish();

        let err = inspector(mock)
            .status_porcelain(Path::new("/r"))
            .await
            .unwrap_err();
        match err {
            GitError::CommandFailed { code, stderr, .. } => {
                assert_eq!(code, 128);
                assert_eq!(stderr, "fatal: not a git repository");
            }
            other => panic!("Expected CommandFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commits_ahead_uses_two_dot_range() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["rev-list", "main..DFO-42-fix"])
            .returns_stdout("abc\ndef\n")
            .finish();

        let commits = inspector(mock)
            .commits_ahead(Path::new("/r"), "main", "DFO-42-fix")
            .await
            .unwrap();
        assert_eq!(commits, vec!["abc", "def"]);
    }

    #[tokio::test]
    async fn test_changed_files_uses_merge_base_range() {
        let mut mock = MockProcessRunner::new();
        mock.expect_command("git")
            .with_args(|args| args == ["diff", "--name-only", "main...topic"])
            .returns_stdout("src/a.rs\nsrc/b.rs\n")
            .finish();

        let files = inspector(mock)
            .changed_files(Path::new("/r"), "main", "topic")
            .await
            .unwrap();
        assert_eq!(files, vec!["src/a.rs", "src/b.rs"]);
    }
}
