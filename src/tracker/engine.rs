//! Time attribution engine.
//!
//! One tick: fan out over the configured repositories (bounded
//! concurrency), collect a snapshot of each repo's current branch, decide
//! per branch whether to record state and whether to log time, then apply
//! every delta in a single serial reduce step and flush the stores. The
//! fan-out tasks never touch shared state; they each return a
//! [`RepoDelta`].

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, Utc};
use futures::future::join_all;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::{RepositoryConfig, WorklogConfig};
use crate::git::{GitInspector, GitInspectorImpl};
use crate::logbook::{round_hours, LogBook};
use crate::snapshot::{BranchSnapshot, SnapshotCollector};
use crate::state::{BranchState, StateStore};
use crate::subprocess::SubprocessManager;
use crate::tracker::detect;
use crate::tracker::task::{build_task_pattern, extract_task_id};

/// Tolerance for scheduler jitter: a tick firing slightly before the full
/// interval has elapsed is not unfairly rejected by the gate.
pub const LEEWAY_MS: i64 = 15_000;

/// Ceiling for one full tick; past this, the tick is abandoned with no
/// flush and the next interval starts fresh.
const TICK_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on concurrently inspected repositories, so a large
/// repository list does not fan out into unbounded git processes.
const MAX_CONCURRENT_REPOS: usize = 4;

/// Base branches tried, in order, when none is configured or the
/// configured one is missing.
const DEFAULT_BASE_BRANCHES: [&str; 2] = ["master", "main"];

/// Outcome of the per-branch decision for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickDecision {
    pub first_sight: bool,
    pub changed: bool,
    pub should_log: bool,
}

/// What one repository check produced; applied serially after the fan-out.
#[derive(Debug)]
pub struct RepoDelta {
    pub repo_path: String,
    pub branch: String,
    pub snapshot: BranchSnapshot,
    pub decision: TickDecision,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub repos_checked: usize,
    pub repos_failed: usize,
    pub state_writes: usize,
    pub log_events: usize,
    pub abandoned: bool,
}

/// The pure per-branch decision. First sight records a baseline without
/// logging; otherwise a log happens only when something changed and the
/// interval gate passes. The gate is keyed off the last *logging* event,
/// never the last observation, so a changed-but-too-soon tick does not
/// reset the clock.
pub fn evaluate_tick(
    prior: Option<&BranchState>,
    snapshot: &BranchSnapshot,
    now_ms: i64,
    interval_minutes: u64,
) -> TickDecision {
    match prior {
        None => TickDecision {
            first_sight: true,
            changed: false,
            should_log: false,
        },
        Some(state) => {
            let changed = detect::is_changed(&state.snapshot, snapshot);
            let interval_elapsed = now_ms - state.last_log_timestamp
                >= interval_minutes as i64 * 60_000 - LEEWAY_MS;
            TickDecision {
                first_sight: false,
                changed,
                should_log: changed && interval_elapsed,
            }
        }
    }
}

pub struct TrackerEngine {
    repositories: Vec<RepositoryConfig>,
    interval_minutes: u64,
    task_pattern: Regex,
    git: Arc<dyn GitInspector>,
    state: StateStore,
    log: LogBook,
}

impl TrackerEngine {
    /// Build the engine from a loaded config. `config_dir` anchors the
    /// relative state/log paths (normally the config file's directory).
    pub fn new(
        config: &WorklogConfig,
        config_dir: &Path,
        subprocess: &SubprocessManager,
    ) -> Result<Self> {
        let git: Arc<dyn GitInspector> = Arc::new(GitInspectorImpl::new(subprocess.runner()));
        let state = StateStore::load(config.state_path(config_dir))?;
        let log = LogBook::load(config.log_path(config_dir))?;
        Self::from_parts(
            config.resolved_repositories(),
            config.tracking_interval_minutes,
            build_task_pattern(config.task_id_reg_ex.as_deref())?,
            git,
            state,
            log,
        )
    }

    pub fn from_parts(
        repositories: Vec<RepositoryConfig>,
        interval_minutes: u64,
        task_pattern: Regex,
        git: Arc<dyn GitInspector>,
        state: StateStore,
        log: LogBook,
    ) -> Result<Self> {
        if repositories.is_empty() {
            tracing::warn!("No trackable repositories; ticks will be no-ops");
        }
        Ok(Self {
            repositories,
            interval_minutes,
            task_pattern,
            git,
            state,
            log,
        })
    }

    pub fn interval_minutes(&self) -> u64 {
        self.interval_minutes
    }

    /// Run one tick against the wall clock.
    pub async fn tick(&mut self) -> Result<TickSummary> {
        let now_ms = Utc::now().timestamp_millis();
        let today = Local::now().date_naive();
        self.tick_at(now_ms, today).await
    }

    /// Run one tick at an explicit instant. Separated from [`tick`](Self::tick)
    /// so the interval gate is testable without waiting on real time.
    pub async fn tick_at(&mut self, now_ms: i64, today: NaiveDate) -> Result<TickSummary> {
        match tokio::time::timeout(TICK_TIMEOUT, self.run_tick(now_ms, today)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Tick exceeded {:?}; abandoning without touching state or log files",
                    TICK_TIMEOUT
                );
                Ok(TickSummary {
                    abandoned: true,
                    ..TickSummary::default()
                })
            }
        }
    }

    async fn run_tick(&mut self, now_ms: i64, today: NaiveDate) -> Result<TickSummary> {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_REPOS));

        let mut checks = Vec::new();
        for repo in self.repositories.clone() {
            let git = Arc::clone(&self.git);
            let semaphore = Arc::clone(&semaphore);
            let prior_branches = self.state.branches_for(&repo_key(&repo));
            let interval_minutes = self.interval_minutes;

            checks.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let result =
                    check_repository(git, &repo, prior_branches, now_ms, interval_minutes).await;
                (repo, result)
            });
        }

        let results = join_all(checks).await;

        // Serial reduce: the fan-out returned plain deltas; only this step
        // mutates the state map and the log.
        let state_before = self.state.snapshot_map();
        let log_before = self.log.entries_snapshot();
        let mut summary = TickSummary::default();

        for (repo, result) in results {
            summary.repos_checked += 1;
            match result {
                Ok(Some(delta)) => self.apply_delta(delta, now_ms, today, &mut summary),
                Ok(None) => {}
                Err(e) => {
                    summary.repos_failed += 1;
                    tracing::warn!(
                        "Skipping repository {} this tick: {:#}",
                        repo.path.display(),
                        e
                    );
                }
            }
        }

        if summary.state_writes > 0 {
            if let Err(e) = self.state.save() {
                tracing::error!("Failed to persist state: {:#}; discarding this tick", e);
                self.state.restore(state_before);
                self.log.restore(log_before);
                return Ok(summary);
            }
        }
        if self.log.is_dirty() {
            if let Err(e) = self.log.flush_if_dirty() {
                tracing::error!(
                    "Failed to persist activity log: {:#}; discarding this tick",
                    e
                );
                // The state file was already written with the advanced
                // lastLogTimestamp; put the prior tick back so both files
                // stay in step and the slice is re-attempted next tick.
                self.log.restore(log_before);
                self.state.restore(state_before);
                if let Err(e) = self.state.save() {
                    tracing::error!("Failed to roll back state file: {:#}", e);
                }
                return Ok(summary);
            }
        }

        tracing::debug!(
            "Tick done: {} repos, {} failed, {} state writes, {} log events",
            summary.repos_checked,
            summary.repos_failed,
            summary.state_writes,
            summary.log_events
        );
        Ok(summary)
    }

    fn apply_delta(
        &mut self,
        delta: RepoDelta,
        now_ms: i64,
        today: NaiveDate,
        summary: &mut TickSummary,
    ) {
        let RepoDelta {
            repo_path,
            branch,
            snapshot,
            decision,
        } = delta;

        if decision.should_log {
            let task_id = extract_task_id(&branch, &self.task_pattern)
                .unwrap_or_else(|| branch.clone());
            let hours = round_hours(self.interval_minutes as f64 / 60.0);
            tracing::info!(
                "Logging {} hours to {} for {} ({})",
                hours,
                task_id,
                repo_path,
                branch
            );
            self.log.accumulate(today, &task_id, &repo_path, hours);
            summary.log_events += 1;
        }

        if decision.changed || decision.first_sight {
            // A changed-but-gated tick keeps the old logging timestamp so
            // it does not push the next log further out.
            let last_log_timestamp = if decision.should_log || decision.first_sight {
                now_ms
            } else {
                self.state
                    .get(&repo_path, &branch)
                    .map(|prior| prior.last_log_timestamp)
                    .unwrap_or(now_ms)
            };
            self.state.insert(
                &repo_path,
                &branch,
                BranchState {
                    snapshot,
                    last_log_timestamp,
                },
            );
            summary.state_writes += 1;
        }
    }
}

fn repo_key(repo: &RepositoryConfig) -> String {
    repo.path.to_string_lossy().into_owned()
}

/// Inspect one repository's current branch. Read-only: the caller applies
/// the returned delta. `Ok(None)` means nothing to track this tick
/// (detached HEAD).
async fn check_repository(
    git: Arc<dyn GitInspector>,
    repo: &RepositoryConfig,
    prior_branches: BTreeMap<String, BranchState>,
    now_ms: i64,
    interval_minutes: u64,
) -> Result<Option<RepoDelta>> {
    let branch = git
        .current_branch(&repo.path)
        .await
        .with_context(|| format!("Failed to read current branch of {}", repo.path.display()))?;
    if branch.is_empty() {
        tracing::debug!("Detached HEAD in {}, skipping", repo.path.display());
        return Ok(None);
    }

    let base = resolve_base_branch(git.as_ref(), &repo.path, repo.main_branch.as_deref()).await;

    let collector = SnapshotCollector::new(Arc::clone(&git));
    let snapshot = collector.collect(&repo.path, &branch, &base).await;

    let decision = evaluate_tick(
        prior_branches.get(&branch),
        &snapshot,
        now_ms,
        interval_minutes,
    );

    if decision.changed {
        if let Some(prior) = prior_branches.get(&branch) {
            tracing::debug!(
                "{} ({}): changed dimensions {:?}",
                repo.path.display(),
                branch,
                detect::changed_dimensions(&prior.snapshot, &snapshot)
            );
        }
    }

    Ok(Some(RepoDelta {
        repo_path: repo_key(repo),
        branch,
        snapshot,
        decision,
    }))
}

/// Pick the base branch: the configured one if it exists, otherwise the
/// first of the default candidates present in the repo. Falling through
/// is a warning, never a failure; the collector nulls the base-relative
/// fields when the returned name resolves to nothing.
async fn resolve_base_branch(
    git: &dyn GitInspector,
    repo: &Path,
    configured: Option<&str>,
) -> String {
    if let Some(name) = configured {
        match git.branch_exists(repo, name).await {
            Ok(true) => return name.to_string(),
            Ok(false) => tracing::warn!(
                "Configured main branch '{}' not found in {}; searching defaults",
                name,
                repo.display()
            ),
            Err(e) => tracing::warn!(
                "Could not verify main branch '{}' in {}: {}",
                name,
                repo.display(),
                e
            ),
        }
    }

    for candidate in DEFAULT_BASE_BRANCHES {
        if matches!(git.branch_exists(repo, candidate).await, Ok(true)) {
            return candidate.to_string();
        }
    }

    tracing::warn!(
        "No base branch found in {}; base-relative fields will be empty",
        repo.display()
    );
    DEFAULT_BASE_BRANCHES[0].to_string()
}
