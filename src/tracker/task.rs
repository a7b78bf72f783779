//! Task id extraction from branch names.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

/// Default task pattern. Matching is case-insensitive; extraction
/// upper-cases the match.
pub const DEFAULT_TASK_ID_PATTERN: &str = r"dfo-\d+";

/// Compile a task-id pattern, case-insensitively.
pub fn build_task_pattern(pattern: Option<&str>) -> Result<Regex> {
    let pattern = pattern.unwrap_or(DEFAULT_TASK_ID_PATTERN);
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("Invalid task id pattern: {pattern}"))
}

pub fn default_task_pattern() -> Regex {
    // The default pattern is a literal and always compiles.
    build_task_pattern(None).expect("default task pattern compiles")
}

/// First match of the pattern in the branch name, upper-cased, or `None`.
/// The no-match fallback policy belongs to the caller.
pub fn extract_task_id(branch: &str, pattern: &Regex) -> Option<String> {
    pattern
        .find(branch)
        .map(|found| found.as_str().to_uppercase())
}
