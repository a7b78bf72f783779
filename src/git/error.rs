use crate::subprocess::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {operation} failed with exit code {code}: {stderr}")]
    CommandFailed {
        operation: String,
        code: i32,
        stderr: String,
    },

    #[error("git subprocess error: {0}")]
    Process(#[from] ProcessError),
}
