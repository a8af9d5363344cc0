use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("invalid endpoint URL '{0}': {1}")]
    BadEndpointUrl(String, String),

    #[error("invalid area path '{0}'")]
    InvalidAreaPath(String),

    #[error("invalid ticket slug '{0}'")]
    InvalidTicketSlug(String),

    #[error("invalid ticket prefix in '{0}'")]
    InvalidTicketPrefix(String),

    #[error("ticket content is empty: {0}")]
    EmptyTicketContent(String),

    #[error("ticket '{ticket}' declares area '{found}', expected '{expected}'")]
    AreaMismatch {
        ticket: String,
        expected: String,
        found: String,
    },

    #[error("invalid merge queue item '{path}': {reason}")]
    InvalidQueueItem { path: String, reason: String },

    #[error("plan driver wrote outside its allowed scope: {0:?}")]
    WriteGuardViolation(Vec<String>),

    #[error("plan branch '{0}' does not exist (run `scriptorium init` first)")]
    PlanBranchMissing(String),

    #[error("plan branch is checked out by a non-managed worktree at {0}")]
    PlanWorktreeBusy(PathBuf),

    #[error("planner lock at {path} is held by pid {pid}")]
    LockContended { path: PathBuf, pid: String },

    #[error("no agent backend implemented for model '{0}'")]
    BackendUnsupported(String),

    #[error("git {args:?} failed with status {status}: {stderr}")]
    Git {
        args: Vec<String>,
        status: i32,
        stderr: String,
    },

    #[error("subprocess error: {0}")]
    Subprocess(#[from] crate::subprocess::ProcessError),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
