//! Managed filesystem locations
//!
//! Everything the kernel writes outside the repository (plan and ticket
//! worktrees, the planner lock, run logs) lives under a per-repository
//! root in the system temp directory, keyed by the repo path so two
//! checkouts never collide. Worktrees must never land inside the source
//! tree being managed.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::TOOL_NAME;

#[derive(Debug, Clone)]
pub struct ManagedPaths {
    root: PathBuf,
}

/// Derive the stable key for a repository: its directory name plus a short
/// digest of the canonical path.
pub fn repo_key(repo_root: &Path) -> String {
    let canonical = repo_root
        .canonicalize()
        .unwrap_or_else(|_| repo_root.to_path_buf());
    let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
    let short = hex_prefix(&digest, 12);
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repo".to_string());
    format!("{name}-{short}")
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    let mut out = String::with_capacity(len);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
        if out.len() >= len {
            break;
        }
    }
    out.truncate(len);
    out
}

impl ManagedPaths {
    pub fn for_repo(repo_root: &Path) -> Self {
        let root = std::env::temp_dir().join(TOOL_NAME).join(repo_key(repo_root));
        Self { root }
    }

    /// Override the managed root wholesale. Tests use this to keep every
    /// artifact inside their own temp directory.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The short-lived plan-branch worktree.
    pub fn plan_worktree(&self) -> PathBuf {
        self.root.join("worktrees").join("plan")
    }

    /// Root under which all per-ticket code worktrees are created.
    pub fn ticket_worktrees(&self) -> PathBuf {
        self.root.join("worktrees").join("tickets")
    }

    pub fn ticket_worktree(&self, ticket_stem: &str) -> PathBuf {
        self.ticket_worktrees().join(ticket_stem)
    }

    /// Scratch location for a temporary master checkout during ff-merge.
    pub fn master_worktree(&self) -> PathBuf {
        self.root.join("worktrees").join("master")
    }

    /// The planner lock directory; `pid` lives inside.
    pub fn planner_lock(&self) -> PathBuf {
        self.root.join("locks").join("repo.lock")
    }

    /// Per-run log directory (agent JSONL byte logs, prompts, last
    /// messages, the duplicated daemon log).
    pub fn logs(&self) -> PathBuf {
        self.root.join("logs")
    }
}
