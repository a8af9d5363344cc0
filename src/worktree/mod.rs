//! Per-ticket code worktrees
//!
//! Each in-progress ticket gets exactly one worktree on a branch
//! `scriptorium/ticket-<id>`, created from `master` at assignment and
//! reaped once the ticket leaves `in-progress/`. Worktrees live under the
//! managed temp root, never inside the source tree being managed.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::Result;
use crate::git::GitOps;
use crate::paths::ManagedPaths;
use crate::plan::tickets;

pub struct WorktreeManager {
    repo_root: PathBuf,
    paths: ManagedPaths,
    git: GitOps,
}

/// Branch name for a ticket: `scriptorium/ticket-<NNNN>`.
pub fn branch_for_ticket(ticket_rel: &str) -> Result<String> {
    let id = tickets::ticket_id_from_path(ticket_rel)?;
    Ok(format!("scriptorium/ticket-{id}"))
}

impl WorktreeManager {
    pub fn new(repo_root: PathBuf, paths: ManagedPaths, git: GitOps) -> Self {
        Self {
            repo_root,
            paths,
            git,
        }
    }

    /// Deterministic worktree location for a ticket.
    pub fn worktree_path_for(&self, ticket_rel: &str) -> PathBuf {
        self.paths.ticket_worktree(tickets::ticket_stem(ticket_rel))
    }

    /// Create (or recreate) the worktree for a ticket. Idempotent: a stale
    /// entry at the target path is force-removed first; the ticket branch
    /// is checked out when it already exists and created from `master`
    /// otherwise.
    pub async fn ensure_worktree_created(&self, ticket_rel: &str) -> Result<PathBuf> {
        let branch = branch_for_ticket(ticket_rel)?;
        let target = self.worktree_path_for(ticket_rel);

        self.git.worktree_prune(&self.repo_root).await?;
        let target_canon = canonical_or(&target);
        for entry in self.git.worktree_list(&self.repo_root).await? {
            if canonical_or(&entry.path) == target_canon {
                debug!("removing stale worktree at {}", entry.path.display());
                self.git.worktree_remove(&self.repo_root, &entry.path).await?;
            }
        }
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
            self.git.worktree_prune(&self.repo_root).await?;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.git.branch_exists(&self.repo_root, &branch).await? {
            self.git
                .worktree_add(&self.repo_root, &target, &branch)
                .await?;
        } else {
            self.git
                .worktree_add_new_branch(&self.repo_root, &target, &branch, "master")
                .await?;
        }

        info!(
            "worktree ready for {ticket_rel} at {} on {branch}",
            target.display()
        );
        Ok(target)
    }

    /// Remove the worktree for a ticket if one is registered.
    pub async fn remove_worktree(&self, ticket_rel: &str) -> Result<()> {
        let target = self.worktree_path_for(ticket_rel);
        let target_canon = canonical_or(&target);
        for entry in self.git.worktree_list(&self.repo_root).await? {
            if canonical_or(&entry.path) == target_canon {
                self.git.worktree_remove(&self.repo_root, &entry.path).await?;
            }
        }
        Ok(())
    }

    /// Reap managed ticket worktrees that no in-progress ticket references
    /// any more. `referenced` is the set of worktree paths currently bound
    /// in ticket headers. Returns the number removed.
    pub async fn cleanup_stale(&self, referenced: &[PathBuf]) -> Result<usize> {
        let managed_root = canonical_or(&self.paths.ticket_worktrees());
        let referenced: Vec<PathBuf> = referenced.iter().map(|p| canonical_or(p)).collect();

        let mut removed = 0;
        for entry in self.git.worktree_list(&self.repo_root).await? {
            let canon = canonical_or(&entry.path);
            if !canon.starts_with(&managed_root) {
                continue;
            }
            if referenced.contains(&canon) {
                continue;
            }
            info!("reaping stale ticket worktree at {}", entry.path.display());
            self.git.worktree_remove(&self.repo_root, &entry.path).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// All registered worktrees under the managed ticket root.
    pub async fn list_managed(&self) -> Result<Vec<crate::git::WorktreeEntry>> {
        let managed_root = canonical_or(&self.paths.ticket_worktrees());
        Ok(self
            .git
            .worktree_list(&self.repo_root)
            .await?
            .into_iter()
            .filter(|e| canonical_or(&e.path).starts_with(&managed_root))
            .collect())
    }
}

fn canonical_or(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
