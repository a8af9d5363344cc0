//! Git plan gateway
//!
//! The single write path to the plan branch. Every mutation happens inside
//! a short-lived managed worktree: check out, mutate files, stage, commit
//! with a reserved subject, remove the worktree. Failure before the commit
//! leaves the branch at its previous commit; there is no partially applied
//! state. A stale managed worktree left by a crash is force-removed on the
//! next checkout; a non-managed checkout of the plan branch is a hard
//! error.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::paths::ManagedPaths;
use crate::plan::{self, PLAN_BRANCH};

pub struct PlanGateway {
    repo_root: PathBuf,
    paths: ManagedPaths,
    git: GitOps,
}

/// Token for an open plan worktree. Obtained from [`PlanGateway::checkout`]
/// and consumed by [`PlanGateway::remove`].
pub struct PlanCheckout {
    path: PathBuf,
}

impl PlanCheckout {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// The outcome of a transactional mutation: a value for the caller plus the
/// commit to record it under.
pub struct Transition<T> {
    pub value: T,
    pub message: String,
    /// Pathspecs to stage, relative to the plan root; empty stages
    /// everything.
    pub paths: Vec<String>,
}

/// RAII planner lock. Guards the plan-mutation critical section for
/// operations that may run an external agent in the plan worktree.
#[derive(Debug)]
pub struct PlanLock {
    path: PathBuf,
}

impl Drop for PlanLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            warn!("failed to release planner lock at {}: {e}", self.path.display());
        }
    }
}

impl PlanGateway {
    pub fn new(repo_root: PathBuf, paths: ManagedPaths, git: GitOps) -> Self {
        Self {
            repo_root,
            paths,
            git,
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub async fn branch_exists(&self) -> Result<bool> {
        self.git.branch_exists(&self.repo_root, PLAN_BRANCH).await
    }

    /// Create the orphan plan branch with its directory skeleton and the
    /// placeholder spec, in a single commit.
    pub async fn init_plan_branch(&self) -> Result<()> {
        if self.branch_exists().await? {
            return Err(Error::Other(format!(
                "plan branch '{PLAN_BRANCH}' already exists"
            )));
        }

        let wt = self.paths.plan_worktree();
        self.reclaim_managed_path(&wt).await?;
        if let Some(parent) = wt.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.git
            .worktree_add_orphan(&self.repo_root, &wt, PLAN_BRANCH)
            .await?;

        let result = self.write_skeleton(&wt);
        match result {
            Ok(()) => {
                self.git.add_all(&wt).await?;
                self.git
                    .commit_if_changed(&wt, plan::messages::INIT_PLAN_BRANCH)
                    .await?;
                self.git.worktree_remove(&self.repo_root, &wt).await?;
                Ok(())
            }
            Err(e) => {
                let _ = self.git.worktree_remove(&self.repo_root, &wt).await;
                Err(e)
            }
        }
    }

    fn write_skeleton(&self, wt: &Path) -> Result<()> {
        plan::write_plan_file(wt, plan::SPEC_FILE, plan::SPEC_PLACEHOLDER)?;
        for dir in [
            plan::AREAS_DIR,
            "tickets/open",
            "tickets/in-progress",
            "tickets/done",
            plan::DECISIONS_DIR,
        ] {
            std::fs::create_dir_all(wt.join(dir))?;
            std::fs::write(wt.join(dir).join(".gitkeep"), "")?;
        }
        Ok(())
    }

    /// Open the managed plan worktree. Recovers from a stale managed
    /// checkout left by a crash; refuses to race a non-managed checkout of
    /// the plan branch.
    pub async fn checkout(&self) -> Result<PlanCheckout> {
        if !self.branch_exists().await? {
            return Err(Error::PlanBranchMissing(PLAN_BRANCH.to_string()));
        }

        self.git.worktree_prune(&self.repo_root).await?;

        let managed = self.paths.plan_worktree();
        let managed_canon = canonical_or(&managed);
        for entry in self.git.worktree_list(&self.repo_root).await? {
            let is_plan_branch = entry.branch.as_deref() == Some(PLAN_BRANCH);
            let entry_canon = canonical_or(&entry.path);
            let is_managed_path = entry_canon == managed_canon;
            if is_managed_path {
                debug!(
                    "removing stale managed plan worktree at {}",
                    entry.path.display()
                );
                self.git.worktree_remove(&self.repo_root, &entry.path).await?;
            } else if is_plan_branch {
                return Err(Error::PlanWorktreeBusy(entry.path));
            }
        }

        // An unregistered leftover directory would make `worktree add`
        // refuse the path.
        if managed.exists() {
            std::fs::remove_dir_all(&managed)?;
            self.git.worktree_prune(&self.repo_root).await?;
        }

        if let Some(parent) = managed.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.git
            .worktree_add(&self.repo_root, &managed, PLAN_BRANCH)
            .await?;

        Ok(PlanCheckout { path: managed })
    }

    /// Stage `pathspecs` (everything when empty) and commit with `message`.
    /// No-op when the staged tree matches HEAD.
    pub async fn commit(
        &self,
        checkout: &PlanCheckout,
        pathspecs: &[String],
        message: &str,
    ) -> Result<bool> {
        if pathspecs.is_empty() {
            self.git.add_all(&checkout.path).await?;
        } else {
            let specs: Vec<&str> = pathspecs.iter().map(|s| s.as_str()).collect();
            self.git.add(&checkout.path, &specs).await?;
        }
        self.git.commit_if_changed(&checkout.path, message).await
    }

    pub async fn remove(&self, checkout: PlanCheckout) -> Result<()> {
        self.git
            .worktree_remove(&self.repo_root, &checkout.path)
            .await
    }

    /// Run a read-only closure against a fresh plan checkout. The worktree
    /// is removed on all exit paths.
    pub async fn read<T>(&self, f: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let checkout = self.checkout().await?;
        let result = f(&checkout.path);
        let removed = self.remove(checkout).await;
        let value = result?;
        removed?;
        Ok(value)
    }

    /// Run a mutating closure and commit its outcome as a single
    /// transition. If the closure fails, the worktree is discarded and the
    /// branch stays at its previous commit.
    pub async fn transact<T>(
        &self,
        f: impl FnOnce(&Path) -> Result<Transition<T>>,
    ) -> Result<T> {
        let checkout = self.checkout().await?;
        match f(&checkout.path) {
            Ok(transition) => {
                let committed = self
                    .commit(&checkout, &transition.paths, &transition.message)
                    .await;
                let removed = self.remove(checkout).await;
                committed?;
                removed?;
                Ok(transition.value)
            }
            Err(e) => {
                let _ = self.remove(checkout).await;
                Err(e)
            }
        }
    }

    /// Remove whatever occupies a managed path, registered or not.
    async fn reclaim_managed_path(&self, path: &Path) -> Result<()> {
        if path.exists() {
            let registered = self
                .git
                .worktree_list(&self.repo_root)
                .await?
                .into_iter()
                .any(|e| canonical_or(&e.path) == canonical_or(path));
            if registered {
                self.git.worktree_remove(&self.repo_root, path).await?;
            } else {
                std::fs::remove_dir_all(path)?;
            }
            self.git.worktree_prune(&self.repo_root).await?;
        }
        Ok(())
    }

    /// Acquire the planner lock, failing fast when another process holds
    /// it.
    pub fn acquire_planner_lock(&self) -> Result<PlanLock> {
        let lock_dir = self.paths.planner_lock();
        if let Some(parent) = lock_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::create_dir(&lock_dir) {
            Ok(()) => {
                std::fs::write(lock_dir.join("pid"), format!("{}\n", std::process::id()))?;
                Ok(PlanLock { path: lock_dir })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let pid = std::fs::read_to_string(lock_dir.join("pid"))
                    .map(|s| s.trim().to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                Err(Error::LockContended {
                    path: lock_dir,
                    pid,
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn canonical_or(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
