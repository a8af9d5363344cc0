//! Git operations layer
//!
//! All git interaction goes through [`GitOps`], a thin wrapper over the
//! subprocess layer. Nothing here interprets plan semantics: callers pass
//! the working directory explicitly, and failures come back as
//! [`Error::Git`] with stderr captured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::subprocess::{ProcessCommandBuilder, ProcessOutput, ProcessRunner};

/// One entry from `git worktree list --porcelain`.
#[derive(Debug, Clone)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    /// Branch name without the `refs/heads/` prefix; `None` for a detached
    /// or unborn HEAD.
    pub branch: Option<String>,
}

/// Parse `git worktree list --porcelain` output into entries.
///
/// Blocks are separated by blank lines; each block starts with a
/// `worktree <path>` line optionally followed by `branch refs/heads/<name>`.
pub fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;

    let mut flush = |path: &mut Option<PathBuf>, branch: &mut Option<String>| {
        if let Some(p) = path.take() {
            entries.push(WorktreeEntry {
                path: p,
                branch: branch.take(),
            });
        } else {
            branch.take();
        }
    };

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("worktree ") {
            flush(&mut path, &mut branch);
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(
                rest.strip_prefix("refs/heads/")
                    .unwrap_or(rest)
                    .to_string(),
            );
        }
    }
    flush(&mut path, &mut branch);

    entries
}

#[derive(Clone)]
pub struct GitOps {
    runner: Arc<dyn ProcessRunner>,
}

impl GitOps {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Run git with the given args, returning the raw output regardless of
    /// exit status. Used where a non-zero exit is normal control flow
    /// (merges, ff-only integration).
    pub async fn run_raw(&self, dir: &Path, args: &[&str]) -> Result<ProcessOutput> {
        let command = ProcessCommandBuilder::new("git")
            .args(args)
            .current_dir(dir)
            .build();
        Ok(self.runner.run(command).await?)
    }

    /// Run git with the given args, mapping a non-zero exit to [`Error::Git`].
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<ProcessOutput> {
        let output = self.run_raw(dir, args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(Error::Git {
                args: args.iter().map(|s| s.to_string()).collect(),
                status: output.status.code().unwrap_or(-1),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    /// Whether `branch` exists as a local ref.
    pub async fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool> {
        let output = self
            .run_raw(
                repo,
                &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
            )
            .await?;
        Ok(output.status.success())
    }

    /// Resolve a ref to its commit hash.
    pub async fn rev_parse(&self, repo: &Path, rev: &str) -> Result<String> {
        let output = self.run(repo, &["rev-parse", rev]).await?;
        Ok(output.stdout.trim().to_string())
    }

    pub async fn worktree_list(&self, repo: &Path) -> Result<Vec<WorktreeEntry>> {
        let output = self
            .run(repo, &["worktree", "list", "--porcelain"])
            .await?;
        Ok(parse_worktree_list(&output.stdout))
    }

    pub async fn worktree_prune(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["worktree", "prune"]).await?;
        Ok(())
    }

    /// Add a worktree at `path` checking out an existing `branch`.
    pub async fn worktree_add(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "add", &path_str, branch])
            .await?;
        Ok(())
    }

    /// Add a worktree at `path` on a new `branch` created from `start`.
    pub async fn worktree_add_new_branch(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        start: &str,
    ) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "add", "-b", branch, &path_str, start])
            .await?;
        Ok(())
    }

    /// Add a worktree at `path` on a new orphan `branch` (no files, no
    /// history). Used once, by plan-branch initialization.
    pub async fn worktree_add_orphan(&self, repo: &Path, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "add", "--orphan", "-b", branch, &path_str])
            .await?;
        Ok(())
    }

    pub async fn worktree_remove(&self, repo: &Path, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "remove", "--force", &path_str])
            .await?;
        Ok(())
    }

    /// Stage the given pathspecs (including deletions) in `dir`.
    pub async fn add(&self, dir: &Path, pathspecs: &[&str]) -> Result<()> {
        let mut args = vec!["add", "-A", "--"];
        args.extend(pathspecs);
        self.run(dir, &args).await?;
        Ok(())
    }

    pub async fn add_all(&self, dir: &Path) -> Result<()> {
        self.run(dir, &["add", "-A"]).await?;
        Ok(())
    }

    /// `git status --porcelain` lines for `dir`; empty means clean.
    pub async fn status_porcelain(&self, dir: &Path) -> Result<Vec<String>> {
        let output = self.run(dir, &["status", "--porcelain"]).await?;
        Ok(output
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    /// Commit staged changes in `dir`. No-op (returns `false`) when the
    /// index matches HEAD and nothing is staged.
    pub async fn commit_if_changed(&self, dir: &Path, message: &str) -> Result<bool> {
        let staged = self
            .run_raw(dir, &["diff", "--cached", "--quiet"])
            .await?;
        if staged.status.success() {
            // Index clean; also covers the unborn-HEAD case only when
            // nothing is staged at all.
            let has_head = self
                .run_raw(dir, &["rev-parse", "--verify", "--quiet", "HEAD"])
                .await?;
            if has_head.status.success() {
                return Ok(false);
            }
            let any = self.run(dir, &["diff", "--cached", "--name-only"]).await?;
            if any.stdout.trim().is_empty() {
                return Ok(false);
            }
        }
        self.run(dir, &["commit", "-m", message]).await?;
        Ok(true)
    }

    /// Merge `branch` into the checkout at `dir` without opening an editor.
    /// Returns the raw output; conflicts surface as a non-success status.
    pub async fn merge_no_edit(&self, dir: &Path, branch: &str) -> Result<ProcessOutput> {
        self.run_raw(dir, &["merge", "--no-edit", branch]).await
    }

    /// Fast-forward the checkout at `dir` to `branch`; refuses real merges.
    pub async fn merge_ff_only(&self, dir: &Path, branch: &str) -> Result<ProcessOutput> {
        self.run_raw(dir, &["merge", "--ff-only", branch]).await
    }

    /// Abort an in-progress merge in `dir`, ignoring failure when no merge
    /// is in progress.
    pub async fn merge_abort(&self, dir: &Path) -> Result<()> {
        let _ = self.run_raw(dir, &["merge", "--abort"]).await?;
        Ok(())
    }
}
