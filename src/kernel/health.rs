//! Master-health gate
//!
//! Before any assignment or merge in a tick, `make test` must pass on
//! `master`. A red master halts progress for the tick (WARN, not an error)
//! and the loop resumes once the gate clears.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::subprocess::{ProcessCommandBuilder, ProcessOutput};

use super::Kernel;

/// A checkout of `master` usable for tests and ff-merges. Borrowed from an
/// existing registered worktree when one has `master` checked out, else a
/// temporary managed worktree that is removed on release.
pub(crate) struct MasterCheckout {
    pub path: PathBuf,
    temporary: bool,
}

impl Kernel {
    /// Run the project's test target on `master`. Returns the verdict plus
    /// the captured output for diagnostics.
    pub async fn master_is_green(&self) -> Result<(bool, ProcessOutput)> {
        let checkout = self.acquire_master_checkout().await?;
        let result = self.run_test_target(&checkout.path).await;
        self.release_master_checkout(checkout).await?;
        let output = result?;
        let green = output.status.success();
        if green {
            debug!("master is green");
        } else {
            warn!("master is red; holding assignment and merge progress");
        }
        Ok((green, output))
    }

    /// The sole quality gate: `make test` in the given checkout.
    pub(crate) async fn run_test_target(&self, dir: &Path) -> Result<ProcessOutput> {
        let command = ProcessCommandBuilder::new("make")
            .arg("test")
            .current_dir(dir)
            .build();
        Ok(self.subprocess.runner().run(command).await?)
    }

    pub(crate) async fn acquire_master_checkout(&self) -> Result<MasterCheckout> {
        for entry in self.git.worktree_list(&self.repo_root).await? {
            if entry.branch.as_deref() == Some("master") {
                return Ok(MasterCheckout {
                    path: entry.path,
                    temporary: false,
                });
            }
        }

        let path = self.paths.master_worktree();
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
            self.git.worktree_prune(&self.repo_root).await?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.git
            .worktree_add(&self.repo_root, &path, "master")
            .await?;
        Ok(MasterCheckout {
            path,
            temporary: true,
        })
    }

    pub(crate) async fn release_master_checkout(&self, checkout: MasterCheckout) -> Result<()> {
        if checkout.temporary {
            self.git
                .worktree_remove(&self.repo_root, &checkout.path)
                .await?;
        }
        Ok(())
    }
}
