//! Shared fixtures for integration tests: throwaway git repositories with a
//! passing Makefile, a managed temp root per test, deterministic planning
//! generators, and fake agent shell scripts.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use scriptorium::config::Config;
use scriptorium::error::Result;
use scriptorium::git::GitOps;
use scriptorium::kernel::{Kernel, KernelOptions};
use scriptorium::paths::ManagedPaths;
use scriptorium::plan::gateway::PlanGateway;
use scriptorium::plan::tickets;
use scriptorium::planning::{AreaGenerator, PlanningContext, SpecArchitect, SpecTurnContext, TicketGenerator};
use scriptorium::subprocess::SubprocessManager;

pub const PASSING_MAKEFILE: &str = "test:\n\t@echo PASS\n";
pub const FAILING_MAKEFILE: &str = "test:\n\t@echo FAIL; exit 1\n";

pub struct TestProject {
    pub repo: TempDir,
    pub managed: TempDir,
}

impl TestProject {
    pub fn repo_root(&self) -> &Path {
        self.repo.path()
    }

    pub fn paths(&self) -> ManagedPaths {
        ManagedPaths::with_root(self.managed.path().join("managed"))
    }

    pub fn gateway(&self) -> PlanGateway {
        PlanGateway::new(
            self.repo_root().to_path_buf(),
            self.paths(),
            GitOps::new(SubprocessManager::production().runner()),
        )
    }

    pub fn config_with_agent(&self, agent_binary: &Path, max_attempts: u32) -> Config {
        let json = serde_json::json!({
            "agent": {
                "binary": agent_binary.to_string_lossy(),
                "maxAttempts": max_attempts,
                "noOutputTimeoutMs": 10_000u64,
                "hardTimeoutMs": 30_000u64,
                "heartbeatIntervalMs": 0u64,
            },
        });
        serde_json::from_value(json).expect("test config is valid")
    }

    pub async fn kernel(&self, options: KernelOptions) -> Kernel {
        Kernel::start(options).await.expect("kernel starts")
    }

    pub fn kernel_options(&self, config: Config) -> KernelOptions {
        let mut options = KernelOptions::new(self.repo_root().to_path_buf(), config);
        options.paths = Some(self.paths());
        options.bind_addr = Some("127.0.0.1:0".parse().unwrap());
        options
    }
}

/// Run git in `repo`, panicking on failure.
pub fn git(repo: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Run git in `repo` without asserting success.
pub fn git_raw(repo: &Path, args: &[&str]) -> std::process::Output {
    Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("git runs")
}

/// A fresh repository on `master` with a passing Makefile and one commit.
pub fn init_project() -> TestProject {
    let repo = TempDir::new().unwrap();
    let managed = TempDir::new().unwrap();

    git(repo.path(), &["init", "--initial-branch=master"]);
    git(repo.path(), &["config", "user.email", "test@example.com"]);
    git(repo.path(), &["config", "user.name", "Test User"]);
    std::fs::write(repo.path().join("Makefile"), PASSING_MAKEFILE).unwrap();
    std::fs::write(repo.path().join("README.md"), "# Project\n").unwrap();
    git(repo.path(), &["add", "-A"]);
    git(repo.path(), &["commit", "-m", "initial commit"]);

    TestProject { repo, managed }
}

/// Commit `content` to `file` on master in the main checkout.
pub fn commit_on_master(project: &TestProject, file: &str, content: &str, message: &str) {
    std::fs::write(project.repo_root().join(file), content).unwrap();
    git(project.repo_root(), &["add", "-A"]);
    git(project.repo_root(), &["commit", "-m", message]);
}

/// Commit `content` to `file` in an arbitrary worktree.
pub fn commit_in_worktree(worktree: &Path, file: &str, content: &str, message: &str) {
    std::fs::write(worktree.join(file), content).unwrap();
    git(worktree, &["add", "-A"]);
    git(worktree, &["commit", "-m", message]);
}

/// Contents of a file on the plan branch, if it exists there.
pub fn show_plan_file(repo: &Path, rel: &str) -> Option<String> {
    let output = git_raw(repo, &["show", &format!("scriptorium/plan:{rel}")]);
    if output.status.success() {
        Some(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        None
    }
}

/// Markdown filenames under a plan-branch directory.
pub fn plan_dir_entries(repo: &Path, dir: &str) -> Vec<String> {
    let output = git_raw(
        repo,
        &["ls-tree", "--name-only", &format!("scriptorium/plan:{dir}")],
    );
    if !output.status.success() {
        return Vec::new();
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|l| l.ends_with(".md"))
        .map(|l| l.to_string())
        .collect()
}

/// Commit subjects on the plan branch, newest first.
pub fn plan_log_subjects(repo: &Path) -> Vec<String> {
    git(repo, &["log", "--pretty=format:%s", "scriptorium/plan"])
        .lines()
        .map(|l| l.to_string())
        .collect()
}

pub fn plan_commit_count(repo: &Path) -> usize {
    plan_log_subjects(repo).len()
}

/// Write an executable shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}

/// A fake coding agent: consumes the prompt, commits a file in its working
/// directory, and reports a `submit_pr` call in its final message.
pub fn write_submitting_agent(dir: &Path, file: &str, summary: &str) -> PathBuf {
    let body = format!(
        r#"cat > /dev/null
last=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--output-last-message" ]; then last="$a"; fi
  prev="$a"
done
echo '{{"type":"agent_message","message":"implementing"}}'
echo done > {file}
git add -A >/dev/null 2>&1
git commit -q -m "implement ticket" >/dev/null 2>&1
if [ -n "$last" ]; then printf 'submit_pr("{summary}")' > "$last"; fi
exit 0
"#
    );
    write_script(dir, "fake-agent.sh", &body)
}

/// Deterministic area generator: writes fixed files into the plan worktree.
pub struct StaticAreaGenerator {
    pub files: Vec<(String, String)>,
}

#[async_trait]
impl AreaGenerator for StaticAreaGenerator {
    async fn generate_areas(&self, plan_root: &Path, _ctx: &PlanningContext<'_>) -> Result<()> {
        for (rel, content) in &self.files {
            let abs = plan_root.join(rel);
            if let Some(parent) = abs.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(abs, content)?;
        }
        Ok(())
    }
}

/// Deterministic ticket generator: one ticket per invocation, numbered
/// after the existing maximum, bound to the requested area.
pub struct StaticTicketGenerator {
    pub slug: String,
    pub goal: String,
}

#[async_trait]
impl TicketGenerator for StaticTicketGenerator {
    async fn generate_tickets(
        &self,
        plan_root: &Path,
        _ctx: &PlanningContext<'_>,
        area_rel: &str,
        _area_body: &str,
    ) -> Result<()> {
        let number = tickets::next_ticket_number(plan_root)?;
        let rel = format!(
            "tickets/open/{}",
            tickets::format_ticket_filename(number, &self.slug)
        );
        let body = tickets::render_ticket(
            &self.slug,
            Some(area_rel),
            &self.goal,
            "- The change merges cleanly and tests pass.",
            "",
        );
        let abs = plan_root.join(rel);
        std::fs::create_dir_all(abs.parent().unwrap())?;
        std::fs::write(abs, body)?;
        Ok(())
    }
}

/// Architect double that writes whatever files it is told to, regardless of
/// scope. Used to exercise the write guards.
pub struct ScriptedArchitect {
    pub spec_content: Option<String>,
    pub extra_files: Vec<(String, String)>,
    pub reply: String,
}

#[async_trait]
impl SpecArchitect for ScriptedArchitect {
    async fn revise_spec(&self, plan_root: &Path, _ctx: &SpecTurnContext<'_>) -> Result<String> {
        if let Some(spec) = &self.spec_content {
            std::fs::write(plan_root.join("spec.md"), spec)?;
        }
        for (rel, content) in &self.extra_files {
            let abs = plan_root.join(rel);
            if let Some(parent) = abs.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(abs, content)?;
        }
        Ok(self.reply.clone())
    }
}

/// Seed an area and an open ticket directly on the plan branch.
pub async fn seed_area_and_ticket(
    gateway: &PlanGateway,
    area_rel: &str,
    ticket_slug: &str,
) -> String {
    use scriptorium::plan::gateway::Transition;

    let area_rel = area_rel.to_string();
    let slug = ticket_slug.to_string();
    gateway
        .transact(move |plan_root| {
            let area_abs = plan_root.join(&area_rel);
            std::fs::create_dir_all(area_abs.parent().unwrap())?;
            std::fs::write(&area_abs, "# Area 01\n\n## Goal\n- Full flow.\n")?;

            let number = tickets::next_ticket_number(plan_root)?;
            let rel = format!(
                "tickets/open/{}",
                tickets::format_ticket_filename(number, &slug)
            );
            let body = tickets::render_ticket(
                &slug,
                Some(&area_rel),
                "- Deliver the change.",
                "- Tests pass.",
                "",
            );
            let abs = plan_root.join(&rel);
            std::fs::create_dir_all(abs.parent().unwrap())?;
            std::fs::write(abs, body)?;

            Ok(Transition {
                value: rel,
                message: "scriptorium: create tickets from areas".to_string(),
                paths: vec![],
            })
        })
        .await
        .expect("seeding succeeds")
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
