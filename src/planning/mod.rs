//! Planning drivers
//!
//! The Architect turns the spec into areas (and revises the spec itself in
//! one-shot or interactive runs); the Manager turns an area into open
//! tickets. Both run through the agent harness inside the plan worktree and
//! are held to strict write scopes: after the agent exits, the worktree is
//! diffed and any change outside the allowed set aborts the commit,
//! leaving the plan branch untouched. Generators sit behind traits so tests
//! can substitute deterministic implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::harness::{AgentHarness, AgentRequest};
use crate::plan::gateway::PlanGateway;
use crate::plan::{self, tickets};

/// Context shared by the area and ticket generators.
pub struct PlanningContext<'a> {
    pub repo_root: &'a Path,
    pub spec: &'a str,
}

/// Context for one Architect spec-revision turn.
pub struct SpecTurnContext<'a> {
    pub repo_root: &'a Path,
    pub current_spec: &'a str,
    /// Accumulated `(role, text)` turns of an interactive session; empty
    /// for one-shot runs.
    pub history: &'a [(String, String)],
    pub user_message: &'a str,
}

#[async_trait]
pub trait SpecArchitect: Send + Sync {
    /// Revise `spec.md` in the plan worktree; returns the assistant's
    /// reply text.
    async fn revise_spec(&self, plan_root: &Path, ctx: &SpecTurnContext<'_>) -> Result<String>;
}

#[async_trait]
pub trait AreaGenerator: Send + Sync {
    /// Write area documents under `areas/` in the plan worktree.
    async fn generate_areas(&self, plan_root: &Path, ctx: &PlanningContext<'_>) -> Result<()>;
}

#[async_trait]
pub trait TicketGenerator: Send + Sync {
    /// Write open tickets under `tickets/open/` for one area.
    async fn generate_tickets(
        &self,
        plan_root: &Path,
        ctx: &PlanningContext<'_>,
        area_rel: &str,
        area_body: &str,
    ) -> Result<()>;
}

/// Paths touched according to `git status --porcelain` lines. Rename lines
/// report their destination.
pub fn porcelain_paths(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| {
            if line.len() <= 3 {
                return None;
            }
            let path = &line[3..];
            let path = path.rsplit(" -> ").next().unwrap_or(path);
            Some(path.trim_matches('"').to_string())
        })
        .collect()
}

/// State captured before a planning agent runs, for diffing afterwards.
pub struct WriteScopeSnapshot {
    pub plan_head: String,
    pub repo_status: Vec<String>,
}

pub async fn snapshot_write_scope(
    git: &GitOps,
    repo_root: &Path,
    plan_root: &Path,
) -> Result<WriteScopeSnapshot> {
    Ok(WriteScopeSnapshot {
        plan_head: git.rev_parse(plan_root, "HEAD").await?,
        repo_status: git.status_porcelain(repo_root).await?,
    })
}

/// Reject the run when the plan worktree changed outside `allowed`, when
/// the agent created commits of its own, or when the outer source
/// repository was touched at all.
pub async fn enforce_write_scope(
    git: &GitOps,
    repo_root: &Path,
    before: &WriteScopeSnapshot,
    plan_root: &Path,
    allowed: impl Fn(&str) -> bool,
) -> Result<()> {
    let mut violations = Vec::new();

    // Commits are the gateway's job; an agent that commits would bypass
    // the diff below and break commit-per-transition.
    let head_after = git.rev_parse(plan_root, "HEAD").await?;
    if head_after != before.plan_head {
        violations.push("<plan worktree HEAD moved>".to_string());
    }

    let changed = porcelain_paths(&git.status_porcelain(plan_root).await?);
    violations.extend(changed.iter().filter(|p| !allowed(p)).cloned());

    let repo_after = git.status_porcelain(repo_root).await?;
    if repo_after != before.repo_status {
        violations.push(format!("<source repository: {}>", repo_root.display()));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::WriteGuardViolation(violations))
    }
}

const WRITE_SCOPE_SPEC: &str =
    "You may modify ONLY the file `spec.md` in the current working directory. Do not create, modify, or delete any other file, never run git commands (the orchestrator commits for you), and never touch the source repository itself.";
const WRITE_SCOPE_AREAS: &str =
    "You may create and modify files ONLY under `areas/` in the current working directory. Do not touch `spec.md` or tickets, never run git commands (the orchestrator commits for you), and never touch the source repository itself.";
const WRITE_SCOPE_TICKETS: &str =
    "You may create files ONLY under `tickets/open/` in the current working directory. Do not touch `spec.md` or `areas/`, never run git commands (the orchestrator commits for you), and never touch the source repository itself.";

fn common_preamble(repo_root: &Path) -> String {
    format!(
        "You are a planning agent for a software project.\n\nRepository root (read-only for you): {}\nIf an AGENTS.md file exists at the repository root, read it and follow its conventions.\n",
        repo_root.display()
    )
}

pub fn build_spec_prompt(ctx: &SpecTurnContext<'_>) -> String {
    let mut prompt = common_preamble(ctx.repo_root);
    prompt.push_str("\nYour job is to maintain the project specification in `spec.md`.\n\n");
    prompt.push_str(WRITE_SCOPE_SPEC);
    prompt.push_str("\n\n<spec>\n");
    if ctx.current_spec.trim().is_empty() {
        prompt.push_str("(the spec is currently empty)\n");
    } else {
        prompt.push_str(ctx.current_spec.trim());
        prompt.push('\n');
    }
    prompt.push_str("</spec>\n");
    if !ctx.history.is_empty() {
        prompt.push_str("\n<history>\n");
        for (role, text) in ctx.history {
            prompt.push_str(&format!("[{role}] {}\n", text.trim()));
        }
        prompt.push_str("</history>\n");
    }
    prompt.push_str("\n<request>\n");
    prompt.push_str(ctx.user_message.trim());
    prompt.push_str("\n</request>\n");
    prompt
}

pub fn build_areas_prompt(ctx: &PlanningContext<'_>) -> String {
    let mut prompt = common_preamble(ctx.repo_root);
    prompt.push_str("\nDecompose the specification into work areas. Write one markdown file per area under `areas/`, named `<NN>-<slug>.md` with a two-digit ordering prefix. Each area needs a title, a goal, and its scope.\n\n");
    prompt.push_str(WRITE_SCOPE_AREAS);
    prompt.push_str("\n\n<spec>\n");
    prompt.push_str(ctx.spec.trim());
    prompt.push_str("\n</spec>\n");
    prompt
}

pub fn build_tickets_prompt(ctx: &PlanningContext<'_>, area_rel: &str, area_body: &str) -> String {
    let mut prompt = common_preamble(ctx.repo_root);
    prompt.push_str(&format!(
        "\nBreak the area below into small, independently mergeable tickets. Write one markdown file per ticket under `tickets/open/`, named `<NNNN>-<slug>.md` with a four-digit ID continuing the existing numbering. Every ticket MUST carry a `**Area:** {area_rel}` header line, a goal, and acceptance criteria.\n\n"
    ));
    prompt.push_str(WRITE_SCOPE_TICKETS);
    prompt.push_str("\n\n<spec>\n");
    prompt.push_str(ctx.spec.trim());
    prompt.push_str("\n</spec>\n\n<area>\n");
    prompt.push_str(area_body.trim());
    prompt.push_str("\n</area>\n");
    prompt
}

/// Production planner: every generator role is one agent run in the plan
/// worktree.
pub struct HarnessPlanner {
    harness: Arc<AgentHarness>,
    repo_root: PathBuf,
    config: Config,
}

impl HarnessPlanner {
    pub fn new(harness: Arc<AgentHarness>, repo_root: PathBuf, config: Config) -> Self {
        Self {
            harness,
            repo_root,
            config,
        }
    }

    fn request(&self, plan_root: &Path, log_key: &str, model: String, prompt: String) -> AgentRequest {
        AgentRequest {
            prompt,
            working_dir: plan_root.to_path_buf(),
            model,
            instructions: None,
            mcp_url: None,
            session_token: None,
            reasoning_effort: None,
            skip_repo_check: false,
            log_key: log_key.to_string(),
            max_attempts: self.harness.default_max_attempts(),
            base_attempt: 1,
            continuation_directive: None,
            env: Vec::new(),
        }
    }

    async fn run_to_completion(&self, req: AgentRequest) -> Result<String> {
        let result = self.harness.run(&req).await?;
        if !result.success() {
            return Err(Error::Other(format!(
                "planning agent '{}' failed: exit {}, timeout {}",
                req.log_key,
                result.exit_code,
                result.timeout_kind.as_str()
            )));
        }
        Ok(result.last_message)
    }
}

#[async_trait]
impl SpecArchitect for HarnessPlanner {
    async fn revise_spec(&self, plan_root: &Path, ctx: &SpecTurnContext<'_>) -> Result<String> {
        let mut req = self.request(
            plan_root,
            "architect-spec",
            self.config.architect_model(),
            build_spec_prompt(ctx),
        );
        req.reasoning_effort = self.config.reasoning_effort.architect;
        self.run_to_completion(req).await
    }
}

#[async_trait]
impl AreaGenerator for HarnessPlanner {
    async fn generate_areas(&self, plan_root: &Path, ctx: &PlanningContext<'_>) -> Result<()> {
        let mut req = self.request(
            plan_root,
            "architect-areas",
            self.config.architect_model(),
            build_areas_prompt(ctx),
        );
        req.reasoning_effort = self.config.reasoning_effort.architect;
        self.run_to_completion(req).await?;
        Ok(())
    }
}

#[async_trait]
impl TicketGenerator for HarnessPlanner {
    async fn generate_tickets(
        &self,
        plan_root: &Path,
        ctx: &PlanningContext<'_>,
        area_rel: &str,
        area_body: &str,
    ) -> Result<()> {
        let mut req = self.request(
            plan_root,
            &format!("manager-{}", tickets::ticket_stem(area_rel)),
            self.config.manager_model(),
            build_tickets_prompt(ctx, area_rel, area_body),
        );
        req.reasoning_effort = self.config.reasoning_effort.manager;
        self.run_to_completion(req).await?;
        Ok(())
    }
}

/// Outcome of one spec-revision run.
#[derive(Debug)]
pub struct SpecUpdateOutcome {
    pub changed: bool,
    pub reply: String,
}

/// Drives Architect spec revisions outside the kernel loop: the one-shot
/// `plan <prompt>` path and the interactive session.
pub struct PlanDriver {
    gateway: PlanGateway,
    git: GitOps,
    repo_root: PathBuf,
    architect: Arc<dyn SpecArchitect>,
}

impl PlanDriver {
    pub fn new(
        gateway: PlanGateway,
        git: GitOps,
        repo_root: PathBuf,
        architect: Arc<dyn SpecArchitect>,
    ) -> Self {
        Self {
            gateway,
            git,
            repo_root,
            architect,
        }
    }

    /// Run the Architect once against the current spec and commit `spec.md`
    /// iff its bytes changed.
    pub async fn update_spec_from_architect(&self, user_prompt: &str) -> Result<SpecUpdateOutcome> {
        self.spec_turn(user_prompt, &[], plan::messages::UPDATE_SPEC.to_string())
            .await
    }

    async fn spec_turn(
        &self,
        user_message: &str,
        history: &[(String, String)],
        commit_message: String,
    ) -> Result<SpecUpdateOutcome> {
        let _lock = self.gateway.acquire_planner_lock()?;
        let checkout = self.gateway.checkout().await?;

        let outcome = async {
            let scope = snapshot_write_scope(&self.git, &self.repo_root, checkout.path()).await?;
            let before = plan::read_plan_file(checkout.path(), plan::SPEC_FILE)
                .unwrap_or_default();
            let ctx = SpecTurnContext {
                repo_root: &self.repo_root,
                current_spec: &before,
                history,
                user_message,
            };
            let reply = self.architect.revise_spec(checkout.path(), &ctx).await?;

            enforce_write_scope(
                &self.git,
                &self.repo_root,
                &scope,
                checkout.path(),
                |p| p == plan::SPEC_FILE,
            )
            .await?;

            let after =
                plan::read_plan_file(checkout.path(), plan::SPEC_FILE).unwrap_or_default();
            let changed = after != before;
            if changed {
                self.gateway
                    .commit(&checkout, &[plan::SPEC_FILE.to_string()], &commit_message)
                    .await?;
                info!("spec updated by architect");
            }
            Ok(SpecUpdateOutcome { changed, reply })
        }
        .await;

        match outcome {
            Ok(value) => {
                self.gateway.remove(checkout).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.gateway.remove(checkout).await;
                Err(e)
            }
        }
    }
}

/// Interactive planning session: one Architect attempt per user turn, spec
/// committed only when it changes, `/`-commands handled by the caller.
pub struct PlanSession {
    driver: PlanDriver,
    history: Vec<(String, String)>,
    turns: usize,
}

impl PlanSession {
    pub fn new(driver: PlanDriver) -> Self {
        Self {
            driver,
            history: Vec::new(),
            turns: 0,
        }
    }

    pub fn history(&self) -> &[(String, String)] {
        &self.history
    }

    /// Current spec contents, for the `/show` command.
    pub async fn current_spec(&self) -> Result<String> {
        self.driver
            .gateway
            .read(|plan_root| {
                Ok(plan::read_plan_file(plan_root, plan::SPEC_FILE).unwrap_or_default())
            })
            .await
    }

    pub async fn turn(&mut self, user_message: &str) -> Result<SpecUpdateOutcome> {
        self.turns += 1;
        let message = plan::messages::plan_session_turn(self.turns);
        let outcome = self
            .driver
            .spec_turn(user_message, &self.history, message)
            .await?;
        self.history
            .push(("user".to_string(), user_message.to_string()));
        self.history
            .push(("assistant".to_string(), outcome.reply.clone()));
        Ok(outcome)
    }
}
