//! Event loop and ticket scheduling
//!
//! One tick: drain tool tasks, check the spec, gate on master health,
//! bootstrap missing plan artifacts (areas, then tickets per uncovered
//! area), process one merge item, assign and execute the oldest open
//! ticket, reap stale worktrees. The loop exits when the shutdown flag is
//! set or a bounded tick count runs out.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::harness::AgentRequest;
use crate::plan::gateway::Transition;
use crate::plan::{self, tickets, TicketState};
use crate::planning::{self, PlanningContext};

use super::{is_transient, Kernel, MergeOutcome};

/// Tail limit for the final message recorded in an Agent Run note.
const AGENT_NOTE_TAIL_BYTES: usize = 1200;

static SUBMIT_PR_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"submit_pr\(\s*"([^"]*)"\s*\)"#).expect("static pattern"));

/// A `submit_pr("…")` call spelled out in agent text, the fallback when the
/// tool server slot is empty.
pub(crate) fn scan_submit_pr(text: &str) -> Option<String> {
    SUBMIT_PR_CALL
        .captures(text)
        .map(|caps| caps[1].to_string())
}

impl Kernel {
    /// Run the event loop until shutdown (or for at most `max_ticks`,
    /// which tests use for bounded runs).
    pub async fn run(&mut self, max_ticks: Option<u64>) -> Result<()> {
        info!(
            "orchestrator running for {} (tool server at {})",
            self.repo_root.display(),
            self.mcp().url()
        );
        let mut ticks = 0u64;
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Some(max) = max_ticks {
                if ticks >= max {
                    break;
                }
            }
            ticks += 1;

            match self.tick().await {
                Ok(()) => {}
                Err(e) if is_transient(&e) => warn!("tick deferred: {e}"),
                Err(e) => error!("tick failed: {e}"),
            }

            tokio::time::sleep(self.idle_interval).await;
        }
        info!("orchestrator stopping after {ticks} ticks");
        self.stop().await;
        Ok(())
    }

    /// One pass of the scheduler.
    pub async fn tick(&mut self) -> Result<()> {
        if !self.gateway.branch_exists().await? {
            debug!("plan branch does not exist yet; idling");
            return Ok(());
        }

        self.drain_kernel_tasks().await?;

        let mut snapshot = self.snapshot().await?;
        if plan::spec_is_placeholder(&snapshot.spec) {
            info!("WAITING: no spec");
            return Ok(());
        }

        let (green, _) = self.master_is_green().await?;
        if !green {
            return Ok(());
        }

        if snapshot.areas.is_empty() {
            self.run_architect_areas(&snapshot.spec).await?;
            snapshot = self.snapshot().await?;
        }

        let uncovered: Vec<String> = snapshot
            .areas
            .iter()
            .filter(|area| !snapshot.area_coverage.get(*area).copied().unwrap_or(false))
            .cloned()
            .collect();
        if !uncovered.is_empty() {
            for area in &uncovered {
                self.run_manager_tickets(&snapshot.spec, area).await?;
            }
            snapshot = self.snapshot().await?;
        }

        if self.process_merge_queue().await? != MergeOutcome::Empty {
            snapshot = self.snapshot().await?;
        }

        if let Some(oldest) = tickets::oldest_open(&snapshot.open) {
            let assigned = self.assign_ticket(&oldest).await?;
            self.execute_ticket(&assigned).await?;
        }

        let snapshot = self.snapshot().await?;
        let referenced: Vec<PathBuf> = snapshot
            .in_progress
            .iter()
            .filter_map(|(_, wt)| wt.clone())
            .collect();
        self.worktrees.cleanup_stale(&referenced).await?;

        Ok(())
    }

    /// Architect bootstrap: populate `areas/` from the spec under the
    /// areas-only write scope.
    pub async fn run_architect_areas(&self, spec: &str) -> Result<()> {
        info!("no areas yet; running architect");
        let _lock = self.gateway.acquire_planner_lock()?;
        let checkout = self.gateway.checkout().await?;

        let result = async {
            let scope =
                planning::snapshot_write_scope(&self.git, &self.repo_root, checkout.path())
                    .await?;
            let ctx = PlanningContext {
                repo_root: &self.repo_root,
                spec,
            };
            self.area_generator
                .generate_areas(checkout.path(), &ctx)
                .await?;
            planning::enforce_write_scope(
                &self.git,
                &self.repo_root,
                &scope,
                checkout.path(),
                |p| p.starts_with("areas/"),
            )
            .await
        }
        .await;

        match result {
            Ok(()) => {
                self.gateway
                    .commit(
                        &checkout,
                        &[plan::AREAS_DIR.to_string()],
                        plan::messages::UPDATE_AREAS,
                    )
                    .await?;
                self.gateway.remove(checkout).await?;
                Ok(())
            }
            Err(e) => {
                let _ = self.gateway.remove(checkout).await;
                Err(e)
            }
        }
    }

    /// Manager bootstrap for one area: populate `tickets/open/` under the
    /// open-tickets-only write scope, validating that every new ticket
    /// references the area it was generated for.
    pub async fn run_manager_tickets(&self, spec: &str, area_rel: &str) -> Result<()> {
        info!("area {area_rel} has no active tickets; running manager");
        let _lock = self.gateway.acquire_planner_lock()?;
        let checkout = self.gateway.checkout().await?;

        let result = async {
            let scope =
                planning::snapshot_write_scope(&self.git, &self.repo_root, checkout.path())
                    .await?;
            let area_body = plan::read_plan_file(checkout.path(), area_rel)?;
            let ctx = PlanningContext {
                repo_root: &self.repo_root,
                spec,
            };
            self.ticket_generator
                .generate_tickets(checkout.path(), &ctx, area_rel, &area_body)
                .await?;
            planning::enforce_write_scope(
                &self.git,
                &self.repo_root,
                &scope,
                checkout.path(),
                |p| p.starts_with("tickets/open/"),
            )
            .await?;

            let changed =
                planning::porcelain_paths(&self.git.status_porcelain(checkout.path()).await?);
            for rel in changed.iter().filter(|p| p.starts_with("tickets/open/")) {
                let body = plan::read_plan_file(checkout.path(), rel)?;
                tickets::validate_ticket_for_area(rel, &body, area_rel)?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.gateway
                    .commit(
                        &checkout,
                        &["tickets".to_string()],
                        plan::messages::CREATE_TICKETS,
                    )
                    .await?;
                self.gateway.remove(checkout).await?;
                Ok(())
            }
            Err(e) => {
                let _ = self.gateway.remove(checkout).await;
                Err(e)
            }
        }
    }

    /// Move the ticket to `in-progress/`, bind its worktree, and commit the
    /// assignment.
    pub async fn assign_ticket(&self, open_rel: &str) -> Result<String> {
        let stem = tickets::ticket_stem(open_rel).to_string();
        let worktree = self.worktrees.ensure_worktree_created(open_rel).await?;
        let worktree_str = worktree.to_string_lossy().to_string();

        let open_rel = open_rel.to_string();
        let assigned = self
            .gateway
            .transact(move |plan_root| {
                let body = plan::read_plan_file(plan_root, &open_rel)?;
                let new_rel = plan::move_ticket(plan_root, &open_rel, TicketState::InProgress)?;
                let updated = tickets::set_field(&body, "Worktree", &worktree_str);
                plan::write_plan_file(plan_root, &new_rel, &updated)?;
                Ok(Transition {
                    value: new_rel,
                    message: plan::messages::assign_ticket(&stem),
                    paths: vec!["tickets".to_string()],
                })
            })
            .await?;

        info!("assigned ticket {assigned}");
        Ok(assigned)
    }

    /// Run the coding agent for an in-progress ticket, record the run on
    /// the ticket, and enqueue (then process) a merge request when the
    /// agent submitted one.
    pub async fn execute_ticket(&self, ticket_rel: &str) -> Result<()> {
        let stem = tickets::ticket_stem(ticket_rel).to_string();

        let rel_for_read = ticket_rel.to_string();
        let (body, area_rel, area_body) = self
            .gateway
            .read(move |plan_root| {
                let body = plan::read_plan_file(plan_root, &rel_for_read)?;
                let area_rel = Kernel::ticket_area(&body);
                let area_body = match &area_rel {
                    Some(area) => Some(plan::read_plan_file(plan_root, area)?),
                    None => None,
                };
                Ok((body, area_rel, area_body))
            })
            .await?;

        let worktree = tickets::extract_field(&body, "Worktree")
            .map(PathBuf::from)
            .ok_or_else(|| {
                crate::error::Error::Other(format!("ticket {ticket_rel} has no bound worktree"))
            })?;

        self.mcp().set_session_area(area_rel);
        let request = AgentRequest {
            prompt: coding_prompt(&self.repo_root, &body, area_body.as_deref()),
            working_dir: worktree.clone(),
            model: self.coding_model(),
            instructions: None,
            mcp_url: Some(self.mcp().url().to_string()),
            session_token: Some(self.mcp().session_token().to_string()),
            reasoning_effort: self.config.reasoning_effort.coding,
            skip_repo_check: false,
            log_key: stem.clone(),
            max_attempts: self.harness.default_max_attempts(),
            base_attempt: 1,
            continuation_directive: None,
            env: Vec::new(),
        };
        let run = self.harness.run(&request).await;
        self.mcp().set_session_area(None);
        let run = run?;

        let note = format!(
            "## Agent Run\n\n- Attempt: {attempt} (of {count} used)\n- Exit code: {code}\n- Timeout: {timeout}\n- Model: {model}\n- Log: {log}{message}",
            attempt = run.attempt,
            count = run.attempt_count,
            code = run.exit_code,
            timeout = run.timeout_kind.as_str(),
            model = request.model,
            log = run.log_path.display(),
            message = if run.last_message.trim().is_empty() {
                String::new()
            } else {
                format!(
                    "\n\n### Final Message\n\n{}",
                    tickets::tail(run.last_message.trim(), AGENT_NOTE_TAIL_BYTES)
                )
            },
        );
        let rel_for_note = ticket_rel.to_string();
        let note_stem = stem.clone();
        self.gateway
            .transact(move |plan_root| {
                let body = plan::read_plan_file(plan_root, &rel_for_note)?;
                plan::write_plan_file(
                    plan_root,
                    &rel_for_note,
                    &tickets::append_section(&body, &note),
                )?;
                Ok(Transition {
                    value: (),
                    message: plan::messages::record_agent_run(&note_stem),
                    paths: vec!["tickets".to_string()],
                })
            })
            .await?;

        let summary = self
            .mcp()
            .consume_submit_pr_summary()
            .or_else(|| scan_submit_pr(&run.last_message))
            .or_else(|| scan_submit_pr(&run.stdout));

        match summary {
            Some(summary) => {
                self.enqueue_merge_request(ticket_rel, &worktree, &summary)
                    .await?;
                self.process_merge_queue().await?;
            }
            None => {
                debug!("agent run for {stem} ended without a merge submission");
            }
        }

        Ok(())
    }
}

fn coding_prompt(repo_root: &Path, ticket_body: &str, area_body: Option<&str>) -> String {
    let mut prompt = format!(
        "You are a coding agent working on one ticket of a larger plan.\n\nRepository root: {}\nYour working directory is a dedicated git worktree for this ticket; make all changes there and commit them.\nIf an AGENTS.md file exists at the repository root, read it and follow its conventions.\n",
        repo_root.display()
    );
    if let Some(area) = area_body {
        prompt.push_str("\n<area>\n");
        prompt.push_str(area.trim());
        prompt.push_str("\n</area>\n");
    }
    prompt.push_str("\n<ticket>\n");
    prompt.push_str(ticket_body.trim());
    prompt.push_str("\n</ticket>\n");
    prompt.push_str(
        "\nWhen the work is complete and the project's tests pass, call the `submit_pr` tool with a one-line summary of the change.\n",
    );
    prompt
}
