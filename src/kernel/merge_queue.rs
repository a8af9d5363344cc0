//! Serial merge queue
//!
//! Pending merge requests process strictly in filename order, one item per
//! invocation. For the head item: merge `master` into the ticket branch,
//! run the test target, fast-forward `master`. Success moves the ticket to
//! `done/`; any failure reopens it with diagnostic tails. Either way the
//! queue file is removed, the active marker cleared, and the whole
//! transition lands as one commit.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::Result;
use crate::plan::gateway::PlanCheckout;
use crate::plan::queue::{self, MergeRequest};
use crate::plan::{self, tickets, TicketState};
use crate::subprocess::ProcessOutput;

use super::Kernel;

/// Tail limit for merge and test output in failure notes.
const DIAGNOSTIC_TAIL_BYTES: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing pending.
    Empty,
    Completed { ticket_id: String },
    Reopened { ticket_id: String },
}

impl Kernel {
    /// Create the queue skeleton (active marker, counter, pending dir) in
    /// its own reserved commit if it does not exist yet.
    pub(crate) async fn ensure_queue_initialized(&self, checkout: &PlanCheckout) -> Result<()> {
        let plan_root = checkout.path();
        if plan_root.join(plan::QUEUE_ACTIVE_FILE).exists() {
            return Ok(());
        }
        plan::write_plan_file(plan_root, plan::QUEUE_ACTIVE_FILE, "")?;
        plan::write_plan_file(
            plan_root,
            plan::QUEUE_NEXT_ID_FILE,
            &queue::render_next_id(1),
        )?;
        std::fs::create_dir_all(plan_root.join(plan::QUEUE_PENDING_DIR))?;
        std::fs::write(
            plan_root.join(plan::QUEUE_PENDING_DIR).join(".gitkeep"),
            "",
        )?;
        self.gateway
            .commit(
                checkout,
                &["queue".to_string()],
                plan::messages::INIT_MERGE_QUEUE,
            )
            .await?;
        info!("merge queue initialized");
        Ok(())
    }

    /// Enqueue a merge request for an in-progress ticket. Any uncommitted
    /// work in the ticket worktree is committed first (summary as message)
    /// so the queue tests exactly what was submitted.
    pub async fn enqueue_merge_request(
        &self,
        ticket_rel: &str,
        worktree: &std::path::Path,
        summary: &str,
    ) -> Result<String> {
        let ticket_id = tickets::ticket_id_from_path(ticket_rel)?;
        let branch = crate::worktree::branch_for_ticket(ticket_rel)?;

        self.git.add_all(worktree).await?;
        self.git.commit_if_changed(worktree, summary).await?;

        let checkout = self.gateway.checkout().await?;
        let result = self
            .enqueue_in_checkout(&checkout, ticket_rel, &ticket_id, &branch, worktree, summary)
            .await;
        match result {
            Ok(queue_rel) => {
                self.gateway.remove(checkout).await?;
                info!("enqueued merge request {queue_rel} for ticket {ticket_id}");
                Ok(queue_rel)
            }
            Err(e) => {
                let _ = self.gateway.remove(checkout).await;
                Err(e)
            }
        }
    }

    async fn enqueue_in_checkout(
        &self,
        checkout: &PlanCheckout,
        ticket_rel: &str,
        ticket_id: &str,
        branch: &str,
        worktree: &std::path::Path,
        summary: &str,
    ) -> Result<String> {
        self.ensure_queue_initialized(checkout).await?;
        let plan_root = checkout.path();

        let counter = plan::read_plan_file(plan_root, plan::QUEUE_NEXT_ID_FILE)
            .map(|s| queue::parse_next_id(&s))
            .unwrap_or(1);
        let queue_rel = format!(
            "{}/{}",
            plan::QUEUE_PENDING_DIR,
            queue::queue_file_name(counter, ticket_id)
        );

        let request = MergeRequest {
            ticket_path: ticket_rel.to_string(),
            ticket_id: ticket_id.to_string(),
            branch: branch.to_string(),
            worktree: worktree.to_string_lossy().to_string(),
            summary: summary.to_string(),
        };
        plan::write_plan_file(plan_root, &queue_rel, &request.render())?;
        plan::write_plan_file(
            plan_root,
            plan::QUEUE_NEXT_ID_FILE,
            &queue::render_next_id(counter + 1),
        )?;

        self.gateway
            .commit(
                checkout,
                &["queue".to_string()],
                &plan::messages::enqueue_merge_request(ticket_id),
            )
            .await?;
        Ok(queue_rel)
    }

    /// Process at most one pending merge request.
    pub async fn process_merge_queue(&self) -> Result<MergeOutcome> {
        let checkout = self.gateway.checkout().await?;
        let outcome = self.process_head(&checkout).await;
        match outcome {
            Ok(outcome) => {
                self.gateway.remove(checkout).await?;
                Ok(outcome)
            }
            Err(e) => {
                let _ = self.gateway.remove(checkout).await;
                Err(e)
            }
        }
    }

    async fn process_head(&self, checkout: &PlanCheckout) -> Result<MergeOutcome> {
        self.ensure_queue_initialized(checkout).await?;
        let plan_root = checkout.path();

        let pending = plan::list_markdown(plan_root, plan::QUEUE_PENDING_DIR)?;
        let Some(head_rel) = pending.first() else {
            return Ok(MergeOutcome::Empty);
        };

        let content = plan::read_plan_file(plan_root, head_rel)?;
        let request = MergeRequest::parse(head_rel, &content)?;
        info!(
            "processing merge request {head_rel} for ticket {}",
            request.ticket_id
        );

        // Uncommitted active marker: only observable if we crash before
        // the transition commit, where it points at the item in flight.
        plan::write_plan_file(plan_root, plan::QUEUE_ACTIVE_FILE, &format!("{head_rel}\n"))?;

        let worktree = PathBuf::from(&request.worktree);
        let failure = self.integrate(&request, &worktree).await?;

        match failure {
            None => {
                let note = format!(
                    "## Merge Queue Success\n\n- Summary: {}\n- Branch: {}",
                    request.summary, request.branch
                );
                self.finish_head(checkout, &request, head_rel, &note, TicketState::Done)
                    .await?;
                info!("ticket {} merged to master", request.ticket_id);
                Ok(MergeOutcome::Completed {
                    ticket_id: request.ticket_id,
                })
            }
            Some((merge_output, test_output)) => {
                let mut note = format!(
                    "## Merge Queue Failure\n\n- Summary: {}\n- Branch: {}",
                    request.summary, request.branch
                );
                if !merge_output.trim().is_empty() {
                    note.push_str(&format!(
                        "\n\n### Merge Output\n\n```\n{}\n```",
                        tickets::tail(&merge_output, DIAGNOSTIC_TAIL_BYTES).trim_end()
                    ));
                }
                if !test_output.trim().is_empty() {
                    note.push_str(&format!(
                        "\n\n### Test Output\n\n```\n{}\n```",
                        tickets::tail(&test_output, DIAGNOSTIC_TAIL_BYTES).trim_end()
                    ));
                }
                self.finish_head(checkout, &request, head_rel, &note, TicketState::Open)
                    .await?;
                warn!("ticket {} reopened after merge failure", request.ticket_id);
                Ok(MergeOutcome::Reopened {
                    ticket_id: request.ticket_id,
                })
            }
        }
    }

    /// Merge master into the ticket branch, run the tests, fast-forward
    /// master. Returns `None` on success or the captured (merge, test)
    /// output on the first failing step.
    async fn integrate(
        &self,
        request: &MergeRequest,
        worktree: &std::path::Path,
    ) -> Result<Option<(String, String)>> {
        let merge_out = self.git.merge_no_edit(worktree, "master").await?;
        if !merge_out.status.success() {
            self.git.merge_abort(worktree).await?;
            return Ok(Some((combined(&merge_out), String::new())));
        }

        let test_out = self.run_test_target(worktree).await?;
        if !test_out.status.success() {
            return Ok(Some((combined(&merge_out), combined(&test_out))));
        }

        let master = self.acquire_master_checkout().await?;
        let ff = self.git.merge_ff_only(&master.path, &request.branch).await;
        self.release_master_checkout(master).await?;
        let ff = ff?;
        if !ff.status.success() {
            return Ok(Some((combined(&ff), combined(&test_out))));
        }
        Ok(None)
    }

    /// Append the note, move the ticket, drop the queue file, clear the
    /// active marker, and commit the whole transition under the reserved
    /// subject for `to`.
    async fn finish_head(
        &self,
        checkout: &PlanCheckout,
        request: &MergeRequest,
        head_rel: &str,
        note: &str,
        to: TicketState,
    ) -> Result<()> {
        let plan_root = checkout.path();

        let body = plan::read_plan_file(plan_root, &request.ticket_path)?;
        plan::write_plan_file(
            plan_root,
            &request.ticket_path,
            &tickets::append_section(&body, note),
        )?;
        plan::move_ticket(plan_root, &request.ticket_path, to)?;

        std::fs::remove_file(plan_root.join(head_rel))?;
        plan::write_plan_file(plan_root, plan::QUEUE_ACTIVE_FILE, "")?;

        let message = match to {
            TicketState::Done => plan::messages::complete_ticket(&request.ticket_id),
            _ => plan::messages::reopen_ticket(&request.ticket_id),
        };
        self.gateway
            .commit(
                checkout,
                &["tickets".to_string(), "queue".to_string()],
                &message,
            )
            .await?;
        Ok(())
    }
}

fn combined(output: &ProcessOutput) -> String {
    let mut text = output.stdout.clone();
    if !output.stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&output.stderr);
    }
    text
}
