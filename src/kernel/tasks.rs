//! Tool-task drain
//!
//! Plan mutations requested over the tool server are queued as
//! [`KernelTask`]s and applied here, on the kernel task, at the top of each
//! tick. The HTTP handlers never write to git.

use tokio::sync::mpsc::error::TryRecvError;
use tracing::error;

use crate::error::{Error, Result};
use crate::mcp::KernelTask;
use crate::plan::gateway::Transition;
use crate::plan::{self, tickets};

use super::Kernel;

impl Kernel {
    /// Apply every queued tool task. Individual task failures are logged
    /// and do not block the tick.
    pub async fn drain_kernel_tasks(&mut self) -> Result<()> {
        loop {
            match self.tasks_rx.try_recv() {
                Ok(task) => {
                    if let Err(e) = self.apply_task(task).await {
                        error!("tool task failed: {e}");
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(())
    }

    async fn apply_task(&self, task: KernelTask) -> Result<()> {
        match task {
            KernelTask::CreateArea {
                title,
                summary,
                scope,
                out_of_scope,
            } => {
                self.gateway
                    .transact(move |plan_root| {
                        let slug = tickets::normalize_slug(&title)?;
                        let number = next_area_number(&plan::list_areas(plan_root)?);
                        let rel = format!("{}/{number:02}-{slug}.md", plan::AREAS_DIR);
                        let body = render_area(&title, &summary, &scope, &out_of_scope);
                        plan::write_plan_file(plan_root, &rel, &body)?;
                        Ok(Transition {
                            value: rel,
                            message: plan::messages::UPDATE_AREAS.to_string(),
                            paths: vec![plan::AREAS_DIR.to_string()],
                        })
                    })
                    .await?;
                Ok(())
            }
            KernelTask::CreateTicket {
                title,
                goal,
                acceptance_criteria,
                notes,
                area,
            } => {
                self.gateway
                    .transact(move |plan_root| {
                        let slug = tickets::normalize_slug(&title)?;
                        let area = area
                            .as_deref()
                            .map(tickets::normalize_area_path)
                            .transpose()?;
                        let number = tickets::next_ticket_number(plan_root)?;
                        let rel = format!(
                            "tickets/open/{}",
                            tickets::format_ticket_filename(number, &slug)
                        );
                        let body = tickets::render_ticket(
                            &title,
                            area.as_deref(),
                            &goal,
                            &acceptance_criteria,
                            &notes,
                        );
                        plan::write_plan_file(plan_root, &rel, &body)?;
                        Ok(Transition {
                            value: rel,
                            message: plan::messages::CREATE_TICKETS.to_string(),
                            paths: vec!["tickets".to_string()],
                        })
                    })
                    .await?;
                Ok(())
            }
            KernelTask::AddNote { ticket_id, note } => {
                self.gateway
                    .transact(move |plan_root| {
                        let (_, rel) = plan::find_ticket(plan_root, &ticket_id)?
                            .ok_or_else(|| {
                                Error::Other(format!("no ticket with ID {ticket_id}"))
                            })?;
                        let body = plan::read_plan_file(plan_root, &rel)?;
                        let section = format!("## Note\n\n{}", note.trim());
                        plan::write_plan_file(
                            plan_root,
                            &rel,
                            &tickets::append_section(&body, &section),
                        )?;
                        let stem = tickets::ticket_stem(&rel).to_string();
                        Ok(Transition {
                            value: rel,
                            message: plan::messages::record_agent_run(&stem),
                            paths: vec!["tickets".to_string()],
                        })
                    })
                    .await?;
                Ok(())
            }
        }
    }
}

/// Next two-digit ordering prefix for a new area document.
fn next_area_number(areas: &[String]) -> u32 {
    areas
        .iter()
        .filter_map(|rel| {
            let name = rel.rsplit('/').next()?;
            let digits: String = name.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        })
        .max()
        .unwrap_or(0)
        + 1
}

fn render_area(title: &str, summary: &str, scope: &str, out_of_scope: &str) -> String {
    let mut body = format!("# {title}\n");
    if !summary.trim().is_empty() {
        body.push_str(&format!("\n## Summary\n\n{}\n", summary.trim()));
    }
    if !scope.trim().is_empty() {
        body.push_str(&format!("\n## Scope\n\n{}\n", scope.trim()));
    }
    if !out_of_scope.trim().is_empty() {
        body.push_str(&format!("\n## Out of Scope\n\n{}\n", out_of_scope.trim()));
    }
    body
}
