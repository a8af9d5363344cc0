//! Merge-queue documents
//!
//! A pending merge request is one markdown file under
//! `queue/merge/pending/`, named `<QQQQ>-<NNNN>.md` so plain filename order
//! is FIFO order. `active.md` holds the item currently being processed (or
//! nothing) for crash traceability, and `next-id.md` carries the monotonic
//! queue counter across dequeues.

use crate::error::{Error, Result};
use crate::plan::tickets;

pub const QUEUE_ID_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    /// Ticket path relative to the plan root, e.g.
    /// `tickets/in-progress/0001-x.md`.
    pub ticket_path: String,
    pub ticket_id: String,
    pub branch: String,
    pub worktree: String,
    pub summary: String,
}

pub fn format_queue_id(n: u32) -> String {
    format!("{n:0width$}", width = QUEUE_ID_WIDTH)
}

/// Filename for a pending item: `<QQQQ>-<NNNN>.md`.
pub fn queue_file_name(queue_id: u32, ticket_id: &str) -> String {
    format!("{}-{ticket_id}.md", format_queue_id(queue_id))
}

impl MergeRequest {
    pub fn render(&self) -> String {
        format!(
            "# Merge Request {id}\n\n**Ticket:** {ticket}\n**Ticket ID:** {id}\n**Branch:** {branch}\n**Worktree:** {worktree}\n**Summary:** {summary}\n",
            id = self.ticket_id,
            ticket = self.ticket_path,
            branch = self.branch,
            worktree = self.worktree,
            summary = self.summary,
        )
    }

    pub fn parse(rel_path: &str, content: &str) -> Result<Self> {
        let field = |name: &str| {
            tickets::extract_field(content, name).ok_or_else(|| Error::InvalidQueueItem {
                path: rel_path.to_string(),
                reason: format!("missing field '{name}'"),
            })
        };

        let ticket_path = field("Ticket")?;
        if !ticket_path.starts_with("tickets/in-progress/") {
            return Err(Error::InvalidQueueItem {
                path: rel_path.to_string(),
                reason: format!("ticket '{ticket_path}' is not in-progress"),
            });
        }

        Ok(Self {
            ticket_path,
            ticket_id: field("Ticket ID")?,
            branch: field("Branch")?,
            worktree: field("Worktree")?,
            summary: field("Summary")?,
        })
    }
}

/// Parse the queue counter document; a missing or malformed counter reads
/// as 1 so a freshly initialized queue starts at `0001`.
pub fn parse_next_id(content: &str) -> u32 {
    content.trim().parse::<u32>().unwrap_or(1).max(1)
}

pub fn render_next_id(n: u32) -> String {
    format!("{n}\n")
}
