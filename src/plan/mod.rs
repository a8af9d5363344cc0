//! Plan-branch data model
//!
//! All persistent orchestration state lives as markdown files on the
//! dedicated plan branch: the spec, area documents, tickets in one of three
//! state directories, decision records, and the merge queue. This module
//! owns the tree layout, the reserved transition commit subjects, and plain
//! filesystem readers over a checked-out plan tree. Mutation always happens
//! through [`gateway::PlanGateway`] so each transition is one commit.

use std::path::Path;

use crate::error::{Error, Result};

pub mod gateway;
pub mod queue;
pub mod tickets;

pub const PLAN_BRANCH: &str = "scriptorium/plan";

pub const SPEC_FILE: &str = "spec.md";
pub const AREAS_DIR: &str = "areas";
pub const DECISIONS_DIR: &str = "decisions";
pub const QUEUE_PENDING_DIR: &str = "queue/merge/pending";
pub const QUEUE_ACTIVE_FILE: &str = "queue/merge/active.md";
pub const QUEUE_NEXT_ID_FILE: &str = "queue/merge/next-id.md";

pub const SPEC_PLACEHOLDER: &str = "# Spec\n\nReplace this placeholder with the project specification.\n";

/// The three ticket lifecycle directories. A ticket lives in exactly one of
/// them at any committed tree state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Open,
    InProgress,
    Done,
}

impl TicketState {
    pub fn dir(&self) -> &'static str {
        match self {
            TicketState::Open => "tickets/open",
            TicketState::InProgress => "tickets/in-progress",
            TicketState::Done => "tickets/done",
        }
    }

    pub const ALL: [TicketState; 3] = [
        TicketState::Open,
        TicketState::InProgress,
        TicketState::Done,
    ];
}

/// Reserved commit subjects. Every plan-branch commit authored by the
/// kernel uses exactly one of these, which makes the transition history
/// auditable from `git log` alone.
pub mod messages {
    pub const INIT_PLAN_BRANCH: &str = "scriptorium: initialize plan branch";
    pub const UPDATE_SPEC: &str = "scriptorium: update spec from architect";
    pub const UPDATE_AREAS: &str = "scriptorium: update areas from spec";
    pub const CREATE_TICKETS: &str = "scriptorium: create tickets from areas";
    pub const INIT_MERGE_QUEUE: &str = "scriptorium: initialize merge queue";

    pub fn assign_ticket(stem: &str) -> String {
        format!("scriptorium: assign ticket {stem}")
    }

    pub fn record_agent_run(stem: &str) -> String {
        format!("scriptorium: record agent run {stem}")
    }

    pub fn enqueue_merge_request(ticket_id: &str) -> String {
        format!("scriptorium: enqueue merge request {ticket_id}")
    }

    pub fn complete_ticket(ticket_id: &str) -> String {
        format!("scriptorium: complete ticket {ticket_id}")
    }

    pub fn reopen_ticket(ticket_id: &str) -> String {
        format!("scriptorium: reopen ticket {ticket_id}")
    }

    pub fn plan_session_turn(n: usize) -> String {
        format!("scriptorium: plan session turn {n}")
    }
}

/// Whether the spec is still the init placeholder (or effectively empty).
pub fn spec_is_placeholder(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.is_empty() || trimmed == SPEC_PLACEHOLDER.trim()
}

/// Sorted relative paths (`<dir>/<name>.md`) of the markdown files directly
/// under `dir` inside the plan tree. Missing directories read as empty.
pub fn list_markdown(plan_root: &Path, dir: &str) -> Result<Vec<String>> {
    let abs = plan_root.join(dir);
    if !abs.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(&abs)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_file() && name.ends_with(".md") {
            names.push(format!("{dir}/{name}"));
        }
    }
    names.sort();
    Ok(names)
}

pub fn list_areas(plan_root: &Path) -> Result<Vec<String>> {
    list_markdown(plan_root, AREAS_DIR)
}

pub fn list_tickets(plan_root: &Path, state: TicketState) -> Result<Vec<String>> {
    list_markdown(plan_root, state.dir())
}

/// All ticket relative paths across the three state directories.
pub fn list_all_tickets(plan_root: &Path) -> Result<Vec<(TicketState, String)>> {
    let mut all = Vec::new();
    for state in TicketState::ALL {
        for path in list_tickets(plan_root, state)? {
            all.push((state, path));
        }
    }
    Ok(all)
}

/// Locate a ticket by its 4-digit ID across the state directories.
pub fn find_ticket(plan_root: &Path, ticket_id: &str) -> Result<Option<(TicketState, String)>> {
    let prefix = format!("{ticket_id}-");
    for state in TicketState::ALL {
        for rel in list_tickets(plan_root, state)? {
            let name = rel.rsplit('/').next().unwrap_or(&rel);
            if name.starts_with(&prefix) {
                return Ok(Some((state, rel)));
            }
        }
    }
    Ok(None)
}

pub fn read_plan_file(plan_root: &Path, rel: &str) -> Result<String> {
    Ok(std::fs::read_to_string(plan_root.join(rel))?)
}

pub fn write_plan_file(plan_root: &Path, rel: &str, content: &str) -> Result<()> {
    let abs = plan_root.join(rel);
    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(abs, content)?;
    Ok(())
}

/// Move a ticket document between state directories, preserving its
/// filename. Returns the new relative path.
pub fn move_ticket(
    plan_root: &Path,
    rel: &str,
    to: TicketState,
) -> Result<String> {
    let name = rel
        .rsplit('/')
        .next()
        .ok_or_else(|| Error::InvalidTicketPrefix(rel.to_string()))?;
    let dest_rel = format!("{}/{name}", to.dir());
    let dest_abs = plan_root.join(&dest_rel);
    if let Some(parent) = dest_abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(plan_root.join(rel), dest_abs)?;
    Ok(dest_rel)
}
