//! Ticket document model
//!
//! Pure functions over strings and relative paths: normalization, ID
//! derivation, header fields, and body appends. Nothing here touches git or
//! the filesystem beyond directory scans handed in by the caller, which
//! keeps every rule unit-testable in isolation.

use std::path::Path;

use crate::error::{Error, Result};
use crate::plan::{self, TicketState};

/// Width of the zero-padded numeric ticket prefix.
pub const TICKET_ID_WIDTH: usize = 4;

/// Normalize an area reference to its canonical relative path
/// (`areas/<name>.md`). Accepts a bare stem or a full relative path;
/// rejects traversal, absolute paths, and anything outside `areas/`.
pub fn normalize_area_path(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains("..") {
        return Err(Error::InvalidAreaPath(input.to_string()));
    }

    let rel = match trimmed.strip_prefix("areas/") {
        Some(rest) => rest,
        None => trimmed,
    };
    if rel.is_empty() || rel.contains('/') {
        return Err(Error::InvalidAreaPath(input.to_string()));
    }

    let with_ext = if rel.ends_with(".md") {
        rel.to_string()
    } else {
        format!("{rel}.md")
    };
    if with_ext == ".md" {
        return Err(Error::InvalidAreaPath(input.to_string()));
    }

    Ok(format!("areas/{with_ext}"))
}

/// Normalize a free-form title into a ticket slug: lowercase alphanumeric
/// runs joined by single dashes.
pub fn normalize_slug(input: &str) -> Result<String> {
    let mut slug = String::with_capacity(input.len());
    let mut last_dash = true;
    for ch in input.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        return Err(Error::InvalidTicketSlug(input.to_string()));
    }
    Ok(slug)
}

/// Extract the numeric ID (`NNNN`) from a ticket filename or relative path.
pub fn ticket_id_from_path(rel: &str) -> Result<String> {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    let prefix: String = name.chars().take(TICKET_ID_WIDTH).collect();
    if prefix.len() == TICKET_ID_WIDTH
        && prefix.chars().all(|c| c.is_ascii_digit())
        && name[TICKET_ID_WIDTH..].starts_with('-')
    {
        Ok(prefix)
    } else {
        Err(Error::InvalidTicketPrefix(rel.to_string()))
    }
}

/// Numeric value of the ticket ID in `rel`.
pub fn ticket_number_from_path(rel: &str) -> Result<u32> {
    ticket_id_from_path(rel)?
        .parse::<u32>()
        .map_err(|_| Error::InvalidTicketPrefix(rel.to_string()))
}

/// File stem (`NNNN-slug`) of a ticket relative path.
pub fn ticket_stem(rel: &str) -> &str {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.strip_suffix(".md").unwrap_or(name)
}

pub fn format_ticket_id(n: u32) -> String {
    format!("{n:0width$}", width = TICKET_ID_WIDTH)
}

pub fn format_ticket_filename(n: u32, slug: &str) -> String {
    format!("{}-{slug}.md", format_ticket_id(n))
}

/// Next monotonic ticket number over the union of all three state
/// directories: strictly greater than any ID ever present there.
pub fn next_ticket_number(plan_root: &Path) -> Result<u32> {
    let mut max = 0u32;
    for (_, rel) in plan::list_all_tickets(plan_root)? {
        if let Ok(n) = ticket_number_from_path(&rel) {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}

/// The oldest open ticket: numerically smallest ID, ties broken by the full
/// relative path. Deterministic for any set of open tickets.
pub fn oldest_open(open: &[String]) -> Option<String> {
    open.iter()
        .filter_map(|rel| ticket_number_from_path(rel).ok().map(|n| (n, rel)))
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, rel)| rel.clone())
}

/// Extract a bold header field (`**Name:** value`) from a ticket body.
pub fn extract_field(body: &str, name: &str) -> Option<String> {
    let marker = format!("**{name}:**");
    for line in body.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(&marker) {
            let value = rest.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Set a bold header field, replacing an existing line for the same field
/// or appending one at the end after a blank line.
pub fn set_field(body: &str, name: &str, value: &str) -> String {
    let marker = format!("**{name}:**");
    let new_line = format!("{marker} {value}");

    if body.lines().any(|l| l.trim_start().starts_with(&marker)) {
        let mut out = String::with_capacity(body.len() + new_line.len());
        for line in body.lines() {
            if line.trim_start().starts_with(&marker) {
                out.push_str(&new_line);
            } else {
                out.push_str(line);
            }
            out.push('\n');
        }
        return out;
    }

    append_section(body, &new_line)
}

/// Append-only body growth: concatenate with a single blank-line separator,
/// preserving pre-existing content verbatim.
pub fn append_section(body: &str, section: &str) -> String {
    let mut out = body.trim_end_matches('\n').to_string();
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(section.trim_end_matches('\n'));
    out.push('\n');
    out
}

/// Validate a freshly created ticket document against the area it was
/// generated for.
pub fn validate_ticket_for_area(rel: &str, body: &str, expected_area: &str) -> Result<()> {
    if body.trim().is_empty() {
        return Err(Error::EmptyTicketContent(rel.to_string()));
    }
    ticket_id_from_path(rel)?;
    let found = extract_field(body, "Area")
        .ok_or_else(|| Error::AreaMismatch {
            ticket: rel.to_string(),
            expected: expected_area.to_string(),
            found: "(none)".to_string(),
        })?;
    let normalized = normalize_area_path(&found)?;
    if normalized != expected_area {
        return Err(Error::AreaMismatch {
            ticket: rel.to_string(),
            expected: expected_area.to_string(),
            found: normalized,
        });
    }
    Ok(())
}

/// Render a new ticket document body.
pub fn render_ticket(
    title: &str,
    area: Option<&str>,
    goal: &str,
    acceptance_criteria: &str,
    notes: &str,
) -> String {
    let mut body = format!("# {title}\n");
    if let Some(area) = area {
        body.push_str(&format!("\n**Area:** {area}\n"));
    }
    body.push_str(&format!("\n## Goal\n\n{}\n", goal.trim()));
    if !acceptance_criteria.trim().is_empty() {
        body.push_str(&format!(
            "\n## Acceptance Criteria\n\n{}\n",
            acceptance_criteria.trim()
        ));
    }
    if !notes.trim().is_empty() {
        body.push_str(&format!("\n## Notes\n\n{}\n", notes.trim()));
    }
    body
}

/// Tickets in `open/` or `in-progress/` that reference the given area.
pub fn active_tickets_for_area(plan_root: &Path, area_rel: &str) -> Result<Vec<String>> {
    let mut matching = Vec::new();
    for state in [TicketState::Open, TicketState::InProgress] {
        for rel in plan::list_tickets(plan_root, state)? {
            let body = plan::read_plan_file(plan_root, &rel)?;
            if let Some(found) = extract_field(&body, "Area") {
                if normalize_area_path(&found).map(|a| a == area_rel).unwrap_or(false) {
                    matching.push(rel);
                }
            }
        }
    }
    Ok(matching)
}

/// Truncate to the trailing `max` bytes on a char boundary, keeping the
/// most recent (typically most diagnostic) lines.
pub fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
