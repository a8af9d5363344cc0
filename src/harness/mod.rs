//! Agent execution harness
//!
//! Drives one external coding-agent subprocess per run: backend selection
//! by model-name prefix, a deterministic argument vector, prompt delivery
//! on stdin, streamed JSONL events with two watchdogs, and bounded retries
//! that feed the next attempt a continuation prompt describing how the
//! previous one ended.

use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::config::{AgentConfig, ReasoningEffort};
use crate::error::{Error, Result};
use crate::plan::tickets;

mod codex;
pub mod events;

pub use events::{StreamEvent, StreamEventKind};

/// How a run ended with respect to its watchdogs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    None,
    NoOutput,
    Hard,
}

impl TimeoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutKind::None => "none",
            TimeoutKind::NoOutput => "no-output",
            TimeoutKind::Hard => "hard",
        }
    }
}

/// The closed set of agent backends, selected by a prefix rule over the
/// configured model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Codex,
    Claude,
    Generic,
}

pub fn resolve_backend(model: &str) -> Backend {
    if model.starts_with("codex-") || model.starts_with("gpt-") {
        Backend::Codex
    } else if model.starts_with("claude-") {
        Backend::Claude
    } else {
        Backend::Generic
    }
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub model: String,
    pub instructions: Option<String>,
    pub mcp_url: Option<String>,
    pub session_token: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub skip_repo_check: bool,
    /// Key for log artifacts, e.g. the ticket stem or `architect`.
    pub log_key: String,
    pub max_attempts: u32,
    /// First attempt number for this run; continuation attempts count up
    /// from here.
    pub base_attempt: u32,
    pub continuation_directive: Option<String>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub command: Vec<String>,
    pub exit_code: i32,
    /// Number of the attempt that produced this result.
    pub attempt: u32,
    /// Attempts consumed by this run.
    pub attempt_count: u32,
    pub stdout: String,
    pub log_path: PathBuf,
    pub last_message_path: PathBuf,
    pub last_message: String,
    pub timeout_kind: TimeoutKind,
}

impl AgentRunResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && self.timeout_kind == TimeoutKind::None
    }
}

const DEFAULT_CONTINUATION_DIRECTIVE: &str =
    "Continue from where the previous attempt left off and finish the task.";

/// Tail limit for the previous attempt's output in a continuation prompt.
const CONTINUATION_TAIL_BYTES: usize = 1200;

pub struct AgentHarness {
    binary: String,
    logs_dir: PathBuf,
    no_output_timeout: Duration,
    hard_timeout: Duration,
    heartbeat_interval: Option<Duration>,
    default_max_attempts: u32,
}

impl AgentHarness {
    pub fn new(agent: &AgentConfig, logs_dir: PathBuf) -> Self {
        Self {
            binary: agent.binary.clone(),
            logs_dir,
            no_output_timeout: Duration::from_millis(agent.no_output_timeout_ms),
            hard_timeout: Duration::from_millis(agent.hard_timeout_ms),
            heartbeat_interval: match agent.heartbeat_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            default_max_attempts: agent.max_attempts.max(1),
        }
    }

    pub fn default_max_attempts(&self) -> u32 {
        self.default_max_attempts
    }

    /// Run the agent to completion, retrying with continuation prompts
    /// while attempts remain. The result reflects the final attempt.
    pub async fn run(&self, req: &AgentRequest) -> Result<AgentRunResult> {
        match resolve_backend(&req.model) {
            Backend::Codex => {}
            Backend::Claude | Backend::Generic => {
                return Err(Error::BackendUnsupported(req.model.clone()));
            }
        }

        let max_attempts = req.max_attempts.max(1);
        let mut prompt = req.prompt.clone();
        let mut attempts_used = 0u32;

        loop {
            let attempt = req.base_attempt + attempts_used;
            attempts_used += 1;
            info!(
                "agent run {} attempt {attempt} (model {})",
                req.log_key, req.model
            );

            let outcome = codex::run_attempt(
                &self.binary,
                req,
                &prompt,
                attempt,
                &self.logs_dir,
                self.no_output_timeout,
                self.hard_timeout,
                self.heartbeat_interval,
            )
            .await?;

            let result = AgentRunResult {
                command: outcome.command,
                exit_code: outcome.exit_code,
                attempt,
                attempt_count: attempts_used,
                stdout: outcome.stdout,
                log_path: outcome.log_path,
                last_message_path: outcome.last_message_path,
                last_message: outcome.last_message,
                timeout_kind: outcome.timeout_kind,
            };

            if result.success() || attempts_used >= max_attempts {
                return Ok(result);
            }

            info!(
                "agent run {} attempt {attempt} failed (exit {}, timeout {}), retrying",
                req.log_key,
                result.exit_code,
                result.timeout_kind.as_str()
            );
            prompt = continuation_prompt(
                &req.prompt,
                attempt,
                result.exit_code,
                result.timeout_kind,
                &result,
                req.continuation_directive.as_deref(),
            );
        }
    }
}

/// Original prompt plus a report on the failed attempt and a directive to
/// continue.
fn continuation_prompt(
    original: &str,
    prev_attempt: u32,
    exit_code: i32,
    timeout_kind: TimeoutKind,
    prev: &AgentRunResult,
    directive: Option<&str>,
) -> String {
    let source = if prev.last_message.trim().is_empty() {
        &prev.stdout
    } else {
        &prev.last_message
    };
    let tail = tickets::tail(source, CONTINUATION_TAIL_BYTES);

    let timeout_note = match timeout_kind {
        TimeoutKind::None => String::new(),
        other => format!(", timed out: {}", other.as_str()),
    };

    let mut prompt = String::with_capacity(original.len() + tail.len() + 256);
    prompt.push_str(original);
    prompt.push_str(&format!(
        "\n\n---\n\nAttempt {prev_attempt} failed (exit code {exit_code}{timeout_note})."
    ));
    if !tail.trim().is_empty() {
        prompt.push_str("\nTail of its output:\n\n");
        prompt.push_str(tail);
        prompt.push('\n');
    }
    prompt.push('\n');
    prompt.push_str(directive.unwrap_or(DEFAULT_CONTINUATION_DIRECTIVE));
    prompt.push('\n');
    prompt
}
