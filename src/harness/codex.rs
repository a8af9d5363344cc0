//! Codex CLI backend
//!
//! Spawns one `codex exec` subprocess per attempt, delivers the prompt on
//! stdin, and drives a poll-based read loop over stdout: every chunk is
//! appended to the attempt's byte log, complete lines are normalized to
//! stream events, and two watchdogs (no-output and hard) can kill the
//! child. The final assistant message is read from the `--output-last-
//! message` file after exit.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::harness::events::{self, StreamEvent};
use crate::harness::{AgentRequest, TimeoutKind};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raw outcome of a single attempt.
pub(crate) struct AttemptOutcome {
    pub command: Vec<String>,
    pub exit_code: i32,
    pub stdout: String,
    pub timeout_kind: TimeoutKind,
    pub last_message: String,
    pub last_message_path: PathBuf,
    pub log_path: PathBuf,
}

/// Build the argument vector in its fixed order: developer instructions,
/// MCP server pointer, exec mode, last-message sink, working directory,
/// model, sandbox bypass, reasoning effort, repo-check bypass, and the `-`
/// marker for a stdin-delivered prompt.
pub(crate) fn build_args(req: &AgentRequest, last_message_path: &Path) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(instructions) = &req.instructions {
        args.push("-c".to_string());
        args.push(format!(
            "developer_instructions={}",
            serde_json::Value::String(instructions.clone())
        ));
    }
    if let Some(url) = &req.mcp_url {
        args.push("-c".to_string());
        args.push(format!("mcp_servers.scriptorium.url=\"{url}\""));
    }

    args.push("exec".to_string());
    args.push("--json".to_string());
    args.push("--output-last-message".to_string());
    args.push(last_message_path.to_string_lossy().to_string());
    args.push("--cd".to_string());
    args.push(req.working_dir.to_string_lossy().to_string());
    args.push("--model".to_string());
    args.push(req.model.clone());
    args.push("--dangerously-bypass-approvals-and-sandbox".to_string());

    if let Some(effort) = req.reasoning_effort {
        args.push("-c".to_string());
        args.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
    }
    if req.skip_repo_check {
        args.push("--skip-git-repo-check".to_string());
    }

    args.push("-".to_string());
    args
}

pub(crate) async fn run_attempt(
    binary: &str,
    req: &AgentRequest,
    prompt: &str,
    attempt: u32,
    logs_dir: &Path,
    no_output_timeout: Duration,
    hard_timeout: Duration,
    heartbeat_interval: Option<Duration>,
) -> Result<AttemptOutcome> {
    std::fs::create_dir_all(logs_dir)?;
    let last_message_path = logs_dir.join(format!("{}-attempt-{attempt}.last.md", req.log_key));
    let log_path = logs_dir.join(format!("{}-attempt-{attempt}.jsonl", req.log_key));
    let prompt_path = logs_dir.join(format!("{}-attempt-{attempt}.prompt.md", req.log_key));
    std::fs::write(&prompt_path, prompt)?;

    let args = build_args(req, &last_message_path);
    let mut command_line = vec![binary.to_string()];
    command_line.extend(args.iter().cloned());

    let mut cmd = Command::new(binary);
    cmd.args(&args)
        .current_dir(&req.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(url) = &req.mcp_url {
        cmd.env("SCRIPTORIUM_MCP_URL", url);
    }
    if let Some(token) = &req.session_token {
        cmd.env("SCRIPTORIUM_SESSION_TOKEN", token);
    }
    for (key, value) in &req.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::Other(format!("agent binary not found: {binary}"))
        } else {
            Error::Io(e)
        }
    })?;

    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(prompt.as_bytes()).await {
            Ok(()) => {
                let _ = stdin.shutdown().await;
            }
            // A fast-exiting child may close stdin before the prompt lands.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(e.into()),
        }
    }

    let stderr_task = child.stderr.take().map(|stderr| {
        let key = req.log_key.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = String::new();
            while let Ok(Some(line)) = lines.next_line().await {
                if !line.trim().is_empty() {
                    debug!("[agent {key} stderr] {line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
            }
            collected
        })
    });

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Other("agent stdout not captured".to_string()))?;

    let mut log = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let start = Instant::now();
    let mut last_output = Instant::now();
    let mut last_heartbeat = Instant::now();
    let mut read_buf = [0u8; 8192];
    let mut stdout_buf = String::new();
    let mut line_buf = String::new();
    let mut timeout_kind = TimeoutKind::None;

    loop {
        if start.elapsed() >= hard_timeout {
            warn!("agent {} hit hard timeout, killing", req.log_key);
            timeout_kind = TimeoutKind::Hard;
            let _ = child.kill().await;
            break;
        }

        match tokio::time::timeout(POLL_INTERVAL, stdout.read(&mut read_buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                let chunk_bytes = &read_buf[..n];
                log.write_all(chunk_bytes)?;
                let chunk = String::from_utf8_lossy(chunk_bytes);
                stdout_buf.push_str(&chunk);
                if !chunk.trim().is_empty() {
                    last_output = Instant::now();
                }
                line_buf.push_str(&chunk);
                while let Some(idx) = line_buf.find('\n') {
                    let line: String = line_buf.drain(..=idx).collect();
                    if let Some(event) = events::normalize_line(&line) {
                        emit(&req.log_key, &event);
                    }
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                // No data this poll; check the watchdogs.
                if last_output.elapsed() >= no_output_timeout {
                    warn!("agent {} produced no output, killing", req.log_key);
                    timeout_kind = TimeoutKind::NoOutput;
                    let _ = child.kill().await;
                    break;
                }
                if let Some(interval) = heartbeat_interval {
                    if last_output.elapsed() >= interval && last_heartbeat.elapsed() >= interval {
                        emit(&req.log_key, &StreamEvent::heartbeat());
                        last_heartbeat = Instant::now();
                    }
                }
            }
        }
    }

    // Flush any trailing partial line through normalization.
    if let Some(event) = events::normalize_line(&line_buf) {
        emit(&req.log_key, &event);
    }

    // A child that closed stdout but lingers is still bound by the hard
    // deadline.
    let status = if timeout_kind == TimeoutKind::None {
        let remaining = hard_timeout.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("agent {} lingered past the hard timeout, killing", req.log_key);
                timeout_kind = TimeoutKind::Hard;
                let _ = child.kill().await;
                child.wait().await?
            }
        }
    } else {
        child.wait().await?
    };
    let exit_code = status.code().unwrap_or(-1);

    if let Some(task) = stderr_task {
        if let Ok(stderr) = task.await {
            if !stderr.is_empty() && exit_code != 0 {
                debug!("agent {} stderr on failure:\n{stderr}", req.log_key);
            }
        }
    }

    let last_message = std::fs::read_to_string(&last_message_path).unwrap_or_default();

    Ok(AttemptOutcome {
        command: command_line,
        exit_code,
        stdout: stdout_buf,
        timeout_kind,
        last_message,
        last_message_path,
        log_path,
    })
}

fn emit(key: &str, event: &StreamEvent) {
    debug!("[agent {key}] {}", event.summary());
}
