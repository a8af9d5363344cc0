use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use super::error::ProcessError;

#[derive(Debug, Clone)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub stdin: Option<String>,
}

impl ProcessCommand {
    /// One-line rendering for diagnostics.
    fn label(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Timeout,
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            _ => None,
        }
    }
}

/// Fold a raw wait status into [`ExitStatus`], surfacing the killing
/// signal where the platform reports one.
fn classify_exit(raw: std::process::ExitStatus) -> ExitStatus {
    if raw.success() {
        return ExitStatus::Success;
    }
    match raw.code() {
        Some(code) => ExitStatus::Error(code),
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = raw.signal() {
                    return ExitStatus::Signal(signal);
                }
            }
            ExitStatus::Error(1)
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError>;
}

pub struct TokioProcessRunner;

fn configure(command: &ProcessCommand) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(&command.program);
    cmd.args(&command.args)
        .envs(command.env.iter())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if command.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }
    cmd
}

async fn feed_stdin(
    child: &mut tokio::process::Child,
    data: &str,
) -> Result<(), ProcessError> {
    let Some(mut stdin) = child.stdin.take() else {
        return Ok(());
    };
    stdin
        .write_all(data.as_bytes())
        .await
        .map_err(ProcessError::Io)?;
    stdin.shutdown().await.map_err(ProcessError::Io)?;
    Ok(())
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, command: ProcessCommand) -> Result<ProcessOutput, ProcessError> {
        let label = command.label();
        tracing::trace!(cwd = ?command.working_dir, "spawn: {label}");

        let started = Instant::now();
        let mut child = configure(&command).spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProcessError::CommandNotFound(command.program.clone()),
            _ => ProcessError::Io(e),
        })?;

        if let Some(data) = &command.stdin {
            feed_stdin(&mut child, data).await?;
        }

        let collected = match command.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    tracing::debug!("deadline of {limit:?} expired: {label}");
                    ProcessError::Timeout(limit)
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(ProcessError::Io)?;

        let duration = started.elapsed();
        let status = classify_exit(collected.status);

        // Non-zero exits are often normal control flow here (merge
        // conflicts, failing test targets), so they log at debug and the
        // caller decides how loud to be.
        match &status {
            ExitStatus::Success => tracing::trace!("ok in {duration:?}: {label}"),
            other => tracing::debug!(
                "{other:?} in {duration:?}: {label} ({} stderr bytes)",
                collected.stderr.len()
            ),
        }

        Ok(ProcessOutput {
            status,
            stdout: String::from_utf8_lossy(&collected.stdout).to_string(),
            stderr: String::from_utf8_lossy(&collected.stderr).to_string(),
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_render_program_and_args() {
        let command = ProcessCommand {
            program: "git".to_string(),
            args: vec!["status".to_string(), "--porcelain".to_string()],
            env: HashMap::new(),
            working_dir: None,
            timeout: None,
            stdin: None,
        };
        assert_eq!(command.label(), "git status --porcelain");
    }

    #[tokio::test]
    async fn captures_output_and_classifies_exit() {
        let runner = TokioProcessRunner;
        let output = runner
            .run(ProcessCommand {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
                env: HashMap::new(),
                working_dir: None,
                timeout: None,
                stdin: None,
            })
            .await
            .unwrap();
        assert_eq!(output.status, ExitStatus::Error(3));
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[tokio::test]
    async fn stdin_reaches_the_child() {
        let runner = TokioProcessRunner;
        let output = runner
            .run(ProcessCommand {
                program: "cat".to_string(),
                args: vec![],
                env: HashMap::new(),
                working_dir: None,
                timeout: None,
                stdin: Some("piped through".to_string()),
            })
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, "piped through");
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout_error() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(ProcessCommand {
                program: "sleep".to_string(),
                args: vec!["5".to_string()],
                env: HashMap::new(),
                working_dir: None,
                timeout: Some(Duration::from_millis(100)),
                stdin: None,
            })
            .await;
        assert!(matches!(result, Err(ProcessError::Timeout(_))));
    }

    #[tokio::test]
    async fn missing_binaries_are_reported_by_name() {
        let runner = TokioProcessRunner;
        let result = runner
            .run(ProcessCommand {
                program: "definitely-not-a-real-binary".to_string(),
                args: vec![],
                env: HashMap::new(),
                working_dir: None,
                timeout: None,
                stdin: None,
            })
            .await;
        match result {
            Err(ProcessError::CommandNotFound(name)) => {
                assert_eq!(name, "definitely-not-a-real-binary");
            }
            other => panic!("expected CommandNotFound, got {other:?}"),
        }
    }
}
