//! Agent harness behavior against real subprocesses: retries with
//! continuation prompts, watchdog timeouts, artifact files, and backend
//! dispatch.

mod common;

use std::path::{Path, PathBuf};

use common::*;
use scriptorium::config::AgentConfig;
use scriptorium::error::Error;
use scriptorium::harness::{AgentHarness, AgentRequest, TimeoutKind};
use tempfile::TempDir;

fn harness(binary: &Path, logs: &Path, config: impl FnOnce(&mut AgentConfig)) -> AgentHarness {
    let mut agent = AgentConfig {
        binary: binary.to_string_lossy().to_string(),
        ..AgentConfig::default()
    };
    config(&mut agent);
    AgentHarness::new(&agent, logs.to_path_buf())
}

fn request(working_dir: PathBuf, log_key: &str, max_attempts: u32) -> AgentRequest {
    AgentRequest {
        prompt: "Do the work.".to_string(),
        working_dir,
        model: "gpt-5-codex".to_string(),
        instructions: None,
        mcp_url: None,
        session_token: None,
        reasoning_effort: None,
        skip_repo_check: false,
        log_key: log_key.to_string(),
        max_attempts,
        base_attempt: 1,
        continuation_directive: None,
        env: Vec::new(),
    }
}

#[tokio::test]
async fn retry_succeeds_with_a_continuation_prompt() {
    let work = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();

    // Exits 9 on the first attempt, 0 on the second.
    let script = write_script(
        work.path(),
        "flaky.sh",
        r#"cat > /dev/null
n=0
[ -f count ] && n=$(cat count)
n=$((n+1))
echo $n > count
if [ "$n" = "1" ]; then
  echo '{"type":"status","message":"warming up"}'
  exit 9
fi
last=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--output-last-message" ]; then last="$a"; fi
  prev="$a"
done
[ -n "$last" ] && printf 'finished on retry' > "$last"
echo '{"type":"agent_message","message":"ok"}'
exit 0
"#,
    );

    let harness = harness(&script, logs.path(), |_| {});
    let result = harness
        .run(&request(work.path().to_path_buf(), "retry", 2))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.attempt, 2);
    assert_eq!(result.attempt_count, 2);
    assert_eq!(result.timeout_kind, TimeoutKind::None);
    assert_eq!(result.last_message, "finished on retry");

    // The second attempt's on-disk prompt reports the first failure.
    let prompt2 =
        std::fs::read_to_string(logs.path().join("retry-attempt-2.prompt.md")).unwrap();
    assert!(prompt2.starts_with("Do the work."));
    assert!(prompt2.contains("Attempt 1 failed"));
    assert!(prompt2.contains("exit code 9"));

    // Attempt 1's prompt was the original alone.
    let prompt1 =
        std::fs::read_to_string(logs.path().join("retry-attempt-1.prompt.md")).unwrap();
    assert!(!prompt1.contains("Attempt 1 failed"));
}

#[tokio::test]
async fn exhausted_attempts_return_the_final_failure() {
    let work = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let script = write_script(work.path(), "always-fails.sh", "cat > /dev/null\nexit 7\n");

    let harness = harness(&script, logs.path(), |_| {});
    let result = harness
        .run(&request(work.path().to_path_buf(), "fails", 2))
        .await
        .unwrap();

    assert_eq!(result.exit_code, 7);
    assert_eq!(result.attempt, 2);
    assert_eq!(result.attempt_count, 2);
    assert!(!result.success());
}

#[tokio::test]
async fn silent_agent_trips_the_no_output_watchdog() {
    let work = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let script = write_script(work.path(), "silent.sh", "cat > /dev/null\nsleep 10\n");

    let harness = harness(&script, logs.path(), |agent| {
        agent.no_output_timeout_ms = 300;
        agent.hard_timeout_ms = 30_000;
        agent.max_attempts = 1;
    });
    let result = harness
        .run(&request(work.path().to_path_buf(), "silent", 1))
        .await
        .unwrap();

    assert_eq!(result.timeout_kind, TimeoutKind::NoOutput);
    assert!(!result.success());
    assert_eq!(result.attempt_count, 1);
}

#[tokio::test]
async fn chatty_agent_trips_the_hard_watchdog() {
    let work = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    // Emits output continuously, so only the hard deadline can stop it.
    let script = write_script(
        work.path(),
        "chatty.sh",
        r#"cat > /dev/null
i=0
while [ $i -lt 100 ]; do
  echo '{"type":"status","message":"still going"}'
  sleep 0.1
  i=$((i+1))
done
"#,
    );

    let harness = harness(&script, logs.path(), |agent| {
        agent.no_output_timeout_ms = 10_000;
        agent.hard_timeout_ms = 500;
        agent.max_attempts = 1;
    });
    let result = harness
        .run(&request(work.path().to_path_buf(), "chatty", 1))
        .await
        .unwrap();

    assert_eq!(result.timeout_kind, TimeoutKind::Hard);
    assert!(!result.success());
}

#[tokio::test]
async fn stdout_is_captured_and_logged() {
    let work = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let script = write_script(
        work.path(),
        "noisy.sh",
        r#"cat > /dev/null
echo '{"type":"reasoning","text":"thinking"}'
echo 'not json, preserved in the log only'
echo '{"type":"agent_message","message":"bye"}'
exit 0
"#,
    );

    let harness = harness(&script, logs.path(), |_| {});
    let result = harness
        .run(&request(work.path().to_path_buf(), "noisy", 1))
        .await
        .unwrap();

    assert!(result.stdout.contains("thinking"));
    assert!(result.stdout.contains("not json"));

    let log = std::fs::read_to_string(&result.log_path).unwrap();
    assert!(log.contains("not json, preserved in the log only"));
    assert!(result
        .log_path
        .to_string_lossy()
        .ends_with("noisy-attempt-1.jsonl"));
}

#[tokio::test]
async fn unsupported_backends_fail_fast() {
    let work = TempDir::new().unwrap();
    let logs = TempDir::new().unwrap();
    let script = write_script(work.path(), "agent.sh", "exit 0\n");
    let harness = harness(&script, logs.path(), |_| {});

    let mut req = request(work.path().to_path_buf(), "claude", 1);
    req.model = "claude-sonnet-4".to_string();
    match harness.run(&req).await {
        Err(Error::BackendUnsupported(model)) => assert_eq!(model, "claude-sonnet-4"),
        other => panic!("expected BackendUnsupported, got {other:?}"),
    }

    let mut req = request(work.path().to_path_buf(), "other", 1);
    req.model = "mystery-model".to_string();
    assert!(matches!(
        harness.run(&req).await,
        Err(Error::BackendUnsupported(_))
    ));
}
