//! Tool-triggered plan mutations: HTTP tool calls are queued and applied by
//! the kernel at its next tick, never by the HTTP handler itself.

mod common;

use common::*;
use scriptorium::plan::gateway::Transition;
use serde_json::json;

async fn tool_call(url: &str, token: &str, name: &str, arguments: serde_json::Value) {
    let response: serde_json::Value = reqwest::Client::new()
        .post(url)
        .bearer_auth(token)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments },
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(
        response.get("error").is_none(),
        "tool call failed: {response}"
    );
}

#[tokio::test]
async fn queued_tool_tasks_apply_on_the_next_tick() {
    let project = init_project();
    let gateway = project.gateway();
    gateway.init_plan_branch().await.unwrap();

    // A real spec so the tick proceeds past the waiting check.
    gateway
        .transact(|plan_root| {
            std::fs::write(plan_root.join("spec.md"), "# Spec\n\nBuild things.\n")?;
            Ok(Transition {
                value: (),
                message: "scriptorium: update spec from architect".to_string(),
                paths: vec!["spec.md".to_string()],
            })
        })
        .await
        .unwrap();

    // Seed an area with an active ticket so the planning drivers stay idle.
    let ticket_rel = seed_area_and_ticket(&gateway, "areas/01-core.md", "seeded").await;

    let agent = write_submitting_agent(project.managed.path(), "unused.txt", "unused");
    let config = project.config_with_agent(&agent, 1);
    let mut kernel = project.kernel(project.kernel_options(config)).await;

    // Park the seeded ticket in-progress so the tick does not execute it.
    let assigned = kernel.assign_ticket(&ticket_rel).await.unwrap();

    let url = kernel.tool_server_url();
    let token = kernel.tool_session_token();

    tool_call(
        &url,
        &token,
        "create_ticket",
        json!({
            "title": "Follow-up work",
            "goal": "- Clean up the edges.",
            "acceptance_criteria": "- Edges are clean.",
        }),
    )
    .await;
    tool_call(
        &url,
        &token,
        "add_note",
        json!({ "ticket_id": "0001", "note": "agent spotted a flaky path" }),
    )
    .await;
    tool_call(
        &url,
        &token,
        "create_area",
        json!({ "title": "Operations", "summary": "Run the thing.", "scope": "Deploy scripts." }),
    )
    .await;

    // Nothing lands until the kernel drains its queue.
    assert!(show_plan_file(project.repo_root(), "tickets/open/0002-follow-up-work.md").is_none());

    kernel.drain_kernel_tasks().await.unwrap();

    let repo = project.repo_root();
    let follow_up = show_plan_file(repo, "tickets/open/0002-follow-up-work.md")
        .expect("tool-created ticket exists");
    assert!(follow_up.contains("# Follow-up work"));
    assert!(follow_up.contains("## Goal"));

    let seeded = show_plan_file(repo, &format!("{assigned}")).unwrap();
    assert!(seeded.contains("## Note"));
    assert!(seeded.contains("agent spotted a flaky path"));

    let area = show_plan_file(repo, "areas/02-operations.md").expect("tool-created area exists");
    assert!(area.contains("# Operations"));
    assert!(area.contains("Deploy scripts."));

    kernel.stop().await;
}
