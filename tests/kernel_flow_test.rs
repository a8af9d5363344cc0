//! End-to-end kernel scenarios: the full happy path through one tick,
//! merge conflicts, the red-master halt, and single-flight queue
//! processing.

mod common;

use common::*;
use scriptorium::kernel::MergeOutcome;
use scriptorium::plan::gateway::Transition;

fn e2e_area() -> StaticAreaGenerator {
    StaticAreaGenerator {
        files: vec![(
            "areas/01-e2e.md".to_string(),
            "# Area 01\n\n## Goal\n- Full flow.\n".to_string(),
        )],
    }
}

async fn write_spec(project: &TestProject, content: &str) {
    let gateway = project.gateway();
    let content = content.to_string();
    gateway
        .transact(move |plan_root| {
            std::fs::write(plan_root.join("spec.md"), &content)?;
            Ok(Transition {
                value: (),
                message: "scriptorium: update spec from architect".to_string(),
                paths: vec!["spec.md".to_string()],
            })
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn happy_path_completes_a_ticket_in_one_tick() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();
    write_spec(&project, "# Spec\n\nDeliver one full-flow ticket.\n").await;

    let agent = write_submitting_agent(project.managed.path(), "e2e.txt", "ship e2e");
    let config = project.config_with_agent(&agent, 1);

    let mut options = project.kernel_options(config);
    options.area_generator = Some(arc(e2e_area()));
    options.ticket_generator = Some(arc(StaticTicketGenerator {
        slug: "e2e-happy-path".to_string(),
        goal: "- Deliver the full flow.".to_string(),
    }));
    let mut kernel = project.kernel(options).await;

    kernel.tick().await.unwrap();

    let repo = project.repo_root();
    assert!(show_plan_file(repo, "tickets/done/0001-e2e-happy-path.md").is_some());
    assert!(show_plan_file(repo, "tickets/open/0001-e2e-happy-path.md").is_none());
    assert!(show_plan_file(repo, "tickets/in-progress/0001-e2e-happy-path.md").is_none());
    assert!(plan_dir_entries(repo, "queue/merge/pending").is_empty());

    // The agent's commit reached master through the queue.
    let on_master = git(repo, &["show", "master:e2e.txt"]);
    assert_eq!(on_master.trim(), "done");

    // The ticket carries the run record and the merge note.
    let ticket = show_plan_file(repo, "tickets/done/0001-e2e-happy-path.md").unwrap();
    assert!(ticket.contains("## Agent Run"));
    assert!(ticket.contains("## Merge Queue Success"));
    assert!(ticket.contains("- Summary: ship e2e"));

    // Every transition used a reserved subject.
    let subjects = plan_log_subjects(repo);
    assert!(subjects.contains(&"scriptorium: assign ticket 0001-e2e-happy-path".to_string()));
    assert!(subjects.contains(&"scriptorium: record agent run 0001-e2e-happy-path".to_string()));
    assert!(subjects.contains(&"scriptorium: enqueue merge request 0001".to_string()));
    assert!(subjects.contains(&"scriptorium: complete ticket 0001".to_string()));

    kernel.stop().await;
}

#[tokio::test]
async fn merge_conflict_reopens_the_ticket_with_diagnostics() {
    let project = init_project();
    let gateway = project.gateway();
    gateway.init_plan_branch().await.unwrap();
    write_spec(&project, "# Spec\n\nOne ticket.\n").await;
    commit_on_master(&project, "conflict.txt", "base\n", "seed conflict file");

    let ticket_rel = seed_area_and_ticket(&gateway, "areas/01-e2e.md", "first").await;
    assert_eq!(ticket_rel, "tickets/open/0001-first.md");

    let agent = write_submitting_agent(project.managed.path(), "unused.txt", "unused");
    let config = project.config_with_agent(&agent, 1);
    let kernel = project.kernel(project.kernel_options(config)).await;

    let assigned = kernel.assign_ticket(&ticket_rel).await.unwrap();
    assert_eq!(assigned, "tickets/in-progress/0001-first.md");

    // Divergent edits to the same file on both sides.
    let worktree = project.paths().ticket_worktree("0001-first");
    commit_in_worktree(&worktree, "conflict.txt", "ticket side\n", "ticket change");
    commit_on_master(&project, "conflict.txt", "master side\n", "master change");

    kernel
        .enqueue_merge_request(&assigned, &worktree, "conflict expected")
        .await
        .unwrap();

    let outcome = kernel.process_merge_queue().await.unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Reopened {
            ticket_id: "0001".to_string()
        }
    );

    let repo = project.repo_root();
    assert!(show_plan_file(repo, "tickets/open/0001-first.md").is_some());
    assert!(plan_dir_entries(repo, "queue/merge/pending").is_empty());

    let ticket = show_plan_file(repo, "tickets/open/0001-first.md").unwrap();
    assert!(ticket.contains("## Merge Queue Failure"));
    assert!(ticket.contains("- Summary: conflict expected"));
    assert!(ticket.contains("CONFLICT"));

    // Master kept its own side.
    assert_eq!(git(repo, &["show", "master:conflict.txt"]).trim(), "master side");
}

#[tokio::test]
async fn red_master_halts_and_resumes() {
    let project = init_project();
    let gateway = project.gateway();
    gateway.init_plan_branch().await.unwrap();
    write_spec(&project, "# Spec\n\nOne ticket.\n").await;

    let ticket_rel = seed_area_and_ticket(&gateway, "areas/01-e2e.md", "halting").await;

    let agent = write_submitting_agent(project.managed.path(), "unused.txt", "unused");
    let config = project.config_with_agent(&agent, 1);
    let mut kernel = project.kernel(project.kernel_options(config)).await;

    let assigned = kernel.assign_ticket(&ticket_rel).await.unwrap();
    let worktree = project.paths().ticket_worktree("0001-halting");
    commit_in_worktree(&worktree, "feature.txt", "new\n", "ticket work");
    kernel
        .enqueue_merge_request(&assigned, &worktree, "halt then resume")
        .await
        .unwrap();

    // Break master's test target.
    commit_on_master(&project, "Makefile", FAILING_MAKEFILE, "break tests");

    kernel.tick().await.unwrap();
    let repo = project.repo_root();
    assert!(show_plan_file(repo, "tickets/in-progress/0001-halting.md").is_some());
    assert_eq!(plan_dir_entries(repo, "queue/merge/pending").len(), 1);

    // Fix master; the next tick drains the queue.
    commit_on_master(&project, "Makefile", PASSING_MAKEFILE, "fix tests");

    kernel.tick().await.unwrap();
    assert!(show_plan_file(repo, "tickets/done/0001-halting.md").is_some());
    assert!(plan_dir_entries(repo, "queue/merge/pending").is_empty());
    assert_eq!(git(repo, &["show", "master:feature.txt"]).trim(), "new");

    kernel.stop().await;
}

#[tokio::test]
async fn merge_queue_is_single_flight_and_fifo() {
    let project = init_project();
    let gateway = project.gateway();
    gateway.init_plan_branch().await.unwrap();
    write_spec(&project, "# Spec\n\nTwo tickets.\n").await;

    let first = seed_area_and_ticket(&gateway, "areas/01-e2e.md", "one").await;
    let second = seed_area_and_ticket(&gateway, "areas/01-e2e.md", "two").await;
    assert_eq!(first, "tickets/open/0001-one.md");
    assert_eq!(second, "tickets/open/0002-two.md");

    let agent = write_submitting_agent(project.managed.path(), "unused.txt", "unused");
    let config = project.config_with_agent(&agent, 1);
    let kernel = project.kernel(project.kernel_options(config)).await;

    let first = kernel.assign_ticket(&first).await.unwrap();
    let second = kernel.assign_ticket(&second).await.unwrap();

    let wt_one = project.paths().ticket_worktree("0001-one");
    let wt_two = project.paths().ticket_worktree("0002-two");
    commit_in_worktree(&wt_one, "one.txt", "1\n", "work one");
    commit_in_worktree(&wt_two, "two.txt", "2\n", "work two");

    kernel
        .enqueue_merge_request(&first, &wt_one, "ship one")
        .await
        .unwrap();
    kernel
        .enqueue_merge_request(&second, &wt_two, "ship two")
        .await
        .unwrap();

    let outcome = kernel.process_merge_queue().await.unwrap();
    assert_eq!(
        outcome,
        MergeOutcome::Completed {
            ticket_id: "0001".to_string()
        }
    );

    let repo = project.repo_root();
    assert!(show_plan_file(repo, "tickets/done/0001-one.md").is_some());
    assert!(show_plan_file(repo, "tickets/in-progress/0002-two.md").is_some());
    assert_eq!(
        plan_dir_entries(repo, "queue/merge/pending"),
        vec!["0002-0002.md"]
    );
}
