//! Write-scope guards on the planning drivers: out-of-scope writes abort
//! the commit and leave the plan branch untouched.

mod common;

use common::*;
use scriptorium::error::Error;
use scriptorium::git::GitOps;
use scriptorium::plan::gateway::Transition;
use scriptorium::planning::{PlanDriver, PlanSession};
use scriptorium::subprocess::SubprocessManager;

fn driver_with(project: &TestProject, architect: ScriptedArchitect) -> PlanDriver {
    PlanDriver::new(
        project.gateway(),
        GitOps::new(SubprocessManager::production().runner()),
        project.repo_root().to_path_buf(),
        arc(architect),
    )
}

#[tokio::test]
async fn one_shot_spec_update_commits_on_change() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();
    let before = plan_commit_count(project.repo_root());

    let driver = driver_with(
        &project,
        ScriptedArchitect {
            spec_content: Some("# Spec\n\nRevised by the architect.\n".to_string()),
            extra_files: vec![],
            reply: "Updated the spec.".to_string(),
        },
    );

    let outcome = driver.update_spec_from_architect("flesh out the spec").await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.reply, "Updated the spec.");

    assert_eq!(plan_commit_count(project.repo_root()), before + 1);
    assert_eq!(
        plan_log_subjects(project.repo_root())[0],
        "scriptorium: update spec from architect"
    );
    let spec = show_plan_file(project.repo_root(), "spec.md").unwrap();
    assert!(spec.contains("Revised by the architect"));
}

#[tokio::test]
async fn unchanged_spec_is_not_committed() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();
    let before = plan_commit_count(project.repo_root());

    let driver = driver_with(
        &project,
        ScriptedArchitect {
            spec_content: None,
            extra_files: vec![],
            reply: "Nothing to change.".to_string(),
        },
    );

    let outcome = driver.update_spec_from_architect("anything new?").await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(plan_commit_count(project.repo_root()), before);
}

#[tokio::test]
async fn out_of_scope_write_aborts_the_spec_update() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();
    let before = plan_commit_count(project.repo_root());

    // Writes spec.md AND an area file: the one-shot path allows only
    // spec.md.
    let driver = driver_with(
        &project,
        ScriptedArchitect {
            spec_content: Some("# Spec\n\nSneaky revision.\n".to_string()),
            extra_files: vec![(
                "areas/01-out-of-scope.md".to_string(),
                "# Out of scope\n".to_string(),
            )],
            reply: "Done.".to_string(),
        },
    );

    match driver.update_spec_from_architect("go").await {
        Err(Error::WriteGuardViolation(paths)) => {
            assert!(paths.iter().any(|p| p.contains("01-out-of-scope")));
        }
        other => panic!("expected WriteGuardViolation, got {other:?}"),
    }

    // Commit count unchanged; neither file landed on the branch.
    assert_eq!(plan_commit_count(project.repo_root()), before);
    assert!(show_plan_file(project.repo_root(), "areas/01-out-of-scope.md").is_none());
    let spec = show_plan_file(project.repo_root(), "spec.md").unwrap();
    assert!(!spec.contains("Sneaky"));
}

#[tokio::test]
async fn architect_touching_the_source_repo_is_a_violation() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();

    struct RepoTamperer {
        repo_root: std::path::PathBuf,
    }

    #[async_trait::async_trait]
    impl scriptorium::planning::SpecArchitect for RepoTamperer {
        async fn revise_spec(
            &self,
            plan_root: &std::path::Path,
            _ctx: &scriptorium::planning::SpecTurnContext<'_>,
        ) -> scriptorium::error::Result<String> {
            std::fs::write(plan_root.join("spec.md"), "# Spec\n\nLegit.\n")?;
            std::fs::write(self.repo_root.join("injected.txt"), "oops")?;
            Ok("done".to_string())
        }
    }

    let driver = PlanDriver::new(
        project.gateway(),
        GitOps::new(SubprocessManager::production().runner()),
        project.repo_root().to_path_buf(),
        arc(RepoTamperer {
            repo_root: project.repo_root().to_path_buf(),
        }),
    );

    match driver.update_spec_from_architect("go").await {
        Err(Error::WriteGuardViolation(paths)) => {
            assert!(paths.iter().any(|p| p.contains("source repository")));
        }
        other => panic!("expected WriteGuardViolation, got {other:?}"),
    }
    std::fs::remove_file(project.repo_root().join("injected.txt")).ok();
}

#[tokio::test]
async fn area_generator_is_held_to_the_areas_scope() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();

    // Seed a spec so the kernel would reach the architect step.
    project
        .gateway()
        .transact(|plan_root| {
            std::fs::write(plan_root.join("spec.md"), "# Spec\n\nReal spec.\n")?;
            Ok(Transition {
                value: (),
                message: "scriptorium: update spec from architect".to_string(),
                paths: vec!["spec.md".to_string()],
            })
        })
        .await
        .unwrap();
    let before = plan_commit_count(project.repo_root());

    let agent = write_submitting_agent(project.managed.path(), "unused.txt", "unused");
    let config = project.config_with_agent(&agent, 1);
    let mut options = project.kernel_options(config);
    options.area_generator = Some(arc(StaticAreaGenerator {
        files: vec![
            ("areas/01-fine.md".to_string(), "# Fine\n".to_string()),
            ("spec.md".to_string(), "# Spec\n\nClobbered!\n".to_string()),
        ],
    }));
    let kernel = project.kernel(options).await;

    match kernel.run_architect_areas("# Spec\n\nReal spec.\n").await {
        Err(Error::WriteGuardViolation(paths)) => {
            assert!(paths.iter().any(|p| p == "spec.md"));
        }
        other => panic!("expected WriteGuardViolation, got {other:?}"),
    }

    assert_eq!(plan_commit_count(project.repo_root()), before);
    assert!(show_plan_file(project.repo_root(), "areas/01-fine.md").is_none());
}

#[tokio::test]
async fn interactive_session_commits_per_changed_turn() {
    let project = init_project();
    project.gateway().init_plan_branch().await.unwrap();

    let driver = driver_with(
        &project,
        ScriptedArchitect {
            spec_content: Some("# Spec\n\nTurn output.\n".to_string()),
            extra_files: vec![],
            reply: "Noted.".to_string(),
        },
    );
    let mut session = PlanSession::new(driver);

    let outcome = session.turn("write the spec").await.unwrap();
    assert!(outcome.changed);
    assert_eq!(
        plan_log_subjects(project.repo_root())[0],
        "scriptorium: plan session turn 1"
    );
    assert_eq!(session.history().len(), 2);
    assert_eq!(session.history()[0].0, "user");
    assert_eq!(session.history()[1].0, "assistant");

    // Second turn writes identical bytes: no new commit, turn counter
    // still advances.
    let before = plan_commit_count(project.repo_root());
    let outcome = session.turn("same again").await.unwrap();
    assert!(!outcome.changed);
    assert_eq!(plan_commit_count(project.repo_root()), before);

    let spec = session.current_spec().await.unwrap();
    assert!(spec.contains("Turn output"));
}
