//! CLI front-end
//!
//! Thin composition layer over the kernel: argument parsing and command
//! routing only. The kernel never depends on anything here.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};

use crate::config::Config;
use crate::git::GitOps;
use crate::kernel::{Kernel, KernelOptions};
use crate::paths::ManagedPaths;
use crate::plan::gateway::PlanGateway;
use crate::plan::{self, TicketState};
use crate::planning::{HarnessPlanner, PlanDriver, PlanSession};
use crate::subprocess::SubprocessManager;
use crate::worktree::WorktreeManager;

#[derive(Parser)]
#[command(
    name = "scriptorium",
    version,
    about = "Git-native agent orchestrator: plan-branch tickets, per-ticket worktrees, and a serial merge queue"
)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Initialize the plan branch (equivalent to the `init` subcommand)
    #[arg(long = "init", hide = true)]
    pub init: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the orphan plan branch with its directory skeleton
    Init,
    /// Run the orchestrator event loop
    Run {
        /// Stop after this many ticks (unbounded when omitted)
        #[arg(long)]
        max_ticks: Option<u64>,
    },
    /// Summarize the plan: areas, tickets per state, merge queue
    Status,
    /// Revise the spec through the Architect; interactive without a prompt
    Plan {
        /// One-shot prompt; omit to start an interactive session
        prompt: Vec<String>,
    },
    /// List managed ticket worktrees
    Worktrees,
}

struct Env {
    repo_root: PathBuf,
    config: Config,
    paths: ManagedPaths,
    git: GitOps,
}

fn environment() -> Result<Env> {
    let repo_root = std::env::current_dir().context("cannot determine working directory")?;
    let config = Config::load(&repo_root)?;
    let paths = ManagedPaths::for_repo(&repo_root);
    let git = GitOps::new(SubprocessManager::production().runner());
    Ok(Env {
        repo_root,
        config,
        paths,
        git,
    })
}

fn gateway(env: &Env) -> PlanGateway {
    PlanGateway::new(env.repo_root.clone(), env.paths.clone(), env.git.clone())
}

pub async fn execute_command(command: Command) -> Result<()> {
    match command {
        Command::Init => init().await,
        Command::Run { max_ticks } => run(max_ticks).await,
        Command::Status => status().await,
        Command::Plan { prompt } => plan_command(prompt).await,
        Command::Worktrees => worktrees().await,
    }
}

async fn init() -> Result<()> {
    let env = environment()?;
    gateway(&env).init_plan_branch().await?;
    println!(
        "Initialized plan branch '{}' in {}",
        plan::PLAN_BRANCH,
        env.repo_root.display()
    );
    Ok(())
}

async fn run(max_ticks: Option<u64>) -> Result<()> {
    let env = environment()?;
    let mut kernel = Kernel::start(KernelOptions::new(env.repo_root, env.config)).await?;

    let shutdown = kernel.shutdown_flag();
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("cannot install SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, shutdown)
        .context("cannot install SIGTERM handler")?;

    kernel.run(max_ticks).await?;
    Ok(())
}

async fn status() -> Result<()> {
    let env = environment()?;
    let gateway = gateway(&env);
    if !gateway.branch_exists().await? {
        println!("Plan branch '{}' not initialized.", plan::PLAN_BRANCH);
        return Ok(());
    }

    let summary = gateway
        .read(|plan_root| {
            let spec = plan::read_plan_file(plan_root, plan::SPEC_FILE).unwrap_or_default();
            let areas = plan::list_areas(plan_root)?.len();
            let open = plan::list_tickets(plan_root, TicketState::Open)?.len();
            let in_progress = plan::list_tickets(plan_root, TicketState::InProgress)?.len();
            let done = plan::list_tickets(plan_root, TicketState::Done)?.len();
            let pending = plan::list_markdown(plan_root, plan::QUEUE_PENDING_DIR)?.len();
            let active = std::fs::read_to_string(plan_root.join(plan::QUEUE_ACTIVE_FILE))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            Ok((spec, areas, open, in_progress, done, pending, active))
        })
        .await?;

    let (spec, areas, open, in_progress, done, pending, active) = summary;
    if plan::spec_is_placeholder(&spec) {
        println!("spec: (placeholder, waiting for a spec)");
    } else {
        println!("spec: {} bytes", spec.len());
    }
    println!("areas: {areas}");
    println!("tickets: {open} open, {in_progress} in progress, {done} done");
    println!("merge queue: {pending} pending");
    if !active.is_empty() {
        println!("merge queue active item: {active}");
    }
    Ok(())
}

async fn plan_command(prompt: Vec<String>) -> Result<()> {
    let env = environment()?;
    let harness = Arc::new(crate::harness::AgentHarness::new(
        &env.config.agent,
        env.paths.logs(),
    ));
    let architect = Arc::new(HarnessPlanner::new(
        harness,
        env.repo_root.clone(),
        env.config.clone(),
    ));
    let driver = PlanDriver::new(
        gateway(&env),
        env.git.clone(),
        env.repo_root.clone(),
        architect,
    );

    if !prompt.is_empty() {
        let outcome = driver.update_spec_from_architect(&prompt.join(" ")).await?;
        println!("{}", outcome.reply.trim());
        println!(
            "{}",
            if outcome.changed {
                "spec.md updated."
            } else {
                "spec.md unchanged."
            }
        );
        return Ok(());
    }

    interactive_session(PlanSession::new(driver)).await
}

async fn interactive_session(mut session: PlanSession) -> Result<()> {
    println!("Interactive planning session. /show prints the spec, /help lists commands, /quit exits.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF exits cleanly.
            println!();
            return Ok(());
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" | "/exit" => return Ok(()),
            "/help" => {
                println!("/show  print the current spec");
                println!("/help  this message");
                println!("/quit  leave the session");
            }
            "/show" => {
                let spec = session.current_spec().await?;
                if spec.trim().is_empty() {
                    println!("(spec is empty)");
                } else {
                    println!("{spec}");
                }
            }
            _ => match session.turn(input).await {
                Ok(outcome) => {
                    println!("{}", outcome.reply.trim());
                    if outcome.changed {
                        println!("[spec.md updated]");
                    }
                }
                Err(e) => eprintln!("turn failed: {e}"),
            },
        }
    }
}

async fn worktrees() -> Result<()> {
    let env = environment()?;
    let manager = WorktreeManager::new(
        env.repo_root.clone(),
        env.paths.clone(),
        env.git.clone(),
    );
    let entries = manager.list_managed().await?;
    if entries.is_empty() {
        println!("No managed ticket worktrees.");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}\t{}",
            entry.branch.as_deref().unwrap_or("(detached)"),
            entry.path.display()
        );
    }
    Ok(())
}
