//! Orchestration kernel
//!
//! The single-writer control loop that owns all plan-branch mutation:
//! master-health gating, merge-queue processing, ticket assignment and
//! agent execution, planning-driver invocation, and the drain point for
//! tool-server tasks. Submodules split the loop by concern; everything runs
//! on the kernel task, never on the HTTP handlers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::GitOps;
use crate::harness::AgentHarness;
use crate::mcp::{self, KernelTask, McpHandle};
use crate::paths::ManagedPaths;
use crate::plan::gateway::PlanGateway;
use crate::plan::{self, tickets, TicketState};
use crate::planning::{AreaGenerator, HarnessPlanner, TicketGenerator};
use crate::subprocess::SubprocessManager;
use crate::worktree::WorktreeManager;

mod health;
mod merge_queue;
mod scheduler;
mod tasks;

pub use merge_queue::MergeOutcome;

/// Default tick cadence of the event loop.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(200);

pub struct KernelOptions {
    pub repo_root: PathBuf,
    pub config: Config,
    /// Override the managed temp root (tests keep artifacts in their own
    /// temp dirs).
    pub paths: Option<ManagedPaths>,
    pub subprocess: Option<SubprocessManager>,
    pub area_generator: Option<Arc<dyn AreaGenerator>>,
    pub ticket_generator: Option<Arc<dyn TicketGenerator>>,
    /// Override the tool-server bind address (tests bind port 0).
    pub bind_addr: Option<SocketAddr>,
    pub idle_interval: Duration,
}

impl KernelOptions {
    pub fn new(repo_root: PathBuf, config: Config) -> Self {
        Self {
            repo_root,
            config,
            paths: None,
            subprocess: None,
            area_generator: None,
            ticket_generator: None,
            bind_addr: None,
            idle_interval: IDLE_INTERVAL,
        }
    }
}

pub struct Kernel {
    repo_root: PathBuf,
    config: Config,
    paths: ManagedPaths,
    git: GitOps,
    subprocess: SubprocessManager,
    gateway: PlanGateway,
    worktrees: WorktreeManager,
    harness: Arc<AgentHarness>,
    mcp: Option<McpHandle>,
    tasks_rx: mpsc::UnboundedReceiver<KernelTask>,
    area_generator: Arc<dyn AreaGenerator>,
    ticket_generator: Arc<dyn TicketGenerator>,
    shutdown: Arc<AtomicBool>,
    idle_interval: Duration,
}

/// One consistent view of the plan tree, read in a single plan checkout.
#[derive(Debug, Default)]
pub struct PlanSnapshot {
    pub spec: String,
    pub areas: Vec<String>,
    pub open: Vec<String>,
    /// In-progress ticket paths with their bound worktree, when set.
    pub in_progress: Vec<(String, Option<PathBuf>)>,
    pub pending_queue: Vec<String>,
    pub active_marker: Option<String>,
    /// Area relative path → whether any open or in-progress ticket
    /// references it.
    pub area_coverage: HashMap<String, bool>,
}

impl Kernel {
    /// Wire up the kernel and start its tool server.
    pub async fn start(options: KernelOptions) -> Result<Self> {
        let repo_root = options
            .repo_root
            .canonicalize()
            .unwrap_or(options.repo_root);
        let paths = options
            .paths
            .unwrap_or_else(|| ManagedPaths::for_repo(&repo_root));
        let subprocess = options
            .subprocess
            .unwrap_or_else(SubprocessManager::production);
        let git = GitOps::new(subprocess.runner());
        let gateway = PlanGateway::new(repo_root.clone(), paths.clone(), git.clone());
        let worktrees = WorktreeManager::new(repo_root.clone(), paths.clone(), git.clone());
        let harness = Arc::new(AgentHarness::new(&options.config.agent, paths.logs()));

        let bind_addr = match options.bind_addr {
            Some(addr) => addr,
            None => options.config.local_addr()?,
        };
        let (mcp, tasks_rx) = mcp::start(bind_addr).await?;

        let planner = HarnessPlanner::new(
            Arc::clone(&harness),
            repo_root.clone(),
            options.config.clone(),
        );
        let planner = Arc::new(planner);
        let area_generator: Arc<dyn AreaGenerator> = match options.area_generator {
            Some(custom) => custom,
            None => planner.clone(),
        };
        let ticket_generator: Arc<dyn TicketGenerator> = match options.ticket_generator {
            Some(custom) => custom,
            None => planner,
        };

        Ok(Self {
            repo_root,
            config: options.config,
            paths,
            git,
            subprocess,
            gateway,
            worktrees,
            harness,
            mcp: Some(mcp),
            tasks_rx,
            area_generator,
            ticket_generator,
            shutdown: Arc::new(AtomicBool::new(false)),
            idle_interval: options.idle_interval,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Flag flipped by the signal handlers; the loop exits at the next
    /// tick boundary.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn mcp(&self) -> &McpHandle {
        self.mcp
            .as_ref()
            .expect("tool server only detaches during final shutdown")
    }

    /// URL of the running tool server.
    pub fn tool_server_url(&self) -> String {
        self.mcp().url().to_string()
    }

    /// Session token agents must present to the tool server.
    pub fn tool_session_token(&self) -> String {
        self.mcp().session_token().to_string()
    }

    /// Stop the tool server and join its task.
    pub async fn stop(&mut self) {
        if let Some(mcp) = self.mcp.take() {
            mcp.shutdown().await;
        }
    }

    /// Read one consistent snapshot of the plan tree.
    pub async fn snapshot(&self) -> Result<PlanSnapshot> {
        self.gateway.read(Self::read_snapshot).await
    }

    fn read_snapshot(plan_root: &Path) -> Result<PlanSnapshot> {
        let spec = plan::read_plan_file(plan_root, plan::SPEC_FILE).unwrap_or_default();
        let areas = plan::list_areas(plan_root)?;
        let open = plan::list_tickets(plan_root, TicketState::Open)?;

        let mut in_progress = Vec::new();
        for rel in plan::list_tickets(plan_root, TicketState::InProgress)? {
            let body = plan::read_plan_file(plan_root, &rel)?;
            let worktree = tickets::extract_field(&body, "Worktree").map(PathBuf::from);
            in_progress.push((rel, worktree));
        }

        let pending_queue = plan::list_markdown(plan_root, plan::QUEUE_PENDING_DIR)?;
        let active_marker = std::fs::read_to_string(plan_root.join(plan::QUEUE_ACTIVE_FILE))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let mut area_coverage = HashMap::new();
        for area in &areas {
            let active = tickets::active_tickets_for_area(plan_root, area)?;
            area_coverage.insert(area.clone(), !active.is_empty());
        }

        Ok(PlanSnapshot {
            spec,
            areas,
            open,
            in_progress,
            pending_queue,
            active_marker,
            area_coverage,
        })
    }

    /// Relative area path referenced by a ticket body, when present and
    /// well-formed.
    fn ticket_area(body: &str) -> Option<String> {
        tickets::extract_field(body, "Area")
            .and_then(|raw| tickets::normalize_area_path(&raw).ok())
    }

    fn coding_model(&self) -> String {
        self.config.coding_model()
    }
}

/// Surface an error without aborting the loop; transient environmental
/// failures are expected between ticks.
pub(crate) fn is_transient(error: &Error) -> bool {
    matches!(
        error,
        Error::PlanBranchMissing(_) | Error::PlanWorktreeBusy(_) | Error::LockContended { .. }
    )
}
