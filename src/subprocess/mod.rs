//! Unified subprocess abstraction for external tool integration
//!
//! Every external command the kernel issues (`git` plumbing, the project's
//! `make test` quality gate) goes through this layer, so process management
//! and error handling stay consistent and unit tests can substitute a mock
//! runner. The agent harness is the one exception: it owns its child process
//! directly because it needs incremental reads and mid-run kills.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::MockProcessRunner;
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};

use std::sync::Arc;

/// Central manager for subprocess operations.
///
/// Holds the [`ProcessRunner`] implementation behind an `Arc` so every
/// component shares one runner, and tests can inject a mock.
#[derive(Clone)]
pub struct SubprocessManager {
    runner: Arc<dyn ProcessRunner>,
}

impl SubprocessManager {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Production manager backed by the real Tokio process runner.
    pub fn production() -> Self {
        Self::new(Arc::new(TokioProcessRunner))
    }

    /// Mock manager for tests; returns the mock handle for configuring
    /// expected calls.
    pub fn mock() -> (Self, MockProcessRunner) {
        let mock = MockProcessRunner::new();
        let runner = Arc::new(mock.clone()) as Arc<dyn ProcessRunner>;
        (Self::new(runner), mock)
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }
}
