use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("process exited with code {0}")]
    ExitCode(i32),

    #[error("process timed out after {0:?}")]
    Timeout(Duration),

    #[error("mock expectation not met: {0}")]
    MockExpectationNotMet(String),
}
