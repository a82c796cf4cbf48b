//! Typed error hierarchy for the rigger daemon.
//!
//! Two enums cover the two failure surfaces:
//! - `StartError` — a start request rejected synchronously, no state change
//! - `RunnerError` — the external action failed to set up or to finish cleanly

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned synchronously from `JobController::start`.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("a job is already running")]
    AlreadyRunning,
}

/// Errors raised by an action runner.
///
/// A `RunnerError` never escapes the job task: the controller records it as a
/// diagnostic event plus a `failed` terminal status. Variants that occur
/// before the action produced any output are setup failures; the rest are
/// runtime failures.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("playbook not found: {}", path.display())]
    PlaybookNotFound { path: PathBuf },

    #[error("invalid playbook name '{name}'")]
    InvalidPlaybookName { name: String },

    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read process output: {0}")]
    OutputRead(#[source] std::io::Error),

    #[error("failed to wait for process exit: {0}")]
    WaitFailed(#[source] std::io::Error),

    #[error("process terminated by signal before reporting an exit code")]
    NoExitCode,
}

impl RunnerError {
    /// True when the action never got to run at all (connection, spawn, or
    /// precondition errors), as opposed to failing mid-flight.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            RunnerError::PlaybookNotFound { .. }
                | RunnerError::InvalidPlaybookName { .. }
                | RunnerError::SpawnFailed { .. }
        )
    }
}
