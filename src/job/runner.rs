//! The seam between the controller and whatever actually performs the work.
//!
//! An [`ActionRunner`] reports everything through the [`EventSink`] it is
//! handed and finishes with a single exit code or error; the controller turns
//! that into the terminal event, so a runner cannot leave a job stuck in
//! `running` no matter how it fails.
//!
//! [`PlaybookRunner`] is the shipped implementation: it executes a
//! provisioning playbook as a child process and streams stdout/stderr line by
//! line as they are produced.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::EventSink;
use super::event::OutputTag;
use crate::errors::RunnerError;

/// A provisioning action driven by the job controller.
#[async_trait]
pub trait ActionRunner: Send + Sync + 'static {
    /// Run the action to completion, reporting output lines and lifecycle
    /// milestones through `sink`. The returned exit code (or error) is the
    /// job's terminal notification.
    async fn run(&self, sink: &EventSink) -> Result<i32, RunnerError>;
}

/// Executes a playbook via the configured interpreter (`ansible-playbook`
/// by default) and streams its output.
#[derive(Debug)]
pub struct PlaybookRunner {
    playbook: PathBuf,
    interpreter: String,
    extra_vars: serde_json::Map<String, serde_json::Value>,
}

impl PlaybookRunner {
    /// Resolve `name` inside `playbook_dir`. Traversal attempts and unknown
    /// playbooks are rejected here so a bad start request fails
    /// synchronously, before any job state changes.
    pub fn new(
        playbook_dir: &Path,
        name: &str,
        interpreter: impl Into<String>,
        extra_vars: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, RunnerError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(RunnerError::InvalidPlaybookName {
                name: name.to_string(),
            });
        }
        let playbook = playbook_dir.join(name);
        if !playbook.is_file() {
            return Err(RunnerError::PlaybookNotFound { path: playbook });
        }
        Ok(Self {
            playbook,
            interpreter: interpreter.into(),
            extra_vars,
        })
    }

    fn playbook_name(&self) -> String {
        self.playbook
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.playbook.display().to_string())
    }
}

#[async_trait]
impl ActionRunner for PlaybookRunner {
    async fn run(&self, sink: &EventSink) -> Result<i32, RunnerError> {
        sink.lifecycle(format!("Play started: {}", self.playbook_name()));

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.playbook)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.extra_vars.is_empty() {
            // ansible-playbook accepts inline JSON for extra vars.
            command
                .arg("-e")
                .arg(serde_json::Value::Object(self.extra_vars.clone()).to_string());
        }

        let mut child = command.spawn().map_err(|source| RunnerError::SpawnFailed {
            command: self.interpreter.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::OutputRead(std::io::Error::other("stdout not piped")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::OutputRead(std::io::Error::other("stderr not piped")))?;

        // Stderr drains on its own task so a chatty stderr cannot deadlock
        // the child against a full pipe while we read stdout.
        let stderr_sink = sink.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_sink.line(OutputTag::Stderr, line);
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(RunnerError::OutputRead)?
        {
            sink.line(OutputTag::Stdout, line);
        }

        let _ = stderr_task.await;
        let status = child.wait().await.map_err(RunnerError::WaitFailed)?;
        sink.lifecycle("Playbook finished");

        status.code().ok_or(RunnerError::NoExitCode)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::super::event::EventKind;
    use super::super::log::EventLog;
    use super::*;
    use crate::broadcast::Broadcaster;

    fn no_vars() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    fn sink_with_log() -> (EventSink, Arc<EventLog>) {
        let log = Arc::new(EventLog::new());
        let sink = EventSink {
            log: Arc::clone(&log),
            broadcaster: Broadcaster::new(),
            job_id: Uuid::new_v4(),
        };
        (sink, log)
    }

    fn write_playbook(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn rejects_path_traversal_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["../evil.yml", "a/b.yml", "..", ""] {
            let err = PlaybookRunner::new(dir.path(), name, "sh", no_vars()).unwrap_err();
            assert!(
                matches!(err, RunnerError::InvalidPlaybookName { .. }),
                "expected InvalidPlaybookName for {name:?}"
            );
        }
    }

    #[test]
    fn rejects_missing_playbook() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlaybookRunner::new(dir.path(), "site.yml", "sh", no_vars()).unwrap_err();
        assert!(matches!(err, RunnerError::PlaybookNotFound { .. }));
    }

    #[tokio::test]
    async fn streams_stdout_and_stderr_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_playbook(
            dir.path(),
            "site.sh",
            "echo one\necho two\necho warn >&2\nexit 0\n",
        );
        let runner = PlaybookRunner::new(dir.path(), "site.sh", "sh", no_vars()).unwrap();
        let (sink, log) = sink_with_log();

        let code = runner.run(&sink).await.unwrap();
        assert_eq!(code, 0);

        let (events, _) = log.read_from(0);
        assert_eq!(events[0].kind, EventKind::Lifecycle);
        assert!(events[0].data.contains("site.sh"));
        let stdout_lines: Vec<&str> = events
            .iter()
            .filter(|e| {
                e.kind
                    == EventKind::Line {
                        tag: OutputTag::Stdout,
                    }
            })
            .map(|e| e.data.as_str())
            .collect();
        assert_eq!(stdout_lines, vec!["one", "two"]);
        assert!(events.iter().any(|e| {
            e.kind
                == EventKind::Line {
                    tag: OutputTag::Stderr,
                }
                && e.data == "warn"
        }));
        assert_eq!(events.last().unwrap().kind, EventKind::Lifecycle);
        assert_eq!(events.last().unwrap().data, "Playbook finished");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        write_playbook(dir.path(), "fail.sh", "echo doomed\nexit 3\n");
        let runner = PlaybookRunner::new(dir.path(), "fail.sh", "sh", no_vars()).unwrap();
        let (sink, _log) = sink_with_log();

        let code = runner.run(&sink).await.unwrap();
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn spawn_failure_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        write_playbook(dir.path(), "site.yml", "- hosts: localhost\n");
        let runner =
            PlaybookRunner::new(dir.path(), "site.yml", "/nonexistent/interpreter", no_vars())
                .unwrap();
        let (sink, _log) = sink_with_log();

        let err = runner.run(&sink).await.unwrap_err();
        assert!(matches!(err, RunnerError::SpawnFailed { .. }));
        assert!(err.is_setup_failure());
    }

    #[tokio::test]
    async fn extra_vars_are_passed_inline() {
        let dir = tempfile::tempdir().unwrap();
        write_playbook(dir.path(), "args.sh", "echo args:\"$@\"\n");
        let mut vars = serde_json::Map::new();
        vars.insert(
            "external_domain".to_string(),
            serde_json::Value::String("example.org".to_string()),
        );
        let runner = PlaybookRunner::new(dir.path(), "args.sh", "sh", vars).unwrap();
        let (sink, log) = sink_with_log();

        runner.run(&sink).await.unwrap();
        let (events, _) = log.read_from(0);
        assert!(events.iter().any(|e| {
            e.data.contains("-e") && e.data.contains("external_domain")
        }));
    }
}
