//! Job orchestration: the single-flight controller and its state machine.
//!
//! At most one provisioning job runs at a time, process-wide. The controller
//! owns the status state machine (`idle → running → {completed | failed}`),
//! is the sole writer of the event log, and converts runner callbacks into
//! sequence-numbered events mirrored onto the push broadcaster.

pub mod event;
pub mod log;
pub mod runner;

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::errors::{RunnerError, StartError};
use self::event::{Event, EventKind, MessageKind, OutputMessage, OutputTag};
use self::log::EventLog;
use self::runner::ActionRunner;

// ── Status state machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Terminal states end the current job but do not block a later start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

// ── Job state ────────────────────────────────────────────────────────

#[derive(Default)]
struct JobState {
    status: JobStatus,
    job_id: Option<Uuid>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    return_code: Option<i32>,
}

/// Point-in-time view of the current (or most recent) job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub job_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub return_code: Option<i32>,
}

// ── Event sink ───────────────────────────────────────────────────────

/// Callback surface handed to a running action. Safe to use from the
/// runner's own task; every call appends exactly one event to the log and
/// mirrors it to the broadcaster.
#[derive(Clone)]
pub struct EventSink {
    log: Arc<EventLog>,
    broadcaster: Arc<Broadcaster>,
    job_id: Uuid,
}

impl EventSink {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Record one output line from the action.
    pub fn line(&self, tag: OutputTag, text: impl Into<String>) {
        self.emit(EventKind::Line { tag }, text);
    }

    /// Record a structured lifecycle milestone.
    pub fn lifecycle(&self, text: impl Into<String>) {
        self.emit(EventKind::Lifecycle, text);
    }

    /// Record a controller/runner notice that belongs to no output stream.
    pub fn diagnostic(&self, text: impl Into<String>) {
        self.line(OutputTag::Diagnostic, text);
    }

    fn emit(&self, kind: EventKind, data: impl Into<String>) -> Event {
        let event = self.log.append(kind, data);
        self.broadcaster
            .publish(OutputMessage::from_event(&event, Some(self.job_id)));
        event
    }

    /// Append the single terminal event and close the log. Controller-only.
    fn terminal(&self, status: JobStatus, data: String) {
        self.emit(EventKind::Terminal { status }, data);
        self.log.close();
    }
}

// ── Controller ───────────────────────────────────────────────────────

/// Owns the single-flight invariant and routes runner output into the log
/// and broadcaster. One instance per process, injected into the server.
pub struct JobController {
    log: Arc<EventLog>,
    broadcaster: Arc<Broadcaster>,
    state: Arc<Mutex<JobState>>,
}

impl JobController {
    pub fn new(broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            log: Arc::new(EventLog::new()),
            broadcaster,
            state: Arc::new(Mutex::new(JobState::default())),
        }
    }

    /// The replayable log of the current job, shared with the SSE adapter.
    pub fn log(&self) -> Arc<EventLog> {
        Arc::clone(&self.log)
    }

    /// Start a job. Rejects with `AlreadyRunning` while one is in flight;
    /// otherwise atomically discards the previous job's events, assigns a
    /// fresh job id, and hands the runner off to its own task.
    pub fn start(&self, action: Box<dyn ActionRunner>) -> Result<Uuid, StartError> {
        let job_id = {
            let mut state = lock_state(&self.state);
            if state.status == JobStatus::Running {
                return Err(StartError::AlreadyRunning);
            }
            self.log.reset();
            let id = Uuid::new_v4();
            *state = JobState {
                status: JobStatus::Running,
                job_id: Some(id),
                started_at: Some(Utc::now()),
                finished_at: None,
                return_code: None,
            };
            id
        };
        tracing::info!(%job_id, "job started");
        self.broadcaster.publish(OutputMessage::new(
            MessageKind::Status,
            JobStatus::Running.as_str(),
            Some(job_id),
        ));

        let sink = EventSink {
            log: Arc::clone(&self.log),
            broadcaster: Arc::clone(&self.broadcaster),
            job_id,
        };
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let outcome = action.run(&sink).await;
            record_outcome(&state, &sink, outcome);
        });

        Ok(job_id)
    }

    /// Lock-protected read of the current job state. Always succeeds.
    pub fn status(&self) -> JobSnapshot {
        let state = lock_state(&self.state);
        JobSnapshot {
            status: state.status,
            job_id: state.job_id,
            started_at: state.started_at,
            finished_at: state.finished_at,
            return_code: state.return_code,
        }
    }
}

fn lock_state(state: &Mutex<JobState>) -> std::sync::MutexGuard<'_, JobState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Convert the runner's result into the single terminal notification: status
/// flip, end timestamp, result code, and one terminal event. Runs on the job
/// task, so a runner that errored internally still terminates the job.
fn record_outcome(
    state: &Mutex<JobState>,
    sink: &EventSink,
    outcome: Result<i32, RunnerError>,
) {
    let (status, return_code, terminal_data) = match outcome {
        Ok(0) => (JobStatus::Completed, Some(0), "completed".to_string()),
        Ok(code) => (
            JobStatus::Failed,
            Some(code),
            format!("failed with exit code {code}"),
        ),
        Err(err) => (JobStatus::Failed, None, err.to_string()),
    };
    {
        let mut state = lock_state(state);
        state.status = status;
        state.finished_at = Some(Utc::now());
        state.return_code = return_code;
    }
    sink.terminal(status, terminal_data);
    tracing::info!(job_id = %sink.job_id, status = status.as_str(), "job finished");
}
