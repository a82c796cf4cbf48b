//! Event and push-message types for job output.
//!
//! An [`Event`] is one unit of captured output, sequence-numbered and stored
//! in the `EventLog` for replay. An [`OutputMessage`] is the wire twin pushed
//! to live WebSocket subscribers; it carries no sequence number because the
//! push path offers no replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobStatus;

/// Which stream an output line originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTag {
    Stdout,
    Stderr,
    /// Produced by the controller itself, e.g. a setup-failure description.
    Diagnostic,
}

impl OutputTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Diagnostic => "diagnostic",
        }
    }
}

/// What an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A plain output line from the action.
    Line { tag: OutputTag },
    /// A structured lifecycle milestone ("Play started: ...").
    Lifecycle,
    /// The single terminal notification closing the job.
    Terminal { status: JobStatus },
}

/// One unit of job output. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Position in the log; strictly increasing from 0, no gaps. Doubles as
    /// the resumable cursor exposed to SSE clients as the event id.
    pub seq: u64,
    pub kind: EventKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(seq: u64, kind: EventKind, data: impl Into<String>) -> Self {
        Self {
            seq,
            kind,
            data: data.into(),
            timestamp: Utc::now(),
        }
    }

    /// The push-message kind this event maps to.
    pub fn message_kind(&self) -> MessageKind {
        match self.kind {
            EventKind::Line {
                tag: OutputTag::Stdout,
            } => MessageKind::Stdout,
            EventKind::Line { .. } => MessageKind::Stderr,
            EventKind::Lifecycle => MessageKind::Event,
            EventKind::Terminal { .. } => MessageKind::Status,
        }
    }
}

/// Message category on the WebSocket push stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Stdout,
    Stderr,
    Event,
    Status,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Event => "event",
            Self::Status => "status",
        }
    }
}

/// Structured message pushed to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: String,
    pub timestamp: DateTime<Utc>,
    pub job_id: Option<Uuid>,
}

impl OutputMessage {
    pub fn new(kind: MessageKind, data: impl Into<String>, job_id: Option<Uuid>) -> Self {
        Self {
            kind,
            data: data.into(),
            timestamp: Utc::now(),
            job_id,
        }
    }

    /// Build the push twin of a logged event.
    pub fn from_event(event: &Event, job_id: Option<Uuid>) -> Self {
        Self {
            kind: event.message_kind(),
            data: event.data.clone(),
            timestamp: event.timestamp,
            job_id,
        }
    }
}
