//! Replay stream endpoint: lossless, resumable delivery over SSE.
//!
//! A client connects (or reconnects) with an optional `Last-Event-ID` header;
//! everything from that cursor onward is replayed from the event log, after
//! which the stream parks in the log's blocking wait until new events arrive.
//! Event ids are the log's sequence numbers, so the browser's automatic
//! reconnect resumes with no gaps and no duplicates. The stream closes after
//! the terminal event (`done` or `failed`) is delivered.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;

use super::api::SharedState;
use crate::job::JobStatus;
use crate::job::event::{Event, EventKind};
use crate::job::log::EventLog;

/// Reconnect backoff hint sent near stream start.
const RETRY_HINT: Duration = Duration::from_secs(3);

/// Upper bound on one blocking wait; the loop just re-checks and parks
/// again, while axum's keep-alive comments keep the connection warm.
const WAIT_TIMEOUT: Duration = Duration::from_secs(15);

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

pub async fn stream_output(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static> {
    let cursor = last_event_id(&headers)
        .map(|id| id.saturating_add(1))
        .unwrap_or(0);
    tracing::debug!(cursor, "replay stream connected");
    Sse::new(replay_stream(state.controller.log(), cursor))
        .keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keep-alive"))
}

/// Cursor from the standard SSE reconnect header, if present and sane.
fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

struct ReplayState {
    log: Arc<EventLog>,
    cursor: u64,
    pending: VecDeque<SseEvent>,
    retry_sent: bool,
    finished: bool,
}

/// Replay `log` from `cursor`, then follow it live until it closes.
fn replay_stream(
    log: Arc<EventLog>,
    cursor: u64,
) -> impl Stream<Item = Result<SseEvent, Infallible>> + Send + 'static {
    let state = ReplayState {
        log,
        cursor,
        pending: VecDeque::new(),
        retry_sent: false,
        finished: false,
    };
    futures::stream::unfold(state, |mut st| async move {
        if !st.retry_sent {
            st.retry_sent = true;
            return Some((Ok(SseEvent::default().retry(RETRY_HINT)), st));
        }
        loop {
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }
            let (events, open) = st.log.read_from(st.cursor);
            if let Some(last) = events.last() {
                st.cursor = last.seq + 1;
                st.pending.extend(events.iter().map(to_sse_event));
                continue;
            }
            if !open {
                st.finished = true;
                continue;
            }
            st.log.wait_for_more(st.cursor, WAIT_TIMEOUT).await;
        }
    })
}

/// One log event as one SSE block: `id` is the sequence number, lifecycle
/// milestones and the terminal status get named event types.
fn to_sse_event(event: &Event) -> SseEvent {
    let sse = SseEvent::default()
        .id(event.seq.to_string())
        .data(event.data.clone());
    match event.kind {
        EventKind::Line { .. } => sse,
        EventKind::Lifecycle => sse.event("event"),
        EventKind::Terminal {
            status: JobStatus::Completed,
        } => sse.event("done"),
        EventKind::Terminal { .. } => sse.event("failed"),
    }
}
