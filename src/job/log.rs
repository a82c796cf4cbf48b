//! Append-only, sequence-numbered event log for the current job.
//!
//! The log is the lossless side of output delivery: every event the job emits
//! is stored here in emission order, and sequence numbers double as the
//! resumable cursor handed to SSE clients. Readers catch up with
//! [`EventLog::read_from`] and park in [`EventLog::wait_for_more`] until new
//! events arrive, the job closes, or their timeout elapses.
//!
//! Locking discipline: one mutex guards storage, the sequence counter, and
//! the closed flag; it is held only for appends and snapshots, never across
//! an await. Wakeups go through a separate `Notify` so waiters don't contend
//! with writers.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::event::{Event, EventKind};

#[derive(Default)]
struct LogInner {
    events: Vec<Event>,
    next_seq: u64,
    closed: bool,
}

/// Ordered store of the current job's events with blocking-wait support.
pub struct EventLog {
    inner: Mutex<LogInner>,
    notify: Notify,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LogInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event, assigning the next sequence number, and wake any
    /// blocked readers. Returns the stored event.
    pub fn append(&self, kind: EventKind, data: impl Into<String>) -> Event {
        let event = {
            let mut inner = self.lock();
            let event = Event::new(inner.next_seq, kind, data);
            inner.next_seq += 1;
            inner.events.push(event.clone());
            event
        };
        self.notify.notify_waiters();
        event
    }

    /// Clear storage and reset the sequence counter to 0. Called by the
    /// controller when a new job starts; wakes waiters so streams of the
    /// previous job re-check their cursor.
    pub fn reset(&self) {
        {
            let mut inner = self.lock();
            inner.events.clear();
            inner.next_seq = 0;
            inner.closed = false;
        }
        self.notify.notify_waiters();
    }

    /// Mark the log terminal and wake all waiters. No further events are
    /// expected until the next `reset`.
    pub fn close(&self) {
        {
            let mut inner = self.lock();
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Snapshot of all events with `seq >= cursor`, plus whether the log is
    /// still open (more events may come). Idempotent: the same cursor yields
    /// the same events until new ones are appended.
    pub fn read_from(&self, cursor: u64) -> (Vec<Event>, bool) {
        let inner = self.lock();
        let start = cursor.min(inner.next_seq) as usize;
        (inner.events[start..].to_vec(), !inner.closed)
    }

    /// Sequence number the next event will receive.
    pub fn next_seq(&self) -> u64 {
        self.lock().next_seq
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Suspend until an event with `seq >= cursor` exists, the log closes,
    /// or `timeout` elapses — whichever happens first. Returns whether an
    /// event at or past the cursor is now available.
    ///
    /// Cancel-safe: dropping the returned future releases the waiter.
    pub async fn wait_for_more(&self, cursor: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an append between the check and the
            // await cannot be missed.
            notified.as_mut().enable();
            {
                let inner = self.lock();
                if inner.next_seq > cursor {
                    return true;
                }
                if inner.closed {
                    return false;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let inner = self.lock();
                return inner.next_seq > cursor;
            }
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
