//! Per-attribute one-shot timers that coalesce bursts of local changes.
//!
//! A slider emits an event for every pixel of motion; writing each one to a
//! BLE link with tens of milliseconds of write latency would flood it. So
//! each attribute gets at most one armed timer; rescheduling aborts the old
//! timer rather than queueing behind it. When a timer fires it posts
//! `WriteDue` back onto the session's message channel, and the session
//! re-reads the store for the latest value at that point. The value captured
//! at schedule time is never written.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::domain::models::Attribute;
use crate::domain::session::SessionMessage;

struct PendingTimer {
    generation: u64,
    task: JoinHandle<()>,
}

pub(crate) struct DebouncedWriter {
    session: mpsc::UnboundedSender<SessionMessage>,
    pending: HashMap<Attribute, PendingTimer>,
    /// Monotonic tag carried in every `WriteDue`. A timer can fire and
    /// enqueue its message in the instant before a reschedule aborts it;
    /// the tag lets the consumer tell that stale firing apart from the
    /// replacement timer's.
    generation: u64,
}

impl DebouncedWriter {
    pub(crate) fn new(session: mpsc::UnboundedSender<SessionMessage>) -> Self {
        Self {
            session,
            pending: HashMap::new(),
            generation: 0,
        }
    }

    /// Arm (or re-arm) the timer for one attribute.
    pub(crate) fn schedule(&mut self, attribute: Attribute, delay: Duration) {
        if let Some(previous) = self.pending.remove(&attribute) {
            previous.task.abort();
        }
        self.generation += 1;
        let generation = self.generation;
        trace!(%attribute, ?delay, generation, "debounce armed");

        let session = self.session.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = session.send(SessionMessage::WriteDue {
                attribute,
                generation,
            });
        });
        self.pending.insert(attribute, PendingTimer { generation, task });
    }

    /// Consume one `WriteDue`. Returns true and disarms the timer when the
    /// firing is current; a stale firing (already replaced by a reschedule
    /// or cancelled) returns false and leaves any armed timer untouched.
    pub(crate) fn acknowledge(&mut self, attribute: Attribute, generation: u64) -> bool {
        match self.pending.get(&attribute) {
            Some(pending) if pending.generation == generation => {
                self.pending.remove(&attribute);
                true
            }
            _ => false,
        }
    }

    /// Drop every armed timer without flushing. Used on disconnect and
    /// teardown.
    pub(crate) fn cancel_all(&mut self) {
        for (_, pending) in self.pending.drain() {
            pending.task.abort();
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for DebouncedWriter {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
