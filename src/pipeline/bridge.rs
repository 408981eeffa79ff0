//! Thread boundary between the refresh worker and the UI thread.
//!
//! The worker pushes [`RefreshMessage`]s into a bounded channel without
//! blocking; the UI drains them from its timer tick. When the UI falls
//! behind, messages are dropped and counted rather than stalling the walk.
//! The final `Finished` message is always delivered.

use crate::pipeline::walk::{RefreshEvent, RefreshStats, RefreshStatus};
use crossbeam_channel::{bounded, Receiver, Sender};

/// Messages sent from the refresh worker to the UI thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshMessage {
    /// Per-filter progress, console output and failure.
    Event(RefreshEvent),

    /// The walk is over. Sent exactly once, last.
    Finished {
        status: RefreshStatus,
        stats: RefreshStats,
    },
}

/// Channel capacity for messages (worker → UI).
const MSG_CHANNEL_CAPACITY: usize = 10_000;

/// Worker-side end of the bridge.
#[derive(Debug)]
pub struct WorkerSink {
    tx: Sender<RefreshMessage>,
    dropped: u64,
}

impl WorkerSink {
    pub fn send_event(&mut self, event: RefreshEvent) {
        // Last slot is reserved for `Finished`; this is the only sender
        if self.tx.len() + 1 >= MSG_CHANNEL_CAPACITY
            || self.tx.try_send(RefreshMessage::Event(event)).is_err()
        {
            self.dropped += 1;
        }
    }

    /// Deliver the final message into the reserved slot.
    pub fn finish(self, status: RefreshStatus, stats: RefreshStats) {
        if self.dropped > 0 {
            tracing::warn!(
                "Refresh worker dropped {} messages due to backpressure",
                self.dropped
            );
        }
        // The receiver may already be gone if the controller was dropped
        let _ = self.tx.try_send(RefreshMessage::Finished { status, stats });
    }
}

/// UI-side handle for reading worker messages.
#[derive(Debug)]
pub struct RefreshBridge {
    msg_rx: Receiver<RefreshMessage>,
}

impl RefreshBridge {
    /// Create a bridge pair: `(bridge_for_ui, sink_for_worker)`.
    pub fn new() -> (Self, WorkerSink) {
        let (tx, msg_rx) = bounded(MSG_CHANNEL_CAPACITY);
        (Self { msg_rx }, WorkerSink { tx, dropped: 0 })
    }

    /// Drain all pending messages.
    pub fn drain(&self) -> Vec<RefreshMessage> {
        self.msg_rx.try_iter().collect()
    }

    /// Try to receive a single message without blocking.
    pub fn try_recv(&self) -> Option<RefreshMessage> {
        self.msg_rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::id::FilterId;

    #[test]
    fn test_finished_arrives_last() {
        let (bridge, mut sink) = RefreshBridge::new();
        sink.send_event(RefreshEvent::FilterFinished {
            filter: FilterId::new(0, 0),
            from_cache: true,
        });
        sink.finish(RefreshStatus::Completed, RefreshStats::default());
        let msgs = bridge.drain();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(
            msgs[1],
            RefreshMessage::Finished {
                status: RefreshStatus::Completed,
                ..
            }
        ));
        assert!(bridge.try_recv().is_none());
    }

    #[test]
    fn test_full_channel_drops_events() {
        let (bridge, mut sink) = RefreshBridge::new();
        for _ in 0..MSG_CHANNEL_CAPACITY + 5 {
            sink.send_event(RefreshEvent::FilterFinished {
                filter: FilterId::new(0, 0),
                from_cache: false,
            });
        }
        assert_eq!(sink.dropped, 6);
        sink.finish(RefreshStatus::Aborted, RefreshStats::default());
        let msgs = bridge.drain();
        assert_eq!(msgs.len(), MSG_CHANNEL_CAPACITY);
        assert!(matches!(msgs.last(), Some(RefreshMessage::Finished { .. })));
    }
}
