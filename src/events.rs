// events.rs - Outbound event taxonomy (SPEC_FULL.md §3 Event Sinks, §6).

use std::time::Duration;

use tokio::sync::broadcast;

use crate::types::Block;

/// Capacity of the broadcast channel backing [`EventSink`]. A lagging
/// subscriber drops old events and resyncs on its next `recv` rather than
/// stalling the dispatcher (SPEC_FULL.md §9: emission never blocks the
/// scheduler).
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One of the four events a [`crate::scheduler::BlockScheduler`] emits for
/// the lifetime of a frame.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A block was popped from the pending queue and dispatched to a
    /// worker. Emitted in dispatch order.
    Queued { block: Block },
    /// A block was pulled back from a worker (pool shrink) and returned to
    /// the pending queue.
    Unqueued { block: Block },
    /// A block's pixels were composited into the frame buffer.
    /// `done`/`total` are the frame's running counters.
    Progress { block: Block, done: u32, total: u32 },
    /// The frame's last block has been composited.
    Done { duration: Duration },
}

/// Multi-producer (scheduler-only)/multi-consumer broadcast sink for
/// [`SchedulerEvent`]. A thin wrapper over `tokio::sync::broadcast` so the
/// scheduler has one small surface (`emit`/`subscribe`) instead of reaching
/// for the channel API directly at every call site.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SchedulerEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.tx.subscribe()
    }

    /// Best-effort emit. No subscribers is not an error.
    pub(crate) fn emit(&self, event: SchedulerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockId;

    fn block(id: u64) -> Block {
        Block { id: BlockId(id), x: 0, y: 0, width: 4, height: 4 }
    }

    #[test]
    fn emit_without_subscribers_does_not_panic() {
        let sink = EventSink::new();
        sink.emit(SchedulerEvent::Queued { block: block(0) });
    }

    #[tokio::test]
    async fn subscribers_receive_emitted_events_in_order() {
        let sink = EventSink::new();
        let mut rx = sink.subscribe();

        sink.emit(SchedulerEvent::Queued { block: block(1) });
        sink.emit(SchedulerEvent::Progress { block: block(1), done: 1, total: 4 });

        match rx.recv().await.unwrap() {
            SchedulerEvent::Queued { block } => assert_eq!(block.id, BlockId(1)),
            other => panic!("unexpected event: {other:?}"),
        }
        match rx.recv().await.unwrap() {
            SchedulerEvent::Progress { done, total, .. } => {
                assert_eq!((done, total), (1, 4));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn independent_subscribers_each_get_their_own_stream() {
        let sink = EventSink::new();
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        sink.emit(SchedulerEvent::Done { duration: Duration::from_millis(5) });

        assert!(matches!(a.recv().await.unwrap(), SchedulerEvent::Done { .. }));
        assert!(matches!(b.recv().await.unwrap(), SchedulerEvent::Done { .. }));
    }
}
