//! Optional metrics hook (spec §4.H). The engine treats the sink as
//! opaque; it must be externally synchronized if shared across sessions.

use parking_lot::Mutex;
use std::sync::Arc;

/// Events delivered to a [`MetricsSink`]. `session_id` identifies the
/// emitting session; the payload is event-specific.
#[derive(Debug, Clone)]
pub enum MetricEvent {
    RequestStart,
    FirstToken { elapsed_ms: u64 },
    TokenEmitted { index: u32 },
    RequestComplete { tokens_generated: u32, wall_ms: u64 },
    KvBudgetExceeded,
    ContextPolicyApplied { dropped_tokens: usize },
}

/// Receives `(session_id, event)` pairs. Implementations must be `Send +
/// Sync`; the core never locks around a call into the sink.
pub trait MetricsSink: Send + Sync {
    fn on_event(&self, session_id: uuid::Uuid, event: MetricEvent);
}

/// Default sink: drops everything.
#[derive(Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn on_event(&self, _session_id: uuid::Uuid, _event: MetricEvent) {}
}

/// In-memory sink used by tests and the CLI's `--verbose` mode; records
/// every event it receives in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(uuid::Uuid, MetricEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<(uuid::Uuid, MetricEvent)> {
        self.events.lock().clone()
    }
}

impl MetricsSink for RecordingSink {
    fn on_event(&self, session_id: uuid::Uuid, event: MetricEvent) {
        self.events.lock().push((session_id, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_arrival_order() {
        let sink = RecordingSink::new();
        let id = uuid::Uuid::new_v4();
        sink.on_event(id, MetricEvent::RequestStart);
        sink.on_event(id, MetricEvent::FirstToken { elapsed_ms: 12 });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].1, MetricEvent::RequestStart));
        assert!(matches!(events[1].1, MetricEvent::FirstToken { .. }));
    }

    #[test]
    fn null_sink_never_panics() {
        let sink = NullSink;
        sink.on_event(uuid::Uuid::new_v4(), MetricEvent::KvBudgetExceeded);
    }
}
