// THEORY:
// Views that display samples need to know when the state they render changed.
// Rather than have observers compare the identity of whoever notified them, every
// change is announced as a tagged `StateEvent` on a broadcast bus. Subscribers
// match on the event kind and, where relevant, the sample name it carries.
// Slow subscribers may lag and miss events; they should then re-read the state.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateEvent {
    /// A (re-)ingestion replaced the loaded samples.
    SamplesReplaced { count: usize },
    /// The selected sample changed, or was cleared.
    SelectionChanged { sample: Option<String> },
    /// An operation was recorded in a sample's history.
    OperationApplied { sample: String, operation: String },
    /// A detection run finished and results were written back.
    MeasurementsReady { samples: usize, regions: usize },
    /// A detection run failed; no sample was modified.
    MeasurementFailed { reason: String },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StateEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel::<StateEvent>(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.tx.subscribe()
    }

    /// Sends to every current subscriber; having none is fine.
    pub fn publish(&self, event: StateEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
