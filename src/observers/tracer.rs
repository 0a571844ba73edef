use crate::{NotifyEvent, Observer, TrapEvent};

/// Observer logging batches at `info` and trapped calls at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tracer;

impl Observer for Tracer {
    fn on_notify(&self, event: &NotifyEvent) {
        let keys: Vec<&str> = event.keys().map(|key| key.as_str()).collect();
        tracing::info!(
            id = %event.id(),
            generation = %event.generation(),
            topics = event.topics().len(),
            journal = event.journal().len(),
            ?keys,
            "batch delivered"
        );
    }

    fn on_trap(&self, event: &TrapEvent) {
        tracing::debug!(
            topic = %event.topic().id(),
            method = %event.method(),
            key = %event.key(),
            frozen = event.is_frozen(),
            "method trapped"
        );
    }
}
