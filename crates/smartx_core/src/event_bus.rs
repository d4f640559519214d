//! The event bus: the single MPSC queue the application drains.
//!
//! Producers are the routing zone worker (connection/source/sink
//! events), the setup façade (unrecoverable device errors) and module
//! cores (via [`smartx_dsp::module::ModuleEventEmitter`], forwarded here
//! as `ModelEvent::ModuleEvent`). `crossbeam_channel`'s unbounded channel
//! is already MPSC and lock-free on the producer side, matching
//! `gecko_core::engine`'s `Sender<Event>`/`Receiver<Event>` pair, just
//! with many senders instead of one.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use smartx_model::event::ModelEvent;

/// Outcome of [`EventBus::wait_for_event`].
#[derive(Debug)]
pub enum WaitOutcome {
    Event(ModelEvent),
    Timeout,
}

/// Outcome of [`EventBus::get_next_event`].
#[derive(Debug)]
pub enum PollOutcome {
    Event(ModelEvent),
    NoEvent,
}

pub struct EventBus {
    sender: Sender<ModelEvent>,
    receiver: Receiver<ModelEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// A cloneable handle producers use to push events; never blocks.
    pub fn sender(&self) -> Sender<ModelEvent> {
        self.sender.clone()
    }

    pub fn push(&self, event: ModelEvent) {
        let _ = self.sender.send(event);
    }

    /// Blocks for at most `timeout_ms` waiting for the next event.
    pub fn wait_for_event(&self, timeout_ms: u64) -> WaitOutcome {
        match self.receiver.recv_timeout(Duration::from_millis(timeout_ms)) {
            Ok(event) => WaitOutcome::Event(event),
            Err(RecvTimeoutError::Timeout) => WaitOutcome::Timeout,
            Err(RecvTimeoutError::Disconnected) => WaitOutcome::Timeout,
        }
    }

    /// Non-blocking poll.
    pub fn get_next_event(&self) -> PollOutcome {
        match self.receiver.try_recv() {
            Ok(event) => PollOutcome::Event(event),
            Err(_) => PollOutcome::NoEvent,
        }
    }

    /// Drains every currently queued event through `handler`'s
    /// double-dispatch, one callback per event family, mirroring the
    /// original `accept(handler)` visitor.
    pub fn dispatch_all(&self, handler: &dyn EventHandler) {
        while let PollOutcome::Event(event) = self.get_next_event() {
            dispatch_one(&event, handler);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Implemented by the application; one method per event family, replacing
/// the original `accept(handler)` visitor pattern with a plain match.
pub trait EventHandler {
    fn on_connection_established(&self, source_port: i32, sink_port: i32) {
        let _ = (source_port, sink_port);
    }

    fn on_connection_removed(&self, source_port: i32, sink_port: i32) {
        let _ = (source_port, sink_port);
    }

    fn on_source_removed(&self, source_port: i32, sink_port: i32) {
        let _ = (source_port, sink_port);
    }

    fn on_sink_removed(&self, sink_port: i32) {
        let _ = sink_port;
    }

    fn on_unrecoverable_source_error(&self, device: &str, message: &str) {
        let _ = (device, message);
    }

    fn on_unrecoverable_sink_error(&self, device: &str, message: &str) {
        let _ = (device, message);
    }

    fn on_module_event(&self, instance_name: &str, type_name: &str, properties: &smartx_model::properties::Properties) {
        let _ = (instance_name, type_name, properties);
    }
}

fn dispatch_one(event: &ModelEvent, handler: &dyn EventHandler) {
    match event {
        ModelEvent::ConnectionEstablished { source_port, sink_port } => {
            handler.on_connection_established(*source_port, *sink_port)
        }
        ModelEvent::ConnectionRemoved { source_port, sink_port } => {
            handler.on_connection_removed(*source_port, *sink_port)
        }
        ModelEvent::SourceRemoved { source_port, sink_port } => {
            handler.on_source_removed(*source_port, *sink_port)
        }
        ModelEvent::SinkRemoved { sink_port } => handler.on_sink_removed(*sink_port),
        ModelEvent::UnrecoverableSourceError { device, message } => {
            handler.on_unrecoverable_source_error(device, message)
        }
        ModelEvent::UnrecoverableSinkError { device, message } => {
            handler.on_unrecoverable_sink_error(device, message)
        }
        ModelEvent::ModuleEvent {
            instance_name,
            type_name,
            properties,
        } => handler.on_module_event(instance_name, type_name, properties),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_push_then_poll() {
        let bus = EventBus::new();
        bus.push(ModelEvent::SinkRemoved { sink_port: 3 });
        match bus.get_next_event() {
            PollOutcome::Event(ModelEvent::SinkRemoved { sink_port }) => assert_eq!(sink_port, 3),
            _ => panic!("expected event"),
        }
        assert!(matches!(bus.get_next_event(), PollOutcome::NoEvent));
    }

    #[test]
    fn test_wait_for_event_times_out() {
        let bus = EventBus::new();
        assert!(matches!(bus.wait_for_event(5), WaitOutcome::Timeout));
    }

    #[derive(Default)]
    struct CountingHandler {
        connections: AtomicUsize,
    }

    impl EventHandler for CountingHandler {
        fn on_connection_established(&self, _source_port: i32, _sink_port: i32) {
            self.connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_dispatch_all_routes_by_family() {
        let bus = EventBus::new();
        bus.push(ModelEvent::ConnectionEstablished { source_port: 1, sink_port: 2 });
        bus.push(ModelEvent::SinkRemoved { sink_port: 2 });
        let handler = CountingHandler::default();
        bus.dispatch_all(&handler);
        assert_eq!(handler.connections.load(Ordering::Relaxed), 1);
        assert!(matches!(bus.get_next_event(), PollOutcome::NoEvent));
    }
}
