//! Event sinks.
//!
//! The worker thread calls [`EventSink::emit`] for every event of a request,
//! so implementations must never block indefinitely.

use std::sync::mpsc;

use tokio::sync::mpsc as async_mpsc;

use crate::Event;

/// Destination for the events of a request.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Delivery to a closed destination is dropped.
    fn emit(&self, event: Event);
}

impl EventSink for async_mpsc::UnboundedSender<Event> {
    fn emit(&self, event: Event) {
        if self.send(event).is_err() {
            tracing::debug!("event dropped: receiver closed");
        }
    }
}

impl EventSink for mpsc::Sender<Event> {
    fn emit(&self, event: Event) {
        if self.send(event).is_err() {
            tracing::debug!("event dropped: receiver closed");
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Channel, OutputEvent};

    #[test]
    fn test_unbounded_sender_sink() {
        let (tx, mut rx) = async_mpsc::unbounded_channel();
        tx.emit(OutputEvent::captured(Channel::Stdout, "hi\n", None).into());
        let got = rx.try_recv().unwrap();
        assert!(matches!(got, Event::Output(ref out) if out.data == "hi\n"));
    }

    #[test]
    fn test_closed_sink_does_not_panic() {
        let (tx, rx) = mpsc::channel::<Event>();
        drop(rx);
        tx.emit(OutputEvent::captured(Channel::Stderr, "x", None).into());
    }
}
