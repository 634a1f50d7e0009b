//! The consumer-facing side of the backend event channel.
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::{
    backend::LoopMessage,
    readiness::{ReadinessSignal, ReadinessWatch},
    SdkEvent,
};

/// Receives [`SdkEvent`]s sent from backend threads and applies them to observable state.
///
/// The event loop is the only writer of readiness state. Run it on the same single-threaded
/// context that consumers read from: spawn [`EventLoop::run`] on a current-thread runtime, or call
/// [`EventLoop::drain`] from your own loop.
pub struct EventLoop {
    events: mpsc::UnboundedReceiver<LoopMessage>,
    readiness: ReadinessSignal,
    finished: bool,
}

impl EventLoop {
    pub(crate) fn new(events: mpsc::UnboundedReceiver<LoopMessage>) -> EventLoop {
        let (readiness, _) = ReadinessSignal::new();
        EventLoop {
            events,
            readiness,
            finished: false,
        }
    }

    /// Get an observer for readiness state.
    pub fn watch(&self) -> ReadinessWatch {
        self.readiness.watch()
    }

    /// Process events until the client shuts down.
    pub async fn run(mut self) {
        while !self.finished {
            match self.events.recv().await {
                Some(message) => self.handle(message),
                None => self.finished = true,
            }
        }
        log::debug!(target: "flagwatch", "event loop finished");
    }

    /// Apply all pending events without waiting. Returns the number of events applied.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while !self.finished {
            match self.events.try_recv() {
                Ok(LoopMessage::Event(event)) => {
                    self.apply(event);
                    applied += 1;
                }
                Ok(LoopMessage::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.finished = true;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
        applied
    }

    /// `true` once the client has shut down and no more events will arrive.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn handle(&mut self, message: LoopMessage) {
        match message {
            LoopMessage::Event(event) => self.apply(event),
            LoopMessage::Shutdown => self.finished = true,
        }
    }

    fn apply(&self, event: SdkEvent) {
        let changed = self.readiness.apply(&event);
        log::debug!(target: "flagwatch", event:serde, changed; "received sdk event");
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::EventLoop;
    use crate::{backend::LoopMessage, EventSink, SdkEvent};

    #[test]
    fn drain_applies_pending_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let mut event_loop = EventLoop::new(rx);
        let watch = event_loop.watch();

        assert_eq!(event_loop.drain(), 0);

        sink.send(SdkEvent::Ready);
        sink.send(SdkEvent::Ready);
        assert!(!watch.is_ready());

        assert_eq!(event_loop.drain(), 2);
        assert!(watch.is_ready());
        assert!(!event_loop.is_finished());
    }

    #[test]
    fn drain_stops_at_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut event_loop = EventLoop::new(rx);

        tx.send(LoopMessage::Shutdown).unwrap();
        tx.send(LoopMessage::Event(SdkEvent::Ready)).unwrap();

        assert_eq!(event_loop.drain(), 0);
        assert!(event_loop.is_finished());
        assert!(!event_loop.watch().is_ready());
    }

    #[tokio::test]
    async fn run_returns_on_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        let event_loop = EventLoop::new(rx);
        let watch = event_loop.watch();

        let handle = tokio::spawn(event_loop.run());
        sink.send(SdkEvent::ReadyTimedOut);
        sink.close();
        handle.await.unwrap();

        assert!(watch.is_timed_out());
    }
}
