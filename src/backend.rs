//! Contract between [`FlagClient`](crate::FlagClient) and the service that actually evaluates
//! flags and collects events.
//!
//! The façade never evaluates flags itself. A [`Backend`] holds the definitions, answers
//! treatment lookups from local state, buffers impressions and events, and reports lifecycle
//! changes through an [`EventSink`]. [`HttpBackend`](crate::HttpBackend) is the default
//! implementation; tests plug in their own.
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{ConsentState, Key, Result};

/// Treatment returned whenever a flag cannot be evaluated confidently: definitions are not loaded
/// yet, the flag is unknown, or the client has been shut down.
pub const CONTROL: &str = "CONTROL";

/// Lifecycle notifications emitted by a backend connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SdkEvent {
    /// Definitions have been downloaded.
    Ready,
    /// Definitions have been loaded from a local cache.
    ReadyFromCache,
    /// The ready timeout elapsed with no definitions available.
    ReadyTimedOut,
    /// New definitions have been received after the session became ready.
    Updated,
}

impl SdkEvent {
    /// `true` if the event means flag definitions are available for evaluation.
    pub fn loads_definitions(self) -> bool {
        matches!(self, SdkEvent::Ready | SdkEvent::ReadyFromCache)
    }
}

pub(crate) enum LoopMessage {
    Event(SdkEvent),
    Shutdown,
}

/// Sending half of the channel that carries [`SdkEvent`]s from backend threads to the
/// [`EventLoop`](crate::EventLoop).
///
/// `EventSink` is cheap to clone and can be used from any thread. Sending never blocks. Once the
/// event loop is gone, events are silently dropped.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<LoopMessage>,
    definitions_loaded: Arc<AtomicBool>,
}

impl EventSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<LoopMessage>) -> EventSink {
        EventSink {
            sender,
            definitions_loaded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Report a lifecycle event.
    pub fn send(&self, event: SdkEvent) {
        if event.loads_definitions() {
            self.definitions_loaded.store(true, Ordering::Release);
        }
        // Error means the event loop has been dropped. Nobody is observing anymore.
        let _ = self.sender.send(LoopMessage::Event(event));
    }

    /// `true` once the backend has reported [`SdkEvent::Ready`] or [`SdkEvent::ReadyFromCache`].
    pub fn definitions_loaded(&self) -> bool {
        self.definitions_loaded.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        let _ = self.sender.send(LoopMessage::Shutdown);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("definitions_loaded", &self.definitions_loaded())
            .finish_non_exhaustive()
    }
}

/// Parameters a backend connection is opened with.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub api_key: String,
    /// Anonymous identity of this session.
    pub key: Key,
    pub log_level: log::LevelFilter,
    pub ready_timeout: Duration,
    pub user_consent: ConsentState,
    /// Traffic type tracked events are associated with.
    pub traffic_type: String,
}

/// Why a tracked event was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RejectReason {
    /// The client has been shut down.
    ShutDown,
    /// The user denied consent.
    ConsentDenied,
    /// The event name is empty, too long, or contains invalid characters.
    InvalidEventName,
    /// The in-memory buffer is full.
    QueueFull,
}

/// Outcome of [`FlagClient::track`](crate::FlagClient::track).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackResult {
    /// The event is buffered and will be sent with the next flush.
    Queued,
    Rejected(RejectReason),
}

impl TrackResult {
    pub fn is_success(self) -> bool {
        self == TrackResult::Queued
    }
}

impl fmt::Display for TrackResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackResult::Queued => f.write_str("true"),
            TrackResult::Rejected(reason) => write!(f, "false ({reason:?})"),
        }
    }
}

/// A connection to a flag-evaluation service.
///
/// Implementations must not block in any method except [`Backend::destroy`], which may block for a
/// bounded time to flush remaining data. Lifecycle events may be sent through the [`EventSink`]
/// from any thread.
pub trait Backend: Send + Sync {
    /// Open the connection. Called exactly once, before any other method.
    ///
    /// # Errors
    ///
    /// An error here aborts [`FlagClient::connect`](crate::FlagClient::connect).
    fn connect(&mut self, params: &ConnectionParams, events: EventSink) -> Result<()>;

    /// Last known treatment for `flag_name`, or `None` if the flag is unknown.
    fn treatment(&self, flag_name: &str) -> Option<String>;

    /// Buffer a business event.
    fn track(&self, traffic_type: &str, event_type: &str) -> TrackResult;

    /// Start transmitting buffered data now. Must not wait for completion.
    fn flush(&self);

    fn set_consent(&self, granted: bool);

    /// Stop background work, flush best effort, and release the connection.
    fn destroy(&self);
}
