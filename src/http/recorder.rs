//! Buffering of impressions and tracked events until they can be delivered.
use std::{
    collections::VecDeque,
    sync::{mpsc::RecvTimeoutError, Arc, Mutex, MutexGuard},
    time::Duration,
};

use chrono::{DateTime, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};

use super::transport::Transport;
use crate::{
    backend::{RejectReason, TrackResult},
    ConsentState, Error, Key, Result,
};

/// A treatment was served to a key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impression {
    pub key: Key,
    pub feature: String,
    pub treatment: String,
    pub change_number: i64,
    pub timestamp: DateTime<Utc>,
}

/// A business event reported with [`FlagClient::track`](crate::FlagClient::track).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedEvent {
    pub key: Key,
    pub traffic_type: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, From)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Record {
    Impression(Impression),
    Event(TrackedEvent),
}

#[derive(Debug)]
struct RecorderState {
    queue: VecDeque<Record>,
    consent: ConsentState,
}

/// Bounded FIFO of records waiting for delivery.
///
/// Consent decides what happens to records:
/// - `Unknown`: buffered, not sent.
/// - `Granted`: buffered and sent on flush.
/// - `Denied`: the buffer is dropped and new records are rejected.
///
/// A batch that fails to send is put back at the front of the queue, so nothing already buffered
/// is lost to a transport failure.
pub struct EventRecorder {
    state: Mutex<RecorderState>,
    // Serializes flushes so that batches are sent in order.
    flushing: Mutex<()>,
    transport: Box<dyn Transport>,
    capacity: usize,
    batch_size: usize,
}

impl EventRecorder {
    pub fn new(
        transport: Box<dyn Transport>,
        capacity: usize,
        batch_size: usize,
        consent: ConsentState,
    ) -> EventRecorder {
        EventRecorder {
            state: Mutex::new(RecorderState {
                queue: VecDeque::new(),
                consent,
            }),
            flushing: Mutex::new(()),
            transport,
            capacity: capacity.max(1),
            batch_size: batch_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, RecorderState> {
        self.state
            .lock()
            .expect("thread holding recorder lock should not panic")
    }

    pub fn push(&self, record: impl Into<Record>) -> TrackResult {
        let mut state = self.state();

        if state.consent == ConsentState::Denied {
            return TrackResult::Rejected(RejectReason::ConsentDenied);
        }

        if state.queue.len() >= self.capacity {
            log::warn!(target: "flagwatch", capacity = self.capacity; "event queue is full, dropping record");
            return TrackResult::Rejected(RejectReason::QueueFull);
        }

        state.queue.push_back(record.into());
        TrackResult::Queued
    }

    pub fn set_consent(&self, consent: ConsentState) {
        let mut state = self.state();
        state.consent = consent;

        if consent == ConsentState::Denied && !state.queue.is_empty() {
            log::debug!(target: "flagwatch", dropped = state.queue.len(); "consent denied, dropping buffered records");
            state.queue.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }

    /// Send buffered records in batches until the queue is empty or a send fails.
    ///
    /// Returns the number of records delivered. Never fails: an unsent batch stays queued for the
    /// next attempt.
    pub fn flush_now(&self) -> usize {
        let _flushing = self
            .flushing
            .lock()
            .expect("thread holding flush lock should not panic");

        let mut delivered = 0;
        loop {
            let batch: Vec<Record> = {
                let mut state = self.state();
                if !state.consent.is_granted() {
                    break;
                }
                let n = state.queue.len().min(self.batch_size);
                state.queue.drain(..n).collect()
            };

            if batch.is_empty() {
                break;
            }

            match self.transport.send(&batch) {
                Ok(()) => {
                    log::debug!(target: "flagwatch", records = batch.len(); "delivered records");
                    delivered += batch.len();
                }
                Err(err) => {
                    log::warn!(target: "flagwatch", records = batch.len(); "failed to deliver records, will retry: {:?}", err);
                    self.requeue(batch);
                    break;
                }
            }
        }
        delivered
    }

    fn requeue(&self, batch: Vec<Record>) {
        let mut state = self.state();
        // Consent may have been denied while the batch was in flight.
        if state.consent == ConsentState::Denied {
            return;
        }
        for record in batch.into_iter().rev() {
            state.queue.push_front(record);
        }
    }
}

enum Command {
    Flush,
    Stop,
}

const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Background thread that flushes an [`EventRecorder`] periodically and on demand.
pub(crate) struct RecorderThread {
    join_handle: std::thread::JoinHandle<()>,
    commands: std::sync::mpsc::SyncSender<Command>,
}

impl RecorderThread {
    pub fn start(recorder: Arc<EventRecorder>, interval: Duration) -> std::io::Result<RecorderThread> {
        let interval = interval.max(MIN_FLUSH_INTERVAL);
        let (commands, receiver) = std::sync::mpsc::sync_channel::<Command>(1);

        let join_handle = std::thread::Builder::new()
            .name("flagwatch-recorder".to_owned())
            .spawn(move || loop {
                match receiver.recv_timeout(interval) {
                    Ok(Command::Flush) | Err(RecvTimeoutError::Timeout) => {
                        recorder.flush_now();
                    }
                    Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => {
                        log::debug!(target: "flagwatch", "recorder thread received stop command");
                        recorder.flush_now();
                        return;
                    }
                }
            })?;

        Ok(RecorderThread {
            join_handle,
            commands,
        })
    }

    /// Ask the thread to flush now. Does not wait.
    pub fn flush(&self) {
        // A full buffer means a flush is already pending.
        let _ = self.commands.try_send(Command::Flush);
    }

    /// Stop the thread after a final flush and wait for it to exit.
    pub fn shutdown(self) -> Result<()> {
        // Error means the thread has exited already.
        let _ = self.commands.send(Command::Stop);
        self.join_handle
            .join()
            .map_err(|_| Error::BackgroundThreadPanicked)
    }
}
