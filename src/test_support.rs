//! In-memory backend for tests.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use crate::{
    backend::{Backend, ConnectionParams, EventSink, SdkEvent, TrackResult},
    Error, Result,
};

#[derive(Default)]
struct State {
    treatments: HashMap<String, String>,
    ready_after: Option<Duration>,
    fail_connect: bool,
    params: Option<ConnectionParams>,
    events: Option<EventSink>,
    tracked: Vec<(String, String)>,
    flush_count: usize,
    consent_calls: Vec<bool>,
    destroy_count: usize,
}

/// A backend that records every call. Clones share state.
#[derive(Clone, Default)]
pub(crate) struct RecordingBackend {
    state: Arc<Mutex<State>>,
}

impl RecordingBackend {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn with_treatment(self, flag_name: &str, treatment: &str) -> Self {
        self.state()
            .treatments
            .insert(flag_name.to_owned(), treatment.to_owned());
        self
    }

    /// Report `Ready` from a background thread `delay` after connecting.
    pub fn ready_after(self, delay: Duration) -> Self {
        self.state().ready_after = Some(delay);
        self
    }

    pub fn fail_connect(self) -> Self {
        self.state().fail_connect = true;
        self
    }

    pub fn fire_ready(&self) {
        let events = self.state().events.clone();
        if let Some(events) = events {
            events.send(SdkEvent::Ready);
        }
    }

    pub fn params(&self) -> Option<ConnectionParams> {
        self.state().params.clone()
    }

    pub fn tracked(&self) -> Vec<(String, String)> {
        self.state().tracked.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state().flush_count
    }

    pub fn consent_calls(&self) -> Vec<bool> {
        self.state().consent_calls.clone()
    }

    pub fn destroy_count(&self) -> usize {
        self.state().destroy_count
    }
}

impl Backend for RecordingBackend {
    fn connect(&mut self, params: &ConnectionParams, events: EventSink) -> Result<()> {
        let mut state = self.state();
        if state.fail_connect {
            return Err(Error::InitializationFailed("refused".to_owned()));
        }
        state.params = Some(params.clone());
        state.events = Some(events.clone());

        if let Some(delay) = state.ready_after {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                events.send(SdkEvent::Ready);
            });
        }
        Ok(())
    }

    fn treatment(&self, flag_name: &str) -> Option<String> {
        self.state().treatments.get(flag_name).cloned()
    }

    fn track(&self, traffic_type: &str, event_type: &str) -> TrackResult {
        self.state()
            .tracked
            .push((traffic_type.to_owned(), event_type.to_owned()));
        TrackResult::Queued
    }

    fn flush(&self) {
        self.state().flush_count += 1;
    }

    fn set_consent(&self, granted: bool) {
        self.state().consent_calls.push(granted);
    }

    fn destroy(&self) {
        let mut state = self.state();
        state.destroy_count += 1;
        // Drop the sink like a real connection would.
        state.events = None;
    }
}
