//! Default [`Backend`] talking to the flag service over HTTP.
//!
//! The server precomputes treatments for the session key, so nothing is evaluated locally. A
//! poller thread keeps treatments fresh, and a recorder thread delivers impressions and events.
use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Utc;

use crate::{
    backend::{Backend, ConnectionParams, EventSink, RejectReason, SdkEvent, TrackResult},
    ClientConfig, ConsentState, Error, Key, Result,
};

mod cache;
mod fetcher;
mod poller;
mod recorder;
mod store;
mod transport;

pub use cache::TreatmentsCache;
pub use fetcher::{FetchTreatments, TreatmentsFetcher};
pub use recorder::{EventRecorder, Impression, Record, TrackedEvent};
pub use store::{TreatmentStore, Treatments};
pub use transport::{HttpTransport, Transport};

use poller::{PollerCache, PollerThread, PollerThreadConfig};
use recorder::RecorderThread;

/// Settings of [`HttpBackend`], taken from [`ClientConfig`].
#[derive(Debug, Clone)]
struct HttpSettings {
    base_url: String,
    poll_interval: Duration,
    poll_jitter: Duration,
    flush_interval: Duration,
    events_queue_size: usize,
    events_batch_size: usize,
    request_timeout: Duration,
    cache_path: Option<PathBuf>,
}

struct Connection {
    key: Key,
    verbose: bool,
    recorder: Arc<EventRecorder>,
    poller: Mutex<Option<PollerThread>>,
    recorder_thread: Mutex<Option<RecorderThread>>,
}

/// A [`Backend`] that fetches precomputed treatments and posts impressions and events over HTTP.
pub struct HttpBackend {
    settings: HttpSettings,
    transport: Option<Box<dyn Transport>>,
    store: Arc<TreatmentStore>,
    connection: Option<Connection>,
}

impl HttpBackend {
    /// Create a backend delivering events with [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidBaseUrl`] if `events_url` cannot be parsed.
    pub fn new(config: &ClientConfig) -> Result<HttpBackend> {
        let transport =
            HttpTransport::new(&config.events_url, &config.api_key, config.request_timeout)?;
        Ok(HttpBackend::with_transport(config, transport))
    }

    /// Create a backend delivering events with a custom [`Transport`].
    pub fn with_transport(config: &ClientConfig, transport: impl Transport + 'static) -> HttpBackend {
        HttpBackend {
            settings: HttpSettings {
                base_url: config.base_url.clone(),
                poll_interval: config.poll_interval,
                poll_jitter: config.poll_jitter,
                flush_interval: config.flush_interval,
                events_queue_size: config.events_queue_size,
                events_batch_size: config.events_batch_size,
                request_timeout: config.request_timeout,
                cache_path: config.cache_path.clone(),
            },
            transport: Some(Box::new(transport)),
            store: Arc::new(TreatmentStore::new()),
            connection: None,
        }
    }

    /// Open the connection with an explicit fetcher instead of [`TreatmentsFetcher`].
    fn connect_with_fetcher(
        &mut self,
        fetcher: impl FetchTreatments + 'static,
        params: &ConnectionParams,
        events: EventSink,
    ) -> Result<()> {
        let transport = self
            .transport
            .take()
            .ok_or_else(|| Error::InitializationFailed("backend is already connected".to_owned()))?;

        let recorder = Arc::new(EventRecorder::new(
            transport,
            self.settings.events_queue_size,
            self.settings.events_batch_size,
            params.user_consent,
        ));

        let cache = self.settings.cache_path.as_ref().map(|path| PollerCache {
            cache: TreatmentsCache::new(path),
            key: params.key.clone(),
        });
        if let Some(PollerCache { cache, key }) = &cache {
            match cache.load(key) {
                Ok(Some(treatments)) => {
                    log::debug!(target: "flagwatch", change_number = treatments.change_number; "loaded treatments from cache");
                    self.store.set_treatments(treatments);
                    events.send(SdkEvent::ReadyFromCache);
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!(target: "flagwatch", "failed to read treatments cache: {:?}", err);
                }
            }
        }

        let poller = PollerThread::start(
            fetcher,
            self.store.clone(),
            cache,
            events,
            PollerThreadConfig {
                interval: self.settings.poll_interval,
                jitter: self.settings.poll_jitter,
            },
        )?;

        let recorder_thread = match RecorderThread::start(recorder.clone(), self.settings.flush_interval) {
            Ok(thread) => thread,
            Err(err) => {
                let _ = poller.shutdown();
                return Err(err.into());
            }
        };

        self.connection = Some(Connection {
            key: params.key.clone(),
            verbose: params.log_level >= log::LevelFilter::Debug,
            recorder,
            poller: Mutex::new(Some(poller)),
            recorder_thread: Mutex::new(Some(recorder_thread)),
        });
        Ok(())
    }
}

impl Backend for HttpBackend {
    fn connect(&mut self, params: &ConnectionParams, events: EventSink) -> Result<()> {
        let fetcher = TreatmentsFetcher::new(
            &self.settings.base_url,
            &params.api_key,
            &params.key,
            self.settings.request_timeout,
        )?;
        self.connect_with_fetcher(fetcher, params, events)
    }

    fn treatment(&self, flag_name: &str) -> Option<String> {
        let treatments = self.store.get_treatments()?;
        let treatment = treatments.get(flag_name)?.to_owned();

        if let Some(connection) = &self.connection {
            let result = connection.recorder.push(Impression {
                key: connection.key.clone(),
                feature: flag_name.to_owned(),
                treatment: treatment.clone(),
                change_number: treatments.change_number,
                timestamp: Utc::now(),
            });
            if connection.verbose {
                log::debug!(target: "flagwatch", flag_name, treatment:display = treatment, result:serde; "recorded impression");
            }
        }

        Some(treatment)
    }

    fn track(&self, traffic_type: &str, event_type: &str) -> TrackResult {
        let Some(connection) = &self.connection else {
            return TrackResult::Rejected(RejectReason::ShutDown);
        };

        let result = connection.recorder.push(TrackedEvent {
            key: connection.key.clone(),
            traffic_type: traffic_type.to_owned(),
            event_type: event_type.to_owned(),
            timestamp: Utc::now(),
        });
        if connection.verbose {
            log::debug!(target: "flagwatch", event_type, result:serde; "recorded event");
        }
        result
    }

    fn flush(&self) {
        let Some(connection) = &self.connection else {
            return;
        };
        if let Ok(thread) = connection.recorder_thread.lock() {
            if let Some(thread) = thread.as_ref() {
                thread.flush();
            }
        }
    }

    fn set_consent(&self, granted: bool) {
        let Some(connection) = &self.connection else {
            return;
        };
        connection.recorder.set_consent(ConsentState::from(granted));
        if granted {
            self.flush();
        }
    }

    fn destroy(&self) {
        let Some(connection) = &self.connection else {
            return;
        };

        let poller = connection.poller.lock().ok().and_then(|mut slot| slot.take());
        if let Some(poller) = &poller {
            poller.stop();
        }

        let recorder_thread = connection
            .recorder_thread
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(thread) = recorder_thread {
            if let Err(err) = thread.shutdown() {
                log::warn!(target: "flagwatch", "recorder thread failed: {:?}", err);
            }
        }

        if let Some(poller) = poller {
            if let Err(err) = poller.shutdown() {
                log::warn!(target: "flagwatch", "poller thread failed: {:?}", err);
            }
        }

        log::debug!(target: "flagwatch", unsent = connection.recorder.len(); "http backend destroyed");
    }
}
