use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc::RecvTimeoutError,
    Mutex, OnceLock,
};
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;

use crate::{
    backend::{Backend, ConnectionParams, EventSink, RejectReason, SdkEvent, TrackResult, CONTROL},
    ClientConfig, ConsentState, Error, EventLoop, Key, Result,
};

/// A client session connected to a flag-evaluation backend.
///
/// There is exactly one backend connection per client. Create the client once at the top of your
/// application with [`FlagClient::connect`] (or [`ClientConfig::connect`]) and hand out references
/// (`&FlagClient` or `Arc<FlagClient>`) to the code that needs it.
///
/// No method blocks on the network. Until the backend reports that definitions are loaded,
/// [`FlagClient::evaluate`] returns [`CONTROL`].
///
/// # Examples
/// ```no_run
/// # use flagwatch::ClientConfig;
/// let (client, event_loop) = ClientConfig::from_api_key("api-key").connect().unwrap();
/// let readiness = event_loop.watch();
/// // Spawn `event_loop.run()` on the consumer-facing runtime...
/// if client.evaluate("track_workouts") == "on" {
///     client.track("run_workout");
/// }
/// client.shutdown();
/// ```
pub struct FlagClient {
    config: ClientConfig,
    key: Key,
    backend: Box<dyn Backend>,
    events: EventSink,
    consent: Mutex<ConsentState>,
    watchdog: Mutex<Option<ReadyWatchdog>>,
    shut_down: AtomicBool,
}

impl FlagClient {
    /// Open a session with the key chosen by the configuration: the key set with
    /// [`ClientConfig::key`], else the key stored in the treatments cache, else a freshly
    /// generated anonymous [`Key`].
    ///
    /// Returns the client together with the [`EventLoop`] that delivers backend lifecycle events
    /// to observers.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidApiKey`] if the API key is empty.
    /// - Any error returned by [`Backend::connect`].
    /// - [`Error::Io`] if the ready-timeout thread cannot be started.
    pub fn connect(
        config: ClientConfig,
        backend: impl Backend + 'static,
    ) -> Result<(FlagClient, EventLoop)> {
        let key = config.session_key();
        FlagClient::connect_with_key(config, key, backend)
    }

    /// Same as [`FlagClient::connect`], but with a caller-provided key.
    pub fn connect_with_key(
        config: ClientConfig,
        key: Key,
        mut backend: impl Backend + 'static,
    ) -> Result<(FlagClient, EventLoop)> {
        if config.api_key.trim().is_empty() {
            log::error!(target: "flagwatch", "cannot connect without an api key");
            return Err(Error::InvalidApiKey);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let events = EventSink::new(sender);

        let params = ConnectionParams {
            api_key: config.api_key.clone(),
            key: key.clone(),
            log_level: config.log_level.to_level_filter(),
            ready_timeout: config.ready_timeout,
            user_consent: config.user_consent,
            traffic_type: config.traffic_type.clone(),
        };

        if let Err(err) = backend.connect(&params, events.clone()) {
            log::error!(target: "flagwatch", "failed to connect to backend: {:?}", err);
            return Err(err);
        }

        let watchdog = if config.ready_timeout.is_zero() {
            None
        } else {
            match ReadyWatchdog::start(config.ready_timeout, events.clone()) {
                Ok(watchdog) => Some(watchdog),
                Err(err) => {
                    backend.destroy();
                    return Err(err.into());
                }
            }
        };

        log::debug!(target: "flagwatch", key:display = key; "client connected");

        let client = FlagClient {
            consent: Mutex::new(config.user_consent),
            config,
            key,
            backend: Box::new(backend),
            events,
            watchdog: Mutex::new(watchdog),
            shut_down: AtomicBool::new(false),
        };

        Ok((client, EventLoop::new(receiver)))
    }

    /// Anonymous identity of this session.
    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the treatment for `flag_name`.
    ///
    /// Returns [`CONTROL`] if definitions have not been loaded yet (including after a ready
    /// timeout), if the flag is unknown, or if the client has been shut down. Never blocks.
    pub fn evaluate(&self, flag_name: &str) -> String {
        let flag_name = flag_name.trim();

        if self.is_shut_down() {
            log::warn!(target: "flagwatch", flag_name; "evaluating a flag after client shutdown");
            return CONTROL.to_owned();
        }

        if !self.events.definitions_loaded() {
            log::warn!(target: "flagwatch", flag_name; "evaluating a flag before definitions have been loaded");
            return CONTROL.to_owned();
        }

        if flag_name.is_empty() {
            log::warn!(target: "flagwatch", "evaluating a flag with an empty name");
            return CONTROL.to_owned();
        }

        match self.backend.treatment(flag_name) {
            Some(treatment) => {
                log::trace!(target: "flagwatch", flag_name, treatment:display = treatment; "evaluated a flag");
                treatment
            }
            None => {
                log::warn!(target: "flagwatch", flag_name; "flag is not defined");
                CONTROL.to_owned()
            }
        }
    }

    /// Record a business event under the configured traffic type.
    ///
    /// Failures never panic and are reported in the returned [`TrackResult`].
    pub fn track(&self, event_name: &str) -> TrackResult {
        if self.is_shut_down() {
            log::warn!(target: "flagwatch", event_name; "tracking an event after client shutdown");
            return TrackResult::Rejected(RejectReason::ShutDown);
        }

        if !is_valid_event_name(event_name) {
            log::warn!(target: "flagwatch", event_name; "invalid event name");
            return TrackResult::Rejected(RejectReason::InvalidEventName);
        }

        let result = self.backend.track(&self.config.traffic_type, event_name);
        log::trace!(target: "flagwatch", event_name, result:serde; "tracked an event");
        result
    }

    /// Start sending buffered impressions and events now.
    ///
    /// Does not wait for the transmission. Data that fails to send is kept for the next attempt.
    pub fn flush(&self) {
        if self.is_shut_down() {
            return;
        }
        self.backend.flush();
    }

    /// Forward the user's consent decision to the backend.
    ///
    /// Returns `false` if the decision was dropped because the client is shut down.
    pub fn set_consent(&self, granted: bool) -> bool {
        if self.is_shut_down() {
            log::warn!(target: "flagwatch", granted; "setting consent after client shutdown");
            return false;
        }

        if let Ok(mut consent) = self.consent.lock() {
            *consent = ConsentState::from(granted);
        }
        self.backend.set_consent(granted);
        true
    }

    /// Last consent state forwarded to the backend.
    pub fn consent(&self) -> ConsentState {
        self.consent
            .lock()
            .map(|consent| *consent)
            .unwrap_or_default()
    }

    /// `true` once [`FlagClient::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop background work, flush remaining data best effort, and release the backend
    /// connection.
    ///
    /// Only the first call has an effect. Dropping the client calls this as well.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            log::debug!(target: "flagwatch", "client is already shut down");
            return;
        }

        log::debug!(target: "flagwatch", "shutting down client");

        let watchdog = self.watchdog.lock().ok().and_then(|mut slot| slot.take());
        if let Some(watchdog) = watchdog {
            if let Err(err) = watchdog.shutdown() {
                log::warn!(target: "flagwatch", "ready timeout thread failed: {:?}", err);
            }
        }

        self.backend.destroy();
        self.events.close();
    }
}

impl Drop for FlagClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

const MAX_EVENT_NAME_LEN: usize = 80;

fn is_valid_event_name(event_name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9][-_.:a-zA-Z0-9]*$").expect("event name pattern should be valid")
    });
    event_name.len() <= MAX_EVENT_NAME_LEN && pattern.is_match(event_name)
}

/// Emits [`SdkEvent::ReadyTimedOut`] if definitions are not loaded within the ready timeout.
struct ReadyWatchdog {
    join_handle: std::thread::JoinHandle<()>,
    stop_sender: std::sync::mpsc::SyncSender<()>,
}

impl ReadyWatchdog {
    fn start(timeout: Duration, events: EventSink) -> std::io::Result<ReadyWatchdog> {
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let join_handle = std::thread::Builder::new()
            .name("flagwatch-ready-timeout".to_owned())
            .spawn(move || match stop_receiver.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    if !events.definitions_loaded() {
                        log::warn!(target: "flagwatch",
                                   timeout_ms = timeout.as_millis() as u64;
                                   "definitions were not loaded before ready timeout");
                        events.send(SdkEvent::ReadyTimedOut);
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    // Client is shutting down.
                }
            })?;

        Ok(ReadyWatchdog {
            join_handle,
            stop_sender,
        })
    }

    fn shutdown(self) -> Result<()> {
        // Full buffer or dropped receiver both mean the thread is stopping already.
        let _ = self.stop_sender.try_send(());
        self.join_handle
            .join()
            .map_err(|_| Error::BackgroundThreadPanicked)
    }
}
