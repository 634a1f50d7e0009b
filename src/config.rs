use std::{path::PathBuf, time::Duration};

use crate::{http::TreatmentsCache, ConsentState, EventLoop, FlagClient, HttpBackend, Key, Result};

/// Log verbosity of a client session.
///
/// Maps onto [`log::LevelFilter`]. `flagwatch` never installs a logger itself; the level is
/// handed to the backend so that it can skip per-record diagnostics nobody is going to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// No logging.
    None,
    Error,
    #[default]
    Warning,
    Info,
    Debug,
    /// Everything, including every impression and event.
    Verbose,
}

impl LogLevel {
    /// Corresponding [`log::LevelFilter`].
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::None => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Verbose => log::LevelFilter::Trace,
        }
    }
}

/// Configuration for [`FlagClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) log_level: LogLevel,
    pub(crate) ready_timeout: Duration,
    pub(crate) user_consent: ConsentState,
    pub(crate) traffic_type: String,
    pub(crate) base_url: String,
    pub(crate) events_url: String,
    pub(crate) poll_interval: Duration,
    pub(crate) poll_jitter: Duration,
    pub(crate) flush_interval: Duration,
    pub(crate) events_queue_size: usize,
    pub(crate) events_batch_size: usize,
    pub(crate) request_timeout: Duration,
    pub(crate) cache_path: Option<PathBuf>,
    pub(crate) key: Option<Key>,
}

impl ClientConfig {
    /// Default base URL for fetching treatments.
    pub const DEFAULT_BASE_URL: &'static str = "https://sdk.flagwatch.dev/api";
    /// Default base URL for posting impressions and events.
    pub const DEFAULT_EVENTS_URL: &'static str = "https://events.flagwatch.dev/api";
    /// Default value for [`ClientConfig::ready_timeout`].
    pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`ClientConfig::traffic_type`].
    pub const DEFAULT_TRAFFIC_TYPE: &'static str = "user";
    /// Default value for [`ClientConfig::poll_interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
    /// Shortest accepted [`ClientConfig::poll_interval`].
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
    /// Default value for [`ClientConfig::poll_jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(5);
    /// Default value for [`ClientConfig::flush_interval`].
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`ClientConfig::events_queue_size`].
    pub const DEFAULT_EVENTS_QUEUE_SIZE: usize = 10_000;
    /// Default value for [`ClientConfig::events_batch_size`].
    pub const DEFAULT_EVENTS_BATCH_SIZE: usize = 500;
    /// Default value for [`ClientConfig::request_timeout`].
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use flagwatch::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            log_level: LogLevel::default(),
            ready_timeout: ClientConfig::DEFAULT_READY_TIMEOUT,
            user_consent: ConsentState::Unknown,
            traffic_type: ClientConfig::DEFAULT_TRAFFIC_TYPE.to_owned(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            events_url: ClientConfig::DEFAULT_EVENTS_URL.to_owned(),
            poll_interval: ClientConfig::DEFAULT_POLL_INTERVAL,
            poll_jitter: ClientConfig::DEFAULT_POLL_JITTER,
            flush_interval: ClientConfig::DEFAULT_FLUSH_INTERVAL,
            events_queue_size: ClientConfig::DEFAULT_EVENTS_QUEUE_SIZE,
            events_batch_size: ClientConfig::DEFAULT_EVENTS_BATCH_SIZE,
            request_timeout: ClientConfig::DEFAULT_REQUEST_TIMEOUT,
            cache_path: None,
            key: None,
        }
    }

    /// Set log verbosity.
    pub fn log_level(&mut self, log_level: LogLevel) -> &mut Self {
        self.log_level = log_level;
        self
    }

    /// Set how long to wait for treatments before the session is reported as timed out.
    ///
    /// `Duration::ZERO` disables the timeout event.
    ///
    /// ```
    /// # use std::time::Duration;
    /// # use flagwatch::ClientConfig;
    /// let mut config = ClientConfig::from_api_key("api-key");
    /// config.ready_timeout(Duration::from_millis(1000));
    /// ```
    pub fn ready_timeout(&mut self, ready_timeout: Duration) -> &mut Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Set consent state the session starts with.
    pub fn user_consent(&mut self, user_consent: ConsentState) -> &mut Self {
        self.user_consent = user_consent;
        self
    }

    /// Set traffic type that tracked events are associated with. Stored lowercase.
    pub fn traffic_type(&mut self, traffic_type: impl Into<String>) -> &mut Self {
        self.traffic_type = traffic_type.into().to_lowercase();
        self
    }

    /// Override base URL for fetching treatments. Clients should use the default setting in most
    /// cases.
    pub fn base_url(&mut self, base_url: impl Into<String>) -> &mut Self {
        self.base_url = base_url.into();
        self
    }

    /// Override base URL for posting impressions and events.
    pub fn events_url(&mut self, events_url: impl Into<String>) -> &mut Self {
        self.events_url = events_url.into();
        self
    }

    /// Interval between treatment refreshes. Values below [`ClientConfig::MIN_POLL_INTERVAL`] are
    /// raised to it.
    pub fn poll_interval(&mut self, poll_interval: Duration) -> &mut Self {
        self.poll_interval = poll_interval.max(ClientConfig::MIN_POLL_INTERVAL);
        self
    }

    /// Randomized amount subtracted from each poll interval.
    pub fn poll_jitter(&mut self, poll_jitter: Duration) -> &mut Self {
        self.poll_jitter = poll_jitter;
        self
    }

    /// Interval between automatic transmissions of buffered impressions and events.
    pub fn flush_interval(&mut self, flush_interval: Duration) -> &mut Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Maximum number of impressions and events buffered in memory.
    pub fn events_queue_size(&mut self, events_queue_size: usize) -> &mut Self {
        self.events_queue_size = events_queue_size.max(1);
        self
    }

    /// Maximum number of records sent in one request.
    pub fn events_batch_size(&mut self, events_batch_size: usize) -> &mut Self {
        self.events_batch_size = events_batch_size.max(1);
        self
    }

    /// Upper bound for a single HTTP request. This also bounds how long shutdown may block.
    pub fn request_timeout(&mut self, request_timeout: Duration) -> &mut Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Persist fetched treatments at `cache_path` and load them on the next start.
    ///
    /// Unless a key is set with [`ClientConfig::key`], the next session also reuses the key stored
    /// in the cache, so that the cached treatments apply to it.
    pub fn cache_path(&mut self, cache_path: impl Into<PathBuf>) -> &mut Self {
        self.cache_path = Some(cache_path.into());
        self
    }

    /// Use `key` for the session instead of a cached or freshly generated one.
    pub fn key(&mut self, key: Key) -> &mut Self {
        self.key = Some(key);
        self
    }

    pub fn get_api_key(&self) -> &str {
        &self.api_key
    }

    pub fn get_log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn get_ready_timeout(&self) -> Duration {
        self.ready_timeout
    }

    pub fn get_user_consent(&self) -> ConsentState {
        self.user_consent
    }

    pub fn get_traffic_type(&self) -> &str {
        &self.traffic_type
    }

    pub fn get_key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Key a session connected with this configuration uses: the configured key, else the key
    /// stored in the treatments cache, else a new random key.
    pub(crate) fn session_key(&self) -> Key {
        if let Some(key) = &self.key {
            return key.clone();
        }

        if let Some(path) = &self.cache_path {
            match TreatmentsCache::new(path).stored_key() {
                Ok(Some(key)) => return key,
                Ok(None) => {}
                Err(err) => {
                    log::warn!(target: "flagwatch", "failed to read key from treatments cache: {:?}", err);
                }
            }
        }

        Key::random()
    }

    /// Connect a new [`FlagClient`] to the default HTTP backend.
    ///
    /// ```no_run
    /// # use flagwatch::ClientConfig;
    /// let (client, event_loop) = ClientConfig::from_api_key("api-key").connect().unwrap();
    /// ```
    pub fn connect(self) -> Result<(FlagClient, EventLoop)> {
        let backend = HttpBackend::new(&self)?;
        FlagClient::connect(self, backend)
    }
}
