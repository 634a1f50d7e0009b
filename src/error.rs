use std::sync::Arc;

/// Represents a result type for fallible operations in `flagwatch`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or running a flag client.
///
/// Only construction surfaces errors to the caller. Evaluation before definitions are loaded is
/// encoded as [`CONTROL`](crate::CONTROL), and transport failures are retried on the next flush.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The API key is empty.
    #[error("api_key must not be empty")]
    InvalidApiKey,

    /// Invalid `base_url` or `events_url` configuration.
    #[error("invalid url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The request was unauthorized, possibly due to an invalid API key.
    #[error("unauthorized, api_key is likely invalid")]
    Unauthorized,

    /// The backend connection could not be established.
    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),

    /// The backend answered with something other than success.
    #[error("transport failure: {0}")]
    Transport(String),

    /// A background thread panicked. This should normally never happen.
    #[error("background thread panicked")]
    BackgroundThreadPanicked,

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Cached treatments could not be read or written.
    #[error("treatments cache is corrupted")]
    Cache(#[source] Arc<serde_json::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Cache(Arc::new(value))
    }
}
