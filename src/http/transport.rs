//! Delivery of impressions and events to the server.
use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::Serialize;

use super::recorder::Record;
use crate::{Error, Result};

pub(crate) const EVENTS_ENDPOINT: &str = "/events/bulk";

/// Sends a batch of records. An `Err` means the whole batch must be retried later.
pub trait Transport: Send + Sync {
    fn send(&self, records: &[Record]) -> Result<()>;
}

#[derive(Serialize)]
struct BulkRequest<'a> {
    records: &'a [Record],
}

/// Posts records as JSON to `{events_url}/events/bulk`.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: Url,
    api_key: String,
}

impl HttpTransport {
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if `events_url` cannot be parsed.
    /// - [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(events_url: &str, api_key: &str, request_timeout: Duration) -> Result<HttpTransport> {
        let url = Url::parse(&format!("{}{}", events_url, EVENTS_ENDPOINT))
            .map_err(Error::InvalidBaseUrl)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(HttpTransport {
            client,
            url,
            api_key: api_key.to_owned(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, records: &[Record]) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .bearer_auth(&self.api_key)
            .json(&BulkRequest { records })
            .send()?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized),
            status => Err(Error::Transport(format!("unexpected status {status}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::{HttpTransport, Transport};
    use crate::{
        http::recorder::{Record, TrackedEvent},
        Error, Key,
    };

    fn records() -> Vec<Record> {
        vec![TrackedEvent {
            key: Key::new("anon"),
            traffic_type: "user".to_owned(),
            event_type: "run_workout".to_owned(),
            timestamp: Utc::now(),
        }
        .into()]
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn posts_records() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events/bulk"))
            .and(header("authorization", "Bearer api-key"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let events_url = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            HttpTransport::new(&events_url, "api-key", Duration::from_secs(5))
                .unwrap()
                .send(&records())
        })
        .await
        .unwrap();

        assert!(result.is_ok());

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["records"][0]["type"], "event");
        assert_eq!(body["records"][0]["eventType"], "run_workout");
        assert_eq!(body["records"][0]["trafficType"], "user");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let events_url = server.uri();
        let result = tokio::task::spawn_blocking(move || {
            HttpTransport::new(&events_url, "api-key", Duration::from_secs(5))
                .unwrap()
                .send(&records())
        })
        .await
        .unwrap();

        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
