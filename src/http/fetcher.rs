//! An HTTP client that fetches treatments for a key from the server.
use std::time::Duration;

use reqwest::{StatusCode, Url};

use super::store::Treatments;
use crate::{Error, Key, Result};

pub(crate) const TREATMENTS_ENDPOINT: &str = "/treatments";

/// Something the poller thread can fetch treatments from.
pub trait FetchTreatments: Send {
    fn fetch(&mut self) -> Result<Treatments>;
}

pub struct TreatmentsFetcher {
    client: reqwest::blocking::Client,
    url: Url,
    api_key: String,
}

impl TreatmentsFetcher {
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if `base_url` cannot be parsed.
    /// - [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        api_key: &str,
        key: &Key,
        request_timeout: Duration,
    ) -> Result<TreatmentsFetcher> {
        let url = Url::parse_with_params(
            &format!("{}{}", base_url, TREATMENTS_ENDPOINT),
            &[
                ("key", key.matching_key()),
                ("sdkName", "rust"),
                ("sdkVersion", env!("CARGO_PKG_VERSION")),
            ],
        )
        .map_err(Error::InvalidBaseUrl)?;

        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(TreatmentsFetcher {
            client,
            url,
            api_key: api_key.to_owned(),
        })
    }
}

impl FetchTreatments for TreatmentsFetcher {
    fn fetch(&mut self) -> Result<Treatments> {
        log::debug!(target: "flagwatch", "fetching treatments");

        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(&self.api_key)
            .send()?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                log::warn!(target: "flagwatch", "client is not authorized. Check your API key");
                return Err(Error::Unauthorized);
            }
            status => {
                log::warn!(target: "flagwatch", "received non-200 response while fetching treatments: {:?}", status);
                return Err(Error::Transport(format!("unexpected status {status}")));
            }
        }

        let treatments: Treatments = response.json()?;
        log::debug!(target: "flagwatch", change_number = treatments.change_number; "successfully fetched treatments");
        Ok(treatments)
    }
}
