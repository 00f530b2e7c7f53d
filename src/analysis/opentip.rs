use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::StatusCode;

use super::{HashReputation, LookupError, ReputationLookup};
use crate::constants::{DEFAULT_CONNECTION_TIMEOUT_SECS, OPENTIP_URL};

/// Hash lookups against the Kaspersky OpenTIP API.
pub struct OpenTipClient {
    http_client: reqwest::Client,
    api_key: String,
    url: String,
}

impl OpenTipClient {
    pub fn new(api_key: &str) -> Result<Self, LookupError> {
        Self::with_url(api_key, OPENTIP_URL)
    }

    pub fn with_url(api_key: &str, url: &str) -> Result<Self, LookupError> {
        if api_key.is_empty() {
            return Err(LookupError::MissingApiKey);
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl ReputationLookup for OpenTipClient {
    async fn lookup_hash(&self, md5: &str) -> Result<HashReputation, LookupError> {
        let url = format!("{}?request={}", self.url, md5);
        let response = self
            .http_client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        debug!("OpenTIP response for {}:\n{}", md5, body);

        if status != StatusCode::OK {
            return Err(LookupError::Status(status.to_string()));
        }
        serde_json::from_str(&body).map_err(|e| LookupError::Decode(e.to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Transport(e.to_string())
    }
}
