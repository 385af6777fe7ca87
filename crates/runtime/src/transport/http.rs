//! HTTP transport.

use super::{DeliveryError, Transport};
use crate::{Batch, Error, Result, TrackerConfig};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("beacon/", env!("CARGO_PKG_VERSION"));

/// Builder for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    endpoint: String,
    track_ids: Vec<String>,
    timeout: Duration,
}

impl HttpTransportBuilder {
    pub fn new(endpoint: impl Into<String>, track_ids: Vec<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            track_ids,
            timeout: Duration::from_secs(10),
        }
    }

    /// Per-request timeout enforced by the client.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpTransport> {
        if self.track_ids.is_empty() {
            return Err(Error::Transport("no track ids configured".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(HttpTransport {
            client,
            url: batch_url(&self.endpoint, &self.track_ids),
        })
    }
}

/// Posts batches as JSON to `{endpoint}/{track_ids}/batch`.
///
/// Any 2xx is an acknowledgement. 408, 429 and 5xx responses, timeouts and
/// connection failures are transient; every other status is permanent.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn builder(endpoint: impl Into<String>, track_ids: Vec<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(endpoint, track_ids)
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        Self::builder(config.endpoint.trim(), config.track_ids.clone())
            .timeout(config.request_timeout())
            .build()
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl std::fmt::Display for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http({})", self.url)
    }
}

impl Transport for HttpTransport {
    async fn send(&self, batch: &Batch) -> std::result::Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .header("x-beacon-attempt", batch.attempt())
            .body(batch.body().to_vec())
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        debug!(%status, events = batch.len(), "batch posted");
        match classify(status) {
            Ok(()) => Ok(()),
            Err(kind) => {
                let body = response.text().await.unwrap_or_default();
                Err(kind.with_detail(status, body.trim()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Failure {
    Transient,
    Permanent,
}

impl Failure {
    fn with_detail(self, status: StatusCode, body: &str) -> DeliveryError {
        let message = if body.is_empty() {
            status.to_string()
        } else {
            format!("{status}: {body}")
        };
        match self {
            Self::Transient => DeliveryError::Transient(message),
            Self::Permanent => DeliveryError::Permanent(message),
        }
    }
}

fn classify(status: StatusCode) -> std::result::Result<(), Failure> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        Err(Failure::Transient)
    } else {
        Err(Failure::Permanent)
    }
}

fn batch_url(endpoint: &str, track_ids: &[String]) -> String {
    format!(
        "{}/{}/batch",
        endpoint.trim_end_matches('/'),
        track_ids.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_statuses() {
        assert_eq!(classify(StatusCode::OK), Ok(()));
        assert_eq!(classify(StatusCode::NO_CONTENT), Ok(()));

        for code in [408, 429, 500, 502, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify(status), Err(Failure::Transient), "{code}");
        }
        for code in [301, 400, 401, 404, 413, 422] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify(status), Err(Failure::Permanent), "{code}");
        }
    }

    #[test]
    fn url_joins_track_ids() {
        let ids = vec!["123".to_string(), "456".to_string()];
        assert_eq!(
            batch_url("https://collect.example.com/", &ids),
            "https://collect.example.com/123,456/batch"
        );
    }

    #[test]
    fn builder_requires_track_ids() {
        assert!(matches!(
            HttpTransport::builder("https://collect.example.com", vec![]).build(),
            Err(Error::Transport(_))
        ));

        let transport = HttpTransport::from_config(&TrackerConfig::default()).unwrap();
        assert_eq!(transport.url(), "http://localhost:8080/default/batch");
    }

    #[test]
    fn failure_detail_includes_body() {
        let err = Failure::Permanent.with_detail(StatusCode::BAD_REQUEST, "bad event");
        assert_eq!(
            err,
            DeliveryError::Permanent("400 Bad Request: bad event".into())
        );
    }
}
