//! # Fetch Gateway
//!
//! Where the upstream snapshot comes from. The synchronizer only depends on
//! the `FetchGateway` trait; `HttpLocationFetcher` is the production
//! implementation and `StaticFetcher` serves canned answers in tests and
//! dry runs.
//!
//! A fetch either returns the complete snapshot or fails. There is no
//! partial result.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use thiserror::Error;
use tracing::debug;

use crate::retrieve::ky_http::{ApiClient, Auth, HttpError, DEFAULT_MAX_RETRIES};

use super::model::RawLocationRecord;

/// Errors raised while retrieving the upstream snapshot.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream request failed: {0}")]
    Transport(#[source] HttpError),

    #[error("upstream answered with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The body is not a JSON array. Bad elements inside an array never end
    /// up here; they decode into rejected records.
    #[error("upstream payload is not a list of location records: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("upstream fetch failed: {0}")]
    Other(String),
}

impl From<HttpError> for FetchError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Decode(source) => FetchError::Decode(source),
            other => FetchError::Transport(other),
        }
    }
}

/// The capability the synchronizer needs from the upstream source.
#[async_trait]
pub trait FetchGateway: Send + Sync {
    /// Retrieves the full upstream snapshot.
    async fn fetch(&self) -> Result<Vec<RawLocationRecord>, FetchError>;
}

/// # HTTP Location Fetcher
///
/// Issues `GET <endpoint>` with basic credentials and decodes a JSON array of
/// `{lac, cellid, eci}` objects, one element at a time. Transient failures are
/// retried by the underlying `ApiClient` with exponential backoff.
pub struct HttpLocationFetcher {
    client: ApiClient,
}

impl HttpLocationFetcher {
    /// # Arguments
    /// * `endpoint` - Absolute URL of the location data resource.
    /// * `login` / `password` - Basic auth credentials.
    /// * `timeout` - Per-attempt request timeout.
    pub fn new(
        endpoint: &str,
        login: &str,
        password: &str,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let auth = Auth::Basic {
            login: login.to_string(),
            password: password.to_string(),
        };
        Ok(Self {
            client: ApiClient::new(endpoint, auth, timeout)?,
        })
    }

    /// Builds a fetcher whose attempts, retries included, fit in `budget`.
    pub fn within_budget(
        endpoint: &str,
        login: &str,
        password: &str,
        budget: Duration,
    ) -> Result<Self, FetchError> {
        Self::new(endpoint, login, password, Self::attempt_timeout(budget))
    }

    /// Splits an overall fetch budget evenly over the first attempt and its
    /// retries.
    pub fn attempt_timeout(budget: Duration) -> Duration {
        budget / (DEFAULT_MAX_RETRIES + 1)
    }

    /// Wraps an already configured client.
    pub fn from_client(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FetchGateway for HttpLocationFetcher {
    async fn fetch(&self) -> Result<Vec<RawLocationRecord>, FetchError> {
        let response = self
            .client
            .request::<Vec<RawLocationRecord>, ()>(Method::GET, "", None, None)
            .await?;

        if !response.success {
            return Err(FetchError::Status {
                status: response.status,
                body: response.error_body.unwrap_or_default(),
            });
        }

        let records = response.data.unwrap_or_default();
        debug!(
            "Fetched {} records from {}",
            records.len(),
            self.client.base_url()
        );
        Ok(records)
    }
}

/// # Static Fetcher
///
/// Answers every fetch with the configured snapshot, or with the configured
/// failure. The answer can be swapped between ticks.
#[derive(Debug)]
pub struct StaticFetcher {
    answer: Mutex<Result<Vec<RawLocationRecord>, String>>,
}

impl StaticFetcher {
    pub fn new(records: Vec<RawLocationRecord>) -> Self {
        Self {
            answer: Mutex::new(Ok(records)),
        }
    }

    /// A fetcher whose every call fails with `FetchError::Other(reason)`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            answer: Mutex::new(Err(reason.into())),
        }
    }

    pub fn set_records(&self, records: Vec<RawLocationRecord>) {
        *self.answer.lock().unwrap_or_else(|e| e.into_inner()) = Ok(records);
    }

    pub fn set_failure(&self, reason: impl Into<String>) {
        *self.answer.lock().unwrap_or_else(|e| e.into_inner()) = Err(reason.into());
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl FetchGateway for StaticFetcher {
    async fn fetch(&self) -> Result<Vec<RawLocationRecord>, FetchError> {
        let answer = self.answer.lock().unwrap_or_else(|e| e.into_inner()).clone();
        answer.map_err(FetchError::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_fetcher_answers_and_fails_on_demand() {
        let fetcher = StaticFetcher::new(vec![RawLocationRecord::new(Some(1), None, None)]);
        assert_eq!(fetcher.fetch().await.unwrap().len(), 1);

        fetcher.set_failure("upstream down");
        assert!(matches!(fetcher.fetch().await, Err(FetchError::Other(r)) if r == "upstream down"));

        fetcher.set_records(Vec::new());
        assert!(fetcher.fetch().await.unwrap().is_empty());
    }

    #[test]
    fn decode_errors_keep_their_kind() {
        let bad = serde_json::from_str::<Vec<RawLocationRecord>>("{").unwrap_err();
        assert!(matches!(FetchError::from(HttpError::Decode(bad)), FetchError::Decode(_)));
    }

    #[test]
    fn attempts_share_the_fetch_budget() {
        let budget = Duration::from_secs(30);
        let attempt = HttpLocationFetcher::attempt_timeout(budget);
        assert_eq!(attempt, Duration::from_millis(7_500));
        assert!(attempt * (DEFAULT_MAX_RETRIES + 1) <= budget);

        assert!(HttpLocationFetcher::within_budget(
            "http://localhost:9/indexes",
            "u",
            "p",
            budget
        )
        .is_ok());
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let result = HttpLocationFetcher::new("::nope::", "u", "p", Duration::from_secs(1));
        assert!(matches!(result, Err(FetchError::Transport(HttpError::Url(_)))));
    }
}
