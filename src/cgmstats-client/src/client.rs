use std::future::Future;

use chrono::NaiveDate;
use reqwest::Url;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;

use crate::{
    EndpointConfig, FetchError, FetchedSeries, ReadingSource, RetryPolicy, entry::parse_readings,
    profile,
};

/// Fetches reading series from per-patient Nightscout-style endpoints.
///
/// Stateless apart from the shared connection pool, so one client serves
/// every concurrent unit of a cohort run.
#[derive(Debug, Clone)]
pub struct NightscoutClient {
    client: reqwest::Client,
    config: EndpointConfig,
    retry: RetryPolicy,
}

impl NightscoutClient {
    pub fn new(config: EndpointConfig, retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn base_url(&self, endpoint: &str, path: &str) -> Result<Url, FetchError> {
        let valid = !endpoint.is_empty()
            && endpoint
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(FetchError::InvalidEndpoint(endpoint.to_string()));
        }

        let url = format!(
            "{}://{}.{}/{}",
            self.config.scheme,
            endpoint,
            self.config.domain,
            path.trim_start_matches('/')
        );
        Url::parse(&url).map_err(|_| FetchError::InvalidEndpoint(endpoint.to_string()))
    }

    /// Readings query for `[start, end]`, both days included in full.
    pub fn readings_url(
        &self,
        endpoint: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Url, FetchError> {
        let mut url = self.base_url(endpoint, &self.config.readings_path)?;
        url.query_pairs_mut()
            .append_pair("gte", &format!("{}T00:00:00Z", start.format("%Y-%m-%d")))
            .append_pair("lte", &format!("{}T23:59:59Z", end.format("%Y-%m-%d")));
        Ok(url)
    }

    pub fn profile_url(&self, endpoint: &str) -> Result<Url, FetchError> {
        self.base_url(endpoint, &self.config.profile_path)
    }

    async fn get_body(&self, url: &Url) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url.clone())
            .basic_auth(&self.config.username, self.config.password.as_deref())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status { status });
        }

        Ok(resp.text().await?)
    }

    /// Runs `op` under the retry policy. Only transient failures are retried;
    /// cancellation stops both requests and pauses.
    async fn with_retry<T, F, Fut>(
        &self,
        url: &Url,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let deadline = self.retry.deadline_from(Instant::now());
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = Self::bounded(deadline, op()) => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(FetchError::DeadlineExceeded { .. }) => {
                    return Err(FetchError::DeadlineExceeded { attempts: attempt });
                }
                Err(error) if !error.is_transient() => return Err(error),
                Err(error) => error,
            };

            if attempt >= max_attempts {
                return Err(FetchError::Exhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let pause = self.retry.backoff(attempt);
            let wake = match Instant::now().checked_add(pause) {
                Some(wake) if deadline.is_none_or(|d| wake < d) => wake,
                None if deadline.is_none() => {
                    return Err(FetchError::Exhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                }
                _ => return Err(FetchError::DeadlineExceeded { attempts: attempt }),
            };

            log::warn!(
                "{} failed (attempt {attempt}/{max_attempts}): {error}; retrying in {pause:?}",
                redacted(url)
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = sleep_until(wake) => {}
            }
        }
    }

    async fn bounded<T>(
        deadline: Option<Instant>,
        fut: impl Future<Output = Result<T, FetchError>>,
    ) -> Result<T, FetchError> {
        match deadline {
            Some(deadline) => timeout_at(deadline, fut)
                .await
                .unwrap_or(Err(FetchError::DeadlineExceeded { attempts: 0 })),
            None => fut.await,
        }
    }

    /// Fetches and parses readings, reporting why nothing came back.
    pub async fn try_fetch(
        &self,
        endpoint: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> Result<FetchedSeries, FetchError> {
        let url = self.readings_url(endpoint, start, end)?;
        let body = self.with_retry(&url, cancel, || self.get_body(&url)).await?;
        let readings = parse_readings(&body)?;

        Ok(FetchedSeries {
            readings,
            source_url: Some(redacted(&url)),
        })
    }

    /// Looks up the patient's profile and returns the first `timezone` field
    /// found anywhere in it.
    pub async fn lookup_timezone(
        &self,
        endpoint: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, FetchError> {
        let url = self.profile_url(endpoint)?;
        let body = self.with_retry(&url, cancel, || self.get_body(&url)).await?;
        let document: serde_json::Value = serde_json::from_str(&body)?;

        Ok(profile::find_string_field(&document, profile::TIMEZONE_FIELD).map(str::to_string))
    }
}

impl ReadingSource for NightscoutClient {
    async fn fetch(
        &self,
        endpoint: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> FetchedSeries {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return FetchedSeries::empty();
        }

        match self.try_fetch(endpoint, start, end, cancel).await {
            Ok(series) => series,
            Err(FetchError::Cancelled) => {
                log::debug!("fetch for {endpoint} cancelled");
                FetchedSeries::empty()
            }
            Err(error) => {
                log::warn!("no readings for {endpoint} ({start} to {end}): {error}");
                FetchedSeries::empty()
            }
        }
    }
}

/// URL as a string with any userinfo removed.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}
