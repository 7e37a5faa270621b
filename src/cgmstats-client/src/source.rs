use std::future::Future;

use chrono::NaiveDate;
use cgmstats_types::Reading;
use tokio_util::sync::CancellationToken;

/// A patient's readings for a date range and where they came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedSeries {
    /// Ascending by timestamp.
    pub readings: Vec<Reading>,
    /// Request URL without credentials; `None` when nothing was requested.
    pub source_url: Option<String>,
}

impl FetchedSeries {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Anything that can produce a reading series for a patient endpoint.
///
/// Implementations never fail: a missing device, exhausted retries and
/// cancellation all yield an empty series.
pub trait ReadingSource: Send + Sync {
    fn fetch(
        &self,
        endpoint: &str,
        start: NaiveDate,
        end: NaiveDate,
        cancel: &CancellationToken,
    ) -> impl Future<Output = FetchedSeries> + Send;
}
