mod config;
pub use config::{EndpointConfig, RetryPolicy};

mod error;
pub use error::FetchError;

mod entry;
pub use entry::parse_readings;

mod client;
pub use client::NightscoutClient;

pub mod profile;

mod source;
pub use source::{FetchedSeries, ReadingSource};

pub use tokio_util::sync::CancellationToken;
