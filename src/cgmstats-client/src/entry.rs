use cgmstats_types::Reading;

use crate::FetchError;

/// One element of the telemetry response. Only elements carrying both a
/// glucose value and a timestamp become readings.
#[derive(Debug, serde::Deserialize)]
struct Entry {
    sgv: Option<f64>,
    date: Option<f64>,
    #[serde(default)]
    device: Option<String>,
}

/// Parses a telemetry response body into readings sorted by timestamp.
///
/// The sort is stable, so readings sharing a timestamp keep server order.
pub fn parse_readings(body: &str) -> Result<Vec<Reading>, FetchError> {
    let elements: Vec<serde_json::Value> = serde_json::from_str(body)?;
    let total = elements.len();

    let mut readings = elements
        .into_iter()
        .filter_map(|element| serde_json::from_value::<Entry>(element).ok())
        .filter_map(|entry| {
            Some(Reading {
                value: entry.sgv?,
                timestamp_ms: entry.date?.round() as i64,
                device: entry.device.unwrap_or_default(),
            })
        })
        .collect::<Vec<_>>();

    if readings.len() < total {
        log::debug!("skipped {} of {} entries without sgv/date", total - readings.len(), total);
    }

    readings.sort_by_key(|r| r.timestamp_ms);
    Ok(readings)
}
