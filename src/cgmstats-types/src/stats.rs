use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CgmType {
    Libre,
    Dexcom,
}

impl CgmType {
    /// Device identifiers reported by the Libre uploader.
    const LIBRE_MARKERS: [&'static str; 1] = ["lvconnect"];

    /// Classify a device string. Anything not recognised as Libre is Dexcom.
    pub fn from_device(device: &str) -> Self {
        if Self::LIBRE_MARKERS.iter().any(|m| device.contains(m)) {
            Self::Libre
        } else {
            Self::Dexcom
        }
    }

    /// Expected readings per day at the sensor's nominal cadence.
    pub fn samples_per_day(self) -> u32 {
        match self {
            // 15 minute cadence
            CgmType::Libre => 96,
            // 5 minute cadence
            CgmType::Dexcom => 288,
        }
    }
}

/// Glycemic metrics for one reading series over one window.
///
/// Percentages are in `[0, 100]`, and `tbr + tir + tar == 100`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsResult {
    pub cgm_type: CgmType,
    pub sample_count: usize,
    pub percent_data: f64,
    pub avg_glucose: f64,
    pub std_dev: f64,
    pub gmi: f64,
    pub tbr: f64,
    pub tir: f64,
    pub tar: f64,
    pub very_low: f64,
    pub low: f64,
    pub high: f64,
    pub very_high: f64,
    /// `None` when the series has no consecutive pair within the gap tolerance.
    pub fluctuation_rate: Option<f64>,
    pub rapid_fluctuation_rate: Option<f64>,
}
