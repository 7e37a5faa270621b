use chrono::NaiveDate;

/// One row of the cohort worklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: i64,
    #[serde(default)]
    pub link: String,
    /// Telemetry endpoint reference, absent when no device is deployed.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub anchor_date: Option<NaiveDate>,
    #[serde(default)]
    pub hardware: Option<String>,
    #[serde(default)]
    pub a1c: Vec<A1cMeasurement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct A1cMeasurement {
    pub date: NaiveDate,
    /// Lab HbA1c in percent.
    pub value: f64,
}

impl PatientRecord {
    pub fn new(id: i64, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            link: String::new(),
            endpoint: Some(endpoint.into()),
            anchor_date: None,
            hardware: None,
            a1c: Vec::new(),
        }
    }

    pub fn with_anchor(mut self, anchor_date: NaiveDate) -> Self {
        self.anchor_date = Some(anchor_date);
        self
    }

    pub fn with_a1c(mut self, date: NaiveDate, value: f64) -> Self {
        self.a1c.push(A1cMeasurement { date, value });
        self
    }

    /// The endpoint reference, or `None` when it is missing or blank.
    pub fn deployed_endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}
