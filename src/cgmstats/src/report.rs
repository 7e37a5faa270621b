use std::collections::HashMap;

use cgmstats_algos::A1cComparison;
use cgmstats_types::{StatsResult, TimeWindow};
use chrono::NaiveDate;
use serde::Serialize;

use crate::{CohortRun, WindowStats};

/// One planned window of a patient, empty when it produced no statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSlot {
    pub index: usize,
    pub window: TimeWindow,
    pub stats: Option<StatsResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub a1c: Option<A1cComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// All windows of a patient with at least one usable window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientReport {
    pub id: i64,
    pub link: String,
    pub hardware: Option<String>,
    pub anchor_date: Option<NaiveDate>,
    pub windows: Vec<WindowSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRow {
    pub patient_id: i64,
    pub date: NaiveDate,
    pub avg_glucose: f64,
    pub count: usize,
}

impl PatientReport {
    /// Groups a run's rows by patient, in cohort order.
    pub fn from_run(run: &CohortRun) -> Vec<PatientReport> {
        let mut by_unit: HashMap<(i64, usize), &WindowStats> = HashMap::new();
        for row in &run.rows {
            by_unit.insert((row.patient.id, row.window_index), row);
        }

        run.plans
            .iter()
            .filter_map(|plan| {
                let patient = &plan.patient;
                let windows = plan
                    .windows
                    .iter()
                    .enumerate()
                    .map(|(index, window)| {
                        let row = by_unit.get(&(patient.id, index));
                        WindowSlot {
                            index,
                            window: *window,
                            stats: row.map(|r| r.stats),
                            a1c: None,
                            source_url: row.and_then(|r| r.source_url.clone()),
                        }
                    })
                    .collect::<Vec<_>>();

                windows.iter().any(|w| w.stats.is_some()).then(|| PatientReport {
                    id: patient.id,
                    link: patient.link.clone(),
                    hardware: patient.hardware.clone(),
                    anchor_date: patient.anchor_date,
                    windows,
                })
            })
            .collect()
    }

    /// Like [`PatientReport::from_run`], comparing each window that ends on
    /// an A1c measurement date with that measurement.
    pub fn from_a1c_run(run: &CohortRun) -> Vec<PatientReport> {
        let measurements = run
            .plans
            .iter()
            .map(|plan| (plan.patient.id, plan.patient.a1c.as_slice()))
            .collect::<HashMap<_, _>>();

        let mut reports = Self::from_run(run);
        for report in &mut reports {
            let Some(measurements) = measurements.get(&report.id) else {
                continue;
            };
            for slot in &mut report.windows {
                let (Some(stats), Some(measurement)) = (
                    slot.stats.as_ref(),
                    measurements.iter().find(|m| m.date == slot.window.end),
                ) else {
                    continue;
                };
                slot.a1c = Some(A1cComparison::new(measurement, stats));
            }
        }
        reports
    }
}

impl DailyRow {
    pub fn from_run(run: &CohortRun) -> Vec<DailyRow> {
        let mut rows = run
            .rows
            .iter()
            .flat_map(|row| {
                row.daily.iter().map(|day| DailyRow {
                    patient_id: row.patient.id,
                    date: day.date,
                    avg_glucose: day.avg_glucose,
                    count: day.count,
                })
            })
            .collect::<Vec<_>>();
        rows.sort_by_key(|r| (r.patient_id, r.date));
        rows
    }
}
