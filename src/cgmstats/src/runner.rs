use std::{fmt, num::NonZeroUsize, sync::Arc};

use cgmstats_algos::{DailyAverage, GlucoseStatsCalculator};
use cgmstats_client::{CancellationToken, ReadingSource};
use cgmstats_types::{PatientRecord, StatsResult, TimeWindow};
use chrono::FixedOffset;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::{sync::Semaphore, task::JoinSet};

/// Statistics for one patient over one planned window.
#[derive(Debug, Clone)]
pub struct WindowStats {
    pub patient: Arc<PatientRecord>,
    /// Position of `window` in the patient's plan.
    pub window_index: usize,
    pub window: TimeWindow,
    pub stats: StatsResult,
    pub source_url: Option<String>,
    /// Filled only when daily averages were requested.
    pub daily: Vec<DailyAverage>,
}

/// A patient together with the windows planned for it.
#[derive(Debug, Clone)]
pub struct PatientPlan {
    pub patient: Arc<PatientRecord>,
    pub windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub patients: usize,
    pub no_device: usize,
    pub no_windows: usize,
    pub units: usize,
    pub computed: usize,
    pub empty: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run complete:")?;
        writeln!(f, "  patients:   {}", self.patients)?;
        writeln!(f, "  no device:  {}", self.no_device)?;
        writeln!(f, "  no windows: {}", self.no_windows)?;
        writeln!(f, "  units:      {}", self.units)?;
        writeln!(f, "  computed:   {}", self.computed)?;
        writeln!(f, "  no data:    {}", self.empty)?;
        writeln!(f, "  failed:     {}", self.failed)?;
        write!(f, "  cancelled:  {}", self.cancelled)
    }
}

#[derive(Debug)]
pub struct CohortRun {
    pub plans: Vec<PatientPlan>,
    /// In completion order, which carries no meaning.
    pub rows: Vec<WindowStats>,
    pub summary: RunSummary,
}

/// One patient x one window.
struct Unit {
    patient: Arc<PatientRecord>,
    endpoint: String,
    window_index: usize,
    window: TimeWindow,
}

/// Terminal states of a unit. A unit moves Pending -> Fetching, then to
/// `Empty`, or through Computing to `Computed`; computed units are collected.
#[derive(Debug)]
enum UnitOutcome {
    Empty,
    Computed(Box<WindowStats>),
    Cancelled,
}

/// Fans a cohort out over its planned windows and collects the statistics.
///
/// Each unit fetches then computes on its own task; a unit that panics or
/// finds no data is dropped without affecting the others. Results reach the
/// runner through task completion only, never through shared state.
pub struct CohortRunner<S> {
    source: Arc<S>,
    calculator: GlucoseStatsCalculator,
    concurrency: usize,
    cancel: CancellationToken,
    daily_offset: Option<FixedOffset>,
    progress: ProgressBar,
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{prefix:>12} [{wide_bar:.cyan/dim}] {pos}/{len} ({elapsed}, {eta} remaining)",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=>-")
}

impl<S> CohortRunner<S>
where
    S: ReadingSource + 'static,
{
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            calculator: GlucoseStatsCalculator::default(),
            concurrency: Self::default_concurrency(),
            cancel: CancellationToken::new(),
            daily_offset: None,
            progress: ProgressBar::hidden(),
        }
    }

    pub fn default_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Also compute per-day averages, with days taken in `offset`.
    pub fn with_daily_averages(mut self, offset: FixedOffset) -> Self {
        self.daily_offset = Some(offset);
        self
    }

    pub fn with_progress(mut self, label: &str) -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(bar_style());
        pb.set_prefix(label.to_string());
        self.progress = pb;
        self
    }

    pub async fn run<F>(&self, cohort: Vec<PatientRecord>, windows_of: F) -> CohortRun
    where
        F: Fn(&PatientRecord) -> Vec<TimeWindow>,
    {
        let mut summary = RunSummary {
            patients: cohort.len(),
            ..Default::default()
        };

        let plans = cohort
            .into_iter()
            .map(|patient| {
                let windows = windows_of(&patient);
                PatientPlan {
                    patient: Arc::new(patient),
                    windows,
                }
            })
            .collect::<Vec<_>>();

        let mut units = Vec::new();
        for plan in &plans {
            let Some(endpoint) = plan.patient.deployed_endpoint() else {
                debug!("patient {} has no telemetry device", plan.patient.id);
                summary.no_device += 1;
                continue;
            };
            if plan.windows.is_empty() {
                debug!("patient {} has no evaluable periods", plan.patient.id);
                summary.no_windows += 1;
                continue;
            }

            units.extend(plan.windows.iter().enumerate().map(|(window_index, window)| Unit {
                patient: plan.patient.clone(),
                endpoint: endpoint.to_string(),
                window_index,
                window: *window,
            }));
        }

        summary.units = units.len();
        self.progress.set_length(units.len() as u64);

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for unit in units {
            let source = self.source.clone();
            let semaphore = semaphore.clone();
            let cancel = self.cancel.clone();
            let calculator = self.calculator;
            let daily_offset = self.daily_offset;

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return UnitOutcome::Cancelled,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return UnitOutcome::Cancelled,
                    },
                };
                process_unit(source.as_ref(), calculator, daily_offset, unit, &cancel).await
            });
        }

        let mut rows = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(UnitOutcome::Computed(row)) => {
                    trace!(
                        "patient {} window {}: collected",
                        row.patient.id, row.window_index
                    );
                    summary.computed += 1;
                    rows.push(*row);
                }
                Ok(UnitOutcome::Empty) => summary.empty += 1,
                Ok(UnitOutcome::Cancelled) => summary.cancelled += 1,
                Err(error) => {
                    error!("unit failed: {error}");
                    summary.failed += 1;
                }
            }
            self.progress.inc(1);
        }
        self.progress.finish();

        info!(
            "{} units: {} computed, {} without data, {} failed, {} cancelled",
            summary.units, summary.computed, summary.empty, summary.failed, summary.cancelled
        );

        CohortRun {
            plans,
            rows,
            summary,
        }
    }
}

async fn process_unit<S: ReadingSource>(
    source: &S,
    calculator: GlucoseStatsCalculator,
    daily_offset: Option<FixedOffset>,
    unit: Unit,
    cancel: &CancellationToken,
) -> UnitOutcome {
    let Unit {
        patient,
        endpoint,
        window_index,
        window,
    } = unit;

    if cancel.is_cancelled() {
        return UnitOutcome::Cancelled;
    }

    trace!("patient {} window {window_index}: fetching {window}", patient.id);
    let series = source.fetch(&endpoint, window.start, window.end, cancel).await;
    if series.is_empty() {
        if cancel.is_cancelled() {
            return UnitOutcome::Cancelled;
        }
        debug!("patient {} window {window_index}: no data for {window}", patient.id);
        return UnitOutcome::Empty;
    }

    trace!(
        "patient {} window {window_index}: computing over {} readings",
        patient.id,
        series.readings.len()
    );
    let Some(stats) = calculator.calculate(&series.readings, window.length_days) else {
        return UnitOutcome::Empty;
    };

    let daily = daily_offset
        .map(|offset| DailyAverage::from_readings(&series.readings, offset))
        .unwrap_or_default();

    UnitOutcome::Computed(Box::new(WindowStats {
        patient,
        window_index,
        window,
        stats,
        source_url: series.source_url,
        daily,
    }))
}

impl CohortRun {
    /// Row for `(patient id, window index)`, if that unit produced one.
    pub fn get(&self, patient_id: i64, window_index: usize) -> Option<&WindowStats> {
        self.rows
            .iter()
            .find(|r| r.patient.id == patient_id && r.window_index == window_index)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use cgmstats_algos::PeriodPlanner;
    use cgmstats_client::FetchedSeries;
    use cgmstats_types::Reading;
    use chrono::{NaiveDate, NaiveTime};

    const FIVE_MIN_MS: i64 = 5 * 60 * 1000;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// A day of five-minute readings starting at midnight UTC on `day`.
    fn day_of_readings(day: NaiveDate, value: f64) -> Vec<Reading> {
        let start = day
            .and_time(NaiveTime::MIN)
            .and_utc()
            .timestamp_millis();
        (0..288)
            .map(|i| Reading::new(value, start + i * FIVE_MIN_MS, "share2"))
            .collect()
    }

    /// Serves fixed readings per endpoint, trimmed to the requested dates.
    /// `panic` panics, `hang` waits until cancelled.
    #[derive(Default)]
    struct MemorySource {
        readings: HashMap<String, Vec<Reading>>,
        calls: AtomicUsize,
    }

    impl MemorySource {
        fn with(mut self, endpoint: &str, readings: Vec<Reading>) -> Self {
            self.readings.insert(endpoint.to_string(), readings);
            self
        }
    }

    impl ReadingSource for MemorySource {
        async fn fetch(
            &self,
            endpoint: &str,
            start: NaiveDate,
            end: NaiveDate,
            cancel: &CancellationToken,
        ) -> FetchedSeries {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match endpoint {
                "panic" => panic!("retrieval blew up"),
                "hang" => {
                    cancel.cancelled().await;
                    return FetchedSeries::empty();
                }
                _ => {}
            }

            let readings = self
                .readings
                .get(endpoint)
                .map(|all| {
                    all.iter()
                        .filter(|r| {
                            r.time_utc()
                                .is_some_and(|t| start <= t.date_naive() && t.date_naive() <= end)
                        })
                        .cloned()
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();

            FetchedSeries {
                readings,
                source_url: Some(format!("mem://{endpoint}")),
            }
        }
    }

    fn patient(id: i64, endpoint: &str, anchor: NaiveDate) -> PatientRecord {
        PatientRecord::new(id, endpoint).with_anchor(anchor)
    }

    fn plan(offsets: &'static [i64]) -> impl Fn(&PatientRecord) -> Vec<TimeWindow> {
        move |p| PeriodPlanner::plan(p.anchor_date, offsets)
    }

    #[tokio::test]
    async fn computes_each_window_with_data() {
        let anchor = date(2025, 1, 10);
        let mut readings = day_of_readings(date(2025, 1, 5), 100.0);
        readings.extend(day_of_readings(date(2025, 1, 12), 200.0));
        let source = MemorySource::default().with("a", readings);

        let run = CohortRunner::new(source)
            .run(vec![patient(1, "a", anchor)], plan(&[-30, 30, 60]))
            .await;

        assert_eq!(run.summary.units, 3);
        assert_eq!(run.summary.computed, 2);
        assert_eq!(run.summary.empty, 1);

        let lookback = run.get(1, 0).unwrap();
        assert_eq!(lookback.stats.avg_glucose, 100.0);
        assert_eq!(lookback.stats.sample_count, 288);
        assert!((lookback.stats.percent_data - 100.0 / 30.0).abs() < 1e-9);
        assert_eq!(lookback.source_url.as_deref(), Some("mem://a"));

        let forward = run.get(1, 1).unwrap();
        assert_eq!(forward.stats.avg_glucose, 200.0);
        assert!(run.get(1, 2).is_none());
    }

    #[tokio::test]
    async fn patients_without_device_or_windows_are_skipped() {
        let source = MemorySource::default();
        let mut no_device = patient(1, "", date(2025, 1, 10));
        no_device.endpoint = None;
        let blank = patient(2, "   ", date(2025, 1, 10));
        let mut no_anchor = patient(3, "a", date(2025, 1, 10));
        no_anchor.anchor_date = None;

        let runner = CohortRunner::new(source);
        let run = runner
            .run(vec![no_device, blank, no_anchor], plan(&[30]))
            .await;

        assert_eq!(run.summary.no_device, 2);
        assert_eq!(run.summary.no_windows, 1);
        assert_eq!(run.summary.units, 0);
        assert!(run.rows.is_empty());
        assert_eq!(runner.source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failing_unit_does_not_affect_others() {
        let anchor = date(2025, 1, 10);
        let source = MemorySource::default()
            .with("b", day_of_readings(date(2025, 1, 11), 120.0))
            .with("c", day_of_readings(date(2025, 1, 11), 140.0));

        let cohort = vec![
            patient(1, "panic", anchor),
            patient(2, "b", anchor),
            patient(3, "missing", anchor),
            patient(4, "c", anchor),
        ];
        let run = CohortRunner::new(source)
            .with_concurrency(2)
            .run(cohort, plan(&[30]))
            .await;

        assert_eq!(run.summary.units, 4);
        assert_eq!(run.summary.failed, 1);
        assert_eq!(run.summary.empty, 1);
        assert_eq!(run.summary.computed, 2);
        assert_eq!(run.get(2, 0).unwrap().stats.avg_glucose, 120.0);
        assert_eq!(run.get(4, 0).unwrap().stats.avg_glucose, 140.0);
    }

    #[tokio::test]
    async fn cancellation_keeps_collected_results() {
        let anchor = date(2025, 1, 10);
        let source = MemorySource::default().with("a", day_of_readings(date(2025, 1, 11), 90.0));
        let cancel = CancellationToken::new();
        let runner = CohortRunner::new(source)
            .with_concurrency(4)
            .with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let run = tokio::time::timeout(
            Duration::from_secs(10),
            runner.run(
                vec![patient(1, "a", anchor), patient(2, "hang", anchor)],
                plan(&[30]),
            ),
        )
        .await
        .expect("run did not stop after cancellation");

        assert_eq!(run.summary.computed, 1);
        assert_eq!(run.summary.cancelled, 1);
        assert_eq!(run.get(1, 0).unwrap().stats.avg_glucose, 90.0);
    }

    #[tokio::test]
    async fn daily_averages_on_request() {
        let anchor = date(2025, 1, 10);
        let mut readings = day_of_readings(date(2025, 1, 11), 100.0);
        readings.extend(day_of_readings(date(2025, 1, 12), 150.0));
        let source = MemorySource::default().with("a", readings);

        let run = CohortRunner::new(source)
            .with_daily_averages(FixedOffset::east_opt(0).unwrap())
            .run(vec![patient(1, "a", anchor)], plan(&[30]))
            .await;

        let daily = &run.get(1, 0).unwrap().daily;
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].avg_glucose, 100.0);
        assert_eq!(daily[1].count, 288);
    }

    #[tokio::test]
    async fn results_keyed_by_patient_and_window() {
        let anchor = date(2025, 1, 10);
        let mut readings = Vec::new();
        for day in 1..=28 {
            readings.extend(day_of_readings(date(2025, 2, day), 100.0 + day as f64));
        }
        let source = MemorySource::default().with("a", readings.clone()).with("b", readings);

        let cohort = (1..=6)
            .map(|id| patient(id, if id % 2 == 0 { "a" } else { "b" }, anchor))
            .collect::<Vec<_>>();
        let run = CohortRunner::new(source)
            .with_concurrency(3)
            .run(cohort, plan(&[30, 60]))
            .await;

        assert_eq!(run.rows.len(), 12);
        for id in 1..=6 {
            // [Jan 10, Feb 9] and [Feb 10, Apr 11]
            assert_eq!(run.get(id, 0).unwrap().stats.sample_count, 9 * 288);
            assert_eq!(run.get(id, 1).unwrap().stats.sample_count, 19 * 288);
        }
    }
}
