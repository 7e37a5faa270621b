#[macro_use]
extern crate log;

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use cgmstats::{CohortRunner, DailyRow, PatientReport};
use cgmstats_algos::{
    GlucoseStatsCalculator, HypoEventCounter, PeriodPlanner, TimeOfDayFilter, a1c_windows,
    helpers::stats_math::{mean, round_float},
};
use cgmstats_client::{
    CancellationToken, EndpointConfig, NightscoutClient, ReadingSource, RetryPolicy,
    profile::{self, PatientZone},
};
use cgmstats_types::{CgmType, PatientRecord};
use chrono::{FixedOffset, NaiveDate};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use dotenv::dotenv;
use serde::Serialize;

#[derive(Parser)]
#[command(name = "cgmstats", about = "Glycemic metrics for CGM cohorts")]
pub struct CgmStatsCli {
    /// Domain appended to each patient endpoint: `<endpoint>.<domain>`
    #[arg(env = "CGM_DOMAIN", long, global = true, default_value = "")]
    pub domain: String,
    #[arg(env = "CGM_SCHEME", long, global = true, default_value = "https")]
    pub scheme: String,
    #[arg(env = "CGM_READINGS_PATH", long, global = true, default_value = "get-glucose-data")]
    pub readings_path: String,
    #[arg(env = "CGM_PROFILE_PATH", long, global = true, default_value = "api/v1/profile.json")]
    pub profile_path: String,
    #[arg(env = "CGM_USERNAME", long, global = true, default_value = "")]
    pub username: String,
    #[arg(env = "CGM_PASSWORD", long, global = true, hide_env_values = true)]
    pub password: Option<String>,
    /// Per-request timeout in seconds
    #[arg(env = "CGM_REQUEST_TIMEOUT", long, global = true, default_value_t = 60)]
    pub request_timeout: u64,
    #[arg(env = "CGM_MAX_ATTEMPTS", long, global = true, default_value_t = 10)]
    pub max_attempts: u32,
    /// First retry pause in seconds, doubled on each later attempt
    #[arg(env = "CGM_INITIAL_BACKOFF", long, global = true, default_value_t = 3)]
    pub initial_backoff: u64,
    /// Overall limit for one fetch in seconds, retries included
    #[arg(env = "CGM_FETCH_DEADLINE", long, global = true)]
    pub fetch_deadline: Option<u64>,
    /// Concurrent units; defaults to the available CPU parallelism
    #[arg(env = "CGM_CONCURRENCY", long, global = true)]
    pub concurrency: Option<usize>,
    /// Offset used for calendar days when the profile has no usable timezone
    #[arg(env = "CGM_UTC_OFFSET", long, global = true, default_value = "+00:00", value_parser = parse_offset, allow_hyphen_values = true)]
    pub utc_offset: FixedOffset,
    #[clap(subcommand)]
    pub subcommand: CgmStatsCommand,
}

#[derive(Subcommand)]
pub enum CgmStatsCommand {
    ///
    /// Print the windows planned for an anchor date
    ///
    Periods {
        #[arg(long)]
        anchor: NaiveDate,
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = PeriodPlanner::DEFAULT_OFFSETS)]
        offsets: Vec<i64>,
    },
    ///
    /// Fetch one patient's readings and summarise them
    ///
    Fetch {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
    },
    ///
    /// Statistics for each period around every patient's anchor date
    ///
    Stats {
        /// JSON array of patient records
        #[arg(long)]
        cohort: PathBuf,
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = PeriodPlanner::DEFAULT_OFFSETS)]
        offsets: Vec<i64>,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    ///
    /// Statistics for the days before each A1c measurement, compared with the lab value
    ///
    A1c {
        #[arg(long)]
        cohort: PathBuf,
        #[arg(long, default_value_t = 90)]
        days: u32,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also write per-day average glucose to this file
        #[arg(long)]
        daily: Option<PathBuf>,
    },
    ///
    /// Count hypoglycemic events within a daily time-of-day window
    ///
    Hypo {
        #[arg(long)]
        endpoint: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        #[arg(long, default_value_t = 7)]
        from_hour: u32,
        #[arg(long, default_value_t = 13)]
        to_hour: u32,
        /// mg/dL
        #[arg(long, default_value_t = 63.0)]
        threshold: f64,
    },
    ///
    /// Generate shell completions
    ///
    Completions { shell: Shell },
}

fn parse_offset(s: &str) -> Result<FixedOffset, String> {
    profile::parse_utc_offset(s).ok_or_else(|| format!("`{s}` is not a UTC offset"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(error) = dotenv() {
        println!("{}", error);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper_util", log::LevelFilter::Warn)
        .init();

    let cli = CgmStatsCli::parse();

    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Stopping: no new requests will be issued");
        handler_token.cancel();
    })?;

    match cli.subcommand {
        CgmStatsCommand::Periods { anchor, ref offsets } => {
            for (index, window) in PeriodPlanner::plan(Some(anchor), offsets).iter().enumerate() {
                println!("{index}: {window}");
            }
            Ok(())
        }
        CgmStatsCommand::Fetch {
            ref endpoint,
            start,
            end,
        } => {
            let client = client(&cli)?;
            let series = client.fetch(endpoint, start, end, &cancel).await;
            println!("Source: {}", series.source_url.as_deref().unwrap_or("-"));
            println!("Readings: {}", series.readings.len());
            if let (Some(first), Some(last)) = (series.readings.first(), series.readings.last()) {
                println!("Device: {} ({})", first.device, CgmType::from_device(&first.device));
                println!(
                    "From: {}",
                    first.time_in(&cli.utc_offset).map(|t| t.to_string()).unwrap_or_default()
                );
                println!(
                    "To: {}",
                    last.time_in(&cli.utc_offset).map(|t| t.to_string()).unwrap_or_default()
                );
                let days = u32::try_from((end - start).num_days() + 1).unwrap_or(1);
                if let Some(stats) = GlucoseStatsCalculator::default().calculate(&series.readings, days) {
                    println!("{}", serde_json::to_string_pretty(&stats)?);
                }
            }
            Ok(())
        }
        CgmStatsCommand::Stats {
            ref cohort,
            ref offsets,
            ref output,
        } => {
            let patients = read_cohort(cohort)?;
            let runner = runner(&cli, cancel.clone())?.with_progress("patients");
            let offsets = offsets.clone();
            let run = runner
                .run(patients, move |p| PeriodPlanner::plan(p.anchor_date, &offsets))
                .await;

            println!("{}", run.summary);
            write_json(output.as_deref(), &PatientReport::from_run(&run))
        }
        CgmStatsCommand::A1c {
            ref cohort,
            days,
            ref output,
            ref daily,
        } => {
            let patients = read_cohort(cohort)?;
            let mut runner = runner(&cli, cancel.clone())?.with_progress("patients");
            if daily.is_some() {
                runner = runner.with_daily_averages(cli.utc_offset);
            }
            let run = runner.run(patients, |p| a1c_windows(&p.a1c, days)).await;

            println!("{}", run.summary);
            write_json(output.as_deref(), &PatientReport::from_a1c_run(&run))?;
            if let Some(daily) = daily {
                write_json(Some(daily.as_path()), &DailyRow::from_run(&run))?;
            }
            Ok(())
        }
        CgmStatsCommand::Hypo {
            ref endpoint,
            start,
            end,
            from_hour,
            to_hour,
            threshold,
        } => {
            let client = client(&cli)?;
            let series = client.fetch(endpoint, start, end, &cancel).await;
            let Some(first) = series.readings.first() else {
                warn!("no readings for {endpoint}, is a device deployed?");
                return Ok(());
            };
            let cgm_type = CgmType::from_device(&first.device);

            let timezone = match client.lookup_timezone(endpoint, &cancel).await {
                Ok(timezone) => timezone,
                Err(error) => {
                    warn!("timezone lookup failed: {error}");
                    None
                }
            };
            let zone = profile::resolve_zone(timezone.as_deref(), cli.utc_offset);

            let days = match zone {
                PatientZone::Fixed(offset) => TimeOfDayFilter::from_hours(from_hour, to_hour, offset)
                    .map(|filter| filter.group_by_day(&series.readings)),
                PatientZone::Region(tz) => TimeOfDayFilter::from_hours(from_hour, to_hour, tz)
                    .map(|filter| filter.group_by_day(&series.readings)),
            }
            .context("invalid hour range")?;
            let events = HypoEventCounter::new(threshold).count(&days, cgm_type);

            let avg_glucose = mean(&events.values);
            let summary = HypoSummary {
                endpoint,
                timezone: timezone.as_deref(),
                zone: zone.to_string(),
                cgm_type,
                readings: events.values.len(),
                avg_glucose: round_float(avg_glucose),
                gmi: round_float(GlucoseStatsCalculator::gmi(avg_glucose)),
                events: &events,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        CgmStatsCommand::Completions { shell } => {
            let mut command = CgmStatsCli::command();
            clap_complete::generate(shell, &mut command, "cgmstats", &mut io::stdout());
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct HypoSummary<'a> {
    endpoint: &'a str,
    timezone: Option<&'a str>,
    zone: String,
    cgm_type: CgmType,
    readings: usize,
    avg_glucose: f64,
    gmi: f64,
    events: &'a cgmstats_algos::HypoEvents,
}

fn client(cli: &CgmStatsCli) -> anyhow::Result<NightscoutClient> {
    if cli.domain.is_empty() {
        anyhow::bail!("no telemetry domain configured (--domain or CGM_DOMAIN)");
    }

    let mut config = EndpointConfig::new(cli.domain.clone())
        .with_credentials(cli.username.clone(), cli.password.clone());
    config.scheme = cli.scheme.clone();
    config.readings_path = cli.readings_path.clone();
    config.profile_path = cli.profile_path.clone();
    config.request_timeout = Duration::from_secs(cli.request_timeout);

    let retry = RetryPolicy {
        max_attempts: cli.max_attempts,
        initial_backoff: Duration::from_secs(cli.initial_backoff),
        deadline: cli.fetch_deadline.map(Duration::from_secs),
    };

    NightscoutClient::new(config, retry).context("failed to build HTTP client")
}

fn runner(
    cli: &CgmStatsCli,
    cancel: CancellationToken,
) -> anyhow::Result<CohortRunner<NightscoutClient>> {
    let runner = CohortRunner::new(client(cli)?).with_cancellation(cancel);
    Ok(match cli.concurrency {
        Some(concurrency) => runner.with_concurrency(concurrency),
        None => runner,
    })
}

fn read_cohort(path: &Path) -> anyhow::Result<Vec<PatientRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let patients: Vec<PatientRecord> = serde_json::from_reader(io::BufReader::new(file))
        .with_context(|| format!("invalid cohort file {}", path.display()))?;
    info!("loaded {} patients from {}", patients.len(), path.display());
    Ok(patients)
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> anyhow::Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
            info!("results written to {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, value)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}
