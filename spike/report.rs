//! Writes the run's output directory and its CSV logs.
//!
//! Every log is named `<prefix>_<ddMonYYYY>_spikeInLog.txt` and lives in a
//! date-stamped `array_spiker_output_<ddMonYYYY>` directory, so repeated runs on
//! the same day overwrite each other and runs on different days never do.

use crate::reconcile::SampleOutcome;
use crate::summarize::SampleSummary;
use crate::types::{Channel, Dataset};
use chrono::NaiveDate;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const OUTPUT_DIRECTORY_PREFIX: &str = "array_spiker_output_";
pub const LOG_SUFFIX: &str = "_spikeInLog.txt";

pub const VERBOSE_LOG_PREFIX: &str = "verbose_results";
pub const SUMMARY_LOG_PREFIX: &str = "summary";
pub const RECONCILIATION_LOG_PREFIX: &str = "reconciliation";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write to '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write CSV log: {0}")]
    Csv(#[from] csv::Error),
}

/// Today's date in the local time zone.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Formats a date as used in output names, e.g. `11Jan2018`.
pub fn date_stamp(date: NaiveDate) -> String {
    date.format("%d%b%Y").to_string()
}

/// Creates `<base>/array_spiker_output_<date>` if it does not exist and returns it.
pub fn create_output_directory(base: &Path, date: NaiveDate) -> Result<PathBuf, ReportError> {
    let directory = base.join(format!("{OUTPUT_DIRECTORY_PREFIX}{}", date_stamp(date)));
    fs::create_dir_all(&directory).map_err(|source| ReportError::Io {
        path: directory.clone(),
        source,
    })?;
    Ok(directory)
}

pub fn log_file_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{prefix}_{}{LOG_SUFFIX}", date_stamp(date)))
}

#[derive(Serialize)]
struct VerboseRow<'a> {
    #[serde(rename = "FeatureNum")]
    feature_num: u32,
    #[serde(rename = "ProbeName")]
    probe_name: &'a str,
    #[serde(rename = "SystematicName")]
    systematic_name: &'a str,
    #[serde(rename = "gProcessedSignal")]
    g_processed_signal: f64,
    #[serde(rename = "rProcessedSignal")]
    r_processed_signal: f64,
    #[serde(rename = "gMedianSignal")]
    g_median_signal: f64,
    #[serde(rename = "rMedianSignal")]
    r_median_signal: f64,
    #[serde(rename = "gBGMedianSignal")]
    g_bg_median_signal: f64,
    #[serde(rename = "rBGMedianSignal")]
    r_bg_median_signal: f64,
    #[serde(rename = "gIsSaturated")]
    g_is_saturated: u8,
    #[serde(rename = "rIsSaturated")]
    r_is_saturated: u8,
    #[serde(rename = "FE_filename")]
    fe_filename: &'a str,
}

/// One row per feature record, in dataset order.
pub fn write_verbose_log(path: &Path, dataset: &Dataset) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in dataset.records() {
        writer.serialize(VerboseRow {
            feature_num: record.feature_num,
            probe_name: &record.probe_name,
            systematic_name: &record.systematic_name,
            g_processed_signal: record.processed_signal.green,
            r_processed_signal: record.processed_signal.red,
            g_median_signal: record.median_signal.green,
            r_median_signal: record.median_signal.red,
            g_bg_median_signal: record.bg_median_signal.green,
            r_bg_median_signal: record.bg_median_signal.red,
            g_is_saturated: u8::from(record.is_saturated.green),
            r_is_saturated: u8::from(record.is_saturated.red),
            fe_filename: &record.source,
        })?;
    }
    flush(writer, path)
}

/// The saturation pivot: one row per panel probe, one column per (channel, sample)
/// holding the summed flags, then one replicate-count column per sample.
pub fn write_summary_log(path: &Path, summary: &SampleSummary) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["ProbeName".to_string()];
    for channel in Channel::BOTH {
        header.extend(
            summary
                .labels()
                .iter()
                .map(|label| format!("{}IsSaturated:{label}", channel.prefix())),
        );
    }
    header.extend(summary.labels().iter().map(|label| format!("Replicates:{label}")));
    writer.write_record(&header)?;

    for probe in summary.probes() {
        let mut row = vec![probe.clone()];
        for channel in Channel::BOTH {
            row.extend(
                summary
                    .labels()
                    .iter()
                    .map(|label| summary.tally(label, probe).saturated(channel).to_string()),
            );
        }
        row.extend(
            summary
                .labels()
                .iter()
                .map(|label| summary.tally(label, probe).replicates.to_string()),
        );
        writer.write_record(&row)?;
    }
    flush(writer, path)
}

#[derive(Serialize)]
struct ReconciliationRow {
    #[serde(rename = "Sample")]
    sample: String,
    #[serde(rename = "Channel")]
    channel: Channel,
    #[serde(rename = "Verdict")]
    verdict: String,
    #[serde(rename = "Expected")]
    expected: String,
    #[serde(rename = "Detected")]
    detected: String,
    #[serde(rename = "Extra")]
    extra: String,
    #[serde(rename = "Missing")]
    missing: String,
    #[serde(rename = "Uncertain")]
    uncertain: String,
    #[serde(rename = "ReplicateWarnings")]
    replicate_warnings: String,
    #[serde(rename = "Error")]
    error: String,
}

/// One row per (sample, channel) outcome.
pub fn write_reconciliation_log(
    path: &Path,
    outcomes: &[SampleOutcome],
    summary: &SampleSummary,
) -> Result<(), ReportError> {
    let mut writer = csv::Writer::from_path(path)?;
    for outcome in outcomes {
        let warnings = summary
            .warnings_for(&outcome.label)
            .map(|w| format!("{}={}/{}", w.probe, w.observed, w.expected))
            .collect::<Vec<_>>()
            .join(";");
        let mut errors: Vec<String> = outcome.write_back_error.iter().cloned().collect();

        let row = match &outcome.result {
            Ok(result) => ReconciliationRow {
                sample: outcome.label.to_string(),
                channel: outcome.channel,
                verdict: result.verdict.to_string(),
                expected: joined(result.expected.iter()),
                detected: joined(result.detected.iter()),
                extra: joined(result.extra.iter()),
                missing: joined(result.missing.iter()),
                uncertain: joined(result.uncertain.iter()),
                replicate_warnings: warnings,
                error: errors.join(";"),
            },
            Err(e) => {
                errors.insert(0, e.to_string());
                ReconciliationRow {
                    sample: outcome.label.to_string(),
                    channel: outcome.channel,
                    verdict: "ERROR".to_string(),
                    expected: String::new(),
                    detected: String::new(),
                    extra: String::new(),
                    missing: String::new(),
                    uncertain: String::new(),
                    replicate_warnings: warnings,
                    error: errors.join(";"),
                }
            }
        };
        writer.serialize(row)?;
    }
    flush(writer, path)
}

fn joined<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(";")
}

fn flush<W: std::io::Write>(mut writer: csv::Writer<W>, path: &Path) -> Result<(), ReportError> {
    writer.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
