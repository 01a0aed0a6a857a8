// ========================================================================================
//
//                              ONE DETECTION RUN
//
// ========================================================================================
//
// aggregate -> summarize -> (resolve, validate, reconcile, record) per sample and
// channel -> logs.
//
// Errors in the first two stages abort the run: nothing downstream can be trusted
// without the dataset. Everything after that is per (sample, channel): a missing
// design or a failed write-back is recorded on that sample's outcome and the run
// carries on.

use crate::aggregate::aggregate;
use crate::design::{DesignSource, validate_expected};
use crate::extract::ExtractError;
use crate::panel::SpikeInPanel;
use crate::reconcile::{SampleOutcome, reconcile_sample};
use crate::report::{
    RECONCILIATION_LOG_PREFIX, ReportError, SUMMARY_LOG_PREFIX, VERBOSE_LOG_PREFIX, log_file_path,
    write_reconciliation_log, write_summary_log, write_verbose_log,
};
use crate::summarize::{SampleSummary, summarize_replicates};
use crate::types::{Channel, Dataset};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No FE files were given.")]
    NoInput,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(
        "None of the {0} FE file(s) contain rows for any spike-in probe. Check the panel against the files' ProbeName column."
    )]
    EmptyDataset(usize),
    #[error(transparent)]
    Report(#[from] ReportError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Extract files on the rayon thread pool.
    pub parallel: bool,
}

/// Everything one run produced.
#[derive(Debug)]
pub struct RunReport {
    pub dataset: Dataset,
    pub summary: SampleSummary,
    /// One outcome per (sample, channel), samples in natural order, green first.
    pub outcomes: Vec<SampleOutcome>,
}

impl RunReport {
    /// True only if every (sample, channel) matched its design.
    pub fn qc_passed(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.iter().all(SampleOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SampleOutcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }
}

/// Runs detection and reconciliation over `paths`.
pub fn run(
    paths: &[PathBuf],
    panel: &SpikeInPanel,
    design: &mut dyn DesignSource,
    options: RunOptions,
) -> Result<RunReport, PipelineError> {
    if paths.is_empty() {
        return Err(PipelineError::NoInput);
    }

    let dataset = aggregate(paths, panel, options.parallel)?;
    if dataset.is_empty() {
        return Err(PipelineError::EmptyDataset(paths.len()));
    }
    let summary = summarize_replicates(&dataset, panel);
    log::info!(
        "Summarized {} sample(s) across {} panel probe(s); {} replicate warning(s)",
        summary.labels().len(),
        summary.probes().len(),
        summary.warnings().len()
    );

    log::info!("Reconciling against {}", design.name());
    let mut outcomes = Vec::with_capacity(summary.labels().len() * Channel::BOTH.len());
    for label in summary.labels() {
        for channel in Channel::BOTH {
            let result = design
                .resolve_expected(label, channel)
                .and_then(|expected| validate_expected(panel, label, channel, expected))
                .map(|expected| reconcile_sample(&summary, label, channel, expected));

            let write_back_error = match &result {
                Ok(reconciled) => design.record_verdict(reconciled).err().map(|e| {
                    log::warn!("Could not record verdict for {label} ({channel}): {e}");
                    e.to_string()
                }),
                Err(e) => {
                    log::warn!("{e}");
                    None
                }
            };

            outcomes.push(SampleOutcome {
                label: label.clone(),
                channel,
                result,
                write_back_error,
            });
        }
    }

    Ok(RunReport {
        dataset,
        summary,
        outcomes,
    })
}

/// Paths of the logs written for one run.
#[derive(Debug, Clone)]
pub struct WrittenLogs {
    pub verbose: PathBuf,
    pub summary: PathBuf,
    pub reconciliation: PathBuf,
}

/// Writes the verbose, summary and reconciliation logs into `directory`.
pub fn write_logs(
    report: &RunReport,
    directory: &Path,
    date: NaiveDate,
) -> Result<WrittenLogs, PipelineError> {
    let logs = WrittenLogs {
        verbose: log_file_path(directory, VERBOSE_LOG_PREFIX, date),
        summary: log_file_path(directory, SUMMARY_LOG_PREFIX, date),
        reconciliation: log_file_path(directory, RECONCILIATION_LOG_PREFIX, date),
    };
    write_verbose_log(&logs.verbose, &report.dataset)?;
    write_summary_log(&logs.summary, &report.summary)?;
    write_reconciliation_log(&logs.reconciliation, &report.outcomes, &report.summary)?;
    Ok(logs)
}
