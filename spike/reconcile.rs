//! # Reconciliation
//!
//! Compares the probes detected on one channel of one sample against the
//! combination that sample was supposed to receive, and renders a verdict.
//!
//! Precedence: any panel probe without a confident call makes the verdict
//! `PARTIAL`, even if the confident calls happen to line up with the design.
//! Otherwise the verdict is `MATCH` when the sets are equal and `MISMATCH` when
//! they are not. The extra and missing probes are always reported.
//!
//! A verdict is a finding, not a failure: nothing here returns an error.

use crate::design::DesignError;
use crate::summarize::SampleSummary;
use crate::types::{Channel, ProbeCombination, SampleLabel};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Match,
    Mismatch,
    Partial,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Match => "MATCH",
            Self::Mismatch => "MISMATCH",
            Self::Partial => "PARTIAL",
        })
    }
}

/// The outcome of comparing one (sample, channel) against its expected design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub label: SampleLabel,
    pub channel: Channel,
    pub expected: ProbeCombination,
    pub detected: ProbeCombination,
    pub verdict: Verdict,
    /// Detected but not expected (false positives).
    pub extra: Vec<String>,
    /// Expected but not detected (false negatives).
    pub missing: Vec<String>,
    /// Panel probes whose replicates disagree or were not observed.
    pub uncertain: Vec<String>,
}

impl ReconciliationResult {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Match
    }

    /// A one-line human-readable account of the result.
    pub fn describe(&self) -> String {
        let mut text = format!(
            "{} ({}): {} - expected {}, detected {}",
            self.label, self.channel, self.verdict, self.expected, self.detected
        );
        if !self.extra.is_empty() {
            text.push_str(&format!("; unexpected: {}", self.extra.join(", ")));
        }
        if !self.missing.is_empty() {
            text.push_str(&format!("; absent: {}", self.missing.join(", ")));
        }
        if !self.uncertain.is_empty() {
            text.push_str(&format!("; no confident call: {}", self.uncertain.join(", ")));
        }
        text
    }
}

/// Computes the verdict for explicit detected/expected sets.
pub fn compare(
    label: SampleLabel,
    channel: Channel,
    expected: ProbeCombination,
    detected: ProbeCombination,
    uncertain: Vec<String>,
) -> ReconciliationResult {
    let extra = detected.difference(&expected);
    let missing = expected.difference(&detected);
    let verdict = if !uncertain.is_empty() {
        Verdict::Partial
    } else if extra.is_empty() && missing.is_empty() {
        Verdict::Match
    } else {
        Verdict::Mismatch
    };
    ReconciliationResult {
        label,
        channel,
        expected,
        detected,
        verdict,
        extra,
        missing,
        uncertain,
    }
}

/// Reconciles one channel of one sample in `summary` against `expected`.
pub fn reconcile_sample(
    summary: &SampleSummary,
    label: &SampleLabel,
    channel: Channel,
    expected: ProbeCombination,
) -> ReconciliationResult {
    let result = compare(
        label.clone(),
        channel,
        expected,
        summary.detected(label, channel),
        summary.uncertain(label, channel),
    );
    log::debug!("{}", result.describe());
    result
}

/// What happened to one (sample, channel) during a run.
#[derive(Debug)]
pub struct SampleOutcome {
    pub label: SampleLabel,
    pub channel: Channel,
    /// The comparison, or the configuration error that prevented it.
    pub result: Result<ReconciliationResult, DesignError>,
    /// Set when the verdict could not be recorded with the design source.
    pub write_back_error: Option<String>,
}

impl SampleOutcome {
    pub fn passed(&self) -> bool {
        self.result.as_ref().is_ok_and(ReconciliationResult::passed)
    }

    pub fn verdict(&self) -> Option<Verdict> {
        self.result.as_ref().ok().map(|r| r.verdict)
    }

    pub fn describe(&self) -> String {
        match &self.result {
            Ok(result) => result.describe(),
            Err(e) => format!("{} ({}): ERROR - {e}", self.label, self.channel),
        }
    }
}
