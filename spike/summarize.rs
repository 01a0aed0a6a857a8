// ========================================================================================
//
//                          REPLICATE SUMMARIZATION
//
// ========================================================================================
//
// Each probe is printed several times on an array. This module pivots the dataset
// on (sample label, panel probe) and sums the saturation flags of all replicate
// rows sharing that key, independently per channel.
//
// With three replicates the sum lies in {0, 1, 2, 3}: 0 and 3 are consistent
// calls, 1 and 2 are replicate disagreement. The sum is kept as a count and is
// never collapsed to a boolean.
//
// A replicate count that differs from the configured value (missing or duplicated
// rows) is recorded as a warning on the summary. It is not an error: the partial
// data is still useful to a reviewer.

use crate::panel::SpikeInPanel;
use crate::types::{Channel, ChannelPair, Dataset, ProbeCombination, SampleLabel};
use std::collections::BTreeMap;
use std::fmt;

/// Summed saturation flags for one (sample, probe) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplicateTally {
    pub saturated: ChannelPair<u32>,
    /// The number of rows that contributed.
    pub replicates: u32,
}

impl ReplicateTally {
    pub fn saturated(&self, channel: Channel) -> u32 {
        *self.saturated.get(channel)
    }

    /// The presence call for one channel of this tally.
    pub fn call(&self, channel: Channel) -> PresenceCall {
        let saturated = self.saturated(channel);
        if self.replicates == 0 {
            PresenceCall::Unobserved
        } else if saturated == 0 {
            PresenceCall::Absent
        } else if saturated == self.replicates {
            PresenceCall::Present
        } else {
            PresenceCall::Disagreement {
                saturated,
                replicates: self.replicates,
            }
        }
    }
}

/// What the replicates of one probe say about its presence on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceCall {
    /// No replicate was saturated.
    Absent,
    /// Every replicate was saturated.
    Present,
    /// Some, but not all, replicates were saturated.
    Disagreement { saturated: u32, replicates: u32 },
    /// No row for this probe was found in the sample.
    Unobserved,
}

impl PresenceCall {
    /// Whether the call is confident enough to compare against an expected design.
    pub fn is_confident(self) -> bool {
        matches!(self, Self::Absent | Self::Present)
    }
}

/// A (sample, probe) pair whose replicate count differs from the configured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicateWarning {
    pub label: SampleLabel,
    pub probe: String,
    pub observed: u32,
    pub expected: u32,
}

impl fmt::Display for ReplicateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: probe {} has {} replicate row(s), expected {}",
            self.label, self.probe, self.observed, self.expected
        )
    }
}

/// The per-(sample, probe) pivot of a dataset. Immutable once built.
#[derive(Debug, Clone)]
pub struct SampleSummary {
    labels: Vec<SampleLabel>,
    probes: Vec<String>,
    tallies: BTreeMap<(SampleLabel, String), ReplicateTally>,
    warnings: Vec<ReplicateWarning>,
}

/// Builds the replicate summary of `dataset` for every panel probe.
pub fn summarize_replicates(dataset: &Dataset, panel: &SpikeInPanel) -> SampleSummary {
    let tallies = dataset.records().iter().fold(
        BTreeMap::<(SampleLabel, String), ReplicateTally>::new(),
        |mut acc, record| {
            let key = (SampleLabel::new(record.source.clone()), record.panel_probe.clone());
            let tally = acc.entry(key).or_default();
            tally.replicates += 1;
            for channel in Channel::BOTH {
                if *record.is_saturated.get(channel) {
                    *tally.saturated.get_mut(channel) += 1;
                }
            }
            acc
        },
    );

    let labels = dataset.labels();
    let expected = panel.replicates_per_probe();
    let mut warnings = Vec::new();
    for label in &labels {
        for probe in panel.probes() {
            let observed = tallies
                .get(&(label.clone(), probe.clone()))
                .map_or(0, |t| t.replicates);
            if observed != expected {
                let warning = ReplicateWarning {
                    label: label.clone(),
                    probe: probe.clone(),
                    observed,
                    expected,
                };
                log::warn!("Replicate count deviation: {warning}");
                warnings.push(warning);
            }
        }
    }

    SampleSummary {
        labels,
        probes: panel.probes().to_vec(),
        tallies,
        warnings,
    }
}

impl SampleSummary {
    /// Sample labels in natural order.
    pub fn labels(&self) -> &[SampleLabel] {
        &self.labels
    }

    /// Panel probes in configured order.
    pub fn probes(&self) -> &[String] {
        &self.probes
    }

    pub fn warnings(&self) -> &[ReplicateWarning] {
        &self.warnings
    }

    pub fn warnings_for<'a>(&'a self, label: &'a SampleLabel) -> impl Iterator<Item = &'a ReplicateWarning> {
        self.warnings.iter().filter(move |w| &w.label == label)
    }

    /// The tally for one pair; a probe with no rows in the sample yields an empty tally.
    pub fn tally(&self, label: &SampleLabel, probe: &str) -> ReplicateTally {
        self.tallies
            .get(&(label.clone(), probe.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn call(&self, label: &SampleLabel, probe: &str, channel: Channel) -> PresenceCall {
        self.tally(label, probe).call(channel)
    }

    /// The probes confidently called present on one channel of a sample.
    pub fn detected(&self, label: &SampleLabel, channel: Channel) -> ProbeCombination {
        ProbeCombination::new(
            self.probes
                .iter()
                .filter(|probe| self.call(label, probe, channel) == PresenceCall::Present),
        )
    }

    /// The probes whose call on this channel is not confident, in panel order.
    pub fn uncertain(&self, label: &SampleLabel, channel: Channel) -> Vec<String> {
        self.probes
            .iter()
            .filter(|probe| !self.call(label, probe, channel).is_confident())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::SpikeInConfig;
    use crate::types::FeatureRecord;

    fn panel(probes: &[&str]) -> SpikeInPanel {
        let mut config = SpikeInConfig::from_probes(probes.iter().copied());
        config.trio_size = 1;
        SpikeInPanel::new(config).unwrap()
    }

    fn record(probe: &str, source: &str, green: bool, red: bool) -> FeatureRecord {
        FeatureRecord {
            feature_num: 1,
            probe_name: probe.to_string(),
            panel_probe: probe.to_string(),
            systematic_name: probe.to_string(),
            processed_signal: ChannelPair::new(0.0, 0.0),
            median_signal: ChannelPair::new(0.0, 0.0),
            bg_median_signal: ChannelPair::new(0.0, 0.0),
            is_saturated: ChannelPair::new(green, red),
            source: source.to_string(),
        }
    }

    #[test]
    fn consistent_unsaturated_replicates_sum_to_zero() {
        let panel = panel(&["A"]);
        let dataset = Dataset::from_batches(vec![vec![
            record("A", "s1", false, false),
            record("A", "s1", false, false),
            record("A", "s1", false, false),
        ]]);
        let summary = summarize_replicates(&dataset, &panel);
        let label = SampleLabel::new("s1");
        assert_eq!(summary.tally(&label, "A").saturated(Channel::Green), 0);
        assert_eq!(summary.call(&label, "A", Channel::Green), PresenceCall::Absent);
        assert!(summary.warnings().is_empty());
    }

    #[test]
    fn partial_saturation_is_counted_not_rounded() {
        let panel = panel(&["A"]);
        let dataset = Dataset::from_batches(vec![vec![
            record("A", "s1", true, false),
            record("A", "s1", true, false),
            record("A", "s1", false, false),
        ]]);
        let summary = summarize_replicates(&dataset, &panel);
        let label = SampleLabel::new("s1");
        assert_eq!(summary.tally(&label, "A").saturated(Channel::Green), 2);
        assert_eq!(
            summary.call(&label, "A", Channel::Green),
            PresenceCall::Disagreement {
                saturated: 2,
                replicates: 3
            }
        );
        assert_eq!(summary.uncertain(&label, Channel::Green), vec!["A".to_string()]);
        assert!(summary.uncertain(&label, Channel::Red).is_empty());
    }

    #[test]
    fn channels_are_summed_independently() {
        let panel = panel(&["A", "B"]);
        let dataset = Dataset::from_batches(vec![vec![
            record("A", "s1", true, false),
            record("A", "s1", true, false),
            record("A", "s1", true, false),
            record("B", "s1", false, true),
            record("B", "s1", false, true),
            record("B", "s1", false, true),
        ]]);
        let summary = summarize_replicates(&dataset, &panel);
        let label = SampleLabel::new("s1");
        assert_eq!(summary.detected(&label, Channel::Green), ProbeCombination::new(["A"]));
        assert_eq!(summary.detected(&label, Channel::Red), ProbeCombination::new(["B"]));
    }

    #[test]
    fn missing_and_extra_replicates_raise_warnings() {
        let panel = panel(&["A", "B"]);
        let dataset = Dataset::from_batches(vec![vec![
            record("A", "s1", false, false),
            record("A", "s1", false, false),
            record("A", "s1", false, false),
            record("A", "s1", false, false),
        ]]);
        let summary = summarize_replicates(&dataset, &panel);
        let label = SampleLabel::new("s1");
        let observed: Vec<(String, u32)> = summary
            .warnings_for(&label)
            .map(|w| (w.probe.clone(), w.observed))
            .collect();
        assert_eq!(observed, vec![("A".to_string(), 4), ("B".to_string(), 0)]);
        assert_eq!(summary.call(&label, "B", Channel::Green), PresenceCall::Unobserved);
    }

    #[test]
    fn labels_are_sorted() {
        let panel = panel(&["A"]);
        let dataset = Dataset::from_batches(vec![
            vec![record("A", "slide_2_1_2", false, false)],
            vec![record("A", "slide_2_1_1", false, false)],
        ]);
        let summary = summarize_replicates(&dataset, &panel);
        let labels: Vec<&str> = summary.labels().iter().map(SampleLabel::as_str).collect();
        assert_eq!(labels, vec!["slide_2_1_1", "slide_2_1_2"]);
    }
}
