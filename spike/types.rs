// ========================================================================================
//
//                      CORE DATA TYPES FOR THE ARRAY SPIKER ENGINE
//
// ========================================================================================
//
// This module is the shared dictionary for the data contracts that cross module
// boundaries (`extract`, `aggregate`, `summarize`, `reconcile`, `report`).
//
// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

// ========================================================================================
//                                   CHANNELS
// ========================================================================================

/// One of the two dye channels of a two-colour array. Each channel carries a
/// different hybridised sample, so every per-sample decision is made per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Green,
    Red,
}

impl Channel {
    /// Both channels, in the column order used by Feature Extraction files.
    pub const BOTH: [Channel; 2] = [Channel::Green, Channel::Red];

    /// The column-name prefix used by Feature Extraction files (`gIsSaturated`, ...).
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Green => "g",
            Self::Red => "r",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Red => "red",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A value measured independently on each channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelPair<T> {
    pub green: T,
    pub red: T,
}

impl<T> ChannelPair<T> {
    pub fn new(green: T, red: T) -> Self {
        Self { green, red }
    }

    pub fn get(&self, channel: Channel) -> &T {
        match channel {
            Channel::Green => &self.green,
            Channel::Red => &self.red,
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut T {
        match channel {
            Channel::Green => &mut self.green,
            Channel::Red => &mut self.red,
        }
    }
}

// ========================================================================================
//                                 FEATURE RECORDS
// ========================================================================================

/// One matched line of a Feature Extraction file.
///
/// Records only exist for lines attributed to a panel probe; the extractor is a
/// filter, so a `FeatureRecord` whose `panel_probe` is not on the panel is never built.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub feature_num: u32,
    /// The raw `ProbeName` column.
    pub probe_name: String,
    /// The panel identifier this row was attributed to. Equal to `probe_name`
    /// under exact matching; the embedded identifier under substring matching.
    pub panel_probe: String,
    pub systematic_name: String,
    pub processed_signal: ChannelPair<f64>,
    pub median_signal: ChannelPair<f64>,
    pub bg_median_signal: ChannelPair<f64>,
    pub is_saturated: ChannelPair<bool>,
    /// Identifies the originating file. Set to the path by the extractor and
    /// shortened to a sample label by the aggregator.
    pub source: String,
}

// ========================================================================================
//                                     DATASET
// ========================================================================================

/// All feature records of one run, spanning one or more source files.
///
/// Built once from the per-file batches and never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<FeatureRecord>,
}

impl Dataset {
    /// Concatenates per-file batches in the order given.
    pub fn from_batches<I>(batches: I) -> Self
    where
        I: IntoIterator<Item = Vec<FeatureRecord>>,
    {
        let records = batches.into_iter().fold(Vec::new(), |mut acc, batch| {
            acc.extend(batch);
            acc
        });
        Self { records }
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The distinct source labels present, in natural order.
    pub fn labels(&self) -> Vec<SampleLabel> {
        let unique: BTreeSet<SampleLabel> = self
            .records
            .iter()
            .map(|r| SampleLabel::new(r.source.clone()))
            .collect();
        unique.into_iter().collect()
    }
}

// ========================================================================================
//                                  SAMPLE LABELS
// ========================================================================================

/// The short, human-readable identifier of one Feature Extraction file
/// (e.g. `258503010103_2_1_3`).
///
/// Ordering is natural (`..._1_10` sorts after `..._1_9`) so that reports list
/// subarrays in slide order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleLabel(String);

impl SampleLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for SampleLabel {
    fn cmp(&self, other: &Self) -> Ordering {
        natord::compare(&self.0, &other.0).then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SampleLabel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SampleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ========================================================================================
//                                PROBE COMBINATIONS
// ========================================================================================

/// An unordered set of probe identifiers. Two combinations are equal when they
/// hold the same identifiers, whatever order they were listed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ProbeCombination(BTreeSet<String>);

impl ProbeCombination {
    pub fn new<I, S>(probes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(probes.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, probe: &str) -> bool {
        self.0.contains(probe)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Identifiers in `self` that are absent from `other`, in sorted order.
    pub fn difference(&self, other: &ProbeCombination) -> Vec<String> {
        self.0.difference(&other.0).cloned().collect()
    }
}

impl fmt::Display for ProbeCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        write!(f, "{{{}}}", joined.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(probe: &str, source: &str) -> FeatureRecord {
        FeatureRecord {
            feature_num: 1,
            probe_name: probe.to_string(),
            panel_probe: probe.to_string(),
            systematic_name: probe.to_string(),
            processed_signal: ChannelPair::new(1.0, 1.0),
            median_signal: ChannelPair::new(1.0, 1.0),
            bg_median_signal: ChannelPair::new(1.0, 1.0),
            is_saturated: ChannelPair::new(false, false),
            source: source.to_string(),
        }
    }

    #[test]
    fn combinations_compare_as_sets() {
        let a = ProbeCombination::new(["A", "B", "C"]);
        let b = ProbeCombination::new(["C", "A", "B"]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{A, B, C}");
    }

    #[test]
    fn difference_lists_only_one_side() {
        let detected = ProbeCombination::new(["A", "B", "D"]);
        let expected = ProbeCombination::new(["A", "B", "C"]);
        assert_eq!(detected.difference(&expected), vec!["D".to_string()]);
        assert_eq!(expected.difference(&detected), vec!["C".to_string()]);
    }

    #[test]
    fn labels_sort_naturally() {
        let mut labels = vec![
            SampleLabel::new("array_2_1_10"),
            SampleLabel::new("array_2_1_9"),
            SampleLabel::new("array_1_1_1"),
        ];
        labels.sort();
        let ordered: Vec<&str> = labels.iter().map(SampleLabel::as_str).collect();
        assert_eq!(ordered, vec!["array_1_1_1", "array_2_1_9", "array_2_1_10"]);
    }

    #[test]
    fn dataset_preserves_batch_order() {
        let dataset = Dataset::from_batches(vec![
            vec![record("A", "f1"), record("B", "f1")],
            vec![record("C", "f2")],
        ]);
        let probes: Vec<&str> = dataset
            .records()
            .iter()
            .map(|r| r.probe_name.as_str())
            .collect();
        assert_eq!(probes, vec!["A", "B", "C"]);
        assert_eq!(dataset.labels().len(), 2);
    }
}
