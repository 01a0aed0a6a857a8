// ========================================================================================
//
//                          EXPECTED-DESIGN SOURCES
//
// ========================================================================================
//
// Reconciliation needs to know which probes each (sample, channel) was spiked with.
// That knowledge lives outside the FE files, and where it lives is chosen per run:
//
//   - `OverrideDesign`   a comma-delimited file supplied on the command line.
//   - `LimsDesign`       the laboratory information system (see `lims`).
//   - `NoDesign`         neither was configured; every sample fails.
//
// All three sit behind the `DesignSource` capability trait so the pipeline never
// knows which one it is talking to.

use crate::aggregate::pretty_label;
use crate::panel::SpikeInPanel;
use crate::reconcile::ReconciliationResult;
use crate::types::{Channel, ChannelPair, ProbeCombination, SampleLabel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DesignError {
    #[error(
        "No expected design is available for sample '{label}' ({channel} channel). Supply an override file or a LIMS snapshot."
    )]
    NoSource { label: SampleLabel, channel: Channel },
    #[error("The {source_name} has no expected design for sample '{label}' ({channel} channel).")]
    NoAssignment {
        label: SampleLabel,
        channel: Channel,
        source_name: String,
    },
    #[error(
        "The expected design for sample '{label}' ({channel} channel) lists {found} probe(s), but each sample is spiked with {expected}."
    )]
    WrongSize {
        label: SampleLabel,
        channel: Channel,
        found: usize,
        expected: usize,
    },
    #[error(
        "The expected design for sample '{label}' ({channel} channel) names probe '{probe}', which is not on the spike-in panel."
    )]
    UnknownProbe {
        label: SampleLabel,
        channel: Channel,
        probe: String,
    },
    #[error("Invalid spike flag '{value}' for probe '{probe}' in column '{column}' of '{path}': expected 0 or 1.")]
    InvalidFlag {
        path: PathBuf,
        probe: String,
        column: &'static str,
        value: u8,
    },
    #[error("The {source_name} lists probe '{probe}' more than once for {sample}.")]
    ConflictingRow {
        source_name: String,
        sample: String,
        probe: String,
    },
    #[error("Failed to access design file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse design file: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to parse LIMS snapshot: {0}")]
    TomlDe(#[from] toml::de::Error),
    #[error("Failed to serialize LIMS snapshot: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error(transparent)]
    Subarray(#[from] crate::lims::SubarrayError),
}

/// Resolves expected spike-in combinations and accepts verdicts back.
pub trait DesignSource {
    /// A short description used in log lines and error messages.
    fn name(&self) -> &str;

    fn resolve_expected(
        &self,
        label: &SampleLabel,
        channel: Channel,
    ) -> Result<ProbeCombination, DesignError>;

    fn record_verdict(&mut self, result: &ReconciliationResult) -> Result<(), DesignError>;
}

/// Checks a resolved design against the panel before it is compared.
pub fn validate_expected(
    panel: &SpikeInPanel,
    label: &SampleLabel,
    channel: Channel,
    expected: ProbeCombination,
) -> Result<ProbeCombination, DesignError> {
    if let Some(probe) = expected.iter().find(|probe| !panel.contains(probe)) {
        return Err(DesignError::UnknownProbe {
            label: label.clone(),
            channel,
            probe: probe.to_string(),
        });
    }
    if expected.len() != panel.trio_size() {
        return Err(DesignError::WrongSize {
            label: label.clone(),
            channel,
            found: expected.len(),
            expected: panel.trio_size(),
        });
    }
    Ok(expected)
}

// ========================================================================================
//                                 OVERRIDE FILE
// ========================================================================================

/// One row of an override file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRow {
    /// Restricts the row to one sample. Absent or empty rows apply to every sample.
    #[serde(rename = "Sample", default)]
    pub sample: Option<String>,
    #[serde(rename = "ProbeName")]
    pub probe_name: String,
    #[serde(rename = "gSpike")]
    pub g_spike: u8,
    #[serde(rename = "rSpike")]
    pub r_spike: u8,
}

/// Expected designs read from a `ProbeName,gSpike,rSpike` file.
#[derive(Debug, Clone, Default)]
pub struct OverrideDesign {
    name: String,
    /// `None` holds the rows that apply to every sample.
    designs: BTreeMap<Option<SampleLabel>, ChannelPair<Vec<String>>>,
}

impl OverrideDesign {
    pub fn load(path: &Path) -> Result<Self, DesignError> {
        let file = File::open(path).map_err(|source| DesignError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut rows = Vec::new();
        for row in reader.deserialize::<OverrideRow>() {
            let row = row?;
            for (column, value) in [("gSpike", row.g_spike), ("rSpike", row.r_spike)] {
                if value > 1 {
                    return Err(DesignError::InvalidFlag {
                        path: path.to_path_buf(),
                        probe: row.probe_name.clone(),
                        column,
                        value,
                    });
                }
            }
            rows.push(row);
        }

        let design = Self::from_rows(format!("override file '{}'", path.display()), rows)?;
        log::info!(
            "Loaded expected designs for {} sample group(s) from {}",
            design.designs.len(),
            path.display()
        );
        Ok(design)
    }

    /// Builds a design from rows already in memory. Flags other than 1 count as not spiked.
    ///
    /// A probe may appear once per sample scope; a second row for the same
    /// (sample, probe) is a conflict even when its flags agree with the first.
    pub fn from_rows(
        name: impl Into<String>,
        rows: impl IntoIterator<Item = OverrideRow>,
    ) -> Result<Self, DesignError> {
        let name = name.into();
        let mut designs: BTreeMap<Option<SampleLabel>, ChannelPair<Vec<String>>> = BTreeMap::new();
        let mut seen: BTreeSet<(Option<SampleLabel>, String)> = BTreeSet::new();
        for row in rows {
            let key = row
                .sample
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| SampleLabel::new(pretty_label(s)));
            if !seen.insert((key.clone(), row.probe_name.clone())) {
                return Err(DesignError::ConflictingRow {
                    source_name: name,
                    sample: key.map_or_else(
                        || "every sample".to_string(),
                        |label| format!("sample '{label}'"),
                    ),
                    probe: row.probe_name,
                });
            }
            let entry = designs.entry(key).or_default();
            if row.g_spike == 1 {
                entry.green.push(row.probe_name.clone());
            }
            if row.r_spike == 1 {
                entry.red.push(row.probe_name);
            }
        }
        Ok(Self { name, designs })
    }

    /// Writes the design back out in the same format it is loaded from.
    pub fn write_rows(path: &Path, rows: &[OverrideRow]) -> Result<(), DesignError> {
        let mut writer = csv::Writer::from_path(path)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|source| DesignError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl DesignSource for OverrideDesign {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve_expected(
        &self,
        label: &SampleLabel,
        channel: Channel,
    ) -> Result<ProbeCombination, DesignError> {
        let design = self
            .designs
            .get(&Some(label.clone()))
            .or_else(|| self.designs.get(&None))
            .ok_or_else(|| DesignError::NoAssignment {
                label: label.clone(),
                channel,
                source_name: self.name.clone(),
            })?;
        Ok(ProbeCombination::new(design.get(channel).iter().cloned()))
    }

    fn record_verdict(&mut self, result: &ReconciliationResult) -> Result<(), DesignError> {
        log::debug!("Override design: not recording verdict for {}", result.label);
        Ok(())
    }
}

// ========================================================================================
//                                  NO SOURCE
// ========================================================================================

/// Used when no expected-design source was configured for the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDesign;

impl DesignSource for NoDesign {
    fn name(&self) -> &str {
        "no design source"
    }

    fn resolve_expected(
        &self,
        label: &SampleLabel,
        channel: Channel,
    ) -> Result<ProbeCombination, DesignError> {
        Err(DesignError::NoSource {
            label: label.clone(),
            channel,
        })
    }

    fn record_verdict(&mut self, result: &ReconciliationResult) -> Result<(), DesignError> {
        log::debug!("No design source: verdict for {} not recorded", result.label);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::SpikeInConfig;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(text: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{text}").unwrap();
        file
    }

    fn panel() -> SpikeInPanel {
        SpikeInPanel::new(SpikeInConfig::from_probes(["A", "B", "C", "D", "E"])).unwrap()
    }

    #[test]
    fn shared_design_applies_to_every_sample() {
        let file = write_csv("ProbeName,gSpike,rSpike\nA,1,0\nB,1,1\nC,1,0\nD,0,1\nE,0,1\n");
        let design = OverrideDesign::load(file.path()).unwrap();
        let label = SampleLabel::new("anything_2_1_1");
        assert_eq!(
            design.resolve_expected(&label, Channel::Green).unwrap(),
            ProbeCombination::new(["A", "B", "C"])
        );
        assert_eq!(
            design.resolve_expected(&label, Channel::Red).unwrap(),
            ProbeCombination::new(["B", "D", "E"])
        );
    }

    #[test]
    fn sample_column_is_pretty_labelled() {
        let file = write_csv(
            "Sample,ProbeName,gSpike,rSpike\n\
             258503010103_S01_Guys121919_CGH_1100_Jul11_2_1_1.txt,A,1,0\n\
             258503010103_S01_Guys121919_CGH_1100_Jul11_2_1_1.txt,B,1,0\n\
             258503010103_2_1_2,C,1,1\n",
        );
        let design = OverrideDesign::load(file.path()).unwrap();
        assert_eq!(
            design
                .resolve_expected(&SampleLabel::new("258503010103_2_1_1"), Channel::Green)
                .unwrap(),
            ProbeCombination::new(["A", "B"])
        );
        assert!(matches!(
            design.resolve_expected(&SampleLabel::new("258503010103_2_2_4"), Channel::Green),
            Err(DesignError::NoAssignment { .. })
        ));
    }

    #[test]
    fn flags_must_be_binary() {
        let file = write_csv("ProbeName,gSpike,rSpike\nA,2,0\n");
        assert!(matches!(
            OverrideDesign::load(file.path()),
            Err(DesignError::InvalidFlag { column: "gSpike", value: 2, .. })
        ));
    }

    #[test]
    fn repeated_probe_row_is_a_conflict() {
        let file = write_csv("ProbeName,gSpike,rSpike\nA,1,0\nA,0,0\nB,1,0\nC,1,0\n");
        match OverrideDesign::load(file.path()) {
            Err(DesignError::ConflictingRow { sample, probe, .. }) => {
                assert_eq!(sample, "every sample");
                assert_eq!(probe, "A");
            }
            other => panic!("expected conflicting row error, got {other:?}"),
        }
    }

    #[test]
    fn same_probe_in_different_samples_is_not_a_conflict() {
        let file = write_csv(
            "Sample,ProbeName,gSpike,rSpike\n\
             s_2_1_1,A,1,0\n\
             s_2_1_2,A,0,1\n\
             ,A,1,1\n",
        );
        let design = OverrideDesign::load(file.path()).unwrap();
        assert_eq!(
            design
                .resolve_expected(&SampleLabel::new("s_2_1_2"), Channel::Red)
                .unwrap(),
            ProbeCombination::new(["A"])
        );

        let repeated = write_csv("Sample,ProbeName,gSpike,rSpike\ns_2_1_1,A,1,0\ns_2_1_1.txt,A,1,0\n");
        assert!(matches!(
            OverrideDesign::load(repeated.path()),
            Err(DesignError::ConflictingRow { probe, .. }) if probe == "A"
        ));
    }

    #[test]
    fn non_numeric_flag_is_a_parse_error() {
        let file = write_csv("ProbeName,gSpike,rSpike\nA,yes,0\n");
        assert!(matches!(OverrideDesign::load(file.path()), Err(DesignError::Csv(_))));
    }

    #[test]
    fn written_rows_load_back() {
        let rows = vec![
            OverrideRow {
                sample: Some("s_1_2_3".to_string()),
                probe_name: "A".to_string(),
                g_spike: 1,
                r_spike: 0,
            },
            OverrideRow {
                sample: Some("s_1_2_3".to_string()),
                probe_name: "B".to_string(),
                g_spike: 0,
                r_spike: 1,
            },
        ];
        let file = NamedTempFile::new().unwrap();
        OverrideDesign::write_rows(file.path(), &rows).unwrap();
        let design = OverrideDesign::load(file.path()).unwrap();
        let label = SampleLabel::new("s_1_2_3");
        assert_eq!(
            design.resolve_expected(&label, Channel::Red).unwrap(),
            ProbeCombination::new(["B"])
        );
    }

    #[test]
    fn validation_rejects_wrong_size_and_unknown_probes() {
        let panel = panel();
        let label = SampleLabel::new("s");
        assert!(matches!(
            validate_expected(&panel, &label, Channel::Green, ProbeCombination::new(["A", "B"])),
            Err(DesignError::WrongSize { found: 2, expected: 3, .. })
        ));
        assert!(matches!(
            validate_expected(&panel, &label, Channel::Green, ProbeCombination::new(["A", "B", "Z"])),
            Err(DesignError::UnknownProbe { probe, .. }) if probe == "Z"
        ));
        assert!(
            validate_expected(&panel, &label, Channel::Red, ProbeCombination::new(["A", "B", "C"]))
                .is_ok()
        );
    }

    #[test]
    fn no_design_fails_every_sample() {
        let design = NoDesign;
        assert!(matches!(
            design.resolve_expected(&SampleLabel::new("s"), Channel::Red),
            Err(DesignError::NoSource { channel: Channel::Red, .. })
        ));
    }
}
