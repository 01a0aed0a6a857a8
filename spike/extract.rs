// ========================================================================================
//
//                   THE FEATURE EXTRACTION FILE AIRLOCK
//
// ========================================================================================
//
// This module is the boundary between raw Feature Extraction (FE) text on disk and
// the typed records the rest of the engine works with. It is a filter first and a
// parser second: lines that do not belong to a panel probe are skipped without
// being decomposed, and lines that do belong are decomposed strictly.
//
// ### Column contract ###
//
// Fields are whitespace-delimited. The positions below are 0-based and fixed by
// the scanner's FE protocol; the first field of every feature row is the `DATA`
// tag.
//
// ### Failure policy ###
//
// A line attributed to a panel probe that cannot be decomposed, is not valid UTF-8,
// or whose numeric fields fail coercion, fails the whole file. A bad row is never
// skipped. Lines that are not attributed (preamble, other probes) are only ever
// read lossily, so stray bytes in them are harmless.

use crate::panel::{MatchMode, SpikeInPanel};
use crate::types::{ChannelPair, FeatureRecord};
use ahash::AHashMap;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed column positions of the fields extracted from each feature row.
pub mod columns {
    pub const FEATURE_NUM: usize = 1;
    pub const PROBE_NAME: usize = 6;
    pub const SYSTEMATIC_NAME: usize = 7;
    pub const G_PROCESSED_SIGNAL: usize = 13;
    pub const R_PROCESSED_SIGNAL: usize = 14;
    pub const G_MEDIAN_SIGNAL: usize = 17;
    pub const R_MEDIAN_SIGNAL: usize = 18;
    pub const G_BG_MEDIAN_SIGNAL: usize = 19;
    pub const R_BG_MEDIAN_SIGNAL: usize = 20;
    pub const G_IS_SATURATED: usize = 23;
    pub const R_IS_SATURATED: usize = 24;

    /// The minimum number of fields a feature row must carry.
    pub const REQUIRED_FIELDS: usize = R_IS_SATURATED + 1;
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read FE file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "Malformed row at {path}:{line}: found {found} fields, but a feature row needs at least {required}."
    )]
    TooFewFields {
        path: PathBuf,
        line: usize,
        found: usize,
        required: usize,
    },
    #[error("Row at {path}:{line} names a spike-in probe but is not valid UTF-8.")]
    InvalidEncoding { path: PathBuf, line: usize },
    #[error("Invalid value '{value}' in column '{column}' at {path}:{line}: expected {expected}.")]
    InvalidValue {
        path: PathBuf,
        line: usize,
        column: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Extracts the feature records of every panel probe in one FE file.
///
/// Files ending in `.gz` are decompressed transparently. Each record's `source`
/// is the path as given.
pub fn extract_file(path: &Path, panel: &SpikeInPanel) -> Result<Vec<FeatureRecord>, ExtractError> {
    let file = File::open(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    let reader: Box<dyn Read> = if is_gzip {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let records = extract_from_reader(BufReader::new(reader), path, panel)?;
    log::debug!(
        "Extracted {} spike-in rows from {}",
        records.len(),
        path.display()
    );
    Ok(records)
}

/// Extracts records from any buffered reader. `path` is used for error messages
/// and as the record source.
pub fn extract_from_reader<R: BufRead>(
    mut reader: R,
    path: &Path,
    panel: &SpikeInPanel,
) -> Result<Vec<FeatureRecord>, ExtractError> {
    let matcher = ProbeMatcher::new(panel);
    let source = path.display().to_string();
    let mut records = Vec::new();

    // A temporary buffer to avoid repeated allocations in the loop.
    let mut line_buf: Vec<u8> = Vec::new();
    let mut line_number = 0;

    loop {
        line_buf.clear();
        let bytes = reader
            .read_until(b'\n', &mut line_buf)
            .map_err(|source| ExtractError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if bytes == 0 {
            break;
        }
        line_number += 1;

        let line = String::from_utf8_lossy(&line_buf);
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(panel_probe) = matcher.attribute(&line, &fields, path, line_number) else {
            continue;
        };
        if std::str::from_utf8(&line_buf).is_err() {
            return Err(ExtractError::InvalidEncoding {
                path: path.to_path_buf(),
                line: line_number,
            });
        }

        let row = RowContext {
            path,
            line: line_number,
            fields: &fields,
        };
        records.push(row.decode(panel_probe, &source)?);
    }

    Ok(records)
}

// ========================================================================================
//                           PRIVATE IMPLEMENTATION HELPERS
// ========================================================================================

/// Decides whether a line belongs to a panel probe, and to which one.
struct ProbeMatcher<'a> {
    mode: MatchMode,
    probes: &'a [String],
    lookup: AHashMap<&'a str, usize>,
}

impl<'a> ProbeMatcher<'a> {
    fn new(panel: &'a SpikeInPanel) -> Self {
        Self {
            mode: panel.match_mode(),
            probes: panel.probes(),
            lookup: panel
                .probes()
                .iter()
                .enumerate()
                .map(|(index, probe)| (probe.as_str(), index))
                .collect(),
        }
    }

    fn attribute(
        &self,
        line: &str,
        fields: &[&str],
        path: &Path,
        line_number: usize,
    ) -> Option<&'a str> {
        match self.mode {
            MatchMode::Exact => {
                let candidate = match fields.get(columns::PROBE_NAME) {
                    Some(probe_name) => probe_name,
                    // Short lines naming a panel probe still purport to be feature rows; let decoding reject them.
                    None => fields.iter().find(|field| self.lookup.contains_key(*field))?,
                };
                let probes: &'a [String] = self.probes;
                self.lookup
                    .get(candidate)
                    .map(|&index| probes[index].as_str())
            }
            MatchMode::Substring => {
                let hits: Vec<&'a str> = self
                    .probes
                    .iter()
                    .map(String::as_str)
                    .filter(|probe| line.contains(probe))
                    .collect();
                if hits.is_empty() {
                    return None;
                }
                if hits.len() > 1 {
                    log::warn!(
                        "{}:{line_number} matches several panel probes ({}); attributing to the longest one in ProbeName.",
                        path.display(),
                        hits.join(", ")
                    );
                }
                // The row must embed the probe in its ProbeName column to be attributed.
                let probe_name = fields.get(columns::PROBE_NAME).copied().unwrap_or("");
                let attributed = hits
                    .into_iter()
                    .filter(|probe| probe_name.contains(probe))
                    .max_by_key(|probe| probe.len());
                match attributed {
                    Some(probe) => Some(probe),
                    None if fields.len() < columns::REQUIRED_FIELDS => {
                        // Short lines still purport to be feature rows; let decoding reject them.
                        Some(self.probes.iter().map(String::as_str).find(|p| line.contains(p))?)
                    }
                    None => {
                        log::warn!(
                            "{}:{line_number} mentions a panel probe outside ProbeName; skipped.",
                            path.display()
                        );
                        None
                    }
                }
            }
        }
    }
}

struct RowContext<'a> {
    path: &'a Path,
    line: usize,
    fields: &'a [&'a str],
}

impl RowContext<'_> {
    fn decode(&self, panel_probe: &str, source: &str) -> Result<FeatureRecord, ExtractError> {
        if self.fields.len() < columns::REQUIRED_FIELDS {
            return Err(ExtractError::TooFewFields {
                path: self.path.to_path_buf(),
                line: self.line,
                found: self.fields.len(),
                required: columns::REQUIRED_FIELDS,
            });
        }

        Ok(FeatureRecord {
            feature_num: self.integer(columns::FEATURE_NUM, "FeatureNum")?,
            probe_name: self.fields[columns::PROBE_NAME].to_string(),
            panel_probe: panel_probe.to_string(),
            systematic_name: self.fields[columns::SYSTEMATIC_NAME].to_string(),
            processed_signal: ChannelPair::new(
                self.signal(columns::G_PROCESSED_SIGNAL, "gProcessedSignal")?,
                self.signal(columns::R_PROCESSED_SIGNAL, "rProcessedSignal")?,
            ),
            median_signal: ChannelPair::new(
                self.signal(columns::G_MEDIAN_SIGNAL, "gMedianSignal")?,
                self.signal(columns::R_MEDIAN_SIGNAL, "rMedianSignal")?,
            ),
            bg_median_signal: ChannelPair::new(
                self.signal(columns::G_BG_MEDIAN_SIGNAL, "gBGMedianSignal")?,
                self.signal(columns::R_BG_MEDIAN_SIGNAL, "rBGMedianSignal")?,
            ),
            is_saturated: ChannelPair::new(
                self.flag(columns::G_IS_SATURATED, "gIsSaturated")?,
                self.flag(columns::R_IS_SATURATED, "rIsSaturated")?,
            ),
            source: source.to_string(),
        })
    }

    fn invalid(&self, index: usize, column: &'static str, expected: &'static str) -> ExtractError {
        ExtractError::InvalidValue {
            path: self.path.to_path_buf(),
            line: self.line,
            column,
            value: self.fields[index].to_string(),
            expected,
        }
    }

    fn integer(&self, index: usize, column: &'static str) -> Result<u32, ExtractError> {
        self.fields[index]
            .parse()
            .map_err(|_| self.invalid(index, column, "a non-negative integer"))
    }

    fn signal(&self, index: usize, column: &'static str) -> Result<f64, ExtractError> {
        const EXPECTED: &str = "a finite, non-negative number";
        let value: f64 = self.fields[index]
            .parse()
            .map_err(|_| self.invalid(index, column, EXPECTED))?;
        if !value.is_finite() || value < 0.0 {
            return Err(self.invalid(index, column, EXPECTED));
        }
        Ok(value)
    }

    fn flag(&self, index: usize, column: &'static str) -> Result<bool, ExtractError> {
        match self.fields[index] {
            "0" => Ok(false),
            "1" => Ok(true),
            _ => Err(self.invalid(index, column, "a saturation flag of 0 or 1")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::SpikeInConfig;
    use approx::assert_abs_diff_eq;
    use std::io::Cursor;

    fn panel(mode: MatchMode, probes: &[&str]) -> SpikeInPanel {
        let mut config = SpikeInConfig::from_probes(probes.iter().copied());
        config.trio_size = 1;
        config.match_mode = mode;
        SpikeInPanel::new(config).unwrap()
    }

    fn row(feature: u32, probe: &str, g_sat: &str, r_sat: &str) -> String {
        let mut fields: Vec<String> = vec![
            "DATA".into(),
            feature.to_string(),
            "1".into(),
            "1".into(),
            "0".into(),
            "0".into(),
            probe.into(),
            probe.into(),
        ];
        fields.extend(
            ["10.5", "20.5", "0.1", "0.01", "0.5"]
                .iter()
                .map(|s| s.to_string()),
        );
        fields.extend(
            [
                "60000.0", "59000.0", "10.0", "11.0", "65502", "65502", "45", "47", "3.1", "2.9",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        fields.push(g_sat.to_string());
        fields.push(r_sat.to_string());
        fields.join("\t")
    }

    fn extract(text: &str, panel: &SpikeInPanel) -> Result<Vec<FeatureRecord>, ExtractError> {
        extract_from_reader(Cursor::new(text.as_bytes()), Path::new("mem.txt"), panel)
    }

    #[test]
    fn extracts_documented_columns() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let text = format!("FEATURES\tFeatureNum\tProbeName\n{}\n", row(7, "SPIKE_A", "1", "0"));
        let records = extract(&text, &panel).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.feature_num, 7);
        assert_eq!(r.probe_name, "SPIKE_A");
        assert_eq!(r.panel_probe, "SPIKE_A");
        assert_abs_diff_eq!(r.processed_signal.green, 60000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r.processed_signal.red, 59000.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r.median_signal.green, 65502.0, epsilon = 1e-9);
        assert_abs_diff_eq!(r.bg_median_signal.red, 47.0, epsilon = 1e-9);
        assert!(r.is_saturated.green);
        assert!(!r.is_saturated.red);
        assert_eq!(r.source, "mem.txt");
    }

    #[test]
    fn skips_rows_for_other_probes() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let text = format!("{}\n{}\n", row(1, "OTHER", "0", "0"), row(2, "SPIKE_A", "0", "0"));
        let records = extract(&text, &panel).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].feature_num, 2);
    }

    #[test]
    fn exact_mode_does_not_confuse_prefixes() {
        let panel = panel(MatchMode::Exact, &["SPIKE_1", "SPIKE_10"]);
        let text = format!("{}\n", row(1, "SPIKE_10", "1", "1"));
        let records = extract(&text, &panel).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].panel_probe, "SPIKE_10");
    }

    #[test]
    fn substring_mode_attributes_to_longest_embedded_probe() {
        let panel = panel(MatchMode::Substring, &["SPIKE_1", "SPIKE_10"]);
        let text = format!("{}\n", row(1, "SPIKE_10", "1", "1"));
        let records = extract(&text, &panel).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].panel_probe, "SPIKE_10");
    }

    #[test]
    fn substring_mode_embeds_probe_in_longer_name() {
        let panel = panel(MatchMode::Substring, &["E1A_r60"]);
        let text = format!("{}\n", row(3, "(+)E1A_r60_a22", "0", "1"));
        let records = extract(&text, &panel).unwrap();
        assert_eq!(records[0].probe_name, "(+)E1A_r60_a22");
        assert_eq!(records[0].panel_probe, "E1A_r60");
    }

    #[test]
    fn substring_mode_skips_probe_mentioned_outside_probe_name() {
        let panel = panel(MatchMode::Substring, &["SPIKE_A"]);
        let line = row(4, "OTHER", "1", "1");
        let mut fields: Vec<&str> = line.split('\t').collect();
        fields[columns::SYSTEMATIC_NAME] = "near_SPIKE_A";
        let text = format!("{}\n", fields.join("\t"));
        assert!(extract(&text, &panel).unwrap().is_empty());
    }

    #[test]
    fn non_numeric_signal_fails_the_file() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let text = row(1, "SPIKE_A", "0", "0").replace("60000.0", "high");
        match extract(&text, &panel) {
            Err(ExtractError::InvalidValue { column, value, line, .. }) => {
                assert_eq!(column, "gProcessedSignal");
                assert_eq!(value, "high");
                assert_eq!(line, 1);
            }
            other => panic!("expected invalid value error, got {other:?}"),
        }
    }

    #[test]
    fn saturation_flag_must_be_binary() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let text = row(1, "SPIKE_A", "2", "0");
        assert!(matches!(
            extract(&text, &panel),
            Err(ExtractError::InvalidValue {
                column: "gIsSaturated",
                ..
            })
        ));
    }

    #[test]
    fn truncated_row_fails_the_file() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let text = "DATA\t1\t1\t1\t0\t0\tSPIKE_A\tSPIKE_A\t1.0\n";
        assert!(matches!(
            extract(text, &panel),
            Err(ExtractError::TooFewFields { found: 9, .. })
        ));
    }

    #[test]
    fn short_row_naming_a_panel_probe_fails_in_exact_mode() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        assert!(matches!(
            extract("DATA\t5\t1\t1\tSPIKE_A\n", &panel),
            Err(ExtractError::TooFewFields {
                found: 5,
                line: 1,
                ..
            })
        ));
        // Short lines without a panel probe, such as the preamble, are still skipped.
        assert!(extract("TYPE\ttext\tinteger\n*\n", &panel).unwrap().is_empty());
    }

    #[test]
    fn stray_bytes_outside_panel_rows_are_tolerated() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let mut bytes = b"FEPARAMS\tScanner\tAgilent \xb5m\n".to_vec();
        bytes.extend_from_slice(b"DATA\t1\t1\t1\t0\t0\tOTHER\xe9\tOTHER\n");
        bytes.extend_from_slice(row(2, "SPIKE_A", "1", "0").as_bytes());
        bytes.push(b'\n');
        let records = extract_from_reader(Cursor::new(bytes), Path::new("mem.txt"), &panel).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].feature_num, 2);
    }

    #[test]
    fn invalid_bytes_in_a_panel_row_fail_the_file() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let mut bytes = b"FEPARAMS\tScanner\tAgilent\n".to_vec();
        bytes.extend_from_slice(row(1, "SPIKE_A", "0", "0").as_bytes());
        bytes.extend_from_slice(b"\tnote\xff\n");
        assert!(matches!(
            extract_from_reader(Cursor::new(bytes), Path::new("mem.txt"), &panel),
            Err(ExtractError::InvalidEncoding { line: 2, .. })
        ));
    }

    #[test]
    fn negative_signal_is_rejected() {
        let panel = panel(MatchMode::Exact, &["SPIKE_A"]);
        let text = row(1, "SPIKE_A", "0", "0").replace("65502\t65502", "-3\t65502");
        assert!(matches!(
            extract(&text, &panel),
            Err(ExtractError::InvalidValue {
                column: "gMedianSignal",
                ..
            })
        ));
    }
}
