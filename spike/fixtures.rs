// ========================================================================================
//
//                            TEST-DATA GENERATION
//
// ========================================================================================
//
// Produces Feature Extraction files with a known spike-in design so the detection
// pipeline can be exercised without a scanner.
//
// A template holds the rows of every panel probe (and optionally some unrelated
// filler rows). Rendering a template against a design sets the saturation flags of
// each row to match the probes spiked on each channel, then applies a failure
// scenario on top.
//
// Templates come from two places:
//   - `FeTemplate::synthetic` builds one from the panel alone.
//   - `FeTemplate::downsample` cuts a real FE file down to its panel rows.

use crate::combinations::spike_in_combinations;
use crate::design::{DesignError, OverrideDesign, OverrideRow};
use crate::lims::{LimsAssignment, SubarrayPosition, fe_filename};
use crate::panel::SpikeInPanel;
use crate::types::{Channel, ChannelPair, ProbeCombination};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Lines before the `FEATURES` header in an FE file.
pub const PREAMBLE_LINES: usize = 9;

/// The leading columns of an FE `FEATURES` table, up to and past the ones read by
/// the extractor.
pub const FE_COLUMNS: [&str; 27] = [
    "FEATURES",
    "FeatureNum",
    "Row",
    "Col",
    "SubTypeMask",
    "ControlType",
    "ProbeName",
    "SystematicName",
    "PositionX",
    "PositionY",
    "LogRatio",
    "LogRatioError",
    "PValueLogRatio",
    "gProcessedSignal",
    "rProcessedSignal",
    "gProcessedSigError",
    "rProcessedSigError",
    "gMedianSignal",
    "rMedianSignal",
    "gBGMedianSignal",
    "rBGMedianSignal",
    "gBGPixSDev",
    "rBGPixSDev",
    "gIsSaturated",
    "rIsSaturated",
    "gIsFeatNonUnifOL",
    "rIsFeatNonUnifOL",
];

const SYNTHETIC_PREAMBLE: [&str; PREAMBLE_LINES] = [
    "TYPE\ttext\ttext",
    "FEPARAMS\tProtocol_Name\tScan_Date",
    "DATA\tCGH_1100_Jul11\t01-11-2018 10:00:00",
    "*",
    "TYPE\tfloat\tfloat",
    "STATS\tgDarkOffsetAverage\trDarkOffsetAverage",
    "DATA\t0\t0",
    "*",
    "TYPE\tinteger\ttext",
];

/// Non-panel probes added to synthetic templates.
const FILLER_PROBES: [&str; 2] = ["A_16_P00000001", "A_16_P00000002"];

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("'{path}' ends after {found} line(s); an FE file has a {PREAMBLE_LINES}-line preamble followed by a header.")]
    Truncated { path: PathBuf, found: usize },
    #[error("The header of '{path}' has no '{column}' column.")]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("The template from '{0}' contains no spike-in probe rows.")]
    NoPanelRows(PathBuf),
    #[error(transparent)]
    Design(#[from] DesignError),
}

/// A failure injected into a rendered file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scenario {
    /// Every replicate behaves as designed.
    Clean,
    /// The first replicate of `probe` on `channel` reports the opposite flag.
    FailedReplicate { probe: String, channel: Channel },
    /// Every replicate of `probe` on `channel` reports the opposite flag.
    FailedProbe { probe: String, channel: Channel },
}

/// The rows of an FE file, ready to be rendered against a design.
#[derive(Debug, Clone)]
pub struct FeTemplate {
    preamble: Vec<String>,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    probe_column: usize,
    saturation_columns: ChannelPair<usize>,
}

impl FeTemplate {
    /// Builds a template from the panel alone: `replicates_per_probe` rows per
    /// probe plus a few filler rows, sorted by probe name.
    pub fn synthetic(panel: &SpikeInPanel) -> Self {
        let mut probes: Vec<&str> = panel
            .probes()
            .iter()
            .map(String::as_str)
            .chain(FILLER_PROBES)
            .collect();
        probes.sort_by(|a, b| natord::compare(a, b));

        let replicates = panel.replicates_per_probe() as usize;
        let rows = probes
            .iter()
            .flat_map(|probe| std::iter::repeat_n(*probe, replicates))
            .enumerate()
            .map(|(i, probe)| synthetic_row(i + 1, probe))
            .collect();

        Self {
            preamble: SYNTHETIC_PREAMBLE.iter().map(|s| s.to_string()).collect(),
            header: FE_COLUMNS.iter().map(|s| s.to_string()).collect(),
            rows,
            probe_column: 6,
            saturation_columns: ChannelPair::new(23, 24),
        }
    }

    /// Reads a real FE file and keeps only the rows of panel probes, sorted by
    /// probe name, with both saturation flags cleared.
    pub fn downsample(path: &Path, panel: &SpikeInPanel) -> Result<Self, FixtureError> {
        let io_error = |source| FixtureError::Io {
            path: path.to_path_buf(),
            source,
        };
        let reader = BufReader::new(File::open(path).map_err(io_error)?);
        let mut lines = reader.lines();

        let mut preamble = Vec::with_capacity(PREAMBLE_LINES);
        for _ in 0..PREAMBLE_LINES {
            match lines.next() {
                Some(line) => preamble.push(line.map_err(io_error)?),
                None => {
                    return Err(FixtureError::Truncated {
                        path: path.to_path_buf(),
                        found: preamble.len(),
                    });
                }
            }
        }
        let header: Vec<String> = match lines.next() {
            Some(line) => line
                .map_err(io_error)?
                .split('\t')
                .map(|s| s.trim().to_string())
                .collect(),
            None => {
                return Err(FixtureError::Truncated {
                    path: path.to_path_buf(),
                    found: PREAMBLE_LINES,
                });
            }
        };

        let column = |name: &'static str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| FixtureError::MissingColumn {
                    path: path.to_path_buf(),
                    column: name,
                })
        };
        let probe_column = column("ProbeName")?;
        let saturation_columns = ChannelPair::new(column("gIsSaturated")?, column("rIsSaturated")?);

        let mut rows = Vec::new();
        for line in lines {
            let line = line.map_err(io_error)?;
            let fields: Vec<String> = line.split('\t').map(|s| s.trim_end().to_string()).collect();
            let keep = fields
                .get(probe_column)
                .is_some_and(|probe| panel.contains(probe))
                && fields.len() > saturation_columns.green.max(saturation_columns.red);
            if keep {
                rows.push(fields);
            }
        }
        if rows.is_empty() {
            return Err(FixtureError::NoPanelRows(path.to_path_buf()));
        }
        rows.sort_by(|a, b| a[probe_column].cmp(&b[probe_column]));
        for row in &mut rows {
            for channel in Channel::BOTH {
                row[*saturation_columns.get(channel)] = "0".to_string();
            }
        }

        log::info!("Built a {}-row template from {}", rows.len(), path.display());
        Ok(Self {
            preamble,
            header,
            rows,
            probe_column,
            saturation_columns,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Renders the full FE text for a sample spiked with `design`.
    pub fn render(&self, design: &ChannelPair<ProbeCombination>, scenario: &Scenario) -> String {
        let mut rows = self.rows.clone();
        for row in &mut rows {
            let probe = row[self.probe_column].clone();
            for channel in Channel::BOTH {
                row[*self.saturation_columns.get(channel)] = flag(design.get(channel).contains(&probe));
            }
        }

        match scenario {
            Scenario::Clean => {}
            Scenario::FailedReplicate { probe, channel } => {
                if let Some(row) = rows.iter_mut().find(|row| &row[self.probe_column] == probe) {
                    self.flip(row, *channel);
                }
            }
            Scenario::FailedProbe { probe, channel } => {
                for row in rows.iter_mut().filter(|row| &row[self.probe_column] == probe) {
                    self.flip(row, *channel);
                }
            }
        }

        let header = self.header.join("\t");
        let mut text = String::new();
        for line in self.preamble.iter().chain(std::iter::once(&header)) {
            text.push_str(line);
            text.push('\n');
        }
        for row in rows {
            text.push_str(&row.join("\t"));
            text.push('\n');
        }
        text
    }

    pub fn write(
        &self,
        path: &Path,
        design: &ChannelPair<ProbeCombination>,
        scenario: &Scenario,
    ) -> Result<(), FixtureError> {
        let io_error = |source| FixtureError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(io_error)?);
        writer
            .write_all(self.render(design, scenario).as_bytes())
            .map_err(io_error)?;
        writer.flush().map_err(io_error)
    }

    fn flip(&self, row: &mut [String], channel: Channel) {
        let column = *self.saturation_columns.get(channel);
        row[column] = flag(row[column] != "1");
    }
}

fn flag(saturated: bool) -> String {
    String::from(if saturated { "1" } else { "0" })
}

fn synthetic_row(feature_num: usize, probe: &str) -> Vec<String> {
    let row = (feature_num - 1) / 4 + 1;
    let col = (feature_num - 1) % 4 + 1;
    let mut fields: Vec<String> = vec![
        "DATA".into(),
        feature_num.to_string(),
        row.to_string(),
        col.to_string(),
        "0".into(),
        "0".into(),
        probe.into(),
        probe.into(),
        format!("{:.1}", col as f64 * 10.0),
        format!("{:.1}", row as f64 * 10.0),
        "0".into(),
        "0.1".into(),
        "1".into(),
    ];
    fields.extend(
        [
            "120.5", "118.2", "5.1", "4.9", "130", "128", "45", "47", "3.1", "2.9", "0", "0", "0", "0",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    fields
}

// ========================================================================================
//                                 WHOLE SLIDES
// ========================================================================================

/// The files written for one generated slide.
#[derive(Debug, Clone)]
pub struct GeneratedSlide {
    /// One FE file per subarray, in subarray order.
    pub files: Vec<PathBuf>,
    /// The override file describing the design of every file.
    pub design_path: PathBuf,
    /// The same design expressed as LIMS assignments.
    pub assignments: Vec<LimsAssignment>,
}

pub const DESIGN_FILE_NAME: &str = "spike_in_design.csv";

/// Writes the eight FE files of one slide, each subarray spiked with a different
/// pair of combinations (green, red), plus the matching design file.
///
/// With `inject_failures`, subarray 7 loses one green replicate of its first probe
/// and subarray 8 loses every red replicate of its first probe.
pub fn generate_slide(
    template: &FeTemplate,
    panel: &SpikeInPanel,
    output_dir: &Path,
    array_id: &str,
    inject_failures: bool,
) -> Result<GeneratedSlide, FixtureError> {
    fs::create_dir_all(output_dir).map_err(|source| FixtureError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;
    let combinations = spike_in_combinations(panel.probes(), panel.trio_size());

    let mut files = Vec::with_capacity(SubarrayPosition::ALL.len());
    let mut design_rows = Vec::new();
    let mut assignments = Vec::new();

    for (i, position) in SubarrayPosition::ALL.into_iter().enumerate() {
        let design = ChannelPair::new(
            combinations[(2 * i) % combinations.len()].clone(),
            combinations[(2 * i + 1) % combinations.len()].clone(),
        );
        let scenario = match position.index() {
            7 if inject_failures => failure(&design, Channel::Green, |probe, channel| {
                Scenario::FailedReplicate { probe, channel }
            }),
            8 if inject_failures => failure(&design, Channel::Red, |probe, channel| {
                Scenario::FailedProbe { probe, channel }
            }),
            _ => Scenario::Clean,
        };

        let name = format!("{}.txt", fe_filename(panel.fe_filename_template(), array_id, position));
        let path = output_dir.join(&name);
        template.write(&path, &design, &scenario)?;
        log::debug!("Wrote {} ({scenario:?})", path.display());

        design_rows.extend(panel.probes().iter().map(|probe| OverrideRow {
            sample: Some(name.clone()),
            probe_name: probe.clone(),
            g_spike: u8::from(design.green.contains(probe)),
            r_spike: u8::from(design.red.contains(probe)),
        }));
        for channel in Channel::BOTH {
            assignments.push(LimsAssignment {
                dna_id: array_id.to_string(),
                subarray: u32::from(position.index()),
                channel,
                probes: design.get(channel).iter().map(str::to_string).collect(),
            });
        }
        files.push(path);
    }

    let design_path = output_dir.join(DESIGN_FILE_NAME);
    OverrideDesign::write_rows(&design_path, &design_rows)?;
    log::info!(
        "Generated {} FE files and {} in {}",
        files.len(),
        DESIGN_FILE_NAME,
        output_dir.display()
    );

    Ok(GeneratedSlide {
        files,
        design_path,
        assignments,
    })
}

fn failure(
    design: &ChannelPair<ProbeCombination>,
    channel: Channel,
    scenario: impl FnOnce(String, Channel) -> Scenario,
) -> Scenario {
    match design.get(channel).iter().next() {
        Some(probe) => scenario(probe.to_string(), channel),
        None => Scenario::Clean,
    }
}
