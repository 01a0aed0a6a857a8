//! # LIMS Integration
//!
//! The laboratory information system records, for every labelled DNA, the array
//! it was hybridised to, its subarray position, its dye channel and the probe
//! trio it was spiked with. This module adapts that record to a [`DesignSource`].
//!
//! The LIMS numbers the eight subarrays of a slide sequentially, column-major:
//!
//! ```text
//!         LIMS            FE filename
//!       C1    C2          C1     C2
//!  R1 |  1     5 |     |  1_1   2_1 |
//!  R2 |  2     6 |     |  1_2   2_2 |
//!  R3 |  3     7 |  =  |  1_3   2_3 |
//!  R4 |  4     8 |     |  1_4   2_4 |
//! ```
//!
//! The storage behind the LIMS is abstracted by [`LimsBackend`]. [`SnapshotLims`]
//! is a file-backed backend that reads a TOML export and records verdicts into it.

use crate::aggregate::pretty_label;
use crate::design::{DesignError, DesignSource};
use crate::panel::SpikeInPanel;
use crate::reconcile::{ReconciliationResult, Verdict};
use crate::types::{Channel, ProbeCombination, SampleLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Number of subarrays on one slide.
pub const SUBARRAYS_PER_SLIDE: u8 = 8;

/// Rows per column in the physical slide layout.
const ROWS_PER_COLUMN: u8 = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubarrayError {
    #[error("Subarray position {0} is out of range. Positions run from 1 to 8.")]
    OutOfRange(u32),
    #[error("'{0}' is not a subarray token. Tokens run from '1_1' to '2_4'.")]
    InvalidToken(String),
}

/// A subarray position in the LIMS's sequential 1-8 numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubarrayPosition(u8);

impl SubarrayPosition {
    pub const ALL: [SubarrayPosition; SUBARRAYS_PER_SLIDE as usize] = [
        SubarrayPosition(1),
        SubarrayPosition(2),
        SubarrayPosition(3),
        SubarrayPosition(4),
        SubarrayPosition(5),
        SubarrayPosition(6),
        SubarrayPosition(7),
        SubarrayPosition(8),
    ];

    pub fn new(position: u32) -> Result<Self, SubarrayError> {
        match u8::try_from(position) {
            Ok(p) if (1..=SUBARRAYS_PER_SLIDE).contains(&p) => Ok(Self(p)),
            _ => Err(SubarrayError::OutOfRange(position)),
        }
    }

    pub fn index(self) -> u8 {
        self.0
    }

    /// The `column_row` token used in FE filenames.
    pub fn to_fe_token(self) -> String {
        let zero_based = self.0 - 1;
        format!(
            "{}_{}",
            zero_based / ROWS_PER_COLUMN + 1,
            zero_based % ROWS_PER_COLUMN + 1
        )
    }

    /// Parses a `column_row` token back into a sequential position.
    pub fn from_fe_token(token: &str) -> Result<Self, SubarrayError> {
        let invalid = || SubarrayError::InvalidToken(token.to_string());
        let (column, row) = token.trim().split_once('_').ok_or_else(invalid)?;
        let column: u8 = column.parse().map_err(|_| invalid())?;
        let row: u8 = row.parse().map_err(|_| invalid())?;
        if !(1..=2).contains(&column) || !(1..=ROWS_PER_COLUMN).contains(&row) {
            return Err(invalid());
        }
        Ok(Self((column - 1) * ROWS_PER_COLUMN + row))
    }
}

impl fmt::Display for SubarrayPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the FE filename (without extension) of one LIMS record.
pub fn fe_filename(template: &str, dna_id: &str, position: SubarrayPosition) -> String {
    template
        .replace("{dna_id}", dna_id)
        .replace("{subarray}", &position.to_fe_token())
}

// ========================================================================================
//                                 LIMS RECORDS
// ========================================================================================

/// The probe trio assigned to one labelled sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimsAssignment {
    pub dna_id: String,
    /// Sequential 1-8 subarray position.
    pub subarray: u32,
    pub channel: Channel,
    pub probes: Vec<String>,
}

/// A verdict as written back to the LIMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimsResult {
    pub dna_id: String,
    pub subarray: u32,
    pub channel: Channel,
    pub verdict: Verdict,
    pub detected: Vec<String>,
    pub extra: Vec<String>,
    pub missing: Vec<String>,
    pub uncertain: Vec<String>,
    pub recorded_at: String,
}

/// Storage behind the LIMS.
pub trait LimsBackend {
    fn assignments(&self) -> Result<Vec<LimsAssignment>, DesignError>;

    fn write_result(&mut self, result: LimsResult) -> Result<(), DesignError>;
}

#[derive(Debug, Clone)]
struct IndexedAssignment {
    dna_id: String,
    subarray: SubarrayPosition,
    probes: Vec<String>,
}

/// A [`DesignSource`] that reads expected trios from, and writes verdicts to, a LIMS.
#[derive(Debug)]
pub struct LimsDesign<B: LimsBackend> {
    backend: B,
    index: BTreeMap<(SampleLabel, Channel), IndexedAssignment>,
}

impl<B: LimsBackend> LimsDesign<B> {
    /// Indexes every assignment by the sample label its FE file will carry.
    pub fn new(backend: B, panel: &SpikeInPanel) -> Result<Self, DesignError> {
        let mut index = BTreeMap::new();
        for assignment in backend.assignments()? {
            let subarray = SubarrayPosition::new(assignment.subarray)?;
            let filename = fe_filename(panel.fe_filename_template(), &assignment.dna_id, subarray);
            let label = SampleLabel::new(pretty_label(&filename));
            let key = (label, assignment.channel);
            if index.contains_key(&key) {
                log::warn!(
                    "LIMS lists more than one assignment for {} ({}); keeping the first.",
                    key.0,
                    key.1
                );
                continue;
            }
            index.insert(
                key,
                IndexedAssignment {
                    dna_id: assignment.dna_id,
                    subarray,
                    probes: assignment.probes,
                },
            );
        }
        log::info!("Indexed {} LIMS assignment(s)", index.len());
        Ok(Self { backend, index })
    }

    fn lookup(&self, label: &SampleLabel, channel: Channel) -> Result<&IndexedAssignment, DesignError> {
        self.index
            .get(&(label.clone(), channel))
            .ok_or_else(|| DesignError::NoAssignment {
                label: label.clone(),
                channel,
                source_name: "LIMS".to_string(),
            })
    }
}

impl<B: LimsBackend> DesignSource for LimsDesign<B> {
    fn name(&self) -> &str {
        "LIMS"
    }

    fn resolve_expected(
        &self,
        label: &SampleLabel,
        channel: Channel,
    ) -> Result<ProbeCombination, DesignError> {
        Ok(ProbeCombination::new(self.lookup(label, channel)?.probes.iter().cloned()))
    }

    fn record_verdict(&mut self, result: &ReconciliationResult) -> Result<(), DesignError> {
        let assignment = self.lookup(&result.label, result.channel)?;
        let record = LimsResult {
            dna_id: assignment.dna_id.clone(),
            subarray: u32::from(assignment.subarray.index()),
            channel: result.channel,
            verdict: result.verdict,
            detected: result.detected.iter().map(str::to_string).collect(),
            extra: result.extra.clone(),
            missing: result.missing.clone(),
            uncertain: result.uncertain.clone(),
            recorded_at: chrono::Local::now().to_rfc3339(),
        };
        self.backend.write_result(record)
    }
}

// ========================================================================================
//                               FILE-BACKED BACKEND
// ========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimsSnapshot {
    #[serde(default, rename = "assignment")]
    pub assignments: Vec<LimsAssignment>,
    #[serde(default, rename = "result")]
    pub results: Vec<LimsResult>,
}

/// A LIMS export held in a TOML file. Results are written back to the same file
/// as soon as they are recorded.
#[derive(Debug, Clone)]
pub struct SnapshotLims {
    path: PathBuf,
    snapshot: LimsSnapshot,
}

impl SnapshotLims {
    pub fn load(path: &Path) -> Result<Self, DesignError> {
        let text = fs::read_to_string(path).map_err(|source| DesignError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            snapshot: toml::from_str(&text)?,
        })
    }

    /// Writes `snapshot` to `path`, replacing any existing file.
    pub fn create(path: &Path, snapshot: LimsSnapshot) -> Result<Self, DesignError> {
        let lims = Self {
            path: path.to_path_buf(),
            snapshot,
        };
        lims.save()?;
        Ok(lims)
    }

    pub fn save(&self) -> Result<(), DesignError> {
        let text = toml::to_string_pretty(&self.snapshot)?;
        fs::write(&self.path, text).map_err(|source| DesignError::Io {
            path: self.path.clone(),
            source,
        })
    }

    pub fn results(&self) -> &[LimsResult] {
        &self.snapshot.results
    }
}

impl LimsBackend for SnapshotLims {
    fn assignments(&self) -> Result<Vec<LimsAssignment>, DesignError> {
        Ok(self.snapshot.assignments.clone())
    }

    fn write_result(&mut self, result: LimsResult) -> Result<(), DesignError> {
        self.snapshot.results.retain(|r| {
            !(r.dna_id == result.dna_id && r.subarray == result.subarray && r.channel == result.channel)
        });
        self.snapshot.results.push(result);
        self.save()
    }
}
