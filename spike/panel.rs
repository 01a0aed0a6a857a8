//! # Spike-In Panel Configuration
//!
//! The panel is the ordered list of probe identifiers that may be spiked into a
//! sample, together with the few run-level constants that travel with it. It is
//! loaded once per run from an explicit file path, validated into an immutable
//! [`SpikeInPanel`], and passed by reference into every component that needs it.
//!
//! Two file formats are accepted, chosen by extension:
//! - TOML (`.toml`), the native format;
//! - YAML (`.yaml` / `.yml`), matching the `config.yaml` layout used by the
//!   laboratory's existing tooling.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The default number of probes spiked into each sample.
pub const DEFAULT_TRIO_SIZE: usize = 3;

/// The default number of on-array replicates per probe.
pub const DEFAULT_REPLICATES_PER_PROBE: u32 = 3;

/// The Feature Extraction filename pattern used by the laboratory's scanner setup.
pub const DEFAULT_FE_FILENAME_TEMPLATE: &str = "{dna_id}_S01_Guys121919_CGH_1100_Jul11_2_{subarray}";

/// How a Feature Extraction line is attributed to a panel probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The `ProbeName` column must equal a panel identifier.
    #[default]
    Exact,
    /// Any line containing a panel identifier anywhere in its text is considered,
    /// and the row is attributed to the longest identifier its `ProbeName` embeds.
    Substring,
}

/// The on-disk representation of the run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeInConfig {
    #[serde(rename = "spikeInProbes")]
    pub spike_in_probes: Vec<String>,
    #[serde(default = "default_trio_size")]
    pub trio_size: usize,
    #[serde(default = "default_replicates_per_probe")]
    pub replicates_per_probe: u32,
    #[serde(default)]
    pub match_mode: MatchMode,
    #[serde(default = "default_fe_filename_template")]
    pub fe_filename_template: String,
}

fn default_trio_size() -> usize {
    DEFAULT_TRIO_SIZE
}

fn default_replicates_per_probe() -> u32 {
    DEFAULT_REPLICATES_PER_PROBE
}

fn default_fe_filename_template() -> String {
    DEFAULT_FE_FILENAME_TEMPLATE.to_string()
}

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Failed to parse YAML configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error(
        "Unsupported configuration file '{0}'. Use a .toml, .yaml or .yml file."
    )]
    UnsupportedFormat(PathBuf),
    #[error("The spike-in panel is empty. At least one probe identifier is required.")]
    Empty,
    #[error("The spike-in panel lists probe '{0}' more than once.")]
    DuplicateProbe(String),
    #[error("The spike-in panel contains an empty identifier at position {0}.")]
    EmptyIdentifier(usize),
    #[error("A trio size of {trio_size} is invalid for a panel of {panel_size} probes.")]
    InvalidTrioSize { trio_size: usize, panel_size: usize },
    #[error("The number of replicates per probe must be at least 1.")]
    InvalidReplicateCount,
    #[error("The FE filename template '{0}' must contain both '{{dna_id}}' and '{{subarray}}'.")]
    InvalidTemplate(String),
}

impl SpikeInConfig {
    /// A configuration with every setting at its default apart from the probes.
    pub fn from_probes<I, S>(probes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            spike_in_probes: probes.into_iter().map(Into::into).collect(),
            trio_size: DEFAULT_TRIO_SIZE,
            replicates_per_probe: DEFAULT_REPLICATES_PER_PROBE,
            match_mode: MatchMode::default(),
            fe_filename_template: default_fe_filename_template(),
        }
    }

    /// Loads a configuration from a TOML or YAML file.
    pub fn load(path: &Path) -> Result<Self, PanelError> {
        let text = fs::read_to_string(path).map_err(|source| PanelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("toml") => Ok(toml::from_str(&text)?),
            Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&text)?),
            _ => Err(PanelError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    /// Serializes the configuration in TOML form.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// The validated, immutable spike-in panel for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeInPanel {
    probes: Vec<String>,
    trio_size: usize,
    replicates_per_probe: u32,
    match_mode: MatchMode,
    fe_filename_template: String,
}

impl SpikeInPanel {
    pub fn new(config: SpikeInConfig) -> Result<Self, PanelError> {
        let SpikeInConfig {
            spike_in_probes,
            trio_size,
            replicates_per_probe,
            match_mode,
            fe_filename_template,
        } = config;

        if spike_in_probes.is_empty() {
            return Err(PanelError::Empty);
        }

        let mut seen = HashSet::with_capacity(spike_in_probes.len());
        let mut probes = Vec::with_capacity(spike_in_probes.len());
        for (position, raw) in spike_in_probes.into_iter().enumerate() {
            let probe = raw.trim().to_string();
            if probe.is_empty() {
                return Err(PanelError::EmptyIdentifier(position));
            }
            if !seen.insert(probe.clone()) {
                return Err(PanelError::DuplicateProbe(probe));
            }
            probes.push(probe);
        }

        if trio_size == 0 || trio_size > probes.len() {
            return Err(PanelError::InvalidTrioSize {
                trio_size,
                panel_size: probes.len(),
            });
        }
        if replicates_per_probe == 0 {
            return Err(PanelError::InvalidReplicateCount);
        }
        if !fe_filename_template.contains("{dna_id}") || !fe_filename_template.contains("{subarray}")
        {
            return Err(PanelError::InvalidTemplate(fe_filename_template));
        }

        let panel = Self {
            probes,
            trio_size,
            replicates_per_probe,
            match_mode,
            fe_filename_template,
        };
        if panel.match_mode == MatchMode::Substring {
            for (inner, outer) in panel.overlapping_identifiers() {
                log::warn!(
                    "Panel probe '{inner}' is a substring of '{outer}'; substring matching may misattribute rows."
                );
            }
        }
        Ok(panel)
    }

    /// Loads and validates a panel in one step.
    pub fn load(path: &Path) -> Result<Self, PanelError> {
        Self::new(SpikeInConfig::load(path)?)
    }

    /// The probe identifiers in configured order.
    pub fn probes(&self) -> &[String] {
        &self.probes
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    pub fn contains(&self, probe: &str) -> bool {
        self.probes.iter().any(|p| p == probe)
    }

    pub fn trio_size(&self) -> usize {
        self.trio_size
    }

    pub fn replicates_per_probe(&self) -> u32 {
        self.replicates_per_probe
    }

    pub fn match_mode(&self) -> MatchMode {
        self.match_mode
    }

    pub fn fe_filename_template(&self) -> &str {
        &self.fe_filename_template
    }

    /// Pairs `(inner, outer)` where `inner` occurs inside `outer`.
    pub fn overlapping_identifiers(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for inner in &self.probes {
            for outer in &self.probes {
                if inner != outer && outer.contains(inner.as_str()) {
                    pairs.push((inner.clone(), outer.clone()));
                }
            }
        }
        pairs
    }
}
