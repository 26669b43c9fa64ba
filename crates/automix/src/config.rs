//! Application configuration
//!
//! Stored as YAML in `$AUTOMIX_HOME/config.yaml`. `AUTOMIX_HOME` defaults to
//! `~/.automix`.

use std::path::{Path, PathBuf};

use automix_core::analysis::ExtractorConfig;
use automix_core::config::LoudnessConfig;
use automix_core::export::OutputFormat;
use automix_core::planner::MixParams;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cli::Cli;

pub const HOME_ENV: &str = "AUTOMIX_HOME";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("AUTOMIX_HOME is set to {0:?}, which is not a directory")]
    InvalidHome(PathBuf),

    #[error("No home directory found; set AUTOMIX_HOME")]
    NoHome,

    #[error("Input directory {0:?} does not exist")]
    MissingInput(PathBuf),

    #[error("Output directory {0:?} does not exist")]
    MissingOutputDir(PathBuf),

    #[error("Output file {0:?} must end in .wav or .flac")]
    OutputFormat(PathBuf),

    #[error("{name} must be between 0 and 100, got {value}")]
    Probability { name: &'static str, value: f64 },

    #[error("{name} must be positive, got {value}")]
    Tempo { name: &'static str, value: f64 },

    #[error("At least 2 channels are required, got {0}")]
    Channels(usize),

    #[error("Maximum track count must be at least 1")]
    MaxTracks,
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mix: MixConfig,
    pub analysis: AnalysisConfig,
    pub loudness: LoudnessConfig,
}

/// Mix section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    #[serde(flatten)]
    pub params: MixParams,
    /// Tracks taken from the input folder
    pub max_tracks: usize,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            params: MixParams::default(),
            max_tracks: 25,
        }
    }
}

/// Analysis section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    #[serde(flatten)]
    pub extractor: ExtractorConfig,
    /// Analyze tracks on all cores
    pub multithreaded: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            multithreaded: true,
        }
    }
}

impl AppConfig {
    /// Apply command line overrides
    pub fn apply_cli(&mut self, cli: &Cli) {
        let params = &mut self.mix.params;
        if let Some(tempo) = cli.tempo {
            params.target_tempo = tempo;
        }
        if let Some(probability) = cli.double_drop {
            params.double_drop_probability = probability;
        }
        if let Some(probability) = cli.breakdown {
            params.breakdown_probability = probability;
        }
        if let Some(seed) = cli.seed {
            params.seed = seed;
        }
        if let Some(max_tracks) = cli.max_tracks {
            self.mix.max_tracks = max_tracks;
        }
        if let Some(hint) = cli.tempo_hint {
            self.analysis.extractor.tempo_hint = hint;
        }
        if cli.single_threaded {
            self.analysis.multithreaded = false;
        }
    }

    /// Check the values that would make a run fail halfway through
    pub fn validate(&self) -> Result<(), ConfigError> {
        let params = &self.mix.params;
        for (name, value) in [
            ("output tempo", params.target_tempo),
            ("tempo hint", self.analysis.extractor.tempo_hint),
        ] {
            if value.is_nan() || value <= 0.0 {
                return Err(ConfigError::Tempo { name, value });
            }
        }
        for (name, value) in [
            ("double drop probability", params.double_drop_probability),
            ("breakdown probability", params.breakdown_probability),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Probability { name, value });
            }
        }
        if params.channels < 2 {
            return Err(ConfigError::Channels(params.channels));
        }
        if self.mix.max_tracks == 0 {
            return Err(ConfigError::MaxTracks);
        }
        Ok(())
    }
}

/// Check the input folder and output file before any work starts
pub fn validate_paths(input_dir: &Path, output: &Path) -> Result<(), ConfigError> {
    if !input_dir.is_dir() {
        return Err(ConfigError::MissingInput(input_dir.to_path_buf()));
    }
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() {
        return Err(ConfigError::MissingOutputDir(parent.to_path_buf()));
    }
    OutputFormat::from_path(output).map_err(|_| ConfigError::OutputFormat(output.to_path_buf()))?;
    Ok(())
}

/// Resolve the automix home directory
///
/// An explicit `AUTOMIX_HOME` must exist; the default `~/.automix` is
/// created on demand by the config and cache writers.
pub fn automix_home() -> Result<PathBuf, ConfigError> {
    resolve_home(std::env::var_os(HOME_ENV).map(PathBuf::from))
}

fn resolve_home(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    match explicit {
        Some(home) if home.is_dir() => Ok(home),
        Some(home) => Err(ConfigError::InvalidHome(home)),
        None => dirs::home_dir()
            .map(|home| home.join(".automix"))
            .ok_or(ConfigError::NoHome),
    }
}

pub fn default_config_path(home: &Path) -> PathBuf {
    home.join("config.yaml")
}
