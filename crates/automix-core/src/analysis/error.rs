//! Recoverable per-track analysis failures

use thiserror::Error;

use crate::audio_file::AudioFileError;

/// Why a track could not be analyzed
///
/// Every variant excludes the track from the mix; none of them stop the run.
#[derive(Error, Debug)]
pub enum AnalysisFailure {
    #[error("no beats detected after the first onset")]
    NoBeats,

    #[error("no onsets detected")]
    NoOnsets,

    #[error("no sound above the noise floor")]
    NoSound,

    #[error("no consistent beat run longer than {required} beats (longest {longest})")]
    NoAnchorSegment { longest: usize, required: usize },

    #[error("first onset at {onset:.3}s lies before the first sound at {first_sound:.3}s")]
    OnsetBeforeSound { onset: f64, first_sound: f64 },

    #[error("grid phase bucket {bucket} has {count} kicks, mean is {mean:.2}")]
    GridValidation { bucket: usize, count: u32, mean: f64 },

    #[error("no drop sections detected")]
    NoDrops,

    #[error("failed to read track: {0}")]
    Source(#[from] AudioFileError),
}
