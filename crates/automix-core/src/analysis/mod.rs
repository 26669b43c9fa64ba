//! Structural analysis of a track
//!
//! Turns the feature streams of one track into a tempo, a beat grid aligned
//! to the start of the audio, the drop sections and the drum density per
//! 4-bar section.
//!
//! ## Pipeline
//!
//! 1. [`estimate_tempo`]: trimmed mean of the beat gaps
//! 2. [`find_anchor_segment`] + [`refine_phase`]: grid phase from the first
//!    long run of consistent beats
//! 3. [`align_grid`]: walk the phase back to the track start and snap it to
//!    the kicks
//! 4. [`section_energies`] + [`detect_drops`]: drops from bass energy
//! 5. [`drum_density`]: onsets per section
//!
//! Every failure is recoverable: the track is marked unusable and left out
//! of the mix.

mod error;
pub mod features;
mod grid;
mod sections;
mod tempo;

pub use error::AnalysisFailure;
pub use features::{
    extract_features, ExtractorConfig, FeatureExtractor, Features, Onset, OnsetFunction,
    SpectralExtractor,
};
pub use grid::align_grid;
pub use sections::{detect_drops, drum_density, section_energies, DropInterval};
pub use tempo::{
    estimate_tempo, find_anchor_segment, minimise_distance, refine_phase, TempoEstimate,
};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio_file::{TrackDecoder, TrackSource};
use crate::types::{BARS_PER_SECTION, BEATS_PER_BAR};

/// Result of analyzing one track
///
/// Serializable for the persisted analysis cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Tempo in BPM
    pub tempo: f64,
    /// Grid origin in seconds
    pub first_beat_time: f64,
    /// Drops in ascending order
    pub drop_intervals: Vec<DropInterval>,
    /// Onsets per 4-bar section
    pub drum_density: Vec<u32>,
    /// Whole-track RMS level in dBFS
    #[serde(default)]
    pub loudness_db: Option<f32>,
    /// Whether the track can be mixed
    pub success: bool,
}

impl AnalysisResult {
    /// Result recorded for a track that failed analysis
    pub fn failed() -> Self {
        Self {
            tempo: 0.0,
            first_beat_time: 0.0,
            drop_intervals: Vec::new(),
            drum_density: Vec::new(),
            loudness_db: None,
            success: false,
        }
    }

    /// Seconds per beat
    pub fn beat_duration(&self) -> f64 {
        60.0 / self.tempo
    }

    /// Track-local time of `bar` on the grid
    pub fn time_at_bar(&self, bar: f64) -> f64 {
        self.first_beat_time + bar * BEATS_PER_BAR as f64 * self.beat_duration()
    }

    pub fn first_drop(&self) -> Option<DropInterval> {
        self.drop_intervals.first().copied()
    }

    /// Onset count of the section containing `bar`
    pub fn drums_at_bar(&self, bar: u32) -> Option<u32> {
        self.drum_density
            .get((bar / BARS_PER_SECTION) as usize)
            .copied()
    }
}

/// Run the structural analysis on extracted features
pub fn analyze_features(features: &Features) -> Result<AnalysisResult, AnalysisFailure> {
    if features.beats.is_empty() {
        return Err(AnalysisFailure::NoBeats);
    }
    let first_onset = features
        .onsets
        .first()
        .ok_or(AnalysisFailure::NoOnsets)?
        .time;
    let first_sound = features.first_sound.ok_or(AnalysisFailure::NoSound)?;

    let estimate = estimate_tempo(&features.beats, first_onset)?;
    let anchor = find_anchor_segment(&features.beats, first_onset, &estimate)?;
    let origin = refine_phase(anchor, estimate.bpm);
    let first_beat_time = align_grid(
        origin,
        estimate.bpm,
        &features.onsets,
        first_sound,
        features.sample_rate,
    )?;

    let energies = section_energies(
        &features.bass_energy,
        features.energy_step,
        features.sample_rate,
        first_beat_time,
        estimate.bpm,
    );
    let drop_intervals = detect_drops(&energies);
    if drop_intervals.is_empty() {
        return Err(AnalysisFailure::NoDrops);
    }
    let drum_density = drum_density(&features.onsets, first_beat_time, estimate.bpm);

    log::debug!(
        "analyze_features: {:.2} BPM, first beat {:.3}s, {} drops, {} sections",
        estimate.bpm,
        first_beat_time,
        drop_intervals.len(),
        drum_density.len()
    );

    Ok(AnalysisResult {
        tempo: estimate.bpm,
        first_beat_time,
        drop_intervals,
        drum_density,
        loudness_db: features.loudness_db,
        success: true,
    })
}

/// Decode and analyze a track file
pub fn analyze_file(path: &Path, config: &ExtractorConfig) -> Result<AnalysisResult, AnalysisFailure> {
    let mut decoder = TrackDecoder::open(path)?;
    let mut extractor = SpectralExtractor::new(decoder.sample_rate(), config.clone());
    let features = extract_features(&mut decoder, &mut extractor)?;
    let result = analyze_features(&features)?;
    log::info!(
        "analyze_file: {:?}: {:.2} BPM, first beat {:.3}s, drops {:?}",
        path.file_name().unwrap_or_default(),
        result.tempo,
        result.first_beat_time,
        result.drop_intervals
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SAMPLE_RATE;

    const STEP: usize = 512;

    /// 120 BPM from 1.0s with kicks on the beat and hats between,
    /// 8 s sections with high bass in sections 2-3 and 8-9
    fn synthetic_features(offset: f64, pad_steps: usize) -> Features {
        let beats: Vec<f64> = (0..200).map(|i| offset + 1.0 + i as f64 * 0.5).collect();
        let mut onsets = Vec::new();
        for &beat in &beats {
            onsets.push(Onset { time: beat, strength: 1.0 });
            onsets.push(Onset { time: beat + 0.25, strength: 0.2 });
        }

        let steps = (101.0 * SAMPLE_RATE as f64 / STEP as f64) as usize;
        let mut bass_energy = vec![0.0f32; pad_steps];
        bass_energy.extend((0..steps).map(|i| {
            let t = (i * STEP) as f64 / SAMPLE_RATE as f64;
            if t < 1.0 {
                return 0.0;
            }
            match ((t - 1.0) / 8.0) as usize {
                2 | 3 | 8 | 9 => 1.0,
                _ => 0.1,
            }
        }));

        Features {
            onsets,
            beats,
            bass_energy,
            energy_step: STEP,
            sample_rate: SAMPLE_RATE,
            first_sound: Some(offset + 0.99),
            loudness_db: Some(-12.0),
        }
    }

    #[test]
    fn test_synthetic_track() {
        let result = analyze_features(&synthetic_features(0.0, 0)).unwrap();
        assert!(result.success);
        assert_eq!(result.tempo, 120.0);
        assert!((result.first_beat_time - 1.0).abs() < 1e-9);
        assert_eq!(
            result.drop_intervals,
            vec![
                DropInterval { start_bar: 8, end_bar: 16 },
                DropInterval { start_bar: 32, end_bar: 40 },
            ]
        );
        assert_eq!(result.drum_density.len(), 13);
        assert_eq!(result.drum_density[0], 31);
        assert_eq!(result.loudness_db, Some(-12.0));
    }

    #[test]
    fn test_time_offset_shifts_grid_only() {
        let pad = 861;
        let offset = (pad * STEP) as f64 / SAMPLE_RATE as f64;
        let base = analyze_features(&synthetic_features(0.0, 0)).unwrap();
        let shifted = analyze_features(&synthetic_features(offset, pad)).unwrap();

        assert_eq!(shifted.tempo, base.tempo);
        assert!((shifted.first_beat_time - base.first_beat_time - offset).abs() < 1e-6);
        assert_eq!(shifted.drop_intervals, base.drop_intervals);
        assert_eq!(shifted.drum_density.len(), base.drum_density.len());
    }

    #[test]
    fn test_failures_are_reported() {
        let mut features = synthetic_features(0.0, 0);
        features.beats.clear();
        assert!(matches!(analyze_features(&features), Err(AnalysisFailure::NoBeats)));

        let mut features = synthetic_features(0.0, 0);
        features.onsets.clear();
        assert!(matches!(analyze_features(&features), Err(AnalysisFailure::NoOnsets)));

        let mut features = synthetic_features(0.0, 0);
        features.first_sound = None;
        assert!(matches!(analyze_features(&features), Err(AnalysisFailure::NoSound)));

        let mut features = synthetic_features(0.0, 0);
        features.bass_energy.clear();
        assert!(matches!(analyze_features(&features), Err(AnalysisFailure::NoDrops)));
    }

    #[test]
    fn test_result_helpers() {
        let result = analyze_features(&synthetic_features(0.0, 0)).unwrap();
        assert!((result.time_at_bar(8.0) - 17.0).abs() < 1e-9);
        assert_eq!(result.first_drop(), Some(DropInterval { start_bar: 8, end_bar: 16 }));
        assert_eq!(result.drums_at_bar(5), Some(result.drum_density[1]));
        assert_eq!(result.drums_at_bar(4000), None);
    }

    #[test]
    fn test_result_serialization() {
        let result = analyze_features(&synthetic_features(0.0, 0)).unwrap();
        let yaml = serde_yaml::to_string(&result).unwrap();
        let restored: AnalysisResult = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored, result);
        assert!(!AnalysisResult::failed().success);
    }
}
