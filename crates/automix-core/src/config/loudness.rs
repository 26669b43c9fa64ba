//! Volume normalisation settings
//!
//! Tracks are measured as whole-track RMS in dBFS during analysis. The
//! planner turns that level into a linear gain that brings the track to the
//! target level, within the configured clamps.

use serde::{Deserialize, Serialize};

/// Loudness normalisation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessConfig {
    /// Target RMS level in dBFS
    pub target_db: f32,

    /// When disabled every track plays at unity gain
    pub auto_gain_enabled: bool,

    /// Largest boost for quiet tracks
    pub max_gain_db: f32,

    /// Largest cut for loud tracks (negative)
    pub min_gain_db: f32,
}

impl Default for LoudnessConfig {
    fn default() -> Self {
        Self {
            target_db: -14.0,
            auto_gain_enabled: true,
            max_gain_db: 6.0,
            min_gain_db: -12.0,
        }
    }
}

impl LoudnessConfig {
    /// Gain in dB for a track measured at `track_db`
    ///
    /// `None` when the level is unknown or auto gain is off.
    pub fn calculate_gain_db(&self, track_db: Option<f32>) -> Option<f32> {
        if !self.auto_gain_enabled {
            return None;
        }
        track_db.map(|level| (self.target_db - level).clamp(self.min_gain_db, self.max_gain_db))
    }

    /// Linear gain multiplier, 1.0 when no gain applies
    pub fn calculate_gain_linear(&self, track_db: Option<f32>) -> f32 {
        self.calculate_gain_db(track_db)
            .map(|db| 10.0_f32.powf(db / 20.0))
            .unwrap_or(1.0)
    }
}
