//! Section energy, drop detection and drum density
//!
//! A section is 16 beats (4 bars) of the aligned grid. Drops are the runs of
//! sections whose bass energy sits in the top 40% of the track's range.

use serde::{Deserialize, Serialize};

use super::Onset;
use crate::types::{BARS_PER_SECTION, BEATS_PER_SECTION};

/// Sections within this fraction of the energy range below the maximum are drops
pub const DROP_RANGE_FRACTION: f64 = 0.4;

/// A drop as a half-open bar range `[start_bar, end_bar)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInterval {
    pub start_bar: u32,
    pub end_bar: u32,
}

impl DropInterval {
    pub fn len_bars(&self) -> u32 {
        self.end_bar.saturating_sub(self.start_bar)
    }
}

/// Seconds per 16-beat section
#[inline]
pub fn section_duration(bpm: f64) -> f64 {
    BEATS_PER_SECTION as f64 * 60.0 / bpm
}

/// Sum the bass energy series into one value per complete section
///
/// `bass_energy[i]` covers frames `[i * step_frames, (i + 1) * step_frames)`.
/// Steps starting at or before the first beat are skipped and a trailing
/// incomplete section is dropped.
pub fn section_energies(
    bass_energy: &[f32],
    step_frames: usize,
    sample_rate: u32,
    first_beat: f64,
    bpm: f64,
) -> Vec<f64> {
    let rate = sample_rate as f64;
    let section_frames = section_duration(bpm) * rate;
    let start = first_beat * rate;
    let mut boundary = start + section_frames;

    let mut sections = Vec::new();
    let mut accumulated = 0.0;
    for (i, &energy) in bass_energy.iter().enumerate() {
        let position = (i * step_frames) as f64;
        if position <= start {
            continue;
        }
        if position < boundary {
            accumulated += energy as f64;
        } else {
            sections.push(accumulated);
            accumulated = energy as f64;
            boundary += section_frames;
        }
    }
    sections
}

/// Merge high-energy sections into drop intervals
pub fn detect_drops(energies: &[f64]) -> Vec<DropInterval> {
    let Some(max) = energies.iter().copied().reduce(f64::max) else {
        return Vec::new();
    };
    let min = energies.iter().copied().fold(f64::INFINITY, f64::min);
    let range = max - min;

    let mut drops = Vec::new();
    let mut open: Option<u32> = None;
    let mut bar = 0u32;
    for &energy in energies {
        // With a flat profile every section is at the maximum
        let in_drop = range == 0.0 || (max - energy) < DROP_RANGE_FRACTION * range;
        match (in_drop, open) {
            (true, None) => open = Some(bar),
            (false, Some(start_bar)) => {
                drops.push(DropInterval { start_bar, end_bar: bar });
                open = None;
            }
            _ => {}
        }
        bar += BARS_PER_SECTION;
    }
    if let Some(start_bar) = open {
        drops.push(DropInterval { start_bar, end_bar: bar });
    }
    log::debug!(
        "detect_drops: {} sections, range {:.2}, drops {:?}",
        energies.len(),
        range,
        drops
    );
    drops
}

/// Onsets per section from the first beat to the last onset
///
/// An onset exactly on a section boundary belongs to neither neighbour.
pub fn drum_density(onsets: &[Onset], first_beat: f64, bpm: f64) -> Vec<u32> {
    let Some(last) = onsets.last().map(|o| o.time) else {
        return Vec::new();
    };
    let section = section_duration(bpm);
    let mut density = Vec::new();
    let mut index = 0u32;
    loop {
        let start = first_beat + index as f64 * section;
        if start >= last {
            break;
        }
        let end = start + section;
        let count = onsets
            .iter()
            .filter(|o| o.time > start && o.time < end)
            .count();
        density.push(count as u32);
        index += 1;
    }
    density
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_duration() {
        assert!((section_duration(120.0) - 8.0).abs() < 1e-12);
        assert!((section_duration(175.0) - 16.0 * 60.0 / 175.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_energy_is_one_drop() {
        let drops = detect_drops(&[3.0; 12]);
        assert_eq!(drops, vec![DropInterval { start_bar: 0, end_bar: 48 }]);
    }

    #[test]
    fn test_alternating_energy() {
        let energies = [10.0, 1.0, 10.0, 1.0, 9.0, 1.0];
        let drops = detect_drops(&energies);
        assert_eq!(
            drops,
            vec![
                DropInterval { start_bar: 0, end_bar: 4 },
                DropInterval { start_bar: 8, end_bar: 12 },
                DropInterval { start_bar: 16, end_bar: 20 },
            ]
        );
    }

    #[test]
    fn test_threshold_at_forty_percent() {
        // Range 10: sections above 4.0 below the max (energy > 6.0) are in
        let drops = detect_drops(&[0.0, 6.5, 5.5, 10.0, 10.0]);
        assert_eq!(
            drops,
            vec![
                DropInterval { start_bar: 4, end_bar: 8 },
                DropInterval { start_bar: 12, end_bar: 20 },
            ]
        );
        assert_eq!(drops[1].len_bars(), 8);
    }

    #[test]
    fn test_no_sections_no_drops() {
        assert!(detect_drops(&[]).is_empty());
    }

    #[test]
    fn test_section_energies_skip_intro_and_partial_tail() {
        // 120 BPM: 8 s per section = 352800 frames = 689.06 steps of 512
        let step = 512;
        let steps_per_section = 8.0 * 44100.0 / step as f64;
        let total = (steps_per_section * 3.5) as usize + 200;
        let bass = vec![1.0f32; total];
        let first_beat = 200.0 * step as f64 / 44100.0;

        let sections = section_energies(&bass, step, 44100, first_beat, 120.0);
        assert_eq!(sections.len(), 3);
        for energy in sections {
            assert!((energy - steps_per_section).abs() <= 1.0);
        }
    }

    #[test]
    fn test_drum_density_counts_per_section() {
        // 120 BPM, 8 s sections: 16 onsets in the first, 3 in the second
        let mut onsets: Vec<Onset> = (0..16)
            .map(|i| Onset { time: 1.1 + i as f64 * 0.5, strength: 1.0 })
            .collect();
        onsets.extend([9.5, 12.0, 16.5].map(|time| Onset { time, strength: 1.0 }));

        assert_eq!(drum_density(&onsets, 1.0, 120.0), vec![16, 3]);
        assert!(drum_density(&[], 1.0, 120.0).is_empty());
    }
}
