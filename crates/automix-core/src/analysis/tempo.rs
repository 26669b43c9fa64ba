//! Tempo estimation and local beat-phase refinement
//!
//! The beat tracker output is noisy: beats get doubled, dropped or smeared
//! around breaks. Tempo comes from a trimmed mean of the beat gaps, and the
//! grid phase from the first long run of consistent beats (the anchor).

use super::error::AnalysisFailure;

/// Consecutive consistent beats required for an anchor run
pub const ANCHOR_MIN_BEATS: usize = 40;

/// Template shift per hill-climb step, in seconds
pub const PHASE_STEP: f64 = 0.001;

/// Upper bound on hill-climb steps (half a second either way)
const MAX_PHASE_STEPS: usize = 500;

/// Lower bound on the anchor gap tolerance; a perfectly regular beat track
/// would otherwise have zero deviation and reject every beat
const MIN_GAP_TOLERANCE: f64 = 0.002;

/// Tempo derived from the beat gaps
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoEstimate {
    /// BPM rounded to the nearest quarter
    pub bpm: f64,
    /// Mean gap over the gaps within one deviation of the raw mean
    pub trimmed_gap: f64,
    /// Population standard deviation of all gaps
    pub std_dev: f64,
}

/// Population mean and standard deviation
pub fn mean_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Round a BPM to the nearest 0.25
#[inline]
pub fn round_bpm(bpm: f64) -> f64 {
    (bpm * 4.0).round() / 4.0
}

/// Estimate the tempo from beats after `first_onset`
pub fn estimate_tempo(beats: &[f64], first_onset: f64) -> Result<TempoEstimate, AnalysisFailure> {
    let gaps: Vec<f64> = beats
        .windows(2)
        .filter(|pair| pair[0] > first_onset)
        .map(|pair| pair[1] - pair[0])
        .collect();
    if gaps.is_empty() {
        return Err(AnalysisFailure::NoBeats);
    }

    let (mean, std_dev) = mean_std_dev(&gaps);
    let trimmed: Vec<f64> = gaps
        .iter()
        .copied()
        .filter(|gap| (gap - mean).abs() < std_dev)
        .collect();
    let trimmed_gap = if trimmed.is_empty() {
        mean
    } else {
        trimmed.iter().sum::<f64>() / trimmed.len() as f64
    };
    if trimmed_gap <= 0.0 {
        return Err(AnalysisFailure::NoBeats);
    }

    let bpm = round_bpm(60.0 / trimmed_gap);
    log::debug!(
        "estimate_tempo: {} gaps, mean {:.4}s, sd {:.4}s, trimmed {:.4}s -> {:.2} BPM",
        gaps.len(),
        mean,
        std_dev,
        trimmed_gap,
        bpm
    );
    Ok(TempoEstimate { bpm, trimmed_gap, std_dev })
}

/// Find the first run of more than [`ANCHOR_MIN_BEATS`] consistent beats
///
/// A beat is consistent when the gaps on both sides lie within two standard
/// deviations of the trimmed mean gap. Returns the run as a slice of `beats`.
pub fn find_anchor_segment<'a>(
    beats: &'a [f64],
    first_onset: f64,
    estimate: &TempoEstimate,
) -> Result<&'a [f64], AnalysisFailure> {
    let tolerance = (2.0 * estimate.std_dev).max(MIN_GAP_TOLERANCE);
    let consistent = |gap: f64| (gap - estimate.trimmed_gap).abs() < tolerance;

    let mut run = 0usize;
    let mut longest = 0usize;
    for i in 1..beats.len().saturating_sub(1) {
        if beats[i] <= first_onset {
            continue;
        }
        let back = beats[i] - beats[i - 1];
        let forward = beats[i + 1] - beats[i];
        if consistent(back) && consistent(forward) {
            run += 1;
            longest = longest.max(run);
            continue;
        }
        if run > ANCHOR_MIN_BEATS {
            log::debug!("find_anchor_segment: {} beats ending at {:.3}s", run, beats[i - 1]);
            return Ok(&beats[i - run..i]);
        }
        run = 0;
    }

    if run > ANCHOR_MIN_BEATS {
        let end = beats.len() - 1;
        log::debug!("find_anchor_segment: {} beats running to the last beat", run);
        return Ok(&beats[end - run..end]);
    }
    Err(AnalysisFailure::NoAnchorSegment {
        longest,
        required: ANCHOR_MIN_BEATS + 1,
    })
}

/// Total absolute deviation between `template` shifted by `offset` and `actual`
fn distance_at(template: &[f64], actual: &[f64], offset: f64) -> f64 {
    template
        .iter()
        .zip(actual.iter())
        .map(|(t, a)| (t + offset - a).abs())
        .sum()
}

/// Total absolute deviation between two beat sequences
pub fn grid_distance(template: &[f64], actual: &[f64]) -> f64 {
    distance_at(template, actual, 0.0)
}

/// Shift `template` in fixed [`PHASE_STEP`]s towards `actual`
///
/// Hill climb: pick the direction whose first step lowers the distance, keep
/// stepping while the distance strictly decreases, stop before the first step
/// that does not. Only finds the local minimum next to the starting phase.
/// Returns the final distance, which is never above the starting distance.
pub fn minimise_distance(template: &mut [f64], actual: &[f64]) -> f64 {
    let initial = distance_at(template, actual, 0.0);
    let forward = distance_at(template, actual, PHASE_STEP);
    let backward = distance_at(template, actual, -PHASE_STEP);
    if initial <= forward && initial <= backward {
        return initial;
    }

    let step = if forward <= backward { PHASE_STEP } else { -PHASE_STEP };
    let mut offset = 0.0;
    let mut current = initial;
    for _ in 0..MAX_PHASE_STEPS {
        let next = distance_at(template, actual, offset + step);
        if next >= current {
            break;
        }
        offset += step;
        current = next;
    }

    for beat in template.iter_mut() {
        *beat += offset;
    }
    log::debug!(
        "minimise_distance: shifted {:+.3}s, distance {:.4} -> {:.4}",
        offset,
        initial,
        current
    );
    current
}

/// Fit an ideal grid at `bpm` to the anchor run, returning its first beat
pub fn refine_phase(anchor: &[f64], bpm: f64) -> f64 {
    let interval = 60.0 / bpm;
    let start = anchor.first().copied().unwrap_or(0.0);
    let mut template: Vec<f64> = (0..anchor.len())
        .map(|i| start + i as f64 * interval)
        .collect();
    minimise_distance(&mut template, anchor);
    template.first().copied().unwrap_or(start)
}
