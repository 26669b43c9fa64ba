//! Beat grid alignment
//!
//! The anchor run fixes the grid phase somewhere in the middle of the track.
//! This walks the origin back to the start of the audio and snaps it to the
//! eighth-beat bucket where the kicks cluster.

use super::error::AnalysisFailure;
use super::features::WINDOW_SIZE;
use super::tempo::mean_std_dev;
use super::Onset;

/// Phase buckets per beat interval
pub const PHASE_RESOLUTION: usize = 8;

/// How far the first onset may precede the first sound: one analysis window
pub fn onset_lead(sample_rate: u32) -> f64 {
    WINDOW_SIZE as f64 / sample_rate.max(1) as f64
}

/// Onsets stronger than mean + this many deviations count as kicks
const KICK_THRESHOLD_SD: f64 = 0.5;

/// Histogram of kick phases relative to `origin`
fn kick_histogram(onsets: &[Onset], origin: f64, interval: f64) -> [u32; PHASE_RESOLUTION] {
    let strengths: Vec<f64> = onsets.iter().map(|o| o.strength as f64).collect();
    let (mean, sd) = mean_std_dev(&strengths);
    let threshold = mean + KICK_THRESHOLD_SD * sd;

    let mut histogram = [0u32; PHASE_RESOLUTION];
    for kick in onsets
        .iter()
        .filter(|o| o.strength as f64 > threshold && o.time > origin)
    {
        let phase = (kick.time - origin) % interval;
        let bucket = (phase / interval * PHASE_RESOLUTION as f64).round() as usize % PHASE_RESOLUTION;
        histogram[bucket] += 1;
    }
    histogram
}

/// Align a beat grid to the start of the track
///
/// # Arguments
/// * `origin` - Any beat of the refined grid, in seconds
/// * `bpm` - Grid tempo
/// * `onsets` - Onsets in time order, at least one
/// * `first_sound` - Time of the first sample above the noise floor
/// * `sample_rate` - Rate the onsets were detected at
///
/// # Returns
/// The grid origin moved to the first beat of the track
pub fn align_grid(
    origin: f64,
    bpm: f64,
    onsets: &[Onset],
    first_sound: f64,
    sample_rate: u32,
) -> Result<f64, AnalysisFailure> {
    let first_onset = onsets.first().ok_or(AnalysisFailure::NoOnsets)?.time;
    let interval = 60.0 / bpm;

    let mut init = origin;
    while init > first_sound + interval {
        init -= interval;
    }

    let silence = first_onset - first_sound;
    if silence < -onset_lead(sample_rate) {
        return Err(AnalysisFailure::OnsetBeforeSound {
            onset: first_onset,
            first_sound,
        });
    }

    let histogram = kick_histogram(onsets, init, interval);

    // A long silent gap means the first onset is unreliable; trust the sound
    let guide = if silence > interval { first_sound } else { first_onset };
    let offset = (guide - init) % interval;
    let shift = (offset / interval * PHASE_RESOLUTION as f64).round() as i64;
    let bucket = shift.rem_euclid(PHASE_RESOLUTION as i64) as usize;

    let mean = histogram.iter().sum::<u32>() as f64 / PHASE_RESOLUTION as f64;
    log::debug!(
        "align_grid: histogram {:?}, guide {:.3}s, bucket {} (shift {})",
        histogram,
        guide,
        bucket,
        shift
    );
    if histogram[bucket] as f64 <= mean {
        return Err(AnalysisFailure::GridValidation {
            bucket,
            count: histogram[bucket],
            mean,
        });
    }

    Ok(init + interval / PHASE_RESOLUTION as f64 * shift as f64)
}
