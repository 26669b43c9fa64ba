//! Feature extraction: onsets, beats, bass energy and loudness
//!
//! A [`FeatureExtractor`] consumes a decoded track block by block and hands
//! back the feature streams the structural analysis works on. The
//! [`SpectralExtractor`] runs one STFT (1024-frame Hann window, 128-frame
//! hop) and derives two detection functions from it: one at the full hop
//! rate for beat tracking and one at a 512-frame hop for onset picking.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::audio_file::{Result, TrackSource};
use crate::filter::Filter;
use crate::types::StereoSample;

/// STFT window length in frames
pub const WINDOW_SIZE: usize = 1024;

/// Hop of the beat detection function
pub const BEAT_HOP: usize = 128;

/// Hop of the onset detection function
pub const ONSET_HOP: usize = 512;

/// Frames per bass energy value
pub const ENERGY_STEP: usize = 512;

/// Frames read from the source per block
const READ_BLOCK: usize = 4096;

/// Rise per bin counted by the broadband function, in dB
const BROADBAND_RISE_DB: f32 = 3.0;

/// Bin power below which the broadband function ignores a bin
const BROADBAND_FLOOR: f32 = 1e-10;

/// Magnitude compression for spectral flux
const FLUX_COMPRESSION: f32 = 1000.0;

/// Onset peak picking: half-width of the local mean window, in frames
const ONSET_MEAN_RADIUS: usize = 8;

/// Onset peak picking: fraction of the global maximum added to the threshold
const ONSET_DELTA: f32 = 0.05;

/// Tempo search range for beat tracking
const MIN_BPM: f64 = 40.0;
const MAX_BPM: f64 = 240.0;

/// Width of the tempo prior in octaves
const TEMPO_PRIOR_OCTAVES: f64 = 0.9;

/// Beat tracker penalty for deviating from the beat period
const TIGHTNESS: f32 = 400.0;

/// Detection function used for onsets and beats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnsetFunction {
    /// Positive log-magnitude difference between frames
    SpectralFlux,
    /// Frequency-weighted energy
    HighFrequencyContent,
    /// Number of bins rising by more than 3 dB
    #[default]
    Broadband,
}

/// Extractor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Expected tempo, biases the beat tracker towards this octave
    pub tempo_hint: f64,
    pub onset_function: OnsetFunction,
    /// Mono level a sample must exceed to count as sound
    pub noise_floor: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tempo_hint: 87.5,
            onset_function: OnsetFunction::default(),
            noise_floor: 0.03,
        }
    }
}

/// A detected onset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Onset {
    /// Seconds from the start of the track
    pub time: f64,
    /// Detection function value at the peak
    pub strength: f32,
}

/// Feature streams of one track
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub onsets: Vec<Onset>,
    /// Beat times in seconds, ascending
    pub beats: Vec<f64>,
    /// Bass band energy, one value per `energy_step` frames
    pub bass_energy: Vec<f32>,
    pub energy_step: usize,
    pub sample_rate: u32,
    /// First sample above the noise floor, in seconds
    pub first_sound: Option<f64>,
    /// Whole-track RMS level in dBFS
    pub loudness_db: Option<f32>,
}

/// Consumes a track block by block and produces its [`Features`]
pub trait FeatureExtractor {
    /// Feed the next block of frames
    fn process(&mut self, block: &[StereoSample]);

    /// End of stream: return the features and reset for the next track
    fn finish(&mut self) -> Features;
}

/// Run `extractor` over the whole of `source`
pub fn extract_features(
    source: &mut dyn TrackSource,
    extractor: &mut dyn FeatureExtractor,
) -> Result<Features> {
    let mut block = vec![StereoSample::silence(); READ_BLOCK];
    loop {
        let read = source.read(&mut block)?;
        if read > 0 {
            extractor.process(&block[..read]);
        }
        if read < READ_BLOCK {
            break;
        }
    }
    Ok(extractor.finish())
}

/// One detection function over successive magnitude spectra
struct DetectionFunction {
    kind: OnsetFunction,
    previous: Vec<f32>,
    values: Vec<f32>,
}

impl DetectionFunction {
    fn new(kind: OnsetFunction, bins: usize) -> Self {
        Self {
            kind,
            previous: vec![0.0; bins],
            values: Vec::new(),
        }
    }

    fn push(&mut self, magnitudes: &[f32]) {
        let value: f32 = match self.kind {
            OnsetFunction::SpectralFlux => magnitudes
                .iter()
                .zip(self.previous.iter())
                .map(|(&m, &p)| {
                    ((FLUX_COMPRESSION * m).ln_1p() - (FLUX_COMPRESSION * p).ln_1p()).max(0.0)
                })
                .sum(),
            OnsetFunction::HighFrequencyContent => magnitudes
                .iter()
                .enumerate()
                .map(|(k, &m)| k as f32 * m * m)
                .sum(),
            OnsetFunction::Broadband => {
                let rise = 10f32.powf(BROADBAND_RISE_DB / 10.0);
                magnitudes
                    .iter()
                    .zip(self.previous.iter())
                    .filter(|&(&m, &p)| p * p > BROADBAND_FLOOR && m * m > rise * p * p)
                    .count() as f32
            }
        };
        self.values.push(value);
        self.previous.copy_from_slice(magnitudes);
    }

    fn reset(&mut self) {
        self.previous.fill(0.0);
        self.values.clear();
    }
}

/// Reference extractor built on a realfft STFT
pub struct SpectralExtractor {
    config: ExtractorConfig,
    sample_rate: u32,
    plan: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    fft_input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    /// Mono samples not yet consumed by a full STFT frame
    pending: Vec<f32>,
    stft_frames: usize,
    beat_df: DetectionFunction,
    onset_df: DetectionFunction,
    bass_filter: Filter,
    bass_block: Vec<StereoSample>,
    bass_energy: Vec<f32>,
    frames_seen: u64,
    first_sound: Option<u64>,
    sum_squares: f64,
}

impl SpectralExtractor {
    pub fn new(sample_rate: u32, config: ExtractorConfig) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(WINDOW_SIZE);
        let fft_input = plan.make_input_vec();
        let spectrum = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();
        let bins = spectrum.len();

        let window = (0..WINDOW_SIZE)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (WINDOW_SIZE as f32 - 1.0)).cos())
            })
            .collect();

        Self {
            beat_df: DetectionFunction::new(config.onset_function, bins),
            onset_df: DetectionFunction::new(config.onset_function, bins),
            config,
            sample_rate,
            plan,
            window,
            fft_input,
            spectrum,
            scratch,
            magnitudes: vec![0.0; bins],
            pending: Vec::with_capacity(WINDOW_SIZE + READ_BLOCK),
            stft_frames: 0,
            bass_filter: Filter::band_pass_fixed(sample_rate),
            bass_block: Vec::with_capacity(ENERGY_STEP),
            bass_energy: Vec::new(),
            frames_seen: 0,
            first_sound: None,
            sum_squares: 0.0,
        }
    }

    fn process_stft_frames(&mut self) {
        while self.pending.len() >= WINDOW_SIZE {
            for ((dst, &src), &w) in self
                .fft_input
                .iter_mut()
                .zip(self.pending.iter())
                .zip(self.window.iter())
            {
                *dst = src * w;
            }
            let transformed =
                self.plan
                    .process_with_scratch(&mut self.fft_input, &mut self.spectrum, &mut self.scratch);
            if transformed.is_err() {
                self.magnitudes.fill(0.0);
            } else {
                for (m, c) in self.magnitudes.iter_mut().zip(self.spectrum.iter()) {
                    *m = c.norm() / WINDOW_SIZE as f32;
                }
            }

            self.beat_df.push(&self.magnitudes);
            if self.stft_frames % (ONSET_HOP / BEAT_HOP) == 0 {
                self.onset_df.push(&self.magnitudes);
            }
            self.stft_frames += 1;
            self.pending.drain(..BEAT_HOP);
        }
    }

    fn flush_bass_block(&mut self) {
        if self.bass_block.is_empty() {
            return;
        }
        self.bass_filter.process(&mut self.bass_block);
        let energy = self.bass_block.iter().map(|s| s.to_mono().abs()).sum();
        self.bass_energy.push(energy);
        self.bass_block.clear();
    }

    /// Centre of STFT frame `index` at `hop`, in seconds
    fn frame_time(&self, index: usize, hop: usize) -> f64 {
        (index * hop + WINDOW_SIZE / 2) as f64 / self.sample_rate as f64
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.stft_frames = 0;
        self.beat_df.reset();
        self.onset_df.reset();
        self.bass_filter.reset();
        self.bass_block.clear();
        self.bass_energy.clear();
        self.frames_seen = 0;
        self.first_sound = None;
        self.sum_squares = 0.0;
    }
}

impl FeatureExtractor for SpectralExtractor {
    fn process(&mut self, block: &[StereoSample]) {
        for sample in block {
            let mono = sample.to_mono();
            if self.first_sound.is_none() && mono.abs() > self.config.noise_floor {
                self.first_sound = Some(self.frames_seen);
            }
            self.sum_squares += (mono as f64).powi(2);
            self.frames_seen += 1;
            self.pending.push(mono);

            self.bass_block.push(*sample);
            if self.bass_block.len() == ENERGY_STEP {
                self.flush_bass_block();
            }
        }
        self.process_stft_frames();
    }

    fn finish(&mut self) -> Features {
        self.flush_bass_block();
        let rate = self.sample_rate as f64;

        let onsets = pick_onsets(&self.onset_df.values)
            .into_iter()
            .map(|i| Onset {
                time: self.frame_time(i, ONSET_HOP),
                strength: self.onset_df.values[i],
            })
            .collect();

        let frame_rate = rate / BEAT_HOP as f64;
        let beats = track_beats(&self.beat_df.values, frame_rate, self.config.tempo_hint)
            .into_iter()
            .map(|i| self.frame_time(i, BEAT_HOP))
            .collect();

        let loudness_db = if self.frames_seen > 0 {
            let mean_square = self.sum_squares / self.frames_seen as f64;
            (mean_square > 1e-12).then(|| (10.0 * mean_square.log10()) as f32)
        } else {
            None
        };

        let features = Features {
            onsets,
            beats,
            bass_energy: std::mem::take(&mut self.bass_energy),
            energy_step: ENERGY_STEP,
            sample_rate: self.sample_rate,
            first_sound: self.first_sound.map(|frame| frame as f64 / rate),
            loudness_db,
        };
        log::debug!(
            "SpectralExtractor::finish: {:.1}s, {} onsets, {} beats, first sound {:?}",
            self.frames_seen as f64 / rate,
            features.onsets.len(),
            features.beats.len(),
            features.first_sound
        );
        self.reset();
        features
    }
}

/// Indices of local maxima above an adaptive threshold
fn pick_onsets(values: &[f32]) -> Vec<usize> {
    let Some(max) = values.iter().copied().reduce(f32::max) else {
        return Vec::new();
    };
    if max <= 0.0 {
        return Vec::new();
    }
    let delta = ONSET_DELTA * max;

    let mut peaks = Vec::new();
    for i in 1..values.len().saturating_sub(1) {
        let v = values[i];
        if v <= values[i - 1] || v < values[i + 1] {
            continue;
        }
        let lo = i.saturating_sub(ONSET_MEAN_RADIUS);
        let hi = (i + ONSET_MEAN_RADIUS + 1).min(values.len());
        let local_mean = values[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
        if v > local_mean + delta {
            peaks.push(i);
        }
    }
    peaks
}

/// Half-wave rectified, locally detrended, unit-variance envelope
fn beat_envelope(values: &[f32]) -> Vec<f32> {
    const RADIUS: usize = 16;
    let mut envelope: Vec<f32> = (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(RADIUS);
            let hi = (i + RADIUS + 1).min(values.len());
            let mean = values[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
            (values[i] - mean).max(0.0)
        })
        .collect();

    let n = envelope.len().max(1) as f32;
    let mean = envelope.iter().sum::<f32>() / n;
    let sd = (envelope.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt();
    if sd > 0.0 {
        envelope.iter_mut().for_each(|v| *v /= sd);
    }
    envelope
}

/// Beat period in frames: autocorrelation peak weighted by a log-Gaussian
/// prior around the hint, refined by parabolic interpolation
fn estimate_period(envelope: &[f32], frame_rate: f64, tempo_hint: f64) -> Option<f64> {
    let min_lag = (60.0 * frame_rate / MAX_BPM).floor().max(1.0) as usize;
    let max_lag = (60.0 * frame_rate / MIN_BPM).ceil() as usize;
    if envelope.len() <= max_lag + 1 {
        return None;
    }
    let hint_lag = 60.0 * frame_rate / tempo_hint.clamp(MIN_BPM, MAX_BPM);

    let autocorrelation = |lag: usize| -> f64 {
        let n = envelope.len() - lag;
        envelope[..n]
            .iter()
            .zip(envelope[lag..].iter())
            .map(|(&a, &b)| a as f64 * b as f64)
            .sum::<f64>()
            / n as f64
    };
    let scores: Vec<f64> = (min_lag..=max_lag)
        .map(|lag| {
            let octaves = (lag as f64 / hint_lag).log2() / TEMPO_PRIOR_OCTAVES;
            autocorrelation(lag) * (-0.5 * octaves * octaves).exp()
        })
        .collect();

    let (best, &peak) = scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))?;
    if peak <= 0.0 {
        return None;
    }

    let mut period = (min_lag + best) as f64;
    if best > 0 && best + 1 < scores.len() {
        let (a, b, c) = (scores[best - 1], scores[best], scores[best + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() > f64::EPSILON {
            period += (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
        }
    }
    Some(period)
}

/// Dynamic-programming beat tracker over a detection function
///
/// Returns the frame index of every beat.
fn track_beats(values: &[f32], frame_rate: f64, tempo_hint: f64) -> Vec<usize> {
    let envelope = beat_envelope(values);
    let Some(period) = estimate_period(&envelope, frame_rate, tempo_hint) else {
        return Vec::new();
    };
    log::debug!(
        "track_beats: period {:.2} frames ({:.2} BPM)",
        period,
        60.0 * frame_rate / period
    );

    let p = period as f32;
    let min_back = (period / 2.0).round().max(1.0) as usize;
    let max_back = (period * 2.0).round() as usize;

    let mut score = vec![0f32; envelope.len()];
    let mut backlink: Vec<Option<usize>> = vec![None; envelope.len()];
    for t in 0..envelope.len() {
        let mut best: Option<(usize, f32)> = None;
        if t >= min_back {
            let lo = t.saturating_sub(max_back);
            for tau in lo..=t - min_back {
                let deviation = ((t - tau) as f32 / p).ln();
                let candidate = score[tau] - TIGHTNESS * deviation * deviation;
                if best.map_or(true, |(_, s)| candidate > s) {
                    best = Some((tau, candidate));
                }
            }
        }
        match best {
            Some((tau, s)) if s > 0.0 => {
                score[t] = envelope[t] + s;
                backlink[t] = Some(tau);
            }
            _ => score[t] = envelope[t],
        }
    }

    let tail = envelope.len().saturating_sub(period.round() as usize);
    let Some(mut t) = (tail..envelope.len()).max_by(|&a, &b| score[a].total_cmp(&score[b])) else {
        return Vec::new();
    };
    let mut beats = vec![t];
    while let Some(previous) = backlink[t] {
        beats.push(previous);
        t = previous;
    }
    beats.reverse();
    beats
}
