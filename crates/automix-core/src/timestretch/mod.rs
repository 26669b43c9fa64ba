//! Tempo matching by resampling via rubato
//!
//! Wraps a rubato sinc resampler to play a track at the mix tempo. The track
//! is pulled in fixed blocks from its [`TrackSource`], resampled by
//! `tempo_ratio * output_rate / source_rate` and buffered in a [`RingBuffer`]
//! so reads of any size can be served. Pitch follows tempo, like a turntable.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio_file::TrackSource;
use crate::engine::{PlaybackError, Result};
use crate::ring_buffer::RingBuffer;
use crate::types::{StereoBuffer, StereoSample};

/// Frames pulled from the source per resampler call
pub const READ_BLOCK_FRAMES: usize = 1024;

/// Ring buffer size in frames
pub const RING_CAPACITY_FRAMES: usize = 16384;

/// Largest ratio change the resampler absorbs without being rebuilt
const MAX_RELATIVE_RATIO: f64 = 2.0;

/// Accepted range for the effective resampling ratio
const MIN_RATIO: f64 = 0.25;
const MAX_RATIO: f64 = 4.0;

/// Number of channels (stereo)
const CHANNELS: usize = 2;

/// Resampling stage between a track source and a mixer channel
///
/// A ratio of exactly 1.0 bypasses the resampler so unity playback is
/// bit-exact.
pub struct TempoStretcher {
    source: Box<dyn TrackSource>,
    resampler: Option<SincFixedIn<f32>>,
    ring: RingBuffer<StereoSample>,
    /// Source tempo / target tempo
    tempo_ratio: f64,
    /// Output sample rate / source sample rate
    rate_ratio: f64,
    input_block: StereoBuffer,
    wave_in: Vec<Vec<f32>>,
    resampled: Vec<StereoSample>,
    /// Resampler latency still to be discarded
    skip_frames: usize,
    source_done: bool,
}

impl TempoStretcher {
    /// Create a stretcher for `source`, rendering at `output_rate`
    pub fn new(source: Box<dyn TrackSource>, output_rate: u32, tempo_ratio: f64) -> Result<Self> {
        let rate_ratio = output_rate as f64 / source.sample_rate().max(1) as f64;
        let mut stretcher = Self {
            source,
            resampler: None,
            ring: RingBuffer::new(RING_CAPACITY_FRAMES),
            tempo_ratio: 1.0,
            rate_ratio,
            input_block: StereoBuffer::silence(READ_BLOCK_FRAMES),
            wave_in: vec![Vec::with_capacity(READ_BLOCK_FRAMES); CHANNELS],
            resampled: Vec::with_capacity(READ_BLOCK_FRAMES * 4),
            skip_frames: 0,
            source_done: false,
        };
        stretcher.set_tempo_ratio(tempo_ratio)?;
        Ok(stretcher)
    }

    /// Calculate the tempo ratio from BPMs
    pub fn ratio_from_bpm(track_bpm: f64, target_bpm: f64) -> f64 {
        if target_bpm > 0.0 {
            track_bpm / target_bpm
        } else {
            1.0
        }
    }

    pub fn tempo_ratio(&self) -> f64 {
        self.tempo_ratio
    }

    /// Ratio of output frames to source frames
    pub fn effective_ratio(&self) -> f64 {
        self.tempo_ratio * self.rate_ratio
    }

    /// Change the tempo ratio (source tempo / target tempo)
    ///
    /// Takes effect for source frames not yet resampled; frames already
    /// buffered keep the previous ratio.
    pub fn set_tempo_ratio(&mut self, tempo_ratio: f64) -> Result<()> {
        let effective = tempo_ratio * self.rate_ratio;
        if !effective.is_finite() || !(MIN_RATIO..=MAX_RATIO).contains(&effective) {
            return Err(PlaybackError::InvalidTempoRatio(tempo_ratio));
        }
        self.tempo_ratio = tempo_ratio;

        if effective == 1.0 {
            self.resampler = None;
            self.skip_frames = 0;
            return Ok(());
        }

        if let Some(resampler) = self.resampler.as_mut() {
            if resampler.set_resample_ratio(effective, false).is_ok() {
                return Ok(());
            }
        }

        let params = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let resampler =
            SincFixedIn::<f32>::new(effective, MAX_RELATIVE_RATIO, params, READ_BLOCK_FRAMES, CHANNELS)
                .map_err(|e| PlaybackError::Resampler(e.to_string()))?;
        self.skip_frames = resampler.output_delay();
        self.resampler = Some(resampler);
        log::debug!("TempoStretcher: resampler built for ratio {:.4}", effective);
        Ok(())
    }

    /// Read up to `out.len()` frames. Fewer are returned only once the
    /// source is exhausted and the buffer has drained.
    pub fn read(&mut self, out: &mut [StereoSample]) -> Result<usize> {
        let mut done = 0;
        while done < out.len() {
            self.fill()?;
            let take = (out.len() - done).min(self.ring.available());
            if take == 0 {
                // fill() only stops on an empty ring once the source is done
                break;
            }
            self.ring.read(&mut out[done..done + take]);
            done += take;
        }
        Ok(done)
    }

    /// Top up the ring buffer while a whole resampled block fits
    fn fill(&mut self) -> Result<()> {
        while !self.source_done && self.ring.free() >= self.max_block_output() {
            let frames = self.source.read(self.input_block.as_mut_slice())?;
            if frames < READ_BLOCK_FRAMES {
                self.source_done = true;
            }
            if frames > 0 {
                self.process_block(frames)?;
            }
        }
        Ok(())
    }

    fn max_block_output(&self) -> usize {
        match &self.resampler {
            Some(resampler) => resampler.output_frames_max(),
            None => READ_BLOCK_FRAMES,
        }
    }

    fn process_block(&mut self, frames: usize) -> Result<()> {
        if self.resampler.is_none() {
            return self.push(frames, true);
        }

        let input = &self.input_block.as_slice()[..frames];
        for (ch, wave) in self.wave_in.iter_mut().enumerate() {
            wave.clear();
            wave.extend(input.iter().map(|s| if ch == 0 { s.left } else { s.right }));
        }

        let processed = match self.resampler.as_mut() {
            Some(resampler) if frames == READ_BLOCK_FRAMES => {
                resampler.process(self.wave_in.as_slice(), None)
            }
            Some(resampler) => resampler.process_partial(Some(self.wave_in.as_slice()), None),
            None => return Ok(()),
        };
        let waves_out = processed.map_err(|e| PlaybackError::Resampler(e.to_string()))?;

        self.resampled.clear();
        if let [left, right] = waves_out.as_slice() {
            self.resampled
                .extend(left.iter().zip(right.iter()).map(|(&l, &r)| StereoSample::new(l, r)));
        }
        let produced = self.resampled.len();
        self.push(produced, false)
    }

    /// Write `frames` frames of the input block (bypass) or of the
    /// resampled scratch into the ring, dropping pending latency first
    fn push(&mut self, frames: usize, bypass: bool) -> Result<()> {
        let skip = self.skip_frames.min(frames);
        self.skip_frames -= skip;

        let block = if bypass {
            &self.input_block.as_slice()[skip..frames]
        } else {
            &self.resampled[skip..frames]
        };
        if block.is_empty() {
            return Ok(());
        }
        if self.ring.write(block) == 0 {
            return Err(PlaybackError::BufferOverflow {
                needed: block.len(),
                free: self.ring.free(),
            });
        }
        Ok(())
    }
}
