//! Mixer channel: one loaded track, its tempo stage, kill filter and volume

use std::path::{Path, PathBuf};

use super::action::ActionKind;
use super::error::{PlaybackError, Result};
use crate::audio_file::SourceLoader;
use crate::filter::Filter;
use crate::timestretch::TempoStretcher;
use crate::types::{PlayState, StereoBuffer, StereoSample};

/// Runtime state of one playback channel
///
/// Only changed through [`Channel::apply`], which the mixer calls in
/// timeline order.
pub struct Channel {
    index: usize,
    sample_rate: u32,
    stretcher: Option<TempoStretcher>,
    path: Option<PathBuf>,
    filter: Filter,
    volume: f32,
    tempo_ratio: f64,
    play_state: PlayState,
    elapsed_frames: u64,
    scratch: StereoBuffer,
}

impl Channel {
    pub fn new(index: usize, sample_rate: u32) -> Self {
        Self {
            index,
            sample_rate,
            stretcher: None,
            path: None,
            filter: Filter::low_pass(sample_rate, 0.0),
            volume: 0.0,
            tempo_ratio: 1.0,
            play_state: PlayState::Paused,
            elapsed_frames: 0,
            scratch: StereoBuffer::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.play_state == PlayState::Playing
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn filter_gain(&self) -> f32 {
        self.filter.gain_db()
    }

    pub fn tempo_ratio(&self) -> f64 {
        self.tempo_ratio
    }

    /// Path of the loaded track
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Seconds of output produced since the current track was loaded
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_frames as f64 / self.sample_rate as f64
    }

    /// Apply a control action
    pub fn apply(&mut self, kind: &ActionKind, loader: &dyn SourceLoader) -> Result<()> {
        match kind {
            ActionKind::Load(path) => {
                let source = loader.open(path)?;
                // The track's own SetTempoRatio follows its Load
                self.stretcher = Some(TempoStretcher::new(source, self.sample_rate, 1.0)?);
                self.tempo_ratio = 1.0;
                self.path = Some(path.clone());
                self.filter.reset();
                self.elapsed_frames = 0;
                log::info!("Channel {}: loaded {:?}", self.index, path);
            }
            ActionKind::Play => self.play_state = PlayState::Playing,
            ActionKind::Pause => self.play_state = PlayState::Paused,
            ActionKind::SetTempoRatio(ratio) => {
                if let Some(stretcher) = self.stretcher.as_mut() {
                    stretcher.set_tempo_ratio(*ratio)?;
                }
                self.tempo_ratio = *ratio;
            }
            ActionKind::SetVolume(volume) => self.volume = *volume,
            ActionKind::SetFilterGain(gain_db) => self.filter.set_gain_db(*gain_db),
        }
        log::debug!(
            "Channel {}: {} at {:.3}s",
            self.index,
            kind.name(),
            self.elapsed_time()
        );
        Ok(())
    }

    /// Pull `out.len()` processed frames and add them into `out`
    ///
    /// Returns the number of frames delivered. A short count means the
    /// track ran out; nothing is mixed in that case.
    pub fn mix_into(&mut self, out: &mut [StereoSample]) -> Result<usize> {
        let stretcher = self
            .stretcher
            .as_mut()
            .ok_or(PlaybackError::NotLoaded(self.index))?;

        let frames = out.len();
        if self.scratch.len() < frames {
            self.scratch.resize(frames);
        }
        let block = &mut self.scratch.as_mut_slice()[..frames];

        let read = stretcher.read(block)?;
        self.elapsed_frames += read as u64;
        if read < frames {
            return Ok(read);
        }

        self.filter.process(block);
        for (dst, src) in out.iter_mut().zip(block.iter()) {
            *dst += *src * self.volume;
        }
        Ok(frames)
    }
}
