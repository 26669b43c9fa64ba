//! Track sources
//!
//! The render chain and the analyzer pull decoded audio through the
//! [`TrackSource`] trait. [`TrackDecoder`] streams from disk with Symphonia;
//! [`MemorySource`] serves a pre-decoded buffer. A [`SourceLoader`] turns the
//! path carried by a Load action into a source.

mod decoder;
mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use decoder::TrackDecoder;
pub use error::{AudioFileError, Result};

use crate::types::StereoSample;

/// A pull-based stream of decoded stereo frames
pub trait TrackSource: Send {
    /// Native sample rate of the frames returned by `read`
    fn sample_rate(&self) -> u32;

    /// Fill `out` with the next frames. Returns the number written, which is
    /// only smaller than `out.len()` at end of stream.
    fn read(&mut self, out: &mut [StereoSample]) -> Result<usize>;
}

/// Opens a track source for a path named by a Load action
pub trait SourceLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>>;
}

/// Loads tracks from disk
#[derive(Debug, Default, Clone, Copy)]
pub struct FileLoader;

impl SourceLoader for FileLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>> {
        Ok(Box::new(TrackDecoder::open(path)?))
    }
}

/// A fully decoded track held in memory
pub struct MemorySource {
    samples: Arc<[StereoSample]>,
    sample_rate: u32,
    position: usize,
}

impl MemorySource {
    pub fn new(samples: impl Into<Arc<[StereoSample]>>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
            position: 0,
        }
    }
}

impl TrackSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, out: &mut [StereoSample]) -> Result<usize> {
        let count = out.len().min(self.samples.len() - self.position);
        out[..count].copy_from_slice(&self.samples[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

/// Serves registered in-memory tracks by path
#[derive(Default)]
pub struct MemoryLoader {
    tracks: HashMap<PathBuf, (Arc<[StereoSample]>, u32)>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, samples: Vec<StereoSample>, sample_rate: u32) {
        self.tracks.insert(path.into(), (samples.into(), sample_rate));
    }
}

impl SourceLoader for MemoryLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>> {
        let (samples, sample_rate) = self
            .tracks
            .get(path)
            .ok_or_else(|| AudioFileError::NotFound(path.to_path_buf()))?;
        Ok(Box::new(MemorySource::new(Arc::clone(samples), *sample_rate)))
    }
}
