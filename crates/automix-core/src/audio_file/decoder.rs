//! Streaming track decoder backed by Symphonia
//!
//! Decodes packet by packet on demand so a six-channel render only keeps a
//! few packets per track in memory. Mono sources are duplicated to both
//! sides; sources with more than two channels keep the first two.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::{AudioFileError, Result};
use super::TrackSource;
use crate::types::{StereoBuffer, StereoSample};

pub struct TrackDecoder {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: u64,
    pending: StereoBuffer,
    finished: bool,
}

impl TrackDecoder {
    /// Probe `path` and prepare a decoder for its first audio track
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| AudioFileError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AudioFileError::UnsupportedFormat(e.to_string()))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| AudioFileError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| AudioFileError::UnsupportedFormat("Unknown sample rate".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| AudioFileError::UnsupportedFormat(e.to_string()))?;

        log::debug!("TrackDecoder::open: {:?} at {} Hz", path, sample_rate);

        Ok(Self {
            path: path.to_path_buf(),
            format,
            decoder,
            track_id,
            sample_rate,
            sample_buf: None,
            sample_buf_frames: 0,
            pending: StereoBuffer::default(),
            finished: false,
        })
    }

    /// Decode one packet into `pending`. Sets `finished` at end of stream.
    fn decode_next(&mut self) -> Result<()> {
        let packet = match self.format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                self.finished = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                self.finished = true;
                return Ok(());
            }
            Err(e) => return Err(decode_error(&self.path, e)),
        };

        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frame, skip it
                log::warn!("TrackDecoder: skipping bad packet in {:?}: {}", self.path, e);
                return Ok(());
            }
            Err(e) => return Err(decode_error(&self.path, e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.capacity() as u64;
        if self.sample_buf.is_none() || frames > self.sample_buf_frames {
            self.sample_buf = Some(SampleBuffer::new(frames, spec));
            self.sample_buf_frames = frames;
        }

        let channels = spec.channels.count().max(1);
        if let Some(ref mut buf) = self.sample_buf {
            buf.copy_interleaved_ref(decoded);
            for frame in buf.samples().chunks_exact(channels) {
                let sample = if channels == 1 {
                    StereoSample::mono(frame[0])
                } else {
                    StereoSample::new(frame[0], frame[1])
                };
                self.pending.push(sample);
            }
        }
        Ok(())
    }
}

fn decode_error(path: &Path, e: SymphoniaError) -> AudioFileError {
    AudioFileError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

impl TrackSource for TrackDecoder {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, out: &mut [StereoSample]) -> Result<usize> {
        while self.pending.len() < out.len() && !self.finished {
            self.decode_next()?;
        }

        let count = out.len().min(self.pending.len());
        out[..count].copy_from_slice(&self.pending.as_slice()[..count]);
        self.pending.consume_front(count);
        Ok(count)
    }
}
