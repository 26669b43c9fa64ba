//! Mix output
//!
//! Writes the rendered mix as 16-bit stereo PCM. WAV output is streamed to
//! disk with hound as blocks arrive; FLAC output is collected in memory and
//! encoded with flacenc when the writer is finished.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::engine::{Mixer, PlaybackError};
use crate::types::StereoSample;

/// Frames pulled from the mixer per block
pub const RENDER_BLOCK_FRAMES: usize = 2048;

const BITS_PER_SAMPLE: u16 = 16;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Unsupported output format: {0:?} (expected .wav or .flac)")]
    UnsupportedFormat(PathBuf),

    #[error("WAV write failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("FLAC encoding failed: {0}")]
    Flac(String),

    #[error("Failed to write {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Playback failed")]
    Playback(#[from] PlaybackError),
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Output container, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Wav,
    Flac,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("wav") => Ok(OutputFormat::Wav),
            Some("flac") => Ok(OutputFormat::Flac),
            _ => Err(ExportError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Hard clip to [-1, 1] and quantise to 16 bits
#[inline]
fn quantise(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Writes stereo frames to a WAV or FLAC file
pub enum MixWriter {
    Wav(hound::WavWriter<BufWriter<File>>),
    Flac {
        path: PathBuf,
        sample_rate: u32,
        samples: Vec<i32>,
    },
}

impl MixWriter {
    /// Create a writer for `path`, picking the format from its extension
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        match OutputFormat::from_path(path)? {
            OutputFormat::Wav => {
                let spec = hound::WavSpec {
                    channels: 2,
                    sample_rate,
                    bits_per_sample: BITS_PER_SAMPLE,
                    sample_format: hound::SampleFormat::Int,
                };
                Ok(MixWriter::Wav(hound::WavWriter::create(path, spec)?))
            }
            OutputFormat::Flac => Ok(MixWriter::Flac {
                path: path.to_path_buf(),
                sample_rate,
                samples: Vec::new(),
            }),
        }
    }

    pub fn write(&mut self, frames: &[StereoSample]) -> Result<()> {
        let interleaved: &[f32] = bytemuck::cast_slice(frames);
        match self {
            MixWriter::Wav(writer) => {
                for &sample in interleaved {
                    writer.write_sample(quantise(sample))?;
                }
            }
            MixWriter::Flac { samples, .. } => {
                samples.extend(interleaved.iter().map(|&s| quantise(s) as i32));
            }
        }
        Ok(())
    }

    /// Flush the WAV header or encode and write the FLAC stream
    pub fn finish(self) -> Result<()> {
        match self {
            MixWriter::Wav(writer) => {
                writer.finalize()?;
                Ok(())
            }
            MixWriter::Flac {
                path,
                sample_rate,
                samples,
            } => write_flac(&path, sample_rate, &samples),
        }
    }
}

fn write_flac(path: &Path, sample_rate: u32, samples: &[i32]) -> Result<()> {
    use flacenc::bitsink::ByteSink;
    use flacenc::component::BitRepr;
    use flacenc::config::Encoder as FlacEncoder;
    use flacenc::error::Verify;
    use flacenc::source::MemSource;

    let config = FlacEncoder::default()
        .into_verified()
        .map_err(|(_, e)| ExportError::Flac(format!("invalid encoder configuration: {}", e)))?;
    let source = MemSource::from_samples(samples, 2, BITS_PER_SAMPLE as usize, sample_rate as usize);
    let stream = flacenc::encode_with_fixed_block_size(&config, source, config.block_size)
        .map_err(|e| ExportError::Flac(format!("{:?}", e)))?;

    let mut sink = ByteSink::new();
    stream
        .write(&mut sink)
        .map_err(|e| ExportError::Flac(format!("{:?}", e)))?;
    std::fs::write(path, sink.as_slice()).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("write_flac: {} frames to {:?}", samples.len() / 2, path);
    Ok(())
}

/// Pull the mix from `mixer` block by block until it ends
///
/// Returns the number of frames written.
pub fn render_mix(mixer: &mut Mixer, writer: &mut MixWriter) -> Result<u64> {
    let mut block = vec![StereoSample::silence(); RENDER_BLOCK_FRAMES];
    let mut total = 0u64;
    loop {
        let produced = mixer.read(&mut block)?;
        writer.write(&block[..produced])?;
        total += produced as u64;
        if produced < RENDER_BLOCK_FRAMES {
            break;
        }
    }
    log::info!("render_mix: {} frames ({:.1}s)", total, mixer.elapsed_time());
    Ok(total)
}
