//! Render-time error types

use thiserror::Error;

use crate::audio_file::AudioFileError;

/// Errors that abort a render
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Track source failed")]
    Source(#[from] AudioFileError),

    #[error("Resampler error: {0}")]
    Resampler(String),

    #[error("Invalid tempo ratio: {0}")]
    InvalidTempoRatio(f64),

    #[error("Action addresses channel {channel} but the mixer has {channels} channels")]
    InvalidChannel { channel: usize, channels: usize },

    #[error("Channel {0} is playing with no track loaded")]
    NotLoaded(usize),

    #[error("Ring buffer overflow: {needed} frames requested, {free} free")]
    BufferOverflow { needed: usize, free: usize },
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
