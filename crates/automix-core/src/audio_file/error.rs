//! Audio file error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while opening or decoding a track
#[derive(Error, Debug)]
pub enum AudioFileError {
    #[error("Failed to open audio file: {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Decode error in {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("No such track: {0}")]
    NotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, AudioFileError>;
