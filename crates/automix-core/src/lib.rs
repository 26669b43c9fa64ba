//! Automix Core - Beat-grid analysis, mix planning and rendering
//!
//! Three stages turn a folder of tracks into one continuous mix:
//!
//! - [`analysis`]: tempo, aligned beat grid, drops and drum density per track
//! - [`planner`]: track order, transitions and the time-sorted action list
//! - [`engine`]: the mixer that replays the actions over tempo-matched,
//!   filtered channels, written out by [`export`]

pub mod analysis;
pub mod audio_file;
pub mod config;
pub mod engine;
pub mod export;
pub mod filter;
pub mod planner;
pub mod ring_buffer;
pub mod timestretch;
pub mod types;

pub use types::*;
