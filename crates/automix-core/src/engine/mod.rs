//! Playback scheduler
//!
//! Renders a mix plan: the [`Mixer`] applies [`Action`]s to its [`Channel`]s
//! at sample-accurate positions and sums the playing channels.

mod action;
mod channel;
mod error;
mod mixer;

pub use action::{sort_actions, Action, ActionKind};
pub use channel::Channel;
pub use error::{PlaybackError, Result};
pub use mixer::Mixer;
