//! Scheduled control actions
//!
//! The mix plan is a time-sorted list of [`Action`]s. Each one targets a
//! single mixer channel and is applied by the mixer at the frame matching its
//! timestamp on the output timeline.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::types::seconds_to_frames;

/// What an action does to its channel
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Open a track on the channel, replacing whatever was loaded
    Load(PathBuf),
    Play,
    Pause,
    /// Source tempo / output tempo
    SetTempoRatio(f64),
    /// Linear gain
    SetVolume(f32),
    /// Kill filter gain in dB (0 = open)
    SetFilterGain(f32),
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Load(_) => "Load",
            ActionKind::Play => "Play",
            ActionKind::Pause => "Pause",
            ActionKind::SetTempoRatio(_) => "SetTempoRatio",
            ActionKind::SetVolume(_) => "SetVolume",
            ActionKind::SetFilterGain(_) => "SetFilterGain",
        }
    }
}

/// A control event on the global output timeline
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Seconds. Track-local until the planner maps it.
    pub time: f64,
    pub channel: usize,
    pub kind: ActionKind,
}

impl Action {
    /// Create an action on channel 0; the planner assigns the real channel
    pub fn new(time: f64, kind: ActionKind) -> Self {
        Self { time, channel: 0, kind }
    }

    /// Output frame at which the action takes effect
    #[inline]
    pub fn frame(&self, sample_rate: u32) -> u64 {
        seconds_to_frames(self.time, sample_rate)
    }

    /// Track path for Load actions
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            ActionKind::Load(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:10.3}s ch{} {}", self.time, self.channel, self.kind.name())?;
        match &self.kind {
            ActionKind::Load(path) => write!(f, " {}", path.display()),
            ActionKind::SetTempoRatio(ratio) => write!(f, " {:.4}", ratio),
            ActionKind::SetVolume(value) | ActionKind::SetFilterGain(value) => {
                write!(f, " {:.3}", value)
            }
            ActionKind::Play | ActionKind::Pause => Ok(()),
        }
    }
}

/// Sort by time, keeping insertion order among equal timestamps
pub fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| a.time.total_cmp(&b.time));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_is_stable() {
        let mut actions = vec![
            Action::new(1.0, ActionKind::Pause),
            Action::new(0.0, ActionKind::Load(PathBuf::from("a.flac"))),
            Action::new(0.0, ActionKind::SetVolume(0.0)),
            Action::new(0.5, ActionKind::SetVolume(0.5)),
            Action::new(0.0, ActionKind::Play),
        ];
        sort_actions(&mut actions);

        let names: Vec<&str> = actions.iter().map(|a| a.kind.name()).collect();
        assert_eq!(names, ["Load", "SetVolume", "Play", "SetVolume", "Pause"]);
    }

    #[test]
    fn test_frame_rounding() {
        let action = Action::new(1.5, ActionKind::Play);
        assert_eq!(action.frame(44100), 66150);
        assert_eq!(Action::new(-0.2, ActionKind::Play).frame(44100), 0);
    }

    #[test]
    fn test_display() {
        let mut action = Action::new(2.0, ActionKind::SetFilterGain(-23.0));
        action.channel = 3;
        assert_eq!(action.to_string(), "     2.000s ch3 SetFilterGain -23.000");
        assert!(action.path().is_none());
    }
}
