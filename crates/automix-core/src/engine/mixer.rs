//! Mixer - Sums the playing channels while applying the mix plan
//!
//! The mixer owns every channel and the pending action queue. A read is cut
//! into sub-segments at the frame offset of each action due inside the
//! window: channels render the segment, then the action is applied, so no
//! channel ever renders a frame with stale control state.

use std::collections::VecDeque;

use super::action::{sort_actions, Action};
use super::channel::Channel;
use super::error::{PlaybackError, Result};
use crate::audio_file::SourceLoader;
use crate::types::StereoSample;

pub struct Mixer {
    channels: Vec<Channel>,
    actions: VecDeque<Action>,
    loader: Box<dyn SourceLoader>,
    sample_rate: u32,
    /// Output frames rendered so far
    position: u64,
}

impl Mixer {
    /// Create a mixer with `num_channels` channels driven by `actions`
    pub fn new(
        num_channels: usize,
        mut actions: Vec<Action>,
        loader: Box<dyn SourceLoader>,
        sample_rate: u32,
    ) -> Self {
        sort_actions(&mut actions);
        Self {
            channels: (0..num_channels).map(|i| Channel::new(i, sample_rate)).collect(),
            actions: actions.into(),
            loader,
            sample_rate,
            position: 0,
        }
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn pending_actions(&self) -> usize {
        self.actions.len()
    }

    /// Seconds of output rendered so far
    pub fn elapsed_time(&self) -> f64 {
        self.position as f64 / self.sample_rate as f64
    }

    /// Render the next `out.len()` frames into `out`
    ///
    /// Returns `Ok(0)` when every channel is paused and no action is due in
    /// the window, and a short count when a playing channel runs out of
    /// audio. Both mean the mix is finished.
    pub fn read(&mut self, out: &mut [StereoSample]) -> Result<usize> {
        out.fill(StereoSample::silence());
        let len = out.len();
        let window_start = self.position;
        let window_end = window_start + len as u64;

        self.apply_due(window_start)?;

        if !self.channels.iter().any(Channel::is_playing) && !self.action_due_before(window_end) {
            log::info!("Mixer::read: all channels paused, finishing at {:.3}s", self.elapsed_time());
            return Ok(0);
        }

        let mut cursor = 0usize;
        while cursor < len {
            let now = window_start + cursor as u64;
            let boundary = match self.actions.front() {
                Some(action) => action.frame(self.sample_rate).clamp(now, window_end),
                None => window_end,
            };
            let segment = (boundary - now) as usize;

            if segment > 0 {
                let block = &mut out[cursor..cursor + segment];
                for channel in self.channels.iter_mut().filter(|c| c.is_playing()) {
                    let produced = channel.mix_into(block)?;
                    if produced < segment {
                        log::info!(
                            "Mixer::read: channel {} exhausted at {:.3}s",
                            channel.index(),
                            (now + produced as u64) as f64 / self.sample_rate as f64
                        );
                        let total = cursor + produced;
                        self.position += total as u64;
                        return Ok(total);
                    }
                }
                cursor += segment;
            }

            self.apply_due(window_start + cursor as u64)?;
        }

        self.position = window_end;
        Ok(len)
    }

    fn action_due_before(&self, frame: u64) -> bool {
        self.actions
            .front()
            .is_some_and(|action| action.frame(self.sample_rate) < frame)
    }

    /// Apply every queued action scheduled at or before `frame`
    fn apply_due(&mut self, frame: u64) -> Result<()> {
        while self
            .actions
            .front()
            .is_some_and(|action| action.frame(self.sample_rate) <= frame)
        {
            let Some(action) = self.actions.pop_front() else {
                break;
            };
            let channels = self.channels.len();
            let channel = self
                .channels
                .get_mut(action.channel)
                .ok_or(PlaybackError::InvalidChannel {
                    channel: action.channel,
                    channels,
                })?;
            channel.apply(&action.kind, self.loader.as_ref())?;
        }
        Ok(())
    }
}
