//! Per-track action list
//!
//! Actions are built in the track's own time (seconds into the file at its
//! original tempo) and mapped onto the global output timeline once the
//! track's position in the mix is known.

use crate::engine::{Action, ActionKind};

use super::PlanTrack;

pub(crate) struct TrackPlan<'a> {
    pub track: &'a PlanTrack,
    actions: Vec<Action>,
}

impl<'a> TrackPlan<'a> {
    /// Start with the track loaded, playing and filtered from its first frame
    pub fn new(track: &'a PlanTrack, initial_volume: f32, kill_gain_db: f32) -> Self {
        let path = track.path.clone();
        Self {
            track,
            actions: vec![
                Action::new(0.0, ActionKind::Load(path)),
                Action::new(0.0, ActionKind::SetVolume(initial_volume)),
                Action::new(0.0, ActionKind::Play),
                Action::new(0.0, ActionKind::SetFilterGain(kill_gain_db)),
            ],
        }
    }

    /// Track-local time of `bar`
    pub fn time_at_bar(&self, bar: f64) -> f64 {
        self.track.analysis.time_at_bar(bar)
    }

    /// Linear volume ramp of `steps` steps ending on `to` at `end`
    pub fn volume_ramp(&mut self, start: f64, end: f64, from: f32, to: f32, steps: u32) {
        let steps = steps.max(1);
        let time_step = (end - start) / steps as f64;
        let volume_step = (to - from) / steps as f32;
        for i in 1..=steps {
            self.actions.push(Action::new(
                start + time_step * i as f64,
                ActionKind::SetVolume(from + volume_step * i as f32),
            ));
        }
    }

    pub fn filter_gain(&mut self, time: f64, gain_db: f32) {
        self.actions.push(Action::new(time, ActionKind::SetFilterGain(gain_db)));
    }

    pub fn pause(&mut self, time: f64) {
        self.actions.push(Action::new(time, ActionKind::Pause));
    }

    /// Source tempo over output tempo
    pub fn tempo_ratio(&self, target_tempo: f64) -> f64 {
        self.track.analysis.tempo / target_tempo
    }

    /// Global time of local time 0 when bar 0 lands on `beat_start`
    pub fn global_start(&self, beat_start: f64, target_tempo: f64) -> f64 {
        beat_start - self.track.analysis.first_beat_time * self.tempo_ratio(target_tempo)
    }

    /// Global time of the Load and, for a track that gets paused, of its
    /// last action
    pub fn active_span(&self, beat_start: f64, target_tempo: f64) -> (f64, Option<f64>) {
        let ratio = self.tempo_ratio(target_tempo);
        let first_beat = self.track.analysis.first_beat_time;
        let to_global = |time: f64| (time - first_beat) * ratio + beat_start;

        let paused = self.actions.iter().any(|a| a.kind == ActionKind::Pause);
        let last = self
            .actions
            .iter()
            .map(|a| a.time)
            .fold(f64::NEG_INFINITY, f64::max);
        (to_global(0.0), paused.then(|| to_global(last)))
    }

    /// Move every action onto the global timeline
    ///
    /// `beat_start` is the global time of the track's first beat. Volume
    /// values are scaled by the track's normalisation gain.
    pub fn map(self, channel: usize, beat_start: f64, target_tempo: f64) -> Vec<Action> {
        let ratio = self.tempo_ratio(target_tempo);
        let first_beat = self.track.analysis.first_beat_time;
        let gain = self.track.gain;

        let mut actions = self.actions;
        // Right after the Load so the stretcher is rebuilt before playback
        actions.insert(1, Action::new(0.0, ActionKind::SetTempoRatio(ratio)));

        for action in actions.iter_mut() {
            action.time = (action.time - first_beat) * ratio + beat_start;
            action.channel = channel;
            if let ActionKind::SetVolume(volume) = &mut action.kind {
                *volume *= gain;
            }
        }
        actions
    }
}
