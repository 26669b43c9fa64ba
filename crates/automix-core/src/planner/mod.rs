//! Mix planning
//!
//! Orders the analyzed tracks, picks a transition for every consecutive pair
//! and turns the result into one time-sorted action list for the mixer.
//!
//! ## Transitions
//!
//! - **Normal**: the current track leaves at the end of its first drop, the
//!   next track's first drop starts there.
//! - **Breakdown**: like normal, but the next track enters at a drum-free
//!   section of its buildup.
//! - **Double drop**: the next track's drop starts 16 bars into the current
//!   track's drop; the current track keeps playing filtered for a while.
//!
//! All placement is done in bars. A track's first beat sits on a whole bar
//! of the global timeline, so every transition stays on the grid.

mod track_plan;

use std::fmt;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::{AnalysisResult, DropInterval};
use crate::config::LoudnessConfig;
use crate::engine::{sort_actions, Action, ActionKind};
use crate::types::BEATS_PER_BAR;
use track_plan::TrackPlan;

/// Bars searched back from the drop for a drum-free buildup
const BUILDUP_STEP_BARS: i64 = 8;

/// A buildup section counts as drum-free below this many onsets
const BUILDUP_MAX_ONSETS: u32 = 16;

/// Bars into the current drop where a double drop lands
const DOUBLE_DROP_BARS: u32 = 16;

/// Double drops close the current track's filter this early
const DOUBLE_DROP_KILL_LEAD: f64 = 0.1;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("no usable tracks to mix")]
    NoTracks,

    #[error("invalid mix parameters: {0}")]
    InvalidParams(String),

    #[error("no free mixer channel for {path:?} at {time:.1}s, raise the channel count")]
    NoFreeChannel { path: PathBuf, time: f64 },
}

pub type Result<T> = std::result::Result<T, PlanError>;

/// Parameters of a mix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixParams {
    /// Output tempo in BPM
    pub target_tempo: f64,
    /// Mixer channels, handed out round-robin and reused once their track
    /// has paused
    pub channels: usize,
    /// Percent chance of a double drop
    pub double_drop_probability: f64,
    /// Percent of tracks brought in through a breakdown
    pub breakdown_probability: f64,
    pub seed: u64,
    /// Bars the current track keeps playing after a double drop
    pub double_drop_tail_bars: u32,
    /// Seconds between closing a track's filter and pausing it
    pub pause_delay: f64,
    /// Kill filter gain for tracks fading in or out
    pub kill_gain_db: f32,
    /// Steps of the fade-in volume ramp
    pub ramp_steps: u32,
}

impl Default for MixParams {
    fn default() -> Self {
        Self {
            target_tempo: 87.5,
            channels: 6,
            double_drop_probability: 20.0,
            breakdown_probability: 20.0,
            seed: 1,
            double_drop_tail_bars: 16,
            pause_delay: 0.1,
            kill_gain_db: -23.0,
            ramp_steps: 16,
        }
    }
}

impl MixParams {
    pub fn validate(&self) -> Result<()> {
        if self.target_tempo.is_nan() || self.target_tempo <= 0.0 {
            return Err(PlanError::InvalidParams(format!(
                "target tempo must be positive, got {}",
                self.target_tempo
            )));
        }
        if self.channels == 0 {
            return Err(PlanError::InvalidParams("at least one channel is required".into()));
        }
        for (name, value) in [
            ("double drop", self.double_drop_probability),
            ("breakdown", self.breakdown_probability),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(PlanError::InvalidParams(format!(
                    "{} probability must be 0-100, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Seconds per bar at the output tempo
    fn bar_duration(&self) -> f64 {
        BEATS_PER_BAR as f64 * 60.0 / self.target_tempo
    }
}

/// An analyzed track ready to be mixed
#[derive(Debug, Clone, PartialEq)]
pub struct PlanTrack {
    pub path: PathBuf,
    pub analysis: AnalysisResult,
    /// Linear volume normalisation gain
    pub gain: f32,
}

impl PlanTrack {
    pub fn new(path: impl Into<PathBuf>, analysis: AnalysisResult) -> Self {
        Self {
            path: path.into(),
            analysis,
            gain: 1.0,
        }
    }

    /// Track with its volume normalised to the configured loudness target
    pub fn normalised(
        path: impl Into<PathBuf>,
        analysis: AnalysisResult,
        loudness: &LoudnessConfig,
    ) -> Self {
        let gain = loudness.calculate_gain_linear(analysis.loudness_db);
        Self::new(path, analysis).with_gain(gain)
    }

    pub fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    fn first_drop(&self) -> Option<DropInterval> {
        self.analysis.first_drop()
    }
}

/// How a track was brought into the mix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Opening,
    Normal,
    Breakdown,
    DoubleDrop,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransitionKind::Opening => "opening",
            TransitionKind::Normal => "normal",
            TransitionKind::Breakdown => "breakdown",
            TransitionKind::DoubleDrop => "double drop",
        };
        f.write_str(name)
    }
}

/// One line of the tracklist
#[derive(Debug, Clone, PartialEq)]
pub struct TracklistEntry {
    /// Global time the track starts playing
    pub start_time: f64,
    pub path: PathBuf,
    pub transition: TransitionKind,
}

/// Output of the planner
#[derive(Debug, Clone, Default)]
pub struct MixPlan {
    /// Every action of the mix, sorted by time
    pub actions: Vec<Action>,
    /// Tracks in mix order
    pub tracklist: Vec<TracklistEntry>,
}

/// Bar of the first drum-free section before the first drop
///
/// Scans back from 8 bars before the drop in 8-bar steps, stopping at bar 8.
pub fn find_buildup_no_drums(analysis: &AnalysisResult) -> Option<u32> {
    let drop = analysis.first_drop()?;
    let mut bar = drop.start_bar as i64 - BUILDUP_STEP_BARS;
    while bar >= BUILDUP_STEP_BARS {
        if analysis
            .drums_at_bar(bar as u32)
            .is_some_and(|onsets| onsets < BUILDUP_MAX_ONSETS)
        {
            return Some(bar as u32);
        }
        bar -= BUILDUP_STEP_BARS;
    }
    None
}

/// Move breakdown tracks to evenly spaced positions in `tracks`
///
/// Returns, per position after the move, whether that track enters through
/// a breakdown.
pub fn position_breakdowns(tracks: &mut [PlanTrack], probability: f64) -> Vec<bool> {
    let n = tracks.len();
    let mut flags = vec![false; n];
    let wanted = (n as f64 * probability / 100.0).ceil() as usize;
    if wanted < 1 {
        return flags;
    }

    let selected: Vec<PathBuf> = tracks
        .iter()
        .filter(|track| find_buildup_no_drums(&track.analysis).is_some())
        .take(wanted)
        .map(|track| track.path.clone())
        .collect();
    if selected.len() < wanted {
        log::info!(
            "position_breakdowns: only {} of {} tracks have a drum-free buildup",
            selected.len(),
            wanted
        );
    }

    let count = selected.len();
    for (i, path) in selected.iter().enumerate() {
        let target = n * (i + 1) / (count + 1);
        if let Some(current) = tracks.iter().position(|track| &track.path == path) {
            tracks.swap(current, target);
        }
    }
    for (flag, track) in flags.iter_mut().zip(tracks.iter()) {
        *flag = selected.contains(&track.path);
    }
    flags
}

/// Plans a mix with an explicitly seeded random generator
pub struct MixPlanner {
    params: MixParams,
    rng: StdRng,
    /// Global bar of the current track's first beat
    running_bar: i64,
}

impl MixPlanner {
    pub fn new(params: MixParams) -> Result<Self> {
        params.validate()?;
        let rng = StdRng::seed_from_u64(params.seed);
        Ok(Self {
            params,
            rng,
            running_bar: 0,
        })
    }

    pub fn params(&self) -> &MixParams {
        &self.params
    }

    /// Plan a mix of `tracks`
    ///
    /// Tracks without a successful analysis are skipped.
    pub fn plan(&mut self, tracks: Vec<PlanTrack>) -> Result<MixPlan> {
        let mut order: Vec<PlanTrack> = tracks
            .into_iter()
            .filter(|track| {
                let usable = track.analysis.success && track.first_drop().is_some();
                if !usable {
                    log::warn!("MixPlanner::plan: skipping {:?}", track.path);
                }
                usable
            })
            .collect();
        if order.is_empty() {
            return Err(PlanError::NoTracks);
        }

        order.shuffle(&mut self.rng);
        let breakdowns = position_breakdowns(&mut order, self.params.breakdown_probability);
        self.running_bar = 0;

        let kill = self.params.kill_gain_db;
        let mut plans: Vec<TrackPlan> = order
            .iter()
            .enumerate()
            .map(|(i, track)| TrackPlan::new(track, if i == 0 { 1.0 } else { 0.0 }, kill))
            .collect();

        let target = self.params.target_tempo;
        let opening = &mut plans[0];
        let first_bar = opening.time_at_bar(0.0);
        opening.filter_gain(first_bar, 0.0);
        let mut beat_start = opening.track.analysis.first_beat_time * opening.tempo_ratio(target);

        let mut beat_starts = vec![beat_start];
        let mut transitions = vec![TransitionKind::Opening];
        for i in 1..plans.len() {
            let draw = self.rng.gen_range(0..100u32);
            let kind = if breakdowns[i] {
                TransitionKind::Breakdown
            } else if (draw as f64) < self.params.double_drop_probability {
                TransitionKind::DoubleDrop
            } else {
                TransitionKind::Normal
            };

            let (done, rest) = plans.split_at_mut(i);
            let current = &mut done[i - 1];
            let next = &mut rest[0];
            log::info!(
                "MixPlanner::plan: {} into {:?}",
                kind,
                next.track.path.file_name().unwrap_or_default()
            );
            let advance = match kind {
                TransitionKind::Breakdown => self.breakdown(current, next),
                TransitionKind::DoubleDrop => self.double_drop(current, next),
                _ => self.normal(current, next),
            };
            let advance = advance.max(-self.running_bar);

            beat_start += advance as f64 * self.params.bar_duration();
            self.running_bar += advance;
            beat_starts.push(beat_start);
            transitions.push(kind);
        }

        let mut channels = ChannelAllocator::new(self.params.channels);
        let mut actions = Vec::new();
        let mut tracklist = Vec::with_capacity(plans.len());
        for (i, plan) in plans.into_iter().enumerate() {
            let (load, until) = plan.active_span(beat_starts[i], target);
            let channel = channels
                .allocate(load, until)
                .ok_or_else(|| PlanError::NoFreeChannel {
                    path: plan.track.path.clone(),
                    time: load,
                })?;
            log::debug!(
                "MixPlanner::plan: {:?} on channel {} from {:.3}s",
                plan.track.path.file_name().unwrap_or_default(),
                channel,
                load
            );
            tracklist.push(TracklistEntry {
                start_time: plan.global_start(beat_starts[i], target),
                path: plan.track.path.clone(),
                transition: transitions[i],
            });
            actions.extend(plan.map(channel, beat_starts[i], target));
        }
        sort_actions(&mut actions);

        log::info!(
            "MixPlanner::plan: {} tracks, {} actions, {:.1}s",
            tracklist.len(),
            actions.len(),
            actions.last().map_or(0.0, |a| a.time)
        );
        Ok(MixPlan { actions, tracklist })
    }

    /// Fade `next` in over its first 4 bars and open its filter at `entry_bar`
    fn bring_in(&self, next: &mut TrackPlan, entry_bar: u32) {
        let start = next.time_at_bar(0.0);
        let end = next.time_at_bar(4.0);
        next.volume_ramp(start, end, 0.0, 1.0, self.params.ramp_steps);
        next.filter_gain(next.time_at_bar(entry_bar as f64), 0.0);
    }

    /// Kill and pause `current` at `exit_bar`
    fn take_out(&self, current: &mut TrackPlan, exit_bar: u32) {
        let exit = current.time_at_bar(exit_bar as f64);
        current.filter_gain(exit, self.params.kill_gain_db);
        current.pause(exit + self.params.pause_delay);
    }

    fn normal(&self, current: &mut TrackPlan, next: &mut TrackPlan) -> i64 {
        let (Some(current_drop), Some(next_drop)) =
            (current.track.first_drop(), next.track.first_drop())
        else {
            return 0;
        };
        let exit_bar = current_drop.end_bar;
        self.bring_in(next, next_drop.start_bar);
        self.take_out(current, exit_bar);
        exit_bar as i64 - next_drop.start_bar as i64
    }

    fn breakdown(&self, current: &mut TrackPlan, next: &mut TrackPlan) -> i64 {
        let (Some(current_drop), Some(next_drop)) =
            (current.track.first_drop(), next.track.first_drop())
        else {
            return 0;
        };
        let entry_bar = find_buildup_no_drums(&next.track.analysis).unwrap_or_else(|| {
            log::info!("MixPlanner::breakdown: no drum-free buildup, entering at the drop");
            next_drop.start_bar
        });
        let exit_bar = current_drop.end_bar;
        self.bring_in(next, entry_bar);
        self.take_out(current, exit_bar);
        exit_bar as i64 - entry_bar as i64
    }

    fn double_drop(&self, current: &mut TrackPlan, next: &mut TrackPlan) -> i64 {
        let (Some(current_drop), Some(next_drop)) =
            (current.track.first_drop(), next.track.first_drop())
        else {
            return 0;
        };
        let exit_bar = current_drop.start_bar + DOUBLE_DROP_BARS;
        let pause_bar = exit_bar + self.params.double_drop_tail_bars;
        if pause_bar > current_drop.end_bar {
            log::warn!(
                "MixPlanner::double_drop: {:?} paused at bar {} after its drop ends at bar {}",
                current.track.path.file_name().unwrap_or_default(),
                pause_bar,
                current_drop.end_bar
            );
        }

        let ramp_start = next.time_at_bar(next_drop.start_bar.saturating_sub(8) as f64);
        let ramp_end = next.time_at_bar(next_drop.start_bar.saturating_sub(4) as f64);
        next.volume_ramp(ramp_start, ramp_end, 0.0, 1.0, self.params.ramp_steps);
        next.filter_gain(next.time_at_bar(next_drop.start_bar as f64), 0.0);

        current.filter_gain(
            current.time_at_bar(exit_bar as f64) - DOUBLE_DROP_KILL_LEAD,
            self.params.kill_gain_db,
        );
        current.pause(current.time_at_bar(pause_bar as f64));
        exit_bar as i64 - next_drop.start_bar as i64
    }
}

/// Hands out mixer channels round-robin, skipping channels still in use
struct ChannelAllocator {
    /// Global time each channel's current track is done
    free_at: Vec<f64>,
    next: usize,
}

impl ChannelAllocator {
    fn new(channels: usize) -> Self {
        Self {
            free_at: vec![f64::NEG_INFINITY; channels],
            next: 0,
        }
    }

    /// Channel for a track loaded at `load` and done at `until`
    ///
    /// A track that is never paused holds its channel to the end of the mix.
    fn allocate(&mut self, load: f64, until: Option<f64>) -> Option<usize> {
        let count = self.free_at.len();
        let channel = (0..count)
            .map(|offset| (self.next + offset) % count)
            .find(|&channel| self.free_at[channel] <= load)?;
        self.free_at[channel] = until.unwrap_or(f64::INFINITY);
        self.next = (channel + 1) % count;
        Some(channel)
    }
}

/// Plan a mix with the given parameters
pub fn plan_mix(tracks: Vec<PlanTrack>, params: &MixParams) -> Result<MixPlan> {
    MixPlanner::new(params.clone())?.plan(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(tempo: f64, first_beat: f64, drop: (u32, u32), drums: Vec<u32>) -> AnalysisResult {
        AnalysisResult {
            tempo,
            first_beat_time: first_beat,
            drop_intervals: vec![DropInterval { start_bar: drop.0, end_bar: drop.1 }],
            drum_density: drums,
            loudness_db: None,
            success: true,
        }
    }

    fn busy_drums() -> Vec<u32> {
        vec![32; 40]
    }

    /// Drum-free section at bars 16-19, drop at bar 32
    fn breakdown_track(name: &str) -> PlanTrack {
        let mut drums = busy_drums();
        drums[4] = 2;
        PlanTrack::new(name, analysis(174.0, 0.2, (32, 64), drums))
    }

    fn params(double_drop: f64, breakdown: f64, seed: u64) -> MixParams {
        MixParams {
            target_tempo: 120.0,
            channels: 2,
            double_drop_probability: double_drop,
            breakdown_probability: breakdown,
            seed,
            ..MixParams::default()
        }
    }

    fn times_of<'a>(actions: &'a [Action], path: &str) -> impl Iterator<Item = &'a Action> + 'a {
        let channel = actions
            .iter()
            .find(|a| a.path().is_some_and(|p| p.to_str() == Some(path)))
            .map(|a| a.channel);
        let load = actions
            .iter()
            .position(|a| a.path().is_some_and(|p| p.to_str() == Some(path)))
            .unwrap_or(0);
        let next_load = actions[load + 1..]
            .iter()
            .position(|a| matches!(a.kind, ActionKind::Load(_)) && Some(a.channel) == channel)
            .map_or(actions.len(), |p| load + 1 + p);
        actions[load..next_load]
            .iter()
            .filter(move |a| Some(a.channel) == channel)
    }

    #[test]
    fn test_find_buildup_no_drums() {
        let track = breakdown_track("a");
        assert_eq!(find_buildup_no_drums(&track.analysis), Some(16));

        let busy = analysis(120.0, 0.0, (32, 64), busy_drums());
        assert_eq!(find_buildup_no_drums(&busy), None);

        // Bar 0 is never used
        let mut drums = busy_drums();
        drums[0] = 0;
        let early = analysis(120.0, 0.0, (16, 32), drums.clone());
        assert_eq!(find_buildup_no_drums(&early), None);
        drums[2] = 0;
        let early = analysis(120.0, 0.0, (16, 32), drums);
        assert_eq!(find_buildup_no_drums(&early), Some(8));
        let short = analysis(120.0, 0.0, (8, 32), vec![0; 10]);
        assert_eq!(find_buildup_no_drums(&short), None);
    }

    #[test]
    fn test_normalised_gain() {
        let mut result = analysis(120.0, 0.0, (16, 32), busy_drums());
        result.loudness_db = Some(-20.0);
        let loudness = LoudnessConfig { target_db: -14.0, ..Default::default() };
        let track = PlanTrack::normalised("n", result.clone(), &loudness);
        assert!((track.gain - 1.995).abs() < 0.01);

        result.loudness_db = None;
        assert_eq!(PlanTrack::normalised("n", result, &loudness).gain, 1.0);
    }

    #[test]
    fn test_breakdowns_evenly_spaced() {
        let mut tracks: Vec<PlanTrack> = vec![
            breakdown_track("bd1"),
            PlanTrack::new("n1", analysis(120.0, 0.0, (16, 32), busy_drums())),
            PlanTrack::new("n2", analysis(120.0, 0.0, (16, 32), busy_drums())),
            breakdown_track("bd2"),
            PlanTrack::new("n3", analysis(120.0, 0.0, (16, 32), busy_drums())),
        ];
        let flags = position_breakdowns(&mut tracks, 40.0);
        assert_eq!(flags, vec![false, true, false, true, false]);
        assert_eq!(tracks[1].path, PathBuf::from("bd1"));
        assert_eq!(tracks[3].path, PathBuf::from("bd2"));

        let flags = position_breakdowns(&mut tracks, 0.0);
        assert!(flags.iter().all(|f| !f));
    }

    #[test]
    fn test_no_tracks_is_an_error() {
        assert!(matches!(plan_mix(Vec::new(), &params(0.0, 0.0, 1)), Err(PlanError::NoTracks)));
        let failed = PlanTrack::new("x", AnalysisResult::failed());
        assert!(matches!(plan_mix(vec![failed], &params(0.0, 0.0, 1)), Err(PlanError::NoTracks)));
    }

    #[test]
    fn test_invalid_params() {
        assert!(MixPlanner::new(params(150.0, 0.0, 1)).is_err());
        let mut zero_tempo = params(0.0, 0.0, 1);
        zero_tempo.target_tempo = 0.0;
        assert!(MixPlanner::new(zero_tempo).is_err());
    }

    #[test]
    fn test_single_track_plan() {
        let track = PlanTrack::new("solo", analysis(120.0, 0.5, (8, 16), busy_drums()));
        let plan = plan_mix(vec![track], &params(0.0, 0.0, 1)).unwrap();
        assert_eq!(plan.tracklist.len(), 1);
        assert_eq!(plan.tracklist[0].transition, TransitionKind::Opening);
        assert!(plan.actions.iter().all(|a| a.kind != ActionKind::Pause));
    }

    #[test]
    fn test_two_track_normal_mix() {
        let a = PlanTrack::new("a", analysis(120.0, 0.5, (32, 64), busy_drums()));
        let b = PlanTrack::new("b", analysis(120.0, 0.25, (16, 48), busy_drums()));
        let plan = plan_mix(vec![a.clone(), b.clone()], &params(0.0, 0.0, 7)).unwrap();
        let mix = &params(0.0, 0.0, 7);

        for pair in plan.actions.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }

        let first = plan.tracklist[0].path.to_str().unwrap().to_string();
        let second = plan.tracklist[1].path.to_str().unwrap().to_string();
        let first_track = if first == "a" { &a } else { &b };
        assert_eq!(plan.tracklist[1].transition, TransitionKind::Normal);
        assert_eq!(plan.tracklist[0].start_time, 0.0);

        // Opening track: loaded, at full volume, playing and filtered at time 0
        let opening: Vec<&Action> = times_of(&plan.actions, &first).collect();
        let at_zero: Vec<&ActionKind> = opening
            .iter()
            .filter(|a| a.time == 0.0 && !matches!(a.kind, ActionKind::SetTempoRatio(_)))
            .map(|a| &a.kind)
            .collect();
        assert_eq!(
            at_zero,
            [
                &ActionKind::Load(PathBuf::from(&first)),
                &ActionKind::SetVolume(1.0),
                &ActionKind::Play,
                &ActionKind::SetFilterGain(-23.0),
            ]
        );

        // Paused at the end of its drop, just after its filter closes
        let exit_bar = first_track.analysis.drop_intervals[0].end_bar as f64;
        let exit_time = first_track.analysis.time_at_bar(exit_bar);
        let pause = opening
            .iter()
            .find(|a| a.kind == ActionKind::Pause)
            .unwrap();
        assert!((pause.time - (exit_time + mix.pause_delay)).abs() < 1e-9);
        assert!(opening
            .iter()
            .any(|a| a.kind == ActionKind::SetFilterGain(-23.0) && (a.time - exit_time).abs() < 1e-9));

        // Incoming track ramps in and opens its filter before that pause
        let incoming: Vec<&Action> = times_of(&plan.actions, &second).collect();
        assert_ne!(incoming[0].channel, pause.channel);
        let ramp: Vec<&&Action> = incoming
            .iter()
            .filter(|a| matches!(a.kind, ActionKind::SetVolume(v) if v > 0.0))
            .collect();
        assert_eq!(ramp.len(), 16);
        assert!(ramp.iter().all(|a| a.time < pause.time));
        let open = incoming
            .iter()
            .find(|a| a.kind == ActionKind::SetFilterGain(0.0))
            .unwrap();
        // Drop of the incoming track starts where the outgoing drop ends
        assert!((open.time - exit_time).abs() < 1e-9);
    }

    #[test]
    fn test_double_drop_overlaps_drops() {
        let a = PlanTrack::new("a", analysis(120.0, 0.0, (8, 48), busy_drums()));
        let b = PlanTrack::new("b", analysis(120.0, 0.0, (16, 48), busy_drums()));
        let plan = plan_mix(vec![a, b], &params(100.0, 0.0, 3)).unwrap();
        assert_eq!(plan.tracklist[1].transition, TransitionKind::DoubleDrop);

        let first = plan.tracklist[0].path.to_str().unwrap().to_string();
        let second = plan.tracklist[1].path.to_str().unwrap().to_string();
        let first_drop = if first == "a" { 8.0 } else { 16.0 };
        let bar = 2.0;

        let outgoing: Vec<&Action> = times_of(&plan.actions, &first).collect();
        let kill = outgoing
            .iter()
            .filter(|a| a.kind == ActionKind::SetFilterGain(-23.0))
            .last()
            .unwrap();
        assert!((kill.time - ((first_drop + 16.0) * bar - 0.1)).abs() < 1e-9);
        let pause = outgoing.iter().find(|a| a.kind == ActionKind::Pause).unwrap();
        assert!((pause.time - (first_drop + 32.0) * bar).abs() < 1e-9);

        let incoming: Vec<&Action> = times_of(&plan.actions, &second).collect();
        let open = incoming
            .iter()
            .find(|a| a.kind == ActionKind::SetFilterGain(0.0))
            .unwrap();
        assert!((open.time - (first_drop + 16.0) * bar).abs() < 1e-9);
    }

    /// Checks a finished plan: sorted actions, one Load and Play per track,
    /// one Pause for every track but the last, volumes within `max_volume`
    /// and no Load on a channel whose track is still playing
    fn assert_plan_invariants(plan: &MixPlan, max_volume: f32) {
        for pair in plan.actions.windows(2) {
            assert!(pair[0].time <= pair[1].time);
        }

        let last = plan.tracklist.len() - 1;
        for (i, entry) in plan.tracklist.iter().enumerate() {
            let name = entry.path.to_str().unwrap();
            let own: Vec<&Action> = times_of(&plan.actions, name).collect();
            let count = |kind: &str| own.iter().filter(|a| a.kind.name() == kind).count();
            assert_eq!(count("Load"), 1, "{}", name);
            assert_eq!(count("Play"), 1, "{}", name);
            assert_eq!(count("Pause"), if i == last { 0 } else { 1 }, "{}", name);

            let load = own.iter().position(|a| a.kind.name() == "Load").unwrap();
            let play = own.iter().position(|a| a.kind == ActionKind::Play).unwrap();
            assert!(load < play);
            if let Some(pause) = own.iter().position(|a| a.kind == ActionKind::Pause) {
                assert!(play < pause);
                assert_eq!(pause, own.len() - 1);
            }
            assert!(own
                .iter()
                .all(|a| !matches!(a.kind, ActionKind::SetVolume(v) if v > max_volume + 1e-6)));
        }

        let mut active = std::collections::HashMap::new();
        for action in &plan.actions {
            let busy = active.entry(action.channel).or_insert(false);
            match action.kind {
                ActionKind::Load(_) => {
                    assert!(!*busy, "load on busy channel {} at {}", action.channel, action.time);
                    *busy = true;
                }
                ActionKind::Pause => *busy = false,
                _ => {}
            }
        }
    }

    fn varied_tracks() -> Vec<PlanTrack> {
        (0..8)
            .map(|i| {
                let drop_start = 8 * (i % 4 + 2);
                let mut t = PlanTrack::new(
                    format!("t{}", i),
                    analysis(110.0 + i as f64 * 10.0, 0.1 * i as f64, (drop_start, drop_start + 32), busy_drums()),
                );
                if i % 3 == 0 {
                    t = breakdown_track(&format!("t{}", i));
                }
                t.with_gain(0.8)
            })
            .collect()
    }

    #[test]
    fn test_plan_invariants_over_seeds() {
        let tracks = varied_tracks();
        for seed in 0..10 {
            let mix = MixParams { channels: 8, ..params(50.0, 50.0, seed) };
            let plan = plan_mix(tracks.clone(), &mix).unwrap();
            assert_eq!(plan.tracklist.len(), 8);
            assert_plan_invariants(&plan, 0.8);
        }
    }

    #[test]
    fn test_fewer_channels_than_tracks_over_seeds() {
        let tracks = varied_tracks();
        for seed in 0..10 {
            let mix = MixParams { channels: 3, ..params(50.0, 50.0, seed) };
            match plan_mix(tracks.clone(), &mix) {
                Ok(plan) => {
                    assert_eq!(plan.tracklist.len(), 8);
                    assert_plan_invariants(&plan, 0.8);
                }
                Err(PlanError::NoFreeChannel { .. }) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
    }

    #[test]
    fn test_channels_reused_after_pause() {
        // Short intros: each track is paused before the one after next loads
        let tracks: Vec<PlanTrack> = ["a", "b", "c"]
            .iter()
            .map(|name| PlanTrack::new(*name, analysis(120.0, 0.0, (8, 40), busy_drums())))
            .collect();
        let plan = plan_mix(tracks, &params(0.0, 0.0, 1)).unwrap();
        assert_plan_invariants(&plan, 1.0);

        let loads: Vec<(usize, f64)> = plan
            .actions
            .iter()
            .filter(|a| a.kind.name() == "Load")
            .map(|a| (a.channel, a.time))
            .collect();
        assert_eq!(loads.iter().map(|l| l.0).collect::<Vec<_>>(), [0, 1, 0]);
        assert!((loads[2].1 - 128.0).abs() < 1e-9);

        let first_pause = plan
            .actions
            .iter()
            .find(|a| a.kind == ActionKind::Pause)
            .unwrap();
        assert_eq!(first_pause.channel, 0);
        assert!((first_pause.time - 80.1).abs() < 1e-9);
    }

    #[test]
    fn test_no_free_channel_is_an_error() {
        // Long intros: the third track loads while both others still play
        let tracks: Vec<PlanTrack> = ["a", "b", "c"]
            .iter()
            .map(|name| PlanTrack::new(*name, analysis(120.0, 0.0, (64, 96), busy_drums())))
            .collect();
        let result = plan_mix(tracks.clone(), &params(0.0, 0.0, 1));
        match result {
            Err(PlanError::NoFreeChannel { time, .. }) => assert!((time - 128.0).abs() < 1e-9),
            other => panic!("expected NoFreeChannel, got {:?}", other.map(|p| p.tracklist)),
        }

        let mix = MixParams { channels: 3, ..params(0.0, 0.0, 1) };
        let plan = plan_mix(tracks, &mix).unwrap();
        assert_plan_invariants(&plan, 1.0);
    }

    #[test]
    fn test_same_seed_same_plan() {
        let tracks: Vec<PlanTrack> = (0..5)
            .map(|i| PlanTrack::new(format!("t{}", i), analysis(120.0, 0.0, (16, 48), busy_drums())))
            .collect();
        let mix = MixParams { channels: 6, ..params(30.0, 0.0, 42) };
        let a = plan_mix(tracks.clone(), &mix).unwrap();
        let b = plan_mix(tracks, &mix).unwrap();
        assert_eq!(a.actions, b.actions);
        assert_eq!(a.tracklist, b.tracklist);
    }
}
