//! automix - continuous DJ mixes from a folder of tracks
//!
//! The binary is a thin wrapper around [`run`]:
//! config and flags, discovery, cached parallel analysis, planning and
//! rendering, in that order.

pub mod batch;
pub mod cache;
pub mod cli;
pub mod config;
pub mod discover;
pub mod render;

use anyhow::{Context, Result};
use automix_core::analysis::analyze_file;
use automix_core::config::{load_config, save_config};
use automix_core::planner::{plan_mix, PlanTrack, TracklistEntry};

use crate::cache::AnalysisCache;
use crate::cli::Cli;
use crate::config::{automix_home, default_config_path, validate_paths, AppConfig};

/// Run one mix from the command line
pub fn run(cli: Cli) -> Result<()> {
    let home = automix_home()?;
    let config_path = cli.config.clone().unwrap_or_else(|| default_config_path(&home));
    let config_exists = config_path.exists();
    let mut config: AppConfig = load_config(&config_path);
    if !config_exists && cli.config.is_none() {
        // First run: leave a config with every default to edit
        if let Err(e) = save_config(&config, &config_path) {
            log::warn!("run: could not write default config: {:#}", e);
        }
    }
    config.apply_cli(&cli);
    config.validate()?;
    validate_paths(&cli.input_dir, &cli.output)?;

    let params = &config.mix.params;
    let tracks = discover::discover_tracks(&cli.input_dir, params.seed, config.mix.max_tracks)?;
    if tracks.is_empty() {
        anyhow::bail!("No audio files found in {:?}", cli.input_dir);
    }

    let mut cache = AnalysisCache::load(&AnalysisCache::default_path(&home));
    let workers = batch::worker_count(config.analysis.multithreaded, tracks.len());
    let extractor = config.analysis.extractor.clone();
    let results = batch::analyze_with_cache(&tracks, &mut cache, cli.reanalyze, workers, |path| {
        analyze_file(path, &extractor)
    });
    cache.save().context("Failed to save analysis cache")?;

    let plan_tracks: Vec<PlanTrack> = results
        .into_iter()
        .map(|(path, analysis)| PlanTrack::normalised(path, analysis, &config.loudness))
        .collect();
    let plan = plan_mix(plan_tracks, params).context("Mix planning failed")?;
    print_tracklist(&plan.tracklist);

    let frames = render::render_plan(plan, params.channels, &cli.output)?;
    log::info!(
        "run: wrote {:?} ({:.1} min)",
        cli.output,
        frames as f64 / automix_core::types::SAMPLE_RATE as f64 / 60.0
    );
    Ok(())
}

fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:3}:{:02}", total / 60, total % 60)
}

fn print_tracklist(tracklist: &[TracklistEntry]) {
    println!("Tracklist:");
    for (i, entry) in tracklist.iter().enumerate() {
        println!(
            "{:3}. {}  {:<12} {}",
            i + 1,
            format_time(entry.start_time),
            entry.transition.to_string(),
            entry.path.display()
        );
    }
}
