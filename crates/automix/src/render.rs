//! Render driver

use std::path::Path;

use anyhow::{Context, Result};
use automix_core::audio_file::{FileLoader, SourceLoader};
use automix_core::engine::Mixer;
use automix_core::export::{render_mix, MixWriter};
use automix_core::planner::MixPlan;
use automix_core::types::SAMPLE_RATE;

/// Render `plan` on `channels` mixer channels into `output`
///
/// Returns the number of frames written.
pub fn render_plan(plan: MixPlan, channels: usize, output: &Path) -> Result<u64> {
    render_with_loader(plan, channels, output, Box::new(FileLoader))
}

pub fn render_with_loader(
    plan: MixPlan,
    channels: usize,
    output: &Path,
    loader: Box<dyn SourceLoader>,
) -> Result<u64> {
    log::info!("render_plan: {} actions into {:?}", plan.actions.len(), output);
    let mut mixer = Mixer::new(channels, plan.actions, loader, SAMPLE_RATE);
    let mut writer = MixWriter::create(output, SAMPLE_RATE)
        .with_context(|| format!("Failed to create output file: {:?}", output))?;
    let frames = render_mix(&mut mixer, &mut writer).context("Rendering failed")?;
    writer
        .finish()
        .with_context(|| format!("Failed to finish output file: {:?}", output))?;
    Ok(frames)
}
