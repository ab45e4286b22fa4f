//! Offline rendering.
//!
//! Drives a [`PlaybackEngine`] and a [`crate::audio::Synth`] in lock step on a virtual
//! clock: one scheduler poll per interval, then one interval of audio. The
//! result is written as a mono 32-bit float WAV.

use crate::audio::{synth_pair, AudioSink};
use crate::config::EngineConfig;
use crate::engine::PlaybackEngine;
use crate::events::PlaybackEvent;
use crate::rhythm::RhythmProvider;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::collections::HashSet;
use std::path::Path;

/// What to render.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Length of the output in seconds.
    pub duration_seconds: f64,
    /// Start phase offset in milliseconds.
    pub start_phase_ms: Option<f64>,
    pub tempo_multiplier: Option<f64>,
    pub solo_layer: Option<usize>,
    pub muted_layers: Vec<usize>,
    /// Fractions to play; empty plays all.
    pub selected_ratios: HashSet<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            duration_seconds: 8.0,
            start_phase_ms: None,
            tempo_multiplier: None,
            solo_layer: None,
            muted_layers: Vec::new(),
            selected_ratios: HashSet::new(),
        }
    }
}

impl RenderOptions {
    fn apply<S: AudioSink>(&self, engine: &mut PlaybackEngine<S>) -> crate::error::Result<()> {
        if let Some(multiplier) = self.tempo_multiplier {
            engine.set_tempo_multiplier(multiplier)?;
        }
        engine.set_layer_solo(self.solo_layer)?;
        for &layer in &self.muted_layers {
            engine.set_layer_mute(layer, true)?;
        }
        engine.set_selected_ratios(self.selected_ratios.clone());
        Ok(())
    }
}

/// What a render produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSummary {
    pub sample_rate: u32,
    pub frames: u64,
    pub notes_triggered: usize,
    pub peak: f32,
}

/// Render to a WAV file.
pub fn render_to_wav(
    config: EngineConfig,
    provider: Box<dyn RhythmProvider + Send>,
    options: &RenderOptions,
    path: &Path,
) -> Result<RenderSummary> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: config.audio.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let summary = render_with(config, provider, options, |block| {
        for &sample in block {
            writer.write_sample(sample)?;
        }
        Ok(())
    })?;

    writer.finalize().context("Failed to finalize WAV file")?;
    log::info!(
        "Rendered {:.2}s ({} notes) to {}",
        summary.frames as f64 / summary.sample_rate as f64,
        summary.notes_triggered,
        path.display()
    );
    Ok(summary)
}

/// Render into memory.
pub fn render_samples(
    config: EngineConfig,
    provider: Box<dyn RhythmProvider + Send>,
    options: &RenderOptions,
) -> Result<(Vec<f32>, RenderSummary)> {
    let mut samples = Vec::new();
    let summary = render_with(config, provider, options, |block| {
        samples.extend_from_slice(block);
        Ok(())
    })?;
    Ok((samples, summary))
}

fn render_with<F>(
    config: EngineConfig,
    provider: Box<dyn RhythmProvider + Send>,
    options: &RenderOptions,
    mut write_block: F,
) -> Result<RenderSummary>
where
    F: FnMut(&[f32]) -> std::result::Result<(), hound::Error>,
{
    if !options.duration_seconds.is_finite() || options.duration_seconds <= 0.0 {
        anyhow::bail!(
            "Render duration must be positive, got {}",
            options.duration_seconds
        );
    }

    let sample_rate = config.audio.sample_rate;
    let block_frames =
        ((sample_rate as u64 * config.transport.schedule_interval_ms) / 1000).max(1) as usize;
    let total_frames = (options.duration_seconds * sample_rate as f64).round() as u64;

    let (mut synth, handle) = synth_pair(sample_rate);
    let mut engine = PlaybackEngine::new(config, provider, handle)
        .context("Failed to create playback engine")?;
    options
        .apply(&mut engine)
        .context("Invalid playback controls")?;
    let events = engine.subscribe();
    engine
        .start(options.start_phase_ms)
        .context("Failed to start playback")?;

    let mut block = vec![0.0f32; block_frames];
    let mut rendered = 0u64;
    let mut peak = 0.0f32;

    while rendered < total_frames {
        let frames = block_frames.min((total_frames - rendered) as usize);
        engine.poll();
        let out = &mut block[..frames];
        synth.render(out, 1);
        peak = out.iter().fold(peak, |p, s| p.max(s.abs()));
        write_block(out).context("Failed to write audio block")?;
        rendered += frames as u64;
    }

    engine.stop();

    let notes_triggered = events
        .try_iter()
        .filter(|e| matches!(e, PlaybackEvent::NoteTriggered { .. }))
        .count();

    Ok(RenderSummary {
        sample_rate,
        frames: rendered,
        notes_triggered,
        peak,
    })
}
