//! Offline commands: render to WAV and trace without audio.

use crate::PlaybackArgs;
use anyhow::{Context, Result};
use polyphase_core::config::EngineConfig;
use polyphase_core::offline::{render_to_wav, RenderOptions};
use polyphase_core::{FileRhythmProvider, PlaybackEngine, PlaybackEvent, RecordingSink, RhythmData};
use std::path::Path;

/// Render a rhythm file to a WAV file.
pub fn render(
    mut config: EngineConfig,
    args: &PlaybackArgs,
    output: &Path,
    duration: f64,
) -> Result<()> {
    args.apply_to(&mut config)?;
    let rhythm = load_rhythm(&args.rhythm)?;
    let options = RenderOptions {
        duration_seconds: duration,
        start_phase_ms: args.phase_ms,
        tempo_multiplier: args.multiplier,
        solo_layer: args.solo,
        muted_layers: args.muted_layers.clone(),
        selected_ratios: args.ratios.iter().cloned().collect(),
    };

    let summary = render_to_wav(config, Box::new(rhythm), &options, output)?;
    println!(
        "Rendered {} notes ({:.2}s, peak {:.3}) to {}",
        summary.notes_triggered,
        summary.frames as f64 / summary.sample_rate as f64,
        summary.peak,
        output.display()
    );
    Ok(())
}

/// Dry-run playback on a manual clock and print every triggered note.
pub fn trace(mut config: EngineConfig, args: &PlaybackArgs, duration: Option<f64>) -> Result<()> {
    args.apply_to(&mut config)?;
    let interval = config.transport.schedule_interval_ms as f64 / 1000.0;

    let provider = FileRhythmProvider::new(&args.rhythm);
    let mut engine = PlaybackEngine::new(config, Box::new(provider), RecordingSink::new())
        .with_context(|| format!("Failed to load {}", args.rhythm.display()))?;
    args.apply_to_engine(&mut engine)?;

    let duration = duration.unwrap_or(engine.cycle_duration() / engine.tempo_multiplier());
    let events = engine.subscribe();

    print_scale(engine.rhythm());
    println!();
    println!(
        "{:>9}  {:>5}  {:>7}  {:>9}  {:>7}  {:>8}",
        "time", "layer", "tick", "freq", "ratio", "length"
    );

    engine.start(args.phase_ms)?;
    let mut t = 0.0;
    let mut printed = 0usize;
    while t < duration {
        engine.sink_mut().advance_to(t);
        engine.poll();
        for event in events.try_iter() {
            if let PlaybackEvent::NoteTriggered {
                layer,
                ratio,
                frequency,
                duration: length,
                start_time,
                abs_tick,
            } = event
            {
                if start_time >= duration {
                    continue;
                }
                println!(
                    "{:>8.3}s  {:>5}  {:>7}  {:>6.1} Hz  {:>7.3}  {:>7.3}s",
                    start_time,
                    layer_name(layer),
                    abs_tick,
                    frequency,
                    ratio,
                    length
                );
                printed += 1;
            }
        }
        t += interval;
    }
    engine.stop();

    println!();
    println!("{} notes in {:.3}s", printed, duration);
    Ok(())
}

fn load_rhythm(path: &Path) -> Result<RhythmData> {
    RhythmData::load(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn print_scale(rhythm: &RhythmData) {
    println!("Rhythms: {:?}", rhythm.rhythms);
    println!("Scale:");
    for ratio in &rhythm.available_ratios {
        println!(
            "  {:>7}  {:>7.3}  {:>8.1} cents  {:>5} Hz",
            ratio.fraction, ratio.ratio, ratio.cents, ratio.frequency
        );
    }
}

fn layer_name(layer: usize) -> char {
    (b'A' + layer as u8) as char
}
