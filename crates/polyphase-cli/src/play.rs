//! Live playback on the default audio device.

use crate::PlaybackArgs;
use anyhow::Result;
use polyphase_core::config::EngineConfig;

#[cfg(feature = "native")]
pub fn run(
    mut config: EngineConfig,
    args: &PlaybackArgs,
    duration: Option<f64>,
    watch: bool,
) -> Result<()> {
    use anyhow::Context;
    use polyphase_core::audio::synth_pair;
    use polyphase_core::{AudioOutput, FileRhythmProvider, PlaybackEngine, PlaybackEvent, Runtime};
    use std::fs;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    args.apply_to(&mut config)?;

    let mut output = AudioOutput::new().context("Failed to open audio output")?;
    let (synth, sink) = synth_pair(output.sample_rate());

    let provider = FileRhythmProvider::new(&args.rhythm);
    let mut engine = PlaybackEngine::new(config, Box::new(provider), sink)
        .with_context(|| format!("Failed to load {}", args.rhythm.display()))?;
    args.apply_to_engine(&mut engine)?;

    output.start(synth)?;
    let runtime = Runtime::start(engine)?;
    let handle = runtime.handle().clone();
    let events = handle.subscribe()?;

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, term.clone())
        .context("Failed to install Ctrl-C handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, term.clone())
        .context("Failed to install SIGTERM handler")?;

    handle.start(args.phase_ms)?;
    println!(
        "Playing {} (Ctrl-C to stop)",
        args.rhythm.display()
    );

    let started = Instant::now();
    let mut last_modified = fs::metadata(&args.rhythm)
        .ok()
        .and_then(|m| m.modified().ok());

    while !term.load(Ordering::Relaxed) {
        if duration.is_some_and(|d| started.elapsed().as_secs_f64() >= d) {
            break;
        }

        if watch {
            let current_modified = fs::metadata(&args.rhythm)
                .ok()
                .and_then(|m| m.modified().ok());
            if current_modified != last_modified {
                last_modified = current_modified;
                log::info!("Rhythm file changed, reloading");
                if let Err(e) = handle.reload_rhythm() {
                    log::error!("Reload failed: {}", e);
                }
            }
        }

        for event in events.try_iter() {
            match event {
                PlaybackEvent::NoteTriggered {
                    layer,
                    frequency,
                    abs_tick,
                    ..
                } => log::debug!("note layer {} tick {} {:.1} Hz", layer, abs_tick, frequency),
                PlaybackEvent::Stopped => {
                    log::info!("Playback stopped");
                }
                other => log::info!("{:?}", other),
            }
        }

        std::thread::sleep(Duration::from_millis(100));
    }

    handle.stop()?;
    // Let the release fades finish before the stream goes away.
    std::thread::sleep(Duration::from_millis(250));
    runtime.shutdown();
    output.stop()?;
    Ok(())
}

#[cfg(not(feature = "native"))]
pub fn run(
    _config: EngineConfig,
    args: &PlaybackArgs,
    _duration: Option<f64>,
    _watch: bool,
) -> Result<()> {
    anyhow::bail!(
        "polyphase was built without audio output (enable the `native` feature); \
         try `polyphase render {} -o out.wav` instead",
        args.rhythm.display()
    )
}
