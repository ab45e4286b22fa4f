//! Snapshot of engine state readable from other threads.

use crate::audio::AudioSink;
use crate::engine::PlaybackEngine;

/// What a running engine looks like from the outside.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackStatus {
    pub playing: bool,
    /// Position within the cycle, `[0, 1)`.
    pub phase: f64,
    pub cycle_duration: f64,
    pub tempo_multiplier: f64,
    pub cycle_ticks: u64,
    pub fundamental_hz: f64,
    pub legato: bool,
    pub active_voices: usize,
    pub safe_minimum_cycle_duration: f64,
    /// Incremented on every update.
    pub version: u64,
}

impl PlaybackStatus {
    /// Capture the current state of an engine.
    pub fn capture<S: AudioSink>(engine: &PlaybackEngine<S>, version: u64) -> Self {
        Self {
            playing: engine.is_playing(),
            phase: engine.current_phase(),
            cycle_duration: engine.cycle_duration(),
            tempo_multiplier: engine.tempo_multiplier(),
            cycle_ticks: engine.cycle_ticks(),
            fundamental_hz: engine.fundamental_frequency(),
            legato: engine.is_legato(),
            active_voices: engine.active_voice_count(),
            safe_minimum_cycle_duration: engine.safe_minimum_cycle_duration(),
            version,
        }
    }
}
