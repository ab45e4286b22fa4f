//! Messages accepted by the runtime thread.
//!
//! Every change to a running engine goes through [`EngineMessage`]. Fallible
//! commands carry a reply channel so the caller gets the error synchronously.

use crate::error::Result;
use crate::events::PlaybackEvent;
use crate::rhythm::RhythmData;
use crate::voice::Adsr;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashSet;

/// Reply channel for fallible commands.
pub type Reply = Sender<Result<()>>;

/// Commands for the engine thread.
#[derive(Debug)]
pub enum EngineMessage {
    // === Transport ===
    /// Start playback, optionally at a phase offset in milliseconds.
    Start { phase_ms: Option<f64>, reply: Reply },

    /// Stop playback. Never fails.
    Stop,

    /// Start or stop.
    Toggle { reply: Reply },

    /// Set the cycle duration in seconds.
    SetTempo { seconds: f64, reply: Reply },

    /// Set the tempo multiplier.
    SetTempoMultiplier { multiplier: f64, reply: Reply },

    // === Pitch and voices ===
    SetFundamental { hz: f64, reply: Reply },

    SetLegato { legato: bool, reply: Reply },

    SetEnvelope { envelope: Adsr, reply: Reply },

    SetMasterGain { gain: f32, reply: Reply },

    // === Audibility ===
    SetLayerSolo { layer: Option<usize>, reply: Reply },

    SetLayerMute { layer: usize, muted: bool, reply: Reply },

    /// Replace the ratio selection; empty selects everything.
    SetSelectedRatios { fractions: HashSet<String> },

    // === Rhythm ===
    SetRhythm { rhythm: Box<RhythmData>, reply: Reply },

    /// Pull new data from the engine's rhythm provider.
    ReloadRhythm { reply: Reply },

    // === Observation ===
    Subscribe { reply: Sender<Receiver<PlaybackEvent>> },
}
