//! Playback notifications for visualisation and export consumers.

/// Something observable happened in the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    /// Playback began.
    Started,
    /// Playback stopped.
    Stopped,
    /// Cycle duration or tempo multiplier changed.
    TempoChanged {
        cycle_duration: f64,
        tempo_multiplier: f64,
        /// Position within the cycle at the moment of change, `[0, 1)`.
        phase: f64,
    },
    /// A note was handed to the audio sink.
    NoteTriggered {
        layer: usize,
        ratio: f64,
        frequency: f64,
        /// Note length in seconds.
        duration: f64,
        /// Audio-clock start time.
        start_time: f64,
        abs_tick: u64,
    },
}

impl PlaybackEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            PlaybackEvent::Started => "started",
            PlaybackEvent::Stopped => "stopped",
            PlaybackEvent::TempoChanged { .. } => "tempo-changed",
            PlaybackEvent::NoteTriggered { .. } => "note-triggered",
        }
    }
}
