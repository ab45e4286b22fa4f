//! Error types for polyphase-core

use thiserror::Error;

/// Result type alias for polyphase operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the playback core
#[derive(Debug, Error)]
pub enum Error {
    /// A space value of zero was found in the rhythm data
    #[error("Invalid space value 0 in layer {layer} at index {index} (rhythm generator defect)")]
    InvalidSpace { layer: usize, index: usize },

    /// A space value of zero was found in the flattened spaces plot
    #[error("Invalid space value 0 at spaces plot index {index} (rhythm generator defect)")]
    InvalidPlotSpace { index: usize },

    /// Start was requested but the rhythm data contains no notes
    #[error("Nothing to play: rhythm data contains no notes")]
    NothingToPlay,

    /// Layer index outside 0..4
    #[error("Invalid layer index {0} (expected 0..{max})", max = crate::MAX_LAYERS)]
    InvalidLayer(usize),

    /// Cycle duration or tempo multiplier was not a positive finite number
    #[error("Invalid tempo: {0}")]
    InvalidTempo(String),

    /// Fundamental or ceiling frequency was not a positive finite number
    #[error("Invalid frequency: {0} Hz")]
    InvalidFrequency(f64),

    /// Envelope parameters out of range
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Rhythm file or rhythm data was malformed
    #[error("Invalid rhythm data: {0}")]
    InvalidRhythm(String),

    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("Audio device error: {0}")]
    Device(String),

    /// The runtime thread is gone
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}
