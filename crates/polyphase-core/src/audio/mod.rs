//! Audio subsystem boundary.
//!
//! The engine never touches samples. It hands fully-timed voice descriptions
//! to an [`AudioSink`], which owns the precise audio clock:
//!
//! - [`synth`] - software oscillator bank plus a channel-backed handle
//! - [`recording`] - manual-clock sink that records every command
//! - `output` - cpal output stream (`native` feature)

#[cfg(feature = "native")]
pub mod output;
pub mod recording;
pub mod synth;

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub use recording::{RecordingSink, SinkCommand};
pub use synth::{synth_pair, Synth, SynthHandle};

/// Identifier of a voice started on a sink.
pub type VoiceId = u64;

/// Oscillator shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    /// Sample the waveform at a phase in `[0, 1)`.
    pub fn sample(self, phase: f64) -> f32 {
        let value = match self {
            Waveform::Sine => (phase * std::f64::consts::TAU).sin(),
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * phase - 1.0,
        };
        value as f32
    }
}

/// A point of a piecewise-linear gain envelope, in audio-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    pub time: f64,
    pub level: f32,
}

impl Breakpoint {
    pub fn new(time: f64, level: f32) -> Self {
        Self { time, level }
    }
}

/// Everything a sink needs to play one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSpec {
    /// Oscillator frequency in Hz.
    pub frequency: f64,
    /// Audio-clock start time in seconds.
    pub start_time: f64,
    /// Gain envelope, sorted by time. Level is 0 before the first point and
    /// holds the last level after the final one.
    pub envelope: Vec<Breakpoint>,
    /// Oscillator stop time, or `None` to hold until released.
    pub stop_time: Option<f64>,
    /// Linear voice gain.
    pub gain: f32,
    pub waveform: Waveform,
}

impl VoiceSpec {
    /// Envelope level at audio time `t`, ignoring any release.
    pub fn level_at(&self, t: f64) -> f32 {
        let Some(first) = self.envelope.first() else {
            return 0.0;
        };
        if t < first.time {
            return 0.0;
        }

        for pair in self.envelope.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t < b.time {
                let span = b.time - a.time;
                if span <= 0.0 {
                    return b.level;
                }
                let frac = ((t - a.time) / span) as f32;
                return a.level + (b.level - a.level) * frac;
            }
        }

        self.envelope.last().map(|p| p.level).unwrap_or(0.0)
    }

    /// Shift every time in the spec by `offset` seconds.
    pub fn shifted(mut self, offset: f64) -> Self {
        self.start_time += offset;
        for point in &mut self.envelope {
            point.time += offset;
        }
        if let Some(stop) = self.stop_time.as_mut() {
            *stop += offset;
        }
        self
    }
}

/// Destination for timed voices.
///
/// Implementations treat start times in the past as "now". Voices that stop
/// or finish their release are reported through [`AudioSink::drain_ended`].
pub trait AudioSink {
    /// Current audio-clock time in seconds.
    fn current_time(&self) -> f64;

    /// Schedule a voice.
    fn start_voice(&mut self, spec: VoiceSpec) -> Result<VoiceId>;

    /// Fade a voice to silence over `fade` seconds starting at `at`, then stop it.
    fn release_voice(&mut self, id: VoiceId, at: f64, fade: f64) -> Result<()>;

    /// Set the output gain applied to the voice mix.
    fn set_master_gain(&mut self, gain: f32) -> Result<()>;

    /// Voices that ended since the last call.
    fn drain_ended(&mut self) -> Vec<VoiceId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> VoiceSpec {
        VoiceSpec {
            frequency: 220.0,
            start_time: 1.0,
            envelope: vec![
                Breakpoint::new(1.0, 0.0),
                Breakpoint::new(1.1, 1.0),
                Breakpoint::new(1.3, 0.5),
            ],
            stop_time: Some(2.0),
            gain: 1.0,
            waveform: Waveform::Sine,
        }
    }

    #[test]
    fn test_level_interpolation() {
        let s = spec();
        assert_eq!(s.level_at(0.5), 0.0);
        assert!((s.level_at(1.05) - 0.5).abs() < 1e-5);
        assert!((s.level_at(1.2) - 0.75).abs() < 1e-5);
        assert_eq!(s.level_at(1.9), 0.5);
    }

    #[test]
    fn test_shifted_moves_everything() {
        let s = spec().shifted(0.25);
        assert_eq!(s.start_time, 1.25);
        assert!((s.envelope[1].time - 1.35).abs() < 1e-12);
        assert_eq!(s.stop_time, Some(2.25));
    }

    #[test]
    fn test_waveform_shapes() {
        assert!(Waveform::Sine.sample(0.25) > 0.999);
        assert_eq!(Waveform::Square.sample(0.75), -1.0);
        assert_eq!(Waveform::Sawtooth.sample(0.0), -1.0);
        assert_eq!(Waveform::Triangle.sample(0.5), 1.0);
    }
}
