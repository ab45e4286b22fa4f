//! A sink that records commands against a manually advanced clock.

use super::{AudioSink, VoiceId, VoiceSpec};
use crate::error::Result;
use std::collections::BTreeMap;

/// One command received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq)]
pub enum SinkCommand {
    Start { id: VoiceId, spec: VoiceSpec },
    Release { id: VoiceId, at: f64, fade: f64 },
    MasterGain(f32),
}

#[derive(Debug, Clone)]
struct RecordedVoice {
    spec: VoiceSpec,
    release: Option<(f64, f64)>,
}

impl RecordedVoice {
    fn start(&self) -> f64 {
        self.spec.start_time
    }

    fn end(&self) -> f64 {
        let stop = self.spec.stop_time.unwrap_or(f64::INFINITY);
        let released = self
            .release
            .map(|(at, fade)| at + fade)
            .unwrap_or(f64::INFINITY);
        stop.min(released)
    }
}

/// Manual-clock sink for tests and dry runs.
///
/// Voices end when the clock passes their stop time or release, or when
/// [`RecordingSink::finish_voice`] is called.
#[derive(Debug, Default)]
pub struct RecordingSink {
    now: f64,
    next_id: VoiceId,
    commands: Vec<SinkCommand>,
    voices: BTreeMap<VoiceId, RecordedVoice>,
    ended: Vec<VoiceId>,
    master_gain: f32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            master_gain: 1.0,
            ..Self::default()
        }
    }

    /// Move the clock forward, ending every voice that finished by `t`.
    pub fn advance_to(&mut self, t: f64) {
        self.now = self.now.max(t);
        let now = self.now;
        let finished: Vec<VoiceId> = self
            .voices
            .iter()
            .filter(|(_, v)| v.end() <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in finished {
            self.voices.remove(&id);
            self.ended.push(id);
        }
    }

    /// End a voice immediately, as if the renderer reported it.
    pub fn finish_voice(&mut self, id: VoiceId) {
        if self.voices.remove(&id).is_some() {
            self.ended.push(id);
        }
    }

    /// Every command received so far.
    pub fn commands(&self) -> &[SinkCommand] {
        &self.commands
    }

    /// Specs of all started voices, in start order.
    pub fn started(&self) -> Vec<&VoiceSpec> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                SinkCommand::Start { spec, .. } => Some(spec),
                _ => None,
            })
            .collect()
    }

    /// Voices that have not ended yet.
    pub fn live_voices(&self) -> usize {
        self.voices.len()
    }

    /// Live voices audible at time `t` with the given frequency.
    pub fn sounding_at(&self, t: f64, frequency: f64) -> usize {
        self.voices
            .values()
            .filter(|v| (v.spec.frequency - frequency).abs() < 1e-9)
            .filter(|v| v.start() <= t && t < v.end())
            .count()
    }

    /// Live voices audible at time `t`.
    pub fn sounding_any_at(&self, t: f64) -> usize {
        self.voices
            .values()
            .filter(|v| v.start() <= t && t < v.end())
            .count()
    }

    /// Planned end of a live voice.
    pub fn voice_end(&self, id: VoiceId) -> Option<f64> {
        self.voices.get(&id).map(RecordedVoice::end)
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain
    }
}

impl AudioSink for RecordingSink {
    fn current_time(&self) -> f64 {
        self.now
    }

    fn start_voice(&mut self, spec: VoiceSpec) -> Result<VoiceId> {
        let id = self.next_id;
        self.next_id += 1;

        let spec = if spec.start_time < self.now {
            let offset = self.now - spec.start_time;
            spec.shifted(offset)
        } else {
            spec
        };

        log::trace!(
            "voice {} start {:.4}s {:.2} Hz stop {:?}",
            id,
            spec.start_time,
            spec.frequency,
            spec.stop_time
        );

        self.commands.push(SinkCommand::Start {
            id,
            spec: spec.clone(),
        });
        self.voices.insert(id, RecordedVoice { spec, release: None });
        Ok(id)
    }

    fn release_voice(&mut self, id: VoiceId, at: f64, fade: f64) -> Result<()> {
        log::trace!("voice {} release at {:.4}s fade {:.3}s", id, at, fade);
        self.commands.push(SinkCommand::Release { id, at, fade });

        let at = at.max(self.now);
        if let Some(voice) = self.voices.get_mut(&id) {
            if voice.release.is_none_or(|(prev, _)| at < prev) {
                voice.release = Some((at, fade.max(0.0)));
            }
        }
        Ok(())
    }

    fn set_master_gain(&mut self, gain: f32) -> Result<()> {
        self.commands.push(SinkCommand::MasterGain(gain));
        self.master_gain = gain;
        Ok(())
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        std::mem::take(&mut self.ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Breakpoint, Waveform};

    fn tone(freq: f64, start: f64, stop: Option<f64>) -> VoiceSpec {
        VoiceSpec {
            frequency: freq,
            start_time: start,
            envelope: vec![Breakpoint::new(start, 1.0)],
            stop_time: stop,
            gain: 1.0,
            waveform: Waveform::Sine,
        }
    }

    #[test]
    fn test_voices_end_on_clock_advance() {
        let mut sink = RecordingSink::new();
        let a = sink.start_voice(tone(100.0, 0.0, Some(1.0))).unwrap();
        let b = sink.start_voice(tone(200.0, 0.5, None)).unwrap();

        sink.advance_to(0.9);
        assert!(sink.drain_ended().is_empty());
        assert_eq!(sink.sounding_any_at(0.6), 2);

        sink.advance_to(1.0);
        assert_eq!(sink.drain_ended(), vec![a]);

        sink.release_voice(b, 1.5, 0.1).unwrap();
        sink.advance_to(1.55);
        assert!(sink.drain_ended().is_empty());
        sink.advance_to(1.7);
        assert_eq!(sink.drain_ended(), vec![b]);
        assert_eq!(sink.live_voices(), 0);
    }

    #[test]
    fn test_past_start_is_shifted() {
        let mut sink = RecordingSink::new();
        sink.advance_to(2.0);
        sink.start_voice(tone(100.0, 1.5, Some(1.75))).unwrap();
        let spec = sink.started()[0];
        assert_eq!(spec.start_time, 2.0);
        assert_eq!(spec.stop_time, Some(2.25));
    }

    #[test]
    fn test_finish_voice_is_reported_once() {
        let mut sink = RecordingSink::new();
        let id = sink.start_voice(tone(100.0, 0.0, None)).unwrap();
        sink.finish_voice(id);
        sink.finish_voice(id);
        assert_eq!(sink.drain_ended(), vec![id]);
    }
}
