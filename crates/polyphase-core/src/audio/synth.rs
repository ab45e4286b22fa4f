//! Software oscillator bank.
//!
//! [`Synth`] lives on the audio thread and renders voices sample by sample.
//! [`SynthHandle`] lives on the engine thread and implements [`AudioSink`].
//! They share a frame counter, which is the audio clock, and talk over
//! channels: commands flow to the renderer, ended voice ids flow back.

use super::{AudioSink, VoiceId, VoiceSpec};
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

enum SynthCommand {
    Start { id: VoiceId, spec: VoiceSpec },
    Release { id: VoiceId, at: f64, fade: f64 },
    MasterGain(f32),
}

struct SynthVoice {
    id: VoiceId,
    spec: VoiceSpec,
    phase: f64,
    release: Option<(f64, f64)>,
}

impl SynthVoice {
    fn level(&self, t: f64) -> f32 {
        match self.release {
            Some((at, fade)) if t >= at => {
                if fade <= 0.0 {
                    return 0.0;
                }
                let remaining = (1.0 - (t - at) / fade).max(0.0) as f32;
                self.spec.level_at(at) * remaining
            }
            _ => self.spec.level_at(t),
        }
    }

    fn finished(&self, t: f64) -> bool {
        let stopped = self.spec.stop_time.is_some_and(|stop| t >= stop);
        let released = self.release.is_some_and(|(at, fade)| t >= at + fade);
        stopped || released
    }
}

/// Create a connected renderer and handle.
pub fn synth_pair(sample_rate: u32) -> (Synth, SynthHandle) {
    let sample_rate = sample_rate.max(1);
    let (command_tx, command_rx) = unbounded();
    let (ended_tx, ended_rx) = unbounded();
    let frame = Arc::new(AtomicU64::new(0));

    let synth = Synth {
        commands: command_rx,
        ended: ended_tx,
        frame: frame.clone(),
        sample_rate,
        voices: Vec::new(),
        master_gain: 1.0,
    };
    let handle = SynthHandle {
        commands: command_tx,
        ended: ended_rx,
        frame,
        sample_rate,
        next_id: 1,
    };

    (synth, handle)
}

/// Audio-thread renderer.
pub struct Synth {
    commands: Receiver<SynthCommand>,
    ended: Sender<VoiceId>,
    frame: Arc<AtomicU64>,
    sample_rate: u32,
    voices: Vec<SynthVoice>,
    master_gain: f32,
}

impl Synth {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Voices currently held by the renderer.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Audio time of the next frame to render.
    pub fn current_time(&self) -> f64 {
        self.frame.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn apply_commands(&mut self, now: f64) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                SynthCommand::Start { id, spec } => {
                    let spec = if spec.start_time < now {
                        let offset = now - spec.start_time;
                        spec.shifted(offset)
                    } else {
                        spec
                    };
                    self.voices.push(SynthVoice {
                        id,
                        spec,
                        phase: 0.0,
                        release: None,
                    });
                }
                SynthCommand::Release { id, at, fade } => {
                    if let Some(voice) = self.voices.iter_mut().find(|v| v.id == id) {
                        let at = at.max(now);
                        // An earlier release wins.
                        if voice.release.is_none_or(|(prev, _)| at < prev) {
                            voice.release = Some((at, fade.max(0.0)));
                        }
                    }
                }
                SynthCommand::MasterGain(gain) => self.master_gain = gain,
            }
        }
    }

    /// Render interleaved samples, writing the same signal to every channel.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let base_frame = self.frame.load(Ordering::Acquire);
        let sr = self.sample_rate as f64;
        self.apply_commands(base_frame as f64 / sr);

        let frames = out.len() / channels;
        for (i, chunk) in out.chunks_mut(channels).enumerate() {
            let t = (base_frame + i as u64) as f64 / sr;
            let mut mix = 0.0f32;
            for voice in &mut self.voices {
                if t < voice.spec.start_time || voice.finished(t) {
                    continue;
                }
                let level = voice.level(t);
                mix += voice.spec.waveform.sample(voice.phase) * level * voice.spec.gain;
                voice.phase = (voice.phase + voice.spec.frequency / sr).fract();
            }
            let sample = (mix * self.master_gain).clamp(-1.0, 1.0);
            chunk.fill(sample);
        }

        let end_frame = base_frame + frames as u64;
        let end_time = end_frame as f64 / sr;
        let ended = &self.ended;
        self.voices.retain(|voice| {
            if voice.finished(end_time) {
                // The handle may already be gone during shutdown.
                let _ = ended.send(voice.id);
                false
            } else {
                true
            }
        });

        self.frame.store(end_frame, Ordering::Release);
    }
}

/// Engine-side handle to a [`Synth`].
pub struct SynthHandle {
    commands: Sender<SynthCommand>,
    ended: Receiver<VoiceId>,
    frame: Arc<AtomicU64>,
    sample_rate: u32,
    next_id: VoiceId,
}

impl SynthHandle {
    fn send(&self, command: SynthCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::Device("synth renderer has shut down".to_string()))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioSink for SynthHandle {
    fn current_time(&self) -> f64 {
        self.frame.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn start_voice(&mut self, spec: VoiceSpec) -> Result<VoiceId> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(SynthCommand::Start { id, spec })?;
        Ok(id)
    }

    fn release_voice(&mut self, id: VoiceId, at: f64, fade: f64) -> Result<()> {
        self.send(SynthCommand::Release { id, at, fade })
    }

    fn set_master_gain(&mut self, gain: f32) -> Result<()> {
        self.send(SynthCommand::MasterGain(gain))
    }

    fn drain_ended(&mut self) -> Vec<VoiceId> {
        self.ended.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Breakpoint, Waveform};

    fn tone(start: f64, stop: Option<f64>) -> VoiceSpec {
        VoiceSpec {
            frequency: 50.0,
            start_time: start,
            envelope: vec![Breakpoint::new(start, 1.0)],
            stop_time: stop,
            gain: 0.5,
            waveform: Waveform::Square,
        }
    }

    #[test]
    fn test_renders_voice_and_reports_end() {
        let (mut synth, mut handle) = synth_pair(1000);
        let id = handle.start_voice(tone(0.0, Some(0.05))).unwrap();

        let mut block = vec![0.0f32; 100];
        synth.render(&mut block, 1);

        assert!(block[..50].iter().all(|s| (s.abs() - 0.5).abs() < 1e-6));
        assert!(block[50..].iter().all(|&s| s == 0.0));
        assert_eq!(handle.drain_ended(), vec![id]);
        assert_eq!(synth.voice_count(), 0);
        assert!((handle.current_time() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_future_voice_waits_for_its_start() {
        let (mut synth, mut handle) = synth_pair(1000);
        handle.start_voice(tone(0.02, None)).unwrap();

        let mut block = vec![0.0f32; 40];
        synth.render(&mut block, 1);
        assert!(block[..20].iter().all(|&s| s == 0.0));
        assert!(block[20..].iter().all(|&s| s != 0.0));
    }

    #[test]
    fn test_past_start_is_clamped_to_now() {
        let (mut synth, mut handle) = synth_pair(1000);
        let mut block = vec![0.0f32; 100];
        synth.render(&mut block, 1);

        let id = handle.start_voice(tone(0.0, Some(0.01))).unwrap();
        synth.render(&mut block[..5], 1);
        assert!(block[..5].iter().all(|&s| s != 0.0));
        assert!(handle.drain_ended().is_empty());

        synth.render(&mut block[..10], 1);
        assert_eq!(handle.drain_ended(), vec![id]);
    }

    #[test]
    fn test_release_fades_and_ends() {
        let (mut synth, mut handle) = synth_pair(1000);
        let id = handle.start_voice(tone(0.0, None)).unwrap();
        handle.release_voice(id, 0.01, 0.01).unwrap();

        let mut block = vec![0.0f32; 30];
        synth.render(&mut block, 2);
        // Stereo: 15 frames. Frame 12 is mid-fade.
        assert!(block[24].abs() < 0.5 && block[24].abs() > 0.0);
        assert!(handle.drain_ended().is_empty());

        synth.render(&mut block, 2);
        assert_eq!(handle.drain_ended(), vec![id]);
    }

    #[test]
    fn test_master_gain_and_disconnect() {
        let (mut synth, mut handle) = synth_pair(1000);
        handle.set_master_gain(0.0).unwrap();
        handle.start_voice(tone(0.0, None)).unwrap();
        let mut block = vec![1.0f32; 10];
        synth.render(&mut block, 1);
        assert!(block.iter().all(|&s| s == 0.0));

        drop(synth);
        assert!(matches!(
            handle.start_voice(tone(0.0, None)),
            Err(Error::Device(_))
        ));
    }
}
