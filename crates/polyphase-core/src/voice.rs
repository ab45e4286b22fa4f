//! Voice lifecycle management.
//!
//! Three kinds of voices are tracked:
//!
//! - standard voices: fixed duration, envelope fully inside the note, removed
//!   when the sink reports them ended
//! - legato voices: at most one per layer, held until retriggered, legato is
//!   switched off, or playback stops
//! - bridge voices: a held copy of the last pitch of the most recently active
//!   layer, covering the gap after a tempo change flushes everything

use crate::audio::{AudioSink, Breakpoint, VoiceId, VoiceSpec, Waveform};
use crate::error::{Error, Result};
use crate::event_table::EventTable;
use crate::filter::{Audibility, RatioIndex};
use crate::tone_row::NoteDescriptor;
use crate::MAX_LAYERS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Fade used when a tempo change flushes voices.
pub const CLEANUP_FADE_SECONDS: f64 = 0.02;

/// Fade used for legato handover and bridge release.
pub const LEGATO_FADE_SECONDS: f64 = 0.01;

/// Longest attack of a legato or bridge voice.
pub const LEGATO_MAX_ATTACK_SECONDS: f64 = 0.01;

/// Ended voices whose callback never arrives are dropped this long after
/// their planned end.
const REAP_GRACE_SECONDS: f64 = 1.0;

/// Attack, decay, sustain, release envelope.
///
/// Times are in seconds, sustain is a level in `0..=1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Adsr {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Default for Adsr {
    fn default() -> Self {
        Self {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.1,
        }
    }
}

impl Adsr {
    pub fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Result<Self> {
        let adsr = Self {
            attack,
            decay,
            sustain,
            release,
        };
        adsr.validate()?;
        Ok(adsr)
    }

    /// Check that times are finite and non-negative and sustain is in range.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("attack", self.attack),
            ("decay", self.decay),
            ("release", self.release),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidEnvelope(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, value
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.sustain) {
            return Err(Error::InvalidEnvelope(format!(
                "sustain must be within 0..=1, got {}",
                self.sustain
            )));
        }
        Ok(())
    }

    /// Breakpoints for a note of `duration` seconds starting at `start`.
    ///
    /// Attack, decay and release are scaled down together when they do not fit.
    pub fn breakpoints(&self, start: f64, duration: f64) -> Vec<Breakpoint> {
        let duration = duration.max(0.0);
        let total = self.attack + self.decay + self.release;
        let scale = if total > duration && total > 0.0 {
            duration / total
        } else {
            1.0
        };
        let (a, d, r) = (self.attack * scale, self.decay * scale, self.release * scale);
        let sustain = self.sustain as f32;

        vec![
            Breakpoint::new(start, 0.0),
            Breakpoint::new(start + a, 1.0),
            Breakpoint::new(start + a + d, sustain),
            Breakpoint::new(start + duration - r, sustain),
            Breakpoint::new(start + duration, 0.0),
        ]
    }
}

/// How voices are shaped.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSettings {
    pub envelope: Adsr,
    pub gain: f32,
    pub waveform: Waveform,
    pub legato: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            envelope: Adsr::default(),
            gain: 0.2,
            waveform: Waveform::Sine,
            legato: false,
        }
    }
}

/// A voice owned by the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub id: VoiceId,
    pub layer: usize,
    pub frequency: f64,
    pub release_seconds: f64,
    pub sustain_level: f64,
    /// `None` while held until an explicit release.
    pub end_time: Option<f64>,
}

#[derive(Debug, Clone)]
struct Bridge {
    voice: Voice,
    release_tick: u64,
}

/// The last note played on a layer.
#[derive(Debug, Clone)]
pub struct LastNote {
    pub note: NoteDescriptor,
    pub abs_tick: u64,
    pub start_time: f64,
    pub pulse_seconds: f64,
}

/// Owns every voice started on the sink.
#[derive(Debug, Default)]
pub struct VoiceManager {
    settings: VoiceSettings,
    standard: HashMap<VoiceId, Voice>,
    legato: [Option<Voice>; MAX_LAYERS],
    bridges: [Option<Bridge>; MAX_LAYERS],
    last_notes: [Option<LastNote>; MAX_LAYERS],
    pending_cleanup: bool,
}

impl VoiceManager {
    pub fn new(settings: VoiceSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn set_envelope(&mut self, envelope: Adsr) -> Result<()> {
        envelope.validate()?;
        self.settings.envelope = envelope;
        Ok(())
    }

    pub fn is_legato(&self) -> bool {
        self.settings.legato
    }

    /// Switch legato mode. Turning it off releases every sustained voice.
    pub fn set_legato<S: AudioSink>(&mut self, sink: &mut S, legato: bool) -> Result<()> {
        if self.settings.legato == legato {
            return Ok(());
        }
        self.settings.legato = legato;
        if !legato {
            self.release_legato(sink, LEGATO_FADE_SECONDS)?;
        } else {
            self.clear_bridges(sink)?;
        }
        Ok(())
    }

    /// Play one occurrence.
    ///
    /// Audibility is evaluated here, at dispatch time. A muted occurrence
    /// still releases a bridge that was waiting for it.
    #[allow(clippy::too_many_arguments)]
    pub fn play_event_at_time<S: AudioSink>(
        &mut self,
        sink: &mut S,
        note: &NoteDescriptor,
        duration_seconds: f64,
        layer: usize,
        audibility: &Audibility,
        ratio_index: &RatioIndex,
        start_time: f64,
        abs_tick: u64,
    ) -> Result<Option<VoiceId>> {
        if layer >= MAX_LAYERS {
            return Err(Error::InvalidLayer(layer));
        }

        self.release_bridge_if_due(sink, layer, start_time, abs_tick)?;

        if !audibility.allows(note, layer, ratio_index) {
            log::trace!("layer {} note {} muted at tick {}", layer, note.global_index, abs_tick);
            return Ok(None);
        }

        if self.pending_cleanup {
            let now = sink.current_time();
            self.release_standard(sink, now, CLEANUP_FADE_SECONDS)?;
            self.release_legato_at(sink, now, CLEANUP_FADE_SECONDS)?;
            self.pending_cleanup = false;
        }

        let id = if self.settings.legato {
            self.start_legato(sink, note, layer, start_time)?
        } else {
            self.start_standard(sink, note, layer, start_time, duration_seconds)?
        };

        self.last_notes[layer] = Some(LastNote {
            note: note.clone(),
            abs_tick,
            start_time,
            pulse_seconds: duration_seconds,
        });

        Ok(Some(id))
    }

    fn start_standard<S: AudioSink>(
        &mut self,
        sink: &mut S,
        note: &NoteDescriptor,
        layer: usize,
        start_time: f64,
        duration: f64,
    ) -> Result<VoiceId> {
        let envelope = self.settings.envelope;
        let spec = VoiceSpec {
            frequency: note.frequency,
            start_time,
            envelope: envelope.breakpoints(start_time, duration),
            stop_time: Some(start_time + duration),
            gain: self.settings.gain,
            waveform: self.settings.waveform,
        };
        let id = sink.start_voice(spec)?;
        self.standard.insert(
            id,
            Voice {
                id,
                layer,
                frequency: note.frequency,
                release_seconds: envelope.release,
                sustain_level: envelope.sustain,
                end_time: Some(start_time + duration),
            },
        );
        Ok(id)
    }

    fn start_legato<S: AudioSink>(
        &mut self,
        sink: &mut S,
        note: &NoteDescriptor,
        layer: usize,
        start_time: f64,
    ) -> Result<VoiceId> {
        let mut start_time = start_time;
        if let Some(previous) = self.legato[layer].take() {
            let at = (start_time - LEGATO_FADE_SECONDS).max(sink.current_time());
            sink.release_voice(previous.id, at, LEGATO_FADE_SECONDS)?;
            start_time = start_time.max(at + LEGATO_FADE_SECONDS);
        }

        let voice = self.start_held(sink, layer, note.frequency, start_time)?;
        let id = voice.id;
        self.legato[layer] = Some(voice);
        Ok(id)
    }

    fn start_held<S: AudioSink>(
        &mut self,
        sink: &mut S,
        layer: usize,
        frequency: f64,
        start_time: f64,
    ) -> Result<Voice> {
        let envelope = self.settings.envelope;
        let attack = envelope.attack.min(LEGATO_MAX_ATTACK_SECONDS);
        let spec = VoiceSpec {
            frequency,
            start_time,
            envelope: vec![
                Breakpoint::new(start_time, 0.0),
                Breakpoint::new(start_time + attack, envelope.sustain as f32),
            ],
            stop_time: None,
            gain: self.settings.gain,
            waveform: self.settings.waveform,
        };
        let id = sink.start_voice(spec)?;
        Ok(Voice {
            id,
            layer,
            frequency,
            release_seconds: LEGATO_FADE_SECONDS,
            sustain_level: envelope.sustain,
            end_time: None,
        })
    }

    fn release_bridge_if_due<S: AudioSink>(
        &mut self,
        sink: &mut S,
        layer: usize,
        start_time: f64,
        abs_tick: u64,
    ) -> Result<()> {
        let due = self.bridges[layer]
            .as_ref()
            .is_some_and(|bridge| abs_tick >= bridge.release_tick);
        if due {
            if let Some(bridge) = self.bridges[layer].take() {
                log::debug!("Releasing bridge on layer {} at tick {}", layer, abs_tick);
                sink.release_voice(bridge.voice.id, start_time, LEGATO_FADE_SECONDS)?;
            }
        }
        Ok(())
    }

    /// Flush standard and legato voices before the next note starts.
    pub fn request_cleanup(&mut self) {
        self.pending_cleanup = true;
    }

    pub fn cleanup_pending(&self) -> bool {
        self.pending_cleanup
    }

    /// Layer whose last note started most recently.
    pub fn most_recent_layer(&self) -> Option<usize> {
        self.last_notes
            .iter()
            .enumerate()
            .filter_map(|(layer, last)| last.as_ref().map(|l| (layer, l.start_time)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(layer, _)| layer)
    }

    pub fn last_note(&self, layer: usize) -> Option<&LastNote> {
        self.last_notes.get(layer).and_then(Option::as_ref)
    }

    /// Hold the most recently played pitch until its layer's next event.
    ///
    /// `from_tick` is where scheduling resumes in the rebuilt `table`. Does
    /// nothing in legato mode or when nothing has played yet.
    pub fn arm_bridge<S: AudioSink>(
        &mut self,
        sink: &mut S,
        table: &EventTable,
        from_tick: u64,
        now: f64,
    ) -> Result<Option<VoiceId>> {
        if self.settings.legato {
            return Ok(None);
        }
        self.clear_bridges(sink)?;

        let Some(layer) = self.most_recent_layer() else {
            return Ok(None);
        };
        let Some(release_tick) = table.next_event_tick(layer, from_tick) else {
            return Ok(None);
        };
        let frequency = match &self.last_notes[layer] {
            Some(last) => last.note.frequency,
            None => return Ok(None),
        };

        let voice = self.start_held(sink, layer, frequency, now)?;
        let id = voice.id;
        log::debug!(
            "Bridge armed on layer {} at {:.2} Hz until tick {}",
            layer,
            frequency,
            release_tick
        );
        self.bridges[layer] = Some(Bridge { voice, release_tick });
        Ok(Some(id))
    }

    /// Release every bridge voice now.
    pub fn clear_bridges<S: AudioSink>(&mut self, sink: &mut S) -> Result<()> {
        let now = sink.current_time();
        for bridge in self.bridges.iter_mut().filter_map(Option::take) {
            sink.release_voice(bridge.voice.id, now, LEGATO_FADE_SECONDS)?;
        }
        Ok(())
    }

    /// Bridge release tick per layer.
    pub fn bridge_release_tick(&self, layer: usize) -> Option<u64> {
        self.bridges
            .get(layer)
            .and_then(Option::as_ref)
            .map(|b| b.release_tick)
    }

    fn release_standard<S: AudioSink>(&mut self, sink: &mut S, at: f64, fade: f64) -> Result<()> {
        for (id, _) in self.standard.drain() {
            sink.release_voice(id, at, fade)?;
        }
        Ok(())
    }

    fn release_legato_at<S: AudioSink>(&mut self, sink: &mut S, at: f64, fade: f64) -> Result<()> {
        for voice in self.legato.iter_mut().filter_map(Option::take) {
            sink.release_voice(voice.id, at, fade)?;
        }
        Ok(())
    }

    /// Release every sustained legato voice now.
    pub fn release_legato<S: AudioSink>(&mut self, sink: &mut S, fade: f64) -> Result<()> {
        let now = sink.current_time();
        self.release_legato_at(sink, now, fade)
    }

    /// Release every voice now and forget per-layer history.
    pub fn stop<S: AudioSink>(&mut self, sink: &mut S) -> Result<()> {
        let now = sink.current_time();
        let released = self.active_voice_count();

        // Keep going on sink errors so tracking is cleared regardless.
        let results = [
            self.release_standard(sink, now, CLEANUP_FADE_SECONDS),
            self.release_legato_at(sink, now, CLEANUP_FADE_SECONDS),
            self.clear_bridges(sink),
        ];
        self.standard.clear();
        self.legato = Default::default();
        self.bridges = Default::default();
        self.last_notes = Default::default();
        self.pending_cleanup = false;

        if released > 0 {
            log::debug!("Released {} voices on stop", released);
        }
        results.into_iter().collect()
    }

    /// Handle a voice-ended notification from the sink.
    ///
    /// Unknown ids, including voices already flushed by stop, are ignored.
    pub fn on_voice_ended(&mut self, id: VoiceId) {
        if self.standard.remove(&id).is_some() {
            return;
        }
        for slot in &mut self.legato {
            if slot.as_ref().is_some_and(|v| v.id == id) {
                *slot = None;
                return;
            }
        }
        for slot in &mut self.bridges {
            if slot.as_ref().is_some_and(|b| b.voice.id == id) {
                *slot = None;
                return;
            }
        }
        log::trace!("Ignoring end of untracked voice {}", id);
    }

    /// Drop standard voices whose end notification never arrived.
    pub fn reap_expired(&mut self, now: f64) -> usize {
        let before = self.standard.len();
        self.standard
            .retain(|_, v| v.end_time.is_none_or(|end| end + REAP_GRACE_SECONDS > now));
        let reaped = before - self.standard.len();
        if reaped > 0 {
            log::debug!("Reaped {} voices without end notification", reaped);
        }
        reaped
    }

    /// Standard, legato and bridge voices currently tracked.
    pub fn active_voice_count(&self) -> usize {
        self.standard.len()
            + self.legato.iter().flatten().count()
            + self.bridges.iter().flatten().count()
    }

    /// Sustained legato voice on a layer.
    pub fn legato_voice(&self, layer: usize) -> Option<&Voice> {
        self.legato.get(layer).and_then(Option::as_ref)
    }
}
